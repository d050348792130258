//! End-to-end decode tests over synthesized native FLAC streams.

mod common;

use common::StreamBuilder;
use pretty_assertions::assert_eq;
use rivulet_flac::{
    BlockKind, DecoderOptions, FlacDecoder, FlacError, MemorySource, MetadataPayload, Strictness,
};

const BLOCK: u16 = 64;

/// Deterministic stereo test signal: left counts up, right counts down.
fn stereo_planes(frame: usize) -> [Vec<i32>; 2] {
    let base = frame as i32 * BLOCK as i32;
    let left = (0..BLOCK as i32).map(|i| base + i).collect();
    let right = (0..BLOCK as i32).map(|i| -(base + i)).collect();
    [left, right]
}

fn stereo_stream(frames: usize) -> Vec<u8> {
    let mut builder = StreamBuilder::new(2, 16, BLOCK);
    for i in 0..frames {
        let planes = stereo_planes(i);
        builder.push_verbatim_frame(&planes);
    }
    builder.build()
}

#[test]
fn decodes_stereo_verbatim_frames_s32() {
    let mut decoder = FlacDecoder::open(MemorySource::new(stereo_stream(3))).unwrap();
    let info = decoder.stream_info().clone();
    assert_eq!(info.channels, 2);
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.total_pcm_frames, 3 * BLOCK as u64);

    let mut pcm = vec![0i32; 3 * BLOCK as usize * 2 + 8];
    let n = decoder.read_pcm_frames_s32(&mut pcm).unwrap();
    assert_eq!(n, 3 * BLOCK as u64);
    for i in 0..3 * BLOCK as usize {
        assert_eq!(pcm[2 * i], (i as i32) << 16, "left sample {i}");
        assert_eq!(pcm[2 * i + 1], (-(i as i32)) << 16, "right sample {i}");
    }
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm).unwrap(), 0);
}

#[test]
fn decodes_stereo_verbatim_frames_s16() {
    let mut decoder = FlacDecoder::open(MemorySource::new(stereo_stream(2))).unwrap();
    let mut pcm = vec![0i16; 2 * BLOCK as usize * 2];
    assert_eq!(decoder.read_pcm_frames_s16(&mut pcm).unwrap(), 2 * BLOCK as u64);
    for i in 0..2 * BLOCK as usize {
        assert_eq!(pcm[2 * i], i as i16);
        assert_eq!(pcm[2 * i + 1], -(i as i16));
    }
}

#[test]
fn decodes_stereo_verbatim_frames_f32() {
    let mut decoder = FlacDecoder::open(MemorySource::new(stereo_stream(1))).unwrap();
    let mut pcm = vec![0f32; BLOCK as usize * 2];
    assert_eq!(decoder.read_pcm_frames_f32(&mut pcm).unwrap(), BLOCK as u64);
    for i in 0..BLOCK as usize {
        let expected = i as f32 / 32768.0;
        assert!((pcm[2 * i] - expected).abs() < 1e-6);
        assert!((pcm[2 * i + 1] + expected).abs() < 1e-6);
    }
}

#[test]
fn scales_24_bit_samples_into_the_top_bits() {
    let mut builder = StreamBuilder::new(1, 24, BLOCK);
    builder.push_constant_frame(&[0x123456]);
    builder.push_constant_frame(&[-0x123456]);
    let mut decoder = FlacDecoder::open(MemorySource::new(builder.build())).unwrap();

    let mut pcm = vec![0i32; 2 * BLOCK as usize];
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm).unwrap(), 2 * BLOCK as u64);
    assert_eq!(pcm[0], 0x123456 << 8);
    assert_eq!(pcm[BLOCK as usize], -0x123456 << 8);
}

#[test]
fn partial_reads_resume_mid_frame() {
    let mut decoder = FlacDecoder::open(MemorySource::new(stereo_stream(2))).unwrap();
    let mut first = vec![0i32; 50 * 2];
    assert_eq!(decoder.read_pcm_frames_s32(&mut first).unwrap(), 50);
    assert_eq!(decoder.current_pcm_frame(), 50);

    let mut rest = vec![0i32; 512];
    assert_eq!(decoder.read_pcm_frames_s32(&mut rest).unwrap(), 2 * BLOCK as u64 - 50);
    assert_eq!(rest[0], 50 << 16);
}

fn corrupt_stream() -> Vec<u8> {
    let mut builder = StreamBuilder::new(1, 16, BLOCK);
    builder.push_constant_frame(&[111]);
    let middle = builder.next_frame_offset();
    builder.push_constant_frame(&[222]);
    let last = builder.next_frame_offset();
    builder.push_constant_frame(&[333]);
    let mut data = builder.build();
    // First frame starts right after the 42-byte header section. Flip a bit
    // inside the middle frame's subframe payload so only the CRC-16 catches
    // it.
    assert!(last - middle >= 8);
    let victim = 42 + middle as usize + 9;
    data[victim] ^= 0x10;
    data
}

#[test]
fn lenient_mode_skips_corrupt_frame_and_resyncs() {
    let mut decoder = FlacDecoder::open(MemorySource::new(corrupt_stream())).unwrap();
    let mut pcm = vec![0i32; 3 * BLOCK as usize];
    let n = decoder.read_pcm_frames_s32(&mut pcm).unwrap();
    // The middle frame is dropped; its position is skipped, not filled.
    assert_eq!(n, 2 * BLOCK as u64);
    assert!(pcm[..BLOCK as usize].iter().all(|&s| s == 111 << 16));
    assert!(pcm[BLOCK as usize..2 * BLOCK as usize]
        .iter()
        .all(|&s| s == 333 << 16));
    assert_eq!(decoder.current_pcm_frame(), 3 * BLOCK as u64);
}

#[test]
fn strict_mode_surfaces_frame_corruption() {
    let options = DecoderOptions {
        strictness: Strictness::Strict,
        ..DecoderOptions::default()
    };
    let mut decoder =
        FlacDecoder::open_with_options(MemorySource::new(corrupt_stream()), options).unwrap();
    let mut pcm = vec![0i32; 3 * BLOCK as usize];
    // Frame 0 is fine; the corrupt frame stops the read.
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm[..BLOCK as usize]).unwrap(), BLOCK as u64);
    assert!(matches!(
        decoder.read_pcm_frames_s32(&mut pcm),
        Err(FlacError::FrameChecksumCorrupt { .. })
    ));
}

#[test]
fn truncated_final_frame_is_end_of_stream() {
    let mut data = stereo_stream(3);
    data.truncate(data.len() - 40); // cut into the last frame
    let mut decoder = FlacDecoder::open(MemorySource::new(data)).unwrap();
    let mut pcm = vec![0i32; 3 * BLOCK as usize * 2];
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm).unwrap(), 2 * BLOCK as u64);
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm).unwrap(), 0);
}

#[test]
fn metadata_sink_sees_inserted_blocks() {
    let mut data = stereo_stream(1);
    // Rewrite STREAMINFO as not-last and splice in a VORBIS_COMMENT block
    // that becomes the last metadata block.
    data[4] = 0x00;
    let mut payload = Vec::new();
    let vendor = b"synthesizer";
    payload.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    payload.extend_from_slice(vendor);
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&(11u32).to_le_bytes());
    payload.extend_from_slice(b"TITLE=Creek");
    let mut block = vec![0x84, 0, 0, payload.len() as u8];
    block.extend_from_slice(&payload);
    data.splice(42..42, block);

    let mut kinds = Vec::new();
    let mut titles = Vec::new();
    let mut sink = |block: &rivulet_flac::MetadataBlock<'_>| {
        kinds.push(block.kind);
        if let MetadataPayload::VorbisComment(vc) = &block.payload {
            assert_eq!(vc.vendor(), b"synthesizer");
            for entry in vc.iter() {
                titles.push(entry.to_vec());
            }
        }
    };
    let mut decoder =
        FlacDecoder::open_with_metadata(MemorySource::new(data), DecoderOptions::default(), &mut sink)
            .unwrap();
    assert_eq!(kinds, vec![BlockKind::StreamInfo, BlockKind::VorbisComment]);
    assert_eq!(titles, vec![b"TITLE=Creek".to_vec()]);

    // The stream still decodes normally after the extra block.
    let mut pcm = vec![0i32; BLOCK as usize * 2];
    assert_eq!(decoder.read_pcm_frames_s32(&mut pcm).unwrap(), BLOCK as u64);
}
