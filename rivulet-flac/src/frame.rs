//! Frame header parsing and frame payload decoding.
//!
//! Frames start on byte boundaries with a 14-bit sync code. The scanner
//! walks the stream byte by byte, validates each candidate header against
//! its CRC-8, and rejects candidates with reserved field values; noise can
//! match the sync pattern, so a rejected candidate just resumes the scan.
//! A successfully parsed header leaves the rolling CRC-16 seeded with the
//! header bytes so the whole-frame checksum can be verified after the last
//! subframe.

use rivulet_core::crc::crc8;
use rivulet_core::{BitCache, ByteSource};
use tracing::{debug, warn};

use crate::{accel, subframe, FlacError, Result, StreamInfo, Strictness};

/// Frame numbering, following the stream's blocking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameNumber {
    /// Fixed block size: ordinal frame index.
    Frame(u32),
    /// Variable block size: index of the frame's first PCM frame.
    Sample(u64),
}

/// Stereo channel layout of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAssignment {
    /// Independently coded channels (1-8).
    Independent(u8),
    /// Channel 0 is the left channel, channel 1 the side (left minus right).
    LeftSide,
    /// Channel 0 is the side, channel 1 the right channel.
    RightSide,
    /// Channel 0 is the mid (average), channel 1 the side.
    MidSide,
}

impl ChannelAssignment {
    /// Number of coded channels.
    pub fn channels(&self) -> u8 {
        match *self {
            ChannelAssignment::Independent(n) => n,
            _ => 2,
        }
    }
}

/// One parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame or sample number, per the blocking strategy.
    pub number: FrameNumber,
    /// Block size in PCM frames.
    pub block_size: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channel_assignment: ChannelAssignment,
    /// Bits per sample before stereo decorrelation adjustments.
    pub bits_per_sample: u8,
}

impl FrameHeader {
    /// Number of coded channels.
    pub fn channels(&self) -> u8 {
        self.channel_assignment.channels()
    }

    /// Index of the first PCM frame covered by this frame.
    /// `nominal_block_size` converts ordinal frame numbers in fixed-block
    /// streams.
    pub fn first_pcm_frame(&self, nominal_block_size: u32) -> u64 {
        match self.number {
            FrameNumber::Sample(s) => s,
            FrameNumber::Frame(n) => n as u64 * nominal_block_size as u64,
        }
    }
}

/// Sample rates for header codes 1 through 11, in Hz.
const SAMPLE_RATES: [u32; 11] = [
    88200, 176400, 192000, 8000, 16000, 22050, 24000, 32000, 44100, 48000, 96000,
];

/// A header located by the scanner.
pub(crate) struct ScannedHeader {
    pub header: FrameHeader,
    /// Byte offset of the first sync byte.
    pub sync_offset: u64,
}

fn next_byte<S: ByteSource>(bits: &mut BitCache<S>) -> Result<Option<u8>> {
    match bits.read_u8() {
        Ok(b) => Ok(Some(b)),
        Err(rivulet_core::Error::EndOfStream) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Scan forward from the current byte position for the next valid frame
/// header. Returns `None` when the stream ends before one is found.
///
/// In strict mode a candidate whose CRC-8 fails is an error; structurally
/// invalid candidates are never errors, they are treated as sync-pattern
/// noise in both modes.
pub(crate) fn read_header<S: ByteSource>(
    bits: &mut BitCache<S>,
    info: Option<&StreamInfo>,
    strictness: Strictness,
) -> Result<Option<ScannedHeader>> {
    // A frame discarded mid-subframe can leave the reader unaligned.
    bits.align_to_byte()?;
    let mut b0 = match next_byte(bits)? {
        Some(b) => b,
        None => return Ok(None),
    };
    loop {
        if b0 != 0xFF {
            b0 = match next_byte(bits)? {
                Some(b) => b,
                None => return Ok(None),
            };
            continue;
        }
        let b1 = match next_byte(bits)? {
            Some(b) => b,
            None => return Ok(None),
        };
        if b1 & 0xFE != 0xF8 {
            // The second byte may itself start a sync code.
            b0 = b1;
            continue;
        }

        let sync_offset = bits.position() - 2;
        // The whole-frame CRC covers the sync bytes already consumed.
        bits.reset_crc16(&[b0, b1]);
        match parse_header_body(bits, b1, info) {
            Ok((header, stored, computed)) => {
                if stored != computed {
                    if strictness == Strictness::Strict {
                        return Err(FlacError::FrameHeaderCorrupt {
                            expected: stored,
                            actual: computed,
                        });
                    }
                    warn!(offset = sync_offset, "frame header CRC mismatch, resynchronizing");
                } else {
                    return Ok(Some(ScannedHeader { header, sync_offset }));
                }
            }
            Err(FlacError::InvalidFrameHeader(reason)) => {
                debug!(offset = sync_offset, reason, "sync candidate rejected");
            }
            Err(FlacError::Stream(rivulet_core::Error::EndOfStream)) => return Ok(None),
            Err(e) => return Err(e),
        }
        b0 = match next_byte(bits)? {
            Some(b) => b,
            None => return Ok(None),
        };
    }
}

/// Header bytes after the sync code, buffered for the CRC-8 check.
#[derive(Default)]
struct HeaderBuf {
    buf: [u8; 16],
    len: usize,
}

fn read_raw<S: ByteSource>(bits: &mut BitCache<S>, raw: &mut HeaderBuf) -> Result<u8> {
    let b = bits.read_u8()?;
    raw.buf[raw.len] = b;
    raw.len += 1;
    Ok(b)
}

/// Parse the header fields after the two sync bytes. Returns the header plus
/// the stored and computed CRC-8 values.
fn parse_header_body<S: ByteSource>(
    bits: &mut BitCache<S>,
    b1: u8,
    info: Option<&StreamInfo>,
) -> Result<(FrameHeader, u8, u8)> {
    let variable_block_size = b1 & 0x01 != 0;
    let mut raw = HeaderBuf::default();

    let b2 = read_raw(bits, &mut raw)?;
    let b3 = read_raw(bits, &mut raw)?;
    let bs_code = b2 >> 4;
    let sr_code = b2 & 0x0F;
    let ch_code = b3 >> 4;
    let bps_code = (b3 >> 1) & 0x07;
    if b3 & 0x01 != 0 {
        return Err(FlacError::InvalidFrameHeader("reserved header bit set"));
    }
    if bs_code == 0 {
        return Err(FlacError::InvalidFrameHeader("reserved block size code"));
    }
    let channel_assignment = match ch_code {
        0..=7 => ChannelAssignment::Independent(ch_code + 1),
        8 => ChannelAssignment::LeftSide,
        9 => ChannelAssignment::RightSide,
        10 => ChannelAssignment::MidSide,
        _ => return Err(FlacError::InvalidFrameHeader("reserved channel assignment")),
    };

    let coded = read_coded_number(bits, &mut raw)?;
    let number = if variable_block_size {
        FrameNumber::Sample(coded)
    } else {
        if coded > u32::MAX as u64 {
            return Err(FlacError::InvalidFrameHeader("frame number out of range"));
        }
        FrameNumber::Frame(coded as u32)
    };

    let block_size = match bs_code {
        1 => 192,
        2..=5 => 576u16 << (bs_code - 2),
        6 => read_raw(bits, &mut raw)? as u16 + 1,
        7 => {
            let hi = read_raw(bits, &mut raw)?;
            let lo = read_raw(bits, &mut raw)?;
            let v = (hi as u16) << 8 | lo as u16;
            if v == u16::MAX {
                return Err(FlacError::InvalidFrameHeader("block size out of range"));
            }
            v + 1
        }
        _ => 256u16 << (bs_code - 8),
    };

    let sample_rate = match sr_code {
        0 => match info {
            Some(info) => info.sample_rate,
            None => {
                return Err(FlacError::InvalidFrameHeader(
                    "sample rate deferred without STREAMINFO",
                ))
            }
        },
        1..=11 => SAMPLE_RATES[sr_code as usize - 1],
        12 => read_raw(bits, &mut raw)? as u32 * 1000,
        13 | 14 => {
            let hi = read_raw(bits, &mut raw)?;
            let lo = read_raw(bits, &mut raw)?;
            let v = (hi as u32) << 8 | lo as u32;
            if sr_code == 14 {
                v * 10
            } else {
                v
            }
        }
        _ => return Err(FlacError::InvalidFrameHeader("invalid sample rate code")),
    };

    let bits_per_sample = match bps_code {
        0 => match info {
            Some(info) => info.bits_per_sample,
            None => {
                return Err(FlacError::InvalidFrameHeader(
                    "sample size deferred without STREAMINFO",
                ))
            }
        },
        1 => 8,
        2 => 12,
        4 => 16,
        5 => 20,
        6 => 24,
        7 => 32,
        _ => return Err(FlacError::InvalidFrameHeader("reserved sample size code")),
    };

    let computed = crc8(crc8(0, &[0xFF, b1]), &raw.buf[..raw.len]);
    let stored = bits.read_u8()?;

    Ok((
        FrameHeader {
            number,
            block_size,
            sample_rate,
            channel_assignment,
            bits_per_sample,
        },
        stored,
        computed,
    ))
}

/// Read the UTF-8-style coded frame/sample number (up to 36 bits over a
/// maximum of seven bytes).
fn read_coded_number<S: ByteSource>(bits: &mut BitCache<S>, raw: &mut HeaderBuf) -> Result<u64> {
    let first = read_raw(bits, raw)?;
    let (mut value, extra) = if first & 0x80 == 0 {
        (first as u64, 0)
    } else if first & 0xE0 == 0xC0 {
        ((first & 0x1F) as u64, 1)
    } else if first & 0xF0 == 0xE0 {
        ((first & 0x0F) as u64, 2)
    } else if first & 0xF8 == 0xF0 {
        ((first & 0x07) as u64, 3)
    } else if first & 0xFC == 0xF8 {
        ((first & 0x03) as u64, 4)
    } else if first & 0xFE == 0xFC {
        ((first & 0x01) as u64, 5)
    } else if first == 0xFE {
        (0, 6)
    } else {
        return Err(FlacError::InvalidFrameHeader("malformed coded number"));
    };
    for _ in 0..extra {
        let b = read_raw(bits, raw)?;
        if b & 0xC0 != 0x80 {
            return Err(FlacError::InvalidFrameHeader("malformed coded number"));
        }
        value = value << 6 | (b & 0x3F) as u64;
    }
    Ok(value)
}

/// Decode the subframes of a frame whose header has just been read, undo
/// stereo decorrelation, and verify the whole-frame CRC-16.
///
/// `samples` is resized to `channels * block_size` and filled with planar
/// channel data, one contiguous block per channel.
pub(crate) fn decode_payload<S: ByteSource>(
    bits: &mut BitCache<S>,
    header: &FrameHeader,
    samples: &mut Vec<i32>,
) -> Result<()> {
    let channels = header.channels() as usize;
    let block = header.block_size as usize;
    let base_bps = header.bits_per_sample as u32;
    samples.clear();
    samples.resize(channels * block, 0);

    for ch in 0..channels {
        // The side channel carries one extra bit.
        let bps = match header.channel_assignment {
            ChannelAssignment::LeftSide | ChannelAssignment::MidSide if ch == 1 => base_bps + 1,
            ChannelAssignment::RightSide if ch == 0 => base_bps + 1,
            _ => base_bps,
        };
        subframe::decode(bits, bps, &mut samples[ch * block..(ch + 1) * block])?;
    }

    bits.align_to_byte()?;
    let computed = bits.crc16();
    let stored = bits.read_u32(16)? as u16;
    if stored != computed {
        return Err(FlacError::FrameChecksumCorrupt {
            expected: stored,
            actual: computed,
        });
    }

    let kernels = accel::kernels();
    match header.channel_assignment {
        ChannelAssignment::Independent(_) => {}
        ChannelAssignment::LeftSide => {
            let (left, side) = samples.split_at_mut(block);
            kernels.left_side(left, side);
        }
        ChannelAssignment::RightSide => {
            let (side, right) = samples.split_at_mut(block);
            kernels.right_side(side, right);
        }
        ChannelAssignment::MidSide => {
            let (mid, side) = samples.split_at_mut(block);
            kernels.mid_side(mid, side);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rivulet_core::crc::crc16;
    use rivulet_core::{BitWriter, MemorySource};

    /// Append a frame header for a fixed-block stream: frame number 0,
    /// 192-sample blocks, 44.1 kHz, mono, 16 bits.
    fn push_simple_header(out: &mut Vec<u8>) {
        let header = [0xFF, 0xF8, 0x19, 0x08, 0x00];
        out.extend_from_slice(&header);
        out.push(crc8(0, &header));
    }

    fn scan(data: Vec<u8>) -> Result<Option<ScannedHeader>> {
        let mut bits = BitCache::new(MemorySource::new(data));
        read_header(&mut bits, None, Strictness::Lenient)
    }

    #[test]
    fn test_parse_simple_header() {
        let mut data = Vec::new();
        push_simple_header(&mut data);
        let scanned = scan(data).unwrap().unwrap();
        assert_eq!(scanned.sync_offset, 0);
        let h = scanned.header;
        assert_eq!(h.number, FrameNumber::Frame(0));
        assert_eq!(h.block_size, 192);
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.channel_assignment, ChannelAssignment::Independent(1));
        assert_eq!(h.bits_per_sample, 16);
        assert_eq!(h.first_pcm_frame(192), 0);
    }

    #[test]
    fn test_scan_skips_garbage() {
        let mut data = vec![0x00, 0xFF, 0x12, 0x7A, 0xFF];
        push_simple_header(&mut data);
        let scanned = scan(data).unwrap().unwrap();
        assert_eq!(scanned.sync_offset, 5);
    }

    #[test]
    fn test_scan_handles_ff_before_sync() {
        // A 0xFF that fails the second-byte check must re-test that byte,
        // so a sync starting at the failed byte is still found.
        let mut data = vec![0xFF];
        push_simple_header(&mut data);
        let scanned = scan(data).unwrap().unwrap();
        assert_eq!(scanned.sync_offset, 1);
    }

    #[test]
    fn test_eof_returns_none() {
        assert!(scan(vec![0x00, 0x01, 0x02]).unwrap().is_none());
        assert!(scan(vec![]).unwrap().is_none());
        // Truncated mid-header.
        assert!(scan(vec![0xFF, 0xF8, 0x19]).unwrap().is_none());
    }

    #[test]
    fn test_header_crc_mismatch_lenient_resyncs() {
        let mut data = Vec::new();
        push_simple_header(&mut data);
        let len = data.len();
        data[len - 1] ^= 0xFF; // corrupt the CRC
        push_simple_header(&mut data);
        let scanned = scan(data).unwrap().unwrap();
        assert_eq!(scanned.sync_offset, 6);
    }

    #[test]
    fn test_header_crc_mismatch_strict_errors() {
        let mut data = Vec::new();
        push_simple_header(&mut data);
        let len = data.len();
        data[len - 1] ^= 0xFF;
        let mut bits = BitCache::new(MemorySource::new(data));
        assert!(matches!(
            read_header(&mut bits, None, Strictness::Strict),
            Err(FlacError::FrameHeaderCorrupt { .. })
        ));
    }

    #[test]
    fn test_variable_block_size_sample_number() {
        // Blocking strategy bit set; 16-bit block size (1152), 48 kHz,
        // stereo left/side, 16 bits, sample number 70000 (4-byte coded).
        let mut header = vec![0xFF, 0xF9, 0x7A, 0x88];
        // 70000 = 0x11170: 17 bits, 4-byte sequence.
        header.extend_from_slice(&[0xF0, 0x91, 0x85, 0xB0]);
        header.extend_from_slice(&1151u16.to_be_bytes());
        let crc = crc8(0, &header);
        header.push(crc);

        let scanned = scan(header).unwrap().unwrap();
        let h = scanned.header;
        assert_eq!(h.number, FrameNumber::Sample(70000));
        assert_eq!(h.block_size, 1152);
        assert_eq!(h.sample_rate, 48000);
        assert_eq!(h.channel_assignment, ChannelAssignment::LeftSide);
        assert_eq!(h.first_pcm_frame(4096), 70000);
    }

    #[test]
    fn test_reserved_codes_treated_as_noise() {
        // Candidate with reserved block size code 0, followed by a valid
        // header. The scanner must skip the bad candidate.
        let mut data = vec![0xFF, 0xF8, 0x09, 0x08, 0x00, 0x00];
        push_simple_header(&mut data);
        let scanned = scan(data).unwrap().unwrap();
        assert_eq!(scanned.sync_offset, 6);
    }

    #[test]
    fn test_deferred_sample_rate_needs_stream_info() {
        // Sample rate code 0 with no STREAMINFO available is rejected.
        let header = [0xFF, 0xF8, 0x10, 0x08, 0x00];
        let mut data = header.to_vec();
        data.push(crc8(0, &header));
        assert!(scan(data).unwrap().is_none());

        let info = StreamInfo {
            min_block_size: 192,
            max_block_size: 192,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: 32000,
            channels: 1,
            bits_per_sample: 16,
            total_pcm_frames: 0,
            md5: [0; 16],
        };
        let header = [0xFF, 0xF8, 0x10, 0x08, 0x00];
        let mut data = header.to_vec();
        data.push(crc8(0, &header));
        let mut bits = BitCache::new(MemorySource::new(data));
        let scanned = read_header(&mut bits, Some(&info), Strictness::Lenient)
            .unwrap()
            .unwrap();
        assert_eq!(scanned.header.sample_rate, 32000);
    }

    #[test]
    fn test_decode_payload_constant_frame_with_crc() {
        // Mono frame, 192 samples, constant subframe of value 1000, with a
        // valid whole-frame CRC-16.
        let mut frame = Vec::new();
        push_simple_header(&mut frame);
        let mut body = BitWriter::new();
        body.write_bits(0, 1);
        body.write_bits(0, 6);
        body.write_bits(0, 1);
        body.write_bits(1000, 16);
        body.align_to_byte();
        frame.extend_from_slice(body.data());
        let crc = crc16(0, &frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        let mut bits = BitCache::new(MemorySource::new(frame));
        let scanned = read_header(&mut bits, None, Strictness::Lenient)
            .unwrap()
            .unwrap();
        let mut samples = Vec::new();
        decode_payload(&mut bits, &scanned.header, &mut samples).unwrap();
        assert_eq!(samples.len(), 192);
        assert!(samples.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_decode_payload_detects_crc_mismatch() {
        let mut frame = Vec::new();
        push_simple_header(&mut frame);
        let mut body = BitWriter::new();
        body.write_bits(0, 1);
        body.write_bits(0, 6);
        body.write_bits(0, 1);
        body.write_bits(1000, 16);
        body.align_to_byte();
        frame.extend_from_slice(body.data());
        let crc = crc16(0, &frame) ^ 0x0001;
        frame.extend_from_slice(&crc.to_be_bytes());

        let mut bits = BitCache::new(MemorySource::new(frame));
        let scanned = read_header(&mut bits, None, Strictness::Lenient)
            .unwrap()
            .unwrap();
        let mut samples = Vec::new();
        assert!(matches!(
            decode_payload(&mut bits, &scanned.header, &mut samples),
            Err(FlacError::FrameChecksumCorrupt { .. })
        ));
    }

    #[test]
    fn test_decode_payload_left_side_stereo() {
        // Left/side frame: left constant 100, side constant 20 (at 17 bits),
        // so the right channel reconstructs to 80.
        let header = [0xFF, 0xF8, 0x19, 0x88, 0x00];
        let mut frame = header.to_vec();
        frame.push(crc8(0, &header));
        let mut body = BitWriter::new();
        for &(value, depth) in &[(100u32, 16u32), (20, 17)] {
            body.write_bits(0, 1);
            body.write_bits(0, 6);
            body.write_bits(0, 1);
            body.write_bits(value, depth);
        }
        body.align_to_byte();
        frame.extend_from_slice(body.data());
        let crc = crc16(0, &frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        let mut bits = BitCache::new(MemorySource::new(frame));
        let scanned = read_header(&mut bits, None, Strictness::Lenient)
            .unwrap()
            .unwrap();
        let mut samples = Vec::new();
        decode_payload(&mut bits, &scanned.header, &mut samples).unwrap();
        assert_eq!(samples.len(), 2 * 192);
        assert!(samples[..192].iter().all(|&s| s == 100));
        assert!(samples[192..].iter().all(|&s| s == 80));
    }

    /// Build, scan, and decode a stereo constant frame with the given
    /// channel assignment code and per-channel (value, depth) pairs.
    fn decode_stereo_constant(ch_code: u8, subframes: [(u32, u32); 2]) -> Vec<i32> {
        let header = [0xFF, 0xF8, 0x19, ch_code << 4 | 0x08, 0x00];
        let mut frame = header.to_vec();
        frame.push(crc8(0, &header));
        let mut body = BitWriter::new();
        for &(value, depth) in &subframes {
            body.write_bits(0, 1);
            body.write_bits(0, 6);
            body.write_bits(0, 1);
            body.write_bits(value, depth);
        }
        body.align_to_byte();
        frame.extend_from_slice(body.data());
        let crc = crc16(0, &frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        let mut bits = BitCache::new(MemorySource::new(frame));
        let scanned = read_header(&mut bits, None, Strictness::Lenient)
            .unwrap()
            .unwrap();
        let mut samples = Vec::new();
        decode_payload(&mut bits, &scanned.header, &mut samples).unwrap();
        samples
    }

    #[test]
    fn test_decode_payload_mid_side_stereo() {
        // left 100, right 80: mid = 90, side = 20 (side coded at 17 bits).
        let samples = decode_stereo_constant(10, [(90, 16), (20, 17)]);
        assert!(samples[..192].iter().all(|&s| s == 100));
        assert!(samples[192..].iter().all(|&s| s == 80));
    }

    #[test]
    fn test_decode_payload_right_side_stereo() {
        // side 20 (17 bits), right 80: left reconstructs to 100.
        let samples = decode_stereo_constant(9, [(20, 17), (80, 16)]);
        assert!(samples[..192].iter().all(|&s| s == 100));
        assert!(samples[192..].iter().all(|&s| s == 80));
    }
}
