//! Shared FLAC stream synthesis for the integration tests.
//!
//! Builds well-formed native FLAC streams from scratch: marker, STREAMINFO,
//! optional seek table, and fixed-block frames with verbatim or constant
//! subframes. Verbatim frames make the expected decoder output identical to
//! the samples handed to the builder.
//!
//! Each integration test binary uses its own subset of the builder.
#![allow(dead_code)]

use rivulet_core::crc::{crc16, crc8};
use rivulet_core::BitWriter;

const SAMPLE_RATE_CODE_44100: u8 = 9;

pub struct StreamBuilder {
    channels: u8,
    bits_per_sample: u8,
    block_size: u16,
    declare_total: bool,
    seek_points: Vec<(u64, u64, u16)>,
    frames: Vec<Vec<u8>>,
    total: u64,
}

impl StreamBuilder {
    pub fn new(channels: u8, bits_per_sample: u8, block_size: u16) -> Self {
        StreamBuilder {
            channels,
            bits_per_sample,
            block_size,
            declare_total: true,
            seek_points: Vec::new(),
            frames: Vec::new(),
            total: 0,
        }
    }

    /// Leave the STREAMINFO total at zero, as a live-capture stream would.
    pub fn unknown_total(mut self) -> Self {
        self.declare_total = false;
        self
    }

    /// Byte offset of the next pushed frame, relative to the first frame.
    pub fn next_frame_offset(&self) -> u64 {
        self.frames.iter().map(|f| f.len() as u64).sum()
    }

    /// Record a seek table entry for the next pushed frame.
    pub fn seek_point_here(&mut self) {
        self.seek_points
            .push((self.total, self.next_frame_offset(), self.block_size));
    }

    /// Push a frame of verbatim subframes; `planes[ch]` must hold one block
    /// of samples for channel `ch`.
    pub fn push_verbatim_frame(&mut self, planes: &[Vec<i32>]) {
        assert_eq!(planes.len(), self.channels as usize);
        let bps = self.bits_per_sample as u32;
        let mask = if bps == 32 { u32::MAX } else { (1 << bps) - 1 };
        let mut body = BitWriter::new();
        for plane in planes {
            assert_eq!(plane.len(), self.block_size as usize);
            body.write_bits(0, 1);
            body.write_bits(1, 6); // verbatim
            body.write_bits(0, 1);
            for &sample in plane {
                body.write_bits(sample as u32 & mask, bps);
            }
        }
        self.push_frame_body(body);
    }

    /// Push a frame of constant subframes, one value per channel.
    pub fn push_constant_frame(&mut self, values: &[i32]) {
        assert_eq!(values.len(), self.channels as usize);
        let bps = self.bits_per_sample as u32;
        let mask = if bps == 32 { u32::MAX } else { (1 << bps) - 1 };
        let mut body = BitWriter::new();
        for &value in values {
            body.write_bits(0, 1);
            body.write_bits(0, 6); // constant
            body.write_bits(0, 1);
            body.write_bits(value as u32 & mask, bps);
        }
        self.push_frame_body(body);
    }

    fn push_frame_body(&mut self, mut body: BitWriter) {
        let index = self.frames.len() as u64;
        let bps_code = match self.bits_per_sample {
            8 => 1u8,
            12 => 2,
            16 => 4,
            20 => 5,
            24 => 6,
            32 => 7,
            other => panic!("bit depth {other} has no header code"),
        };
        let mut frame = vec![
            0xFF,
            0xF8,
            0x70 | SAMPLE_RATE_CODE_44100, // 16-bit block size follows
            (self.channels - 1) << 4 | bps_code << 1,
        ];
        frame.extend_from_slice(&coded_number(index));
        frame.extend_from_slice(&(self.block_size - 1).to_be_bytes());
        frame.push(crc8(0, &frame));
        body.align_to_byte();
        frame.extend_from_slice(body.data());
        let crc = crc16(0, &frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        self.frames.push(frame);
        self.total += self.block_size as u64;
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"fLaC");

        let streaminfo_last = self.seek_points.is_empty();
        out.push(if streaminfo_last { 0x80 } else { 0x00 });
        out.extend_from_slice(&[0, 0, 34]);
        let total = if self.declare_total { self.total } else { 0 };
        out.extend_from_slice(&self.block_size.to_be_bytes());
        out.extend_from_slice(&self.block_size.to_be_bytes());
        out.extend_from_slice(&[0; 6]); // frame size bounds unknown
        // 44100 Hz, channels, bit depth, 36-bit total
        let rate = 44100u32;
        out.push((rate >> 12) as u8);
        out.push((rate >> 4) as u8);
        out.push(
            ((rate & 0x0F) as u8) << 4
                | (self.channels - 1) << 1
                | ((self.bits_per_sample - 1) >> 4),
        );
        out.push(((self.bits_per_sample - 1) & 0x0F) << 4 | ((total >> 32) & 0x0F) as u8);
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(&[0; 16]);

        if !self.seek_points.is_empty() {
            out.push(0x83); // SEEKTABLE, last
            let len = self.seek_points.len() as u32 * 18;
            out.push((len >> 16) as u8);
            out.push((len >> 8) as u8);
            out.push(len as u8);
            for &(first, offset, count) in &self.seek_points {
                out.extend_from_slice(&first.to_be_bytes());
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&count.to_be_bytes());
            }
        }

        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        out
    }
}

/// Encode a frame/sample number in the extended UTF-8 style used by frame
/// headers (up to 36 bits).
pub fn coded_number(value: u64) -> Vec<u8> {
    if value < 0x80 {
        return vec![value as u8];
    }
    let bits = 64 - value.leading_zeros();
    let extra = match bits {
        0..=11 => 1,
        12..=16 => 2,
        17..=21 => 3,
        22..=26 => 4,
        27..=31 => 5,
        _ => 6,
    };
    let mut out = Vec::with_capacity(extra + 1);
    if extra == 6 {
        out.push(0xFE);
    } else {
        let prefix = !(0xFFu8 >> (extra + 1)) & 0xFF;
        out.push(prefix | (value >> (6 * extra)) as u8);
    }
    for i in (0..extra).rev() {
        out.push(0x80 | ((value >> (6 * i)) & 0x3F) as u8);
    }
    out
}
