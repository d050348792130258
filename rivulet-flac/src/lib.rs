//! # rivulet-flac
//!
//! A pure Rust FLAC decoder over pull-based byte sources.
//!
//! The decoder makes no filesystem or memory-buffer assumptions: callers
//! supply any [`ByteSource`] (a pull read plus a seek primitive) and read
//! interleaved PCM back. Frame headers and frame payloads are CRC-validated,
//! corrupt frames are skipped by resynchronizing on the next sync code, and
//! seeking uses the seek table, a binary search over the compressed stream,
//! or brute-force decoding depending on what the stream supports.
//!
//! ## Example
//!
//! ```no_run
//! use rivulet_core::IoSource;
//! use rivulet_flac::FlacDecoder;
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let file = File::open("audio.flac").unwrap();
//! let mut decoder = FlacDecoder::open(IoSource::new(BufReader::new(file))).unwrap();
//! let info = decoder.stream_info().clone();
//! let mut pcm = vec![0i32; 4096 * info.channels as usize];
//! while decoder.read_pcm_frames_s32(&mut pcm).unwrap() > 0 {
//!     // process interleaved samples
//! }
//! ```

mod accel;
mod decoder;
mod frame;
pub mod metadata;
mod seek;
mod subframe;

pub use decoder::FlacDecoder;
pub use frame::{ChannelAssignment, FrameHeader, FrameNumber};
pub use metadata::{BlockKind, MetadataBlock, MetadataPayload};
pub use subframe::SubframeKind;
pub use rivulet_core::{ByteSource, IoSource, MemorySource, SeekOrigin};

use thiserror::Error;

/// FLAC decoder error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlacError {
    /// The stream does not start with the `fLaC` marker.
    #[error("invalid FLAC stream marker")]
    InvalidMarker,

    /// The mandatory STREAMINFO block is missing.
    #[error("missing STREAMINFO metadata block")]
    MissingStreamInfo,

    /// A metadata block is structurally invalid.
    #[error("invalid metadata block: {0}")]
    InvalidMetadata(&'static str),

    /// A frame header failed its CRC-8 check.
    #[error("frame header CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    FrameHeaderCorrupt {
        /// CRC stored in the stream.
        expected: u8,
        /// CRC computed over the header bytes.
        actual: u8,
    },

    /// A frame failed its trailing CRC-16 check.
    #[error("frame CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    FrameChecksumCorrupt {
        /// CRC stored in the stream.
        expected: u16,
        /// CRC computed over the frame bytes.
        actual: u16,
    },

    /// A frame header field holds a reserved or inconsistent value.
    #[error("invalid frame header: {0}")]
    InvalidFrameHeader(&'static str),

    /// A subframe is structurally invalid.
    #[error("invalid subframe: {0}")]
    InvalidSubframe(&'static str),

    /// The seek target lies beyond the end of a known-length stream.
    #[error("seek target beyond end of stream")]
    SeekOutOfRange,

    /// No seek strategy could complete the requested seek.
    #[error("seek could not be completed")]
    SeekFailed,

    /// The stream uses a feature this decoder does not handle.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Stream-layer error (end of stream, refused byte seek).
    #[error("stream error: {0}")]
    Stream(#[from] rivulet_core::Error),
}

/// Result type alias using [`FlacError`].
pub type Result<T> = std::result::Result<T, FlacError>;

/// STREAMINFO: immutable stream parameters, set exactly once at open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Minimum block size in PCM frames.
    pub min_block_size: u16,
    /// Maximum block size in PCM frames.
    pub max_block_size: u16,
    /// Minimum compressed frame size in bytes (0 = unknown).
    pub min_frame_size: u32,
    /// Maximum compressed frame size in bytes (0 = unknown).
    pub max_frame_size: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels (1-8).
    pub channels: u8,
    /// Bits per sample (4-32).
    pub bits_per_sample: u8,
    /// Total PCM frames in the stream (0 = unknown / streaming).
    pub total_pcm_frames: u64,
    /// MD5 checksum of the unencoded audio data.
    pub md5: [u8; 16],
}

/// One entry of the seek table: maps a PCM frame index to the byte offset of
/// the compressed frame that contains it, relative to the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    /// First PCM frame index covered by the target frame.
    pub first_pcm_frame: u64,
    /// Byte offset of the target frame from the start of the first frame.
    pub frame_offset: u64,
    /// Number of PCM frames in the target frame.
    pub pcm_frame_count: u16,
}

/// Outer framing of the compressed stream.
///
/// Ogg encapsulation is not demultiplexed here; an Ogg demuxer is just
/// another [`ByteSource`] feeding native FLAC frames to this decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    /// Native FLAC framing (`fLaC` marker + metadata blocks + frames).
    #[default]
    Native,
    /// Ogg-encapsulated FLAC.
    Ogg,
}

/// How to react to per-frame CRC failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Discard the corrupt frame and resynchronize at the next sync code.
    #[default]
    Lenient,
    /// Surface the corruption as an error.
    Strict,
}

/// Seek strategy selection, injected at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekMode {
    /// Try seek table, then binary search, then brute force.
    #[default]
    Auto,
    /// Only use the seek table.
    SeekTable,
    /// Only use binary search over the compressed byte range.
    BinarySearch,
    /// Only use brute-force sequential decoding.
    BruteForce,
}

/// Decoder configuration passed at open time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderOptions {
    /// Open streams without a `fLaC` marker or STREAMINFO by scanning for
    /// the first valid frame and inferring stream parameters from it.
    pub relaxed: bool,
    /// Expected container framing. Only used in relaxed mode, where the
    /// marker is unavailable to detect it.
    pub container: Container,
    /// Reaction to frame CRC failures.
    pub strictness: Strictness,
    /// Seek strategy selection.
    pub seek_mode: SeekMode,
}
