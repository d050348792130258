//! The pull-based FLAC decoder.
//!
//! [`FlacDecoder`] owns a [`BitCache`] over the caller's byte source and
//! exposes interleaved PCM reads in three output formats. Frames are decoded
//! lazily, one at a time, into a planar sample buffer; reads drain that
//! buffer and pull the next frame on demand, so a read may span any number
//! of frame boundaries.

use rivulet_core::{BitCache, ByteSource};
use tracing::{debug, warn};

use crate::frame::{self, FrameHeader, ScannedHeader};
use crate::metadata::{self, MetadataBlock};
use crate::{
    accel, Container, DecoderOptions, FlacError, Result, SeekPoint, StreamInfo, Strictness,
};

/// State of the frame currently being drained.
pub(crate) struct CurrentFrame {
    pub header: FrameHeader,
    /// PCM frames not yet handed to the caller.
    pub remaining: u32,
    /// Byte offset of the frame's first sync byte.
    pub start_offset: u64,
}

/// A streaming FLAC decoder over an arbitrary [`ByteSource`].
pub struct FlacDecoder<S: ByteSource> {
    pub(crate) bits: BitCache<S>,
    pub(crate) info: StreamInfo,
    pub(crate) options: DecoderOptions,
    pub(crate) seek_points: Vec<SeekPoint>,
    /// Byte offset of the first frame (end of the metadata section).
    pub(crate) first_frame_offset: u64,
    /// Block size used to convert ordinal frame numbers to PCM positions.
    pub(crate) nominal_block_size: u32,
    /// Index of the next PCM frame a read would return.
    pub(crate) next_pcm_frame: u64,
    pub(crate) frame: Option<CurrentFrame>,
    /// Planar decoded samples of the current frame, one block per channel.
    pub(crate) samples: Vec<i32>,
}

impl<S: ByteSource> FlacDecoder<S> {
    /// Open a native FLAC stream with default options.
    pub fn open(source: S) -> Result<Self> {
        Self::open_full(source, DecoderOptions::default(), None)
    }

    /// Open with explicit options.
    pub fn open_with_options(source: S, options: DecoderOptions) -> Result<Self> {
        Self::open_full(source, options, None)
    }

    /// Open and hand every metadata block to `sink` as it is parsed. The
    /// blocks borrow transient buffers and are only valid inside the
    /// callback.
    pub fn open_with_metadata(
        source: S,
        options: DecoderOptions,
        sink: &mut dyn FnMut(&MetadataBlock<'_>),
    ) -> Result<Self> {
        Self::open_full(source, options, Some(sink))
    }

    fn open_full(
        source: S,
        options: DecoderOptions,
        sink: Option<metadata::MetadataSink<'_>>,
    ) -> Result<Self> {
        if options.container == Container::Ogg {
            return Err(FlacError::Unsupported(
                "Ogg encapsulation must be demultiplexed by the byte source",
            ));
        }
        let mut bits = BitCache::new(source);
        let mut marker = [0u8; 4];
        bits.read_bytes(&mut marker)
            .map_err(|_| FlacError::InvalidMarker)?;
        if &marker == b"OggS" {
            return Err(FlacError::Unsupported(
                "Ogg encapsulation must be demultiplexed by the byte source",
            ));
        }

        if &marker == b"fLaC" {
            let parsed = metadata::read_all(&mut bits, sink)?;
            match parsed.stream_info {
                Some(info) => Self::open_streamed(bits, options, info, parsed.seek_points),
                None if options.relaxed => Self::open_relaxed(bits, options),
                None => Err(FlacError::MissingStreamInfo),
            }
        } else if options.relaxed {
            // The marker probe consumed four bytes that may already belong
            // to a frame; rewind if the source allows it.
            if bits.seek_to(0).is_err() {
                warn!("source cannot rewind, relaxed frame scan starts four bytes in");
            }
            Self::open_relaxed(bits, options)
        } else {
            Err(FlacError::InvalidMarker)
        }
    }

    fn open_streamed(
        bits: BitCache<S>,
        options: DecoderOptions,
        info: StreamInfo,
        seek_points: Vec<SeekPoint>,
    ) -> Result<Self> {
        let first_frame_offset = bits.position();
        debug!(
            sample_rate = info.sample_rate,
            channels = info.channels,
            bits_per_sample = info.bits_per_sample,
            total_pcm_frames = info.total_pcm_frames,
            seek_points = seek_points.len(),
            "opened FLAC stream"
        );
        let nominal_block_size = info.max_block_size as u32;
        Ok(FlacDecoder {
            bits,
            info,
            options,
            seek_points,
            first_frame_offset,
            nominal_block_size,
            next_pcm_frame: 0,
            frame: None,
            samples: Vec::new(),
        })
    }

    /// Bootstrap from a raw frame sequence: scan for the first valid frame
    /// and lift the stream parameters out of its header.
    fn open_relaxed(mut bits: BitCache<S>, options: DecoderOptions) -> Result<Self> {
        let scanned = frame::read_header(&mut bits, None, Strictness::Lenient)?
            .ok_or(FlacError::MissingStreamInfo)?;
        let h = scanned.header;
        let info = StreamInfo {
            min_block_size: h.block_size,
            max_block_size: h.block_size,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: h.sample_rate,
            channels: h.channels(),
            bits_per_sample: h.bits_per_sample,
            total_pcm_frames: 0,
            md5: [0; 16],
        };
        debug!(
            sample_rate = info.sample_rate,
            channels = info.channels,
            bits_per_sample = info.bits_per_sample,
            offset = scanned.sync_offset,
            "opened headerless FLAC stream from first frame"
        );
        let mut decoder = FlacDecoder {
            bits,
            info,
            options,
            seek_points: Vec::new(),
            first_frame_offset: scanned.sync_offset,
            nominal_block_size: h.block_size as u32,
            next_pcm_frame: h.first_pcm_frame(h.block_size as u32),
            frame: None,
            samples: Vec::new(),
        };
        // The bootstrap header is already consumed, so decode its frame now.
        if !decoder.finish_frame(scanned)? {
            decoder.decode_next_frame()?;
        }
        Ok(decoder)
    }

    /// The stream parameters (parsed, or inferred in relaxed mode).
    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    /// Seek table entries, placeholders excluded.
    pub fn seek_points(&self) -> &[SeekPoint] {
        &self.seek_points
    }

    /// Total length in PCM frames, if the stream declares it.
    pub fn total_pcm_frames(&self) -> Option<u64> {
        if self.info.total_pcm_frames == 0 {
            None
        } else {
            Some(self.info.total_pcm_frames)
        }
    }

    /// Index of the next PCM frame a read would return.
    pub fn current_pcm_frame(&self) -> u64 {
        self.next_pcm_frame
    }

    /// Decode frames until one survives validation, or the stream ends.
    pub(crate) fn decode_next_frame(&mut self) -> Result<bool> {
        self.frame = None;
        loop {
            let scanned =
                match frame::read_header(&mut self.bits, Some(&self.info), self.options.strictness)?
                {
                    Some(s) => s,
                    None => return Ok(false),
                };
            if self.finish_frame(scanned)? {
                return Ok(true);
            }
        }
    }

    /// Decode the payload of a frame whose header has been read. Returns
    /// false if the frame was discarded and the caller should rescan.
    pub(crate) fn finish_frame(&mut self, scanned: ScannedHeader) -> Result<bool> {
        let h = scanned.header;
        if h.channels() != self.info.channels {
            if self.options.strictness == Strictness::Strict {
                return Err(FlacError::InvalidFrameHeader(
                    "channel count differs from STREAMINFO",
                ));
            }
            warn!(
                offset = scanned.sync_offset,
                channels = h.channels(),
                "frame channel count differs from STREAMINFO, discarding"
            );
            return Ok(false);
        }
        match frame::decode_payload(&mut self.bits, &h, &mut self.samples) {
            Ok(()) => {
                self.next_pcm_frame = h.first_pcm_frame(self.nominal_block_size);
                self.frame = Some(CurrentFrame {
                    header: h,
                    remaining: h.block_size as u32,
                    start_offset: scanned.sync_offset,
                });
                Ok(true)
            }
            Err(FlacError::Stream(rivulet_core::Error::EndOfStream)) => {
                // Truncated final frame: treat as ordinary end of stream.
                debug!(offset = scanned.sync_offset, "stream ends mid-frame");
                Ok(false)
            }
            Err(err @ (FlacError::FrameChecksumCorrupt { .. } | FlacError::InvalidSubframe(_))) => {
                if self.options.strictness == Strictness::Strict {
                    return Err(err);
                }
                warn!(offset = scanned.sync_offset, %err, "discarding corrupt frame");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Parameters needed to drain up to `want` PCM frames from the current
    /// frame: (stride, offset, count, shift).
    fn drain_plan(&mut self, want: usize) -> Result<Option<(usize, usize, usize, u32)>> {
        loop {
            match &self.frame {
                Some(f) if f.remaining > 0 => {
                    let block = f.header.block_size as usize;
                    let remaining = f.remaining as usize;
                    let shift = 32 - f.header.bits_per_sample as u32;
                    let count = want.min(remaining);
                    return Ok(Some((block, block - remaining, count, shift)));
                }
                _ => {
                    if !self.decode_next_frame()? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    pub(crate) fn advance(&mut self, count: usize) {
        if let Some(f) = &mut self.frame {
            f.remaining -= count as u32;
        }
        self.next_pcm_frame += count as u64;
    }

    /// Read up to `out.len() / channels` PCM frames as interleaved signed
    /// 32-bit samples scaled to full range. Returns the number of whole PCM
    /// frames written; 0 means end of stream.
    pub fn read_pcm_frames_s32(&mut self, out: &mut [i32]) -> Result<u64> {
        let channels = self.info.channels as usize;
        let max_frames = out.len() / channels;
        let mut done = 0usize;
        while done < max_frames {
            let (stride, offset, count, shift) = match self.drain_plan(max_frames - done)? {
                Some(plan) => plan,
                None => break,
            };
            accel::kernels().interleave_s32(
                &self.samples,
                stride,
                offset,
                channels,
                shift,
                &mut out[done * channels..(done + count) * channels],
            );
            self.advance(count);
            done += count;
        }
        Ok(done as u64)
    }

    /// Read interleaved signed 16-bit samples. Higher-depth streams are
    /// truncated, lower-depth streams are scaled up.
    pub fn read_pcm_frames_s16(&mut self, out: &mut [i16]) -> Result<u64> {
        let channels = self.info.channels as usize;
        let max_frames = out.len() / channels;
        let mut done = 0usize;
        while done < max_frames {
            let (stride, offset, count, shift) = match self.drain_plan(max_frames - done)? {
                Some(plan) => plan,
                None => break,
            };
            accel::kernels().interleave_s16(
                &self.samples,
                stride,
                offset,
                channels,
                shift,
                &mut out[done * channels..(done + count) * channels],
            );
            self.advance(count);
            done += count;
        }
        Ok(done as u64)
    }

    /// Read interleaved 32-bit float samples in [-1, 1).
    pub fn read_pcm_frames_f32(&mut self, out: &mut [f32]) -> Result<u64> {
        let channels = self.info.channels as usize;
        let max_frames = out.len() / channels;
        let mut done = 0usize;
        while done < max_frames {
            let (stride, offset, count, shift) = match self.drain_plan(max_frames - done)? {
                Some(plan) => plan,
                None => break,
            };
            accel::kernels().interleave_f32(
                &self.samples,
                stride,
                offset,
                channels,
                shift,
                &mut out[done * channels..(done + count) * channels],
            );
            self.advance(count);
            done += count;
        }
        Ok(done as u64)
    }

    /// Decode and discard up to `count` PCM frames. Returns the number
    /// actually skipped; short counts mean end of stream.
    pub fn skip_pcm_frames(&mut self, count: u64) -> Result<u64> {
        let mut done = 0u64;
        while done < count {
            let want = usize::try_from(count - done).unwrap_or(usize::MAX);
            let (_, _, n, _) = match self.drain_plan(want)? {
                Some(plan) => plan,
                None => break,
            };
            self.advance(n);
            done += n as u64;
        }
        Ok(done)
    }
}
