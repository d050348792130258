//! Seeking to arbitrary PCM frame positions.
//!
//! Three strategies, tried in order under [`SeekMode::Auto`]: the seek
//! table, a binary search over the compressed byte range (needs a source
//! with a known length), and brute-force forward decoding. Each strategy
//! lands on a frame boundary at or before the target and forward-decodes
//! the rest. Bounds are checked before any state changes, and a failed
//! seek restores the previous decode position.

use rivulet_core::ByteSource;
use tracing::{debug, trace, warn};

use crate::decoder::FlacDecoder;
use crate::frame;
use crate::{FlacError, Result, SeekMode, Strictness};

/// Byte distance at which binary search stops narrowing and falls back to
/// forward decoding.
const BINARY_SEARCH_WINDOW: u64 = 16 * 1024;

/// Decode position snapshot for rollback after a failed seek.
pub(crate) struct Cursor {
    next_pcm_frame: u64,
    /// Current frame's sync offset and undelivered sample count.
    frame: Option<(u64, u32)>,
}

impl<S: ByteSource> FlacDecoder<S> {
    /// Position the decoder so the next read starts at PCM frame `target`.
    ///
    /// Seeking to the total frame count is allowed and leaves the decoder
    /// at end of stream. On error the previous position is restored.
    pub fn seek_to_pcm_frame(&mut self, target: u64) -> Result<()> {
        if self.info.total_pcm_frames != 0 && target > self.info.total_pcm_frames {
            return Err(FlacError::SeekOutOfRange);
        }
        if target == self.next_pcm_frame {
            return Ok(());
        }
        // The target may lie inside the frame already decoded.
        if let Some(f) = &mut self.frame {
            let block = f.header.block_size as u64;
            let delivered = block - f.remaining as u64;
            let frame_first = self.next_pcm_frame - delivered;
            if target >= frame_first && target < frame_first + block {
                f.remaining = (block - (target - frame_first)) as u32;
                self.next_pcm_frame = target;
                return Ok(());
            }
        }

        let saved = self.cursor();
        match self.seek_dispatch(target) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.restore(saved);
                Err(FlacError::SeekFailed)
            }
            Err(e) => {
                self.restore(saved);
                Err(e)
            }
        }
    }

    fn seek_dispatch(&mut self, target: u64) -> Result<bool> {
        match self.options.seek_mode {
            SeekMode::Auto => {
                if self.seek_via_table(target)? {
                    return Ok(true);
                }
                if self.seek_via_binary_search(target)? {
                    return Ok(true);
                }
                self.seek_via_brute_force(target)
            }
            SeekMode::SeekTable => self.seek_via_table(target),
            SeekMode::BinarySearch => self.seek_via_binary_search(target),
            SeekMode::BruteForce => self.seek_via_brute_force(target),
        }
    }

    /// Jump to the closest preceding seek point, then decode forward.
    fn seek_via_table(&mut self, target: u64) -> Result<bool> {
        let point = match self
            .seek_points
            .iter()
            .filter(|p| p.first_pcm_frame <= target)
            .max_by_key(|p| p.first_pcm_frame)
        {
            Some(p) => *p,
            None => return Ok(false),
        };
        let offset = self.first_frame_offset + point.frame_offset;
        if self.bits.seek_to(offset).is_err() {
            debug!(offset, "seek table entry not reachable");
            return Ok(false);
        }
        self.frame = None;
        self.next_pcm_frame = point.first_pcm_frame;
        debug!(target, from = point.first_pcm_frame, "seeking via seek table");
        self.forward_to(target)
    }

    /// Bisect the compressed byte range, probing for frame headers, until
    /// the remaining span is small enough to decode through.
    fn seek_via_binary_search(&mut self, target: u64) -> Result<bool> {
        let stream_len = match self.bits.byte_len() {
            Some(len) => len,
            None => {
                debug!("stream length unknown, binary search unavailable");
                return Ok(false);
            }
        };
        let mut lo = self.first_frame_offset;
        let mut hi = stream_len;
        // Best frame start found at or before the target.
        let mut best: Option<(u64, u64)> = None;
        while hi - lo > BINARY_SEARCH_WINDOW {
            let mid = lo + (hi - lo) / 2;
            if self.bits.seek_to(mid).is_err() {
                // A refused byte seek bounds the search rather than
                // aborting it.
                hi = mid;
                continue;
            }
            self.frame = None;
            match frame::read_header(&mut self.bits, Some(&self.info), Strictness::Lenient)? {
                None => hi = mid,
                Some(scanned) => {
                    let first = scanned.header.first_pcm_frame(self.nominal_block_size);
                    trace!(probe = mid, found = scanned.sync_offset, first, "bisection probe");
                    if first > target {
                        hi = mid;
                    } else {
                        let containing =
                            target < first + scanned.header.block_size as u64;
                        best = Some((scanned.sync_offset, first));
                        lo = mid;
                        if containing {
                            break;
                        }
                    }
                }
            }
        }
        let (start, first) = best.unwrap_or((self.first_frame_offset, 0));
        if self.bits.seek_to(start).is_err() {
            return Ok(false);
        }
        self.frame = None;
        self.next_pcm_frame = first;
        debug!(target, probe_start = start, "seeking via binary search");
        self.forward_to(target)
    }

    /// Decode forward from the current position, rewinding to the first
    /// frame when the target lies behind.
    fn seek_via_brute_force(&mut self, target: u64) -> Result<bool> {
        if target < self.next_pcm_frame {
            if self.bits.seek_to(self.first_frame_offset).is_err() {
                return Ok(false);
            }
            self.frame = None;
            self.next_pcm_frame = 0;
        }
        debug!(target, "seeking via brute force");
        self.forward_to(target)
    }

    /// Decode frames until the target is inside the current frame, then
    /// skip up to it. Returns false when the target cannot be reached.
    fn forward_to(&mut self, target: u64) -> Result<bool> {
        loop {
            let has_samples = matches!(&self.frame, Some(f) if f.remaining > 0);
            if !has_samples {
                if !self.decode_next_frame()? {
                    // Ran off the end. Exact for a seek to the total frame
                    // count; tolerated when the stream length is unknown.
                    return Ok(self.next_pcm_frame == target
                        || self.info.total_pcm_frames == 0);
                }
                if self.next_pcm_frame > target {
                    return Ok(false);
                }
                continue;
            }
            let remaining = match &self.frame {
                Some(f) => f.remaining as u64,
                None => 0,
            };
            let ahead = match target.checked_sub(self.next_pcm_frame) {
                Some(a) => a,
                None => return Ok(false),
            };
            if ahead < remaining {
                self.advance(ahead as usize);
                return Ok(true);
            }
            self.advance(remaining as usize);
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            next_pcm_frame: self.next_pcm_frame,
            frame: self.frame.as_ref().map(|f| (f.start_offset, f.remaining)),
        }
    }

    /// Best-effort rollback to a snapshot taken before a failed seek.
    fn restore(&mut self, saved: Cursor) {
        if !self.try_restore(&saved) {
            warn!("could not restore decode position after failed seek");
            self.frame = None;
        }
    }

    fn try_restore(&mut self, saved: &Cursor) -> bool {
        match saved.frame {
            Some((start, remaining)) => {
                if self.bits.seek_to(start).is_err() {
                    return false;
                }
                self.frame = None;
                let scanned = match frame::read_header(
                    &mut self.bits,
                    Some(&self.info),
                    Strictness::Lenient,
                ) {
                    Ok(Some(s)) if s.sync_offset == start => s,
                    _ => return false,
                };
                if !matches!(self.finish_frame(scanned), Ok(true)) {
                    return false;
                }
                match &mut self.frame {
                    Some(f) => {
                        let delivered = f.header.block_size as u32 - remaining;
                        f.remaining = remaining;
                        self.next_pcm_frame += delivered as u64;
                        true
                    }
                    None => false,
                }
            }
            None => {
                if self.bits.seek_to(self.first_frame_offset).is_err() {
                    return false;
                }
                self.frame = None;
                self.next_pcm_frame = saved.next_pcm_frame;
                true
            }
        }
    }
}
