//! Stereo reconstruction and interleaving kernels.
//!
//! Per-sample work after subframe decoding (undoing stereo decorrelation and
//! interleaving planar channels into the caller's buffer) goes through the
//! [`Kernels`] trait so widened implementations can be slotted in per target.
//! Selection happens once at first use based on runtime CPU capabilities;
//! the portable scalar kernels are the reference and run everywhere.

use std::sync::OnceLock;

use tracing::debug;

/// Per-sample reconstruction and output conversion kernels.
///
/// The stereo methods operate in place on the two decoded channel planes,
/// with two's-complement wrapping. The interleave methods read planar
/// samples, one `stride`-spaced plane per channel starting at `offset`, scale
/// them to 32-bit range with `shift`, and write `out.len() / channels`
/// interleaved PCM frames.
pub(crate) trait Kernels: Send + Sync {
    /// Left/side: channel 1 holds `left - right`, recover the right channel.
    fn left_side(&self, left: &[i32], side: &mut [i32]);
    /// Right/side: channel 0 holds `left - right`, recover the left channel.
    fn right_side(&self, side: &mut [i32], right: &[i32]);
    /// Mid/side: recover left and right from the average and difference.
    fn mid_side(&self, mid: &mut [i32], side: &mut [i32]);

    fn interleave_s32(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [i32],
    );
    fn interleave_s16(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [i16],
    );
    fn interleave_f32(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [f32],
    );
}

struct Scalar;

impl Kernels for Scalar {
    fn left_side(&self, left: &[i32], side: &mut [i32]) {
        for (l, s) in left.iter().zip(side.iter_mut()) {
            *s = l.wrapping_sub(*s);
        }
    }

    fn right_side(&self, side: &mut [i32], right: &[i32]) {
        for (s, r) in side.iter_mut().zip(right.iter()) {
            *s = s.wrapping_add(*r);
        }
    }

    fn mid_side(&self, mid: &mut [i32], side: &mut [i32]) {
        for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
            let widened = m.wrapping_shl(1) | (*s & 1);
            let diff = *s;
            *m = widened.wrapping_add(diff) >> 1;
            *s = widened.wrapping_sub(diff) >> 1;
        }
    }

    fn interleave_s32(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [i32],
    ) {
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = planes[ch * stride + offset + i] << shift;
            }
        }
    }

    fn interleave_s16(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [i16],
    ) {
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = ((planes[ch * stride + offset + i] << shift) >> 16) as i16;
            }
        }
    }

    fn interleave_f32(
        &self,
        planes: &[i32],
        stride: usize,
        offset: usize,
        channels: usize,
        shift: u32,
        out: &mut [f32],
    ) {
        const SCALE: f32 = 1.0 / 2147483648.0;
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = (planes[ch * stride + offset + i] << shift) as f32 * SCALE;
            }
        }
    }
}

/// Runtime CPU capabilities relevant to the reconstruction kernels.
#[derive(Debug, Clone, Copy)]
struct Capabilities {
    sse41: bool,
    avx2: bool,
    neon: bool,
}

impl Capabilities {
    fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Capabilities {
                sse41: is_x86_feature_detected!("sse4.1"),
                avx2: is_x86_feature_detected!("avx2"),
                neon: false,
            }
        }
        #[cfg(target_arch = "aarch64")]
        {
            Capabilities {
                sse41: false,
                avx2: false,
                neon: true,
            }
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Capabilities {
                sse41: false,
                avx2: false,
                neon: false,
            }
        }
    }
}

/// The process-wide kernel selection.
pub(crate) fn kernels() -> &'static dyn Kernels {
    static SELECTED: OnceLock<&'static dyn Kernels> = OnceLock::new();
    *SELECTED.get_or_init(|| {
        let caps = Capabilities::detect();
        debug!(
            sse41 = caps.sse41,
            avx2 = caps.avx2,
            neon = caps.neon,
            backend = "scalar",
            "selected reconstruction kernels"
        );
        // Scalar is the only backend so far; wider implementations register
        // here once they land.
        &Scalar
    })
}
