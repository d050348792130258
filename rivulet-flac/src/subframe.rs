//! Subframe decoding.
//!
//! Each channel of a frame is coded as one subframe: a constant value, raw
//! verbatim samples, or a fixed/LPC predictor with Rice-coded residuals.
//! Samples are decoded at the channel's effective bit depth (the frame depth,
//! plus one for a side channel, minus any wasted bits) and prediction runs in
//! 64-bit accumulators with two's-complement wrap on the way back to 32 bits.

use rivulet_core::{BitCache, ByteSource};

use crate::{FlacError, Result};

/// Subframe coding methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubframeKind {
    /// A single value repeated over the whole block.
    Constant,
    /// Uncompressed samples.
    Verbatim,
    /// Fixed polynomial predictor of the given order (0-4).
    Fixed(u8),
    /// LPC predictor of the given order (1-32).
    Lpc(u8),
}

/// Fixed predictor coefficients for orders 1 through 4, applied to the
/// previous samples in most-recent-first order.
const FIXED_COEFFS: [&[i32]; 5] = [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];

/// Decode one subframe into `out` (one full block for one channel).
/// `bps` is the channel's bit depth before wasted-bit compensation.
pub(crate) fn decode<S: ByteSource>(
    bits: &mut BitCache<S>,
    bps: u32,
    out: &mut [i32],
) -> Result<SubframeKind> {
    if bits.read_u32(1)? != 0 {
        return Err(FlacError::InvalidSubframe("nonzero padding bit"));
    }
    let type_code = bits.read_u32(6)?;
    let kind = match type_code {
        0 => SubframeKind::Constant,
        1 => SubframeKind::Verbatim,
        8..=12 => SubframeKind::Fixed((type_code - 8) as u8),
        32..=63 => SubframeKind::Lpc(((type_code & 0x1F) + 1) as u8),
        _ => return Err(FlacError::InvalidSubframe("reserved subframe type")),
    };

    let wasted = if bits.read_u32(1)? != 0 {
        bits.read_unary()? + 1
    } else {
        0
    };
    let depth = bps
        .checked_sub(wasted)
        .filter(|&d| d >= 1)
        .ok_or(FlacError::InvalidSubframe("wasted bits exceed sample depth"))?;
    if depth > 32 {
        return Err(FlacError::Unsupported("sample depth above 32 bits"));
    }

    match kind {
        SubframeKind::Constant => {
            let value = bits.read_i32(depth)?;
            out.fill(value);
        }
        SubframeKind::Verbatim => {
            for sample in out.iter_mut() {
                *sample = bits.read_i32(depth)?;
            }
        }
        SubframeKind::Fixed(order) => {
            let order = order as usize;
            if order > out.len() {
                return Err(FlacError::InvalidSubframe("predictor order exceeds block size"));
            }
            for sample in out[..order].iter_mut() {
                *sample = bits.read_i32(depth)?;
            }
            decode_residual(bits, order, out)?;
            predict(FIXED_COEFFS[order], 0, order, out);
        }
        SubframeKind::Lpc(order) => {
            let order = order as usize;
            if order > out.len() {
                return Err(FlacError::InvalidSubframe("predictor order exceeds block size"));
            }
            for sample in out[..order].iter_mut() {
                *sample = bits.read_i32(depth)?;
            }
            let precision_code = bits.read_u32(4)?;
            if precision_code == 15 {
                return Err(FlacError::InvalidSubframe("reserved coefficient precision"));
            }
            let shift = bits.read_i32(5)?;
            if shift < 0 {
                return Err(FlacError::InvalidSubframe("negative prediction shift"));
            }
            let mut coeffs = [0i32; 32];
            for coeff in coeffs[..order].iter_mut() {
                *coeff = bits.read_i32(precision_code + 1)?;
            }
            decode_residual(bits, order, out)?;
            predict(&coeffs[..order], shift as u32, order, out);
        }
    }

    if wasted > 0 {
        for sample in out.iter_mut() {
            *sample = sample.wrapping_shl(wasted);
        }
    }
    Ok(kind)
}

/// Run the predictor over `out[order..]`, which holds residuals on entry and
/// reconstructed samples on exit. `coeffs[j]` multiplies the sample `j + 1`
/// positions back.
fn predict(coeffs: &[i32], shift: u32, order: usize, out: &mut [i32]) {
    for i in order..out.len() {
        let mut acc = 0i64;
        for (j, &coeff) in coeffs.iter().enumerate() {
            acc += coeff as i64 * out[i - 1 - j] as i64;
        }
        out[i] = out[i].wrapping_add((acc >> shift) as i32);
    }
}

/// Decode the Rice-partitioned residual section into `out[order..]`.
fn decode_residual<S: ByteSource>(
    bits: &mut BitCache<S>,
    order: usize,
    out: &mut [i32],
) -> Result<()> {
    let method = bits.read_u32(2)?;
    let (param_bits, escape) = match method {
        0 => (4u32, 0x0Fu32),
        1 => (5, 0x1F),
        _ => return Err(FlacError::InvalidSubframe("reserved residual method")),
    };
    let partition_order = bits.read_u32(4)?;
    let partitions = 1usize << partition_order;
    let block_size = out.len();
    if block_size % partitions != 0 {
        return Err(FlacError::InvalidSubframe("partition count does not divide block size"));
    }
    let per_partition = block_size >> partition_order;
    if per_partition < order {
        return Err(FlacError::InvalidSubframe("first partition shorter than predictor order"));
    }

    let mut at = order;
    for partition in 0..partitions {
        let count = if partition == 0 { per_partition - order } else { per_partition };
        let param = bits.read_u32(param_bits)?;
        if param == escape {
            let width = bits.read_u32(5)?;
            for sample in out[at..at + count].iter_mut() {
                *sample = if width == 0 { 0 } else { bits.read_i32(width)? };
            }
        } else {
            for sample in out[at..at + count].iter_mut() {
                let quotient = bits.read_unary()?;
                let remainder = if param == 0 { 0 } else { bits.read_u32(param)? };
                let zigzag = (quotient << param) | remainder;
                *sample = (zigzag >> 1) as i32 ^ -((zigzag & 1) as i32);
            }
        }
        at += count;
    }
    Ok(())
}
