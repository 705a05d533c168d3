// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `quant` module implements affine quantization and range calibration.
//!
//! Quantization maps a real range `[rmin, rmax]` onto an integer range `[qmin, qmax]`:
//!
//! ```text
//! s = (rmax - rmin) / (qmax - qmin)        q = clamp(round(x / s + z), qmin, qmax)
//! z = clamp(round(qmin - rmin / s))        x = s * (q - z)
//! ```
//!
//! Symmetric quantization pins `z = 0` with `s = max(|rmin|, |rmax|) / qmax`. The real range is
//! produced by a [`Calibration`] strategy; per-channel quantization computes independent
//! parameters along one axis.

use crate::errors::{internal_error, invalid_argument_error, unsupported_error, Result};
use crate::kernel::{self, KernelFn};

use super::{DataType, Tensor};

/// Affine quantization parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
    /// The calibrated lower bound of the real range.
    pub min: f32,
    /// The calibrated upper bound of the real range.
    pub max: f32,
}

impl QuantParams {
    /// Computes affine parameters mapping `[rmin, rmax]` onto `[qmin, qmax]`.
    pub fn affine(rmin: f32, rmax: f32, qmin: i32, qmax: i32) -> QuantParams {
        let scale = ((rmax - rmin) / (qmax - qmin) as f32).max(f32::MIN_POSITIVE);
        let zero_point =
            ((qmin as f32 - rmin / scale).round() as i32).clamp(qmin, qmax);

        QuantParams { scale, zero_point, min: rmin, max: rmax }
    }

    /// Computes symmetric parameters: the zero point is zero and the range is symmetric about it.
    pub fn symmetric(rmin: f32, rmax: f32, qmax: i32) -> QuantParams {
        let bound = rmin.abs().max(rmax.abs());
        let scale = (bound / qmax as f32).max(f32::MIN_POSITIVE);

        QuantParams { scale, zero_point: 0, min: -bound, max: bound }
    }

    /// Quantizes one value.
    #[inline]
    pub fn quantize(&self, x: f32, qmin: i32, qmax: i32) -> i32 {
        ((x / self.scale + self.zero_point as f32).round() as i32).clamp(qmin, qmax)
    }

    /// Dequantizes one value.
    #[inline]
    pub fn dequantize(&self, q: i32) -> f32 {
        self.scale * (q - self.zero_point) as f32
    }
}

/// Quantization parameters bundled with the element type they reconstruct to.
#[derive(Copy, Clone, Debug)]
pub struct QuantInfo {
    pub params: QuantParams,
    pub original: DataType,
}

/// Per-channel quantization parameters along one axis.
#[derive(Clone, Debug)]
pub struct ChannelQuantInfo {
    pub axis: usize,
    pub params: Vec<QuantParams>,
    pub original: DataType,
}

/// The signal domain a voice-optimized calibration targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VoiceDomain {
    /// Time-domain samples: symmetric about zero with transient headroom.
    Time,
    /// Spectral magnitudes: ranged in the log domain.
    Frequency,
}

/// A strategy for computing the real range `[rmin, rmax]` from sample data.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Calibration {
    /// The observed minimum and maximum.
    MinMax,
    /// Drop the outer `tail` fraction of each distribution tail.
    Percentile { tail: f32 },
    /// Grid-search the range scale minimizing squared reconstruction error.
    MseOptimal { steps: u32 },
    /// Search a symmetric clip threshold minimizing KL divergence between the clipped and
    /// quantized distributions.
    KlDivergence { bins: usize },
    /// Heuristics tuned for speech signals.
    VoiceOptimized { domain: VoiceDomain },
}

/// Computes a calibrated real range for `values`.
pub fn calibrate(values: &[f32], calibration: Calibration) -> Result<(f32, f32)> {
    if values.is_empty() {
        return invalid_argument_error("calibration requires data");
    }

    match calibration {
        Calibration::MinMax => {
            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for &x in values {
                lo = lo.min(x);
                hi = hi.max(x);
            }
            Ok((lo, hi))
        }
        Calibration::Percentile { tail } => {
            if !(0.0..0.5).contains(&tail) {
                return invalid_argument_error("percentile tail must be in [0, 0.5)");
            }

            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let n = sorted.len();
            let lo_idx = ((n as f32 * tail) as usize).min(n - 1);
            let hi_idx = n - 1 - ((n as f32 * tail) as usize).min(n - 1);

            Ok((sorted[lo_idx], sorted[hi_idx.max(lo_idx)]))
        }
        Calibration::MseOptimal { steps } => {
            let steps = steps.clamp(4, 256);
            let (lo, hi) = calibrate(values, Calibration::MinMax)?;

            let mut best = (lo, hi);
            let mut best_err = f32::INFINITY;

            for step in 1..=steps {
                let t = step as f32 / steps as f32;
                let candidate = (lo * t, hi * t);
                let params = QuantParams::affine(candidate.0, candidate.1, -128, 127);

                let mut err = 0.0f32;
                for &x in values {
                    let q = params.quantize(x, -128, 127);
                    let back = params.dequantize(q);
                    err += (x - back) * (x - back);
                }

                if err < best_err {
                    best_err = err;
                    best = candidate;
                }
            }

            Ok(best)
        }
        Calibration::KlDivergence { bins } => {
            let bins = bins.clamp(64, 8192);

            let mut absmax = 0.0f32;
            for &x in values {
                absmax = absmax.max(x.abs());
            }
            if absmax == 0.0 {
                return Ok((0.0, 0.0));
            }

            let mut hist = vec![0.0f64; bins];
            let inv_width = bins as f32 / absmax;
            for &x in values {
                let bin = ((x.abs() * inv_width) as usize).min(bins - 1);
                hist[bin] += 1.0;
            }

            // Quantized reconstruction uses the 128 positive int8 levels.
            const LEVELS: usize = 128;

            let mut best_threshold = absmax;
            let mut best_kl = f64::INFINITY;

            let mut start = bins / 8;
            if start < LEVELS {
                start = LEVELS;
            }

            for cut in (start..=bins).step_by((bins / 64).max(1)) {
                // Reference: the clipped distribution with the tail mass folded into the edge.
                let mut reference: Vec<f64> = hist[..cut].to_vec();
                let tail: f64 = hist[cut..].iter().sum();
                reference[cut - 1] += tail;

                // Candidate: the reference collapsed onto the quantized levels and re-expanded.
                let mut candidate = vec![0.0f64; cut];
                let per_level = cut as f64 / LEVELS as f64;
                for level in 0..LEVELS {
                    let lo = (level as f64 * per_level) as usize;
                    let hi = (((level + 1) as f64 * per_level) as usize).min(cut).max(lo + 1);

                    let mass: f64 = reference[lo..hi].iter().sum();
                    let occupied = reference[lo..hi].iter().filter(|&&p| p > 0.0).count();
                    if occupied > 0 {
                        let share = mass / occupied as f64;
                        for bin in lo..hi {
                            if reference[bin] > 0.0 {
                                candidate[bin] = share;
                            }
                        }
                    }
                }

                let p_total: f64 = reference.iter().sum();
                let q_total: f64 = candidate.iter().sum();
                if p_total == 0.0 || q_total == 0.0 {
                    continue;
                }

                let mut kl = 0.0f64;
                for bin in 0..cut {
                    let p = reference[bin] / p_total;
                    let q = candidate[bin] / q_total;
                    if p > 0.0 && q > 0.0 {
                        kl += p * (p / q).ln();
                    }
                }

                if kl < best_kl {
                    best_kl = kl;
                    best_threshold = cut as f32 / bins as f32 * absmax;
                }
            }

            Ok((-best_threshold, best_threshold))
        }
        Calibration::VoiceOptimized { domain } => {
            let mut absmax = 0.0f32;
            for &x in values {
                absmax = absmax.max(x.abs());
            }

            match domain {
                VoiceDomain::Time => {
                    // Symmetric with a little headroom for transients.
                    let bound = absmax * 1.05;
                    Ok((-bound, bound))
                }
                VoiceDomain::Frequency => {
                    // Spectral magnitudes are log-normal-ish; clip at a log-domain high quantile
                    // instead of the raw peak.
                    let logs: Vec<f32> =
                        values.iter().filter(|x| **x != 0.0).map(|x| (x.abs() + 1e-10).ln()).collect();

                    if logs.is_empty() {
                        return Ok((0.0, 0.0));
                    }

                    let mean: f32 = logs.iter().sum::<f32>() / logs.len() as f32;
                    let var: f32 = logs.iter().map(|l| (l - mean) * (l - mean)).sum::<f32>()
                        / logs.len() as f32;

                    let bound = (mean + 2.5 * var.sqrt()).exp().min(absmax);
                    Ok((-bound, bound))
                }
            }
        }
    }
}

fn int8_params(values: &[f32], calibration: Calibration) -> Result<QuantParams> {
    let (rmin, rmax) = calibrate(values, calibration)?;

    match calibration {
        Calibration::KlDivergence { .. } | Calibration::VoiceOptimized { .. } => {
            Ok(QuantParams::symmetric(rmin, rmax, 127))
        }
        _ => Ok(QuantParams::affine(rmin, rmax, -128, 127)),
    }
}

/// Quantizes an `f32` tensor to `int8` with the given calibration.
pub fn quantize_int8(tensor: &Tensor, calibration: Calibration) -> Result<(Tensor, QuantInfo)> {
    if tensor.dtype() != DataType::F32 {
        return unsupported_error("quantization source must be f32");
    }

    let values = tensor.read_f32_values()?;
    let params = int8_params(&values, calibration)?;

    let func = match kernel::global().select("quantize_int8", values.len()).map(|d| d.func) {
        Some(KernelFn::QuantizeInt8(func)) => func,
        _ => return internal_error("no kernel registered for quantize_int8"),
    };

    let mut quantized = vec![0i8; values.len()];
    func(&values, &mut quantized, params);

    let out = Tensor::new(DataType::Int8, tensor.shape())?;
    out.with_bytes_mut(|bytes, offset| {
        bytes[offset..offset + quantized.len()]
            .copy_from_slice(bytemuck::cast_slice(&quantized));
    });

    Ok((out, QuantInfo { params, original: DataType::F32 }))
}

/// Dequantizes an `int8` tensor back to `f32`.
pub fn dequantize_int8(tensor: &Tensor, info: &QuantInfo) -> Result<Tensor> {
    if tensor.dtype() != DataType::Int8 {
        return unsupported_error("dequantization source must be int8");
    }

    let size = tensor.size();
    let quantized: Vec<i8> = tensor
        .with_bytes(|bytes, offset| bytemuck::cast_slice(&bytes[offset..offset + size]).to_vec());

    let func = match kernel::global().select("dequantize_int8", size).map(|d| d.func) {
        Some(KernelFn::DequantizeInt8(func)) => func,
        _ => return internal_error("no kernel registered for dequantize_int8"),
    };

    let mut values = vec![0.0f32; size];
    func(&quantized, &mut values, info.params);

    let out = Tensor::new(DataType::F32, tensor.shape())?;
    out.write_f32_values(&values)?;
    Ok(out)
}

/// Quantizes an `f32` tensor to packed `int4` (two values per byte, low nibble first).
pub fn quantize_int4(tensor: &Tensor, calibration: Calibration) -> Result<(Tensor, QuantInfo)> {
    if tensor.dtype() != DataType::F32 {
        return unsupported_error("quantization source must be f32");
    }

    let values = tensor.read_f32_values()?;
    let (rmin, rmax) = calibrate(&values, calibration)?;
    let params = QuantParams::affine(rmin, rmax, 0, 15);

    let out = Tensor::new(DataType::Int4, tensor.shape())?;
    out.with_bytes_mut(|bytes, offset| {
        for (i, &x) in values.iter().enumerate() {
            let q = params.quantize(x, 0, 15) as u8;
            let slot = offset + i / 2;
            if i % 2 == 0 {
                bytes[slot] = q;
            }
            else {
                bytes[slot] |= q << 4;
            }
        }
    });

    Ok((out, QuantInfo { params, original: DataType::F32 }))
}

/// Dequantizes a packed `int4` tensor back to `f32`.
pub fn dequantize_int4(tensor: &Tensor, info: &QuantInfo) -> Result<Tensor> {
    if tensor.dtype() != DataType::Int4 {
        return unsupported_error("dequantization source must be int4");
    }

    let size = tensor.size();
    let values: Vec<f32> = tensor.with_bytes(|bytes, offset| {
        (0..size)
            .map(|i| {
                let byte = bytes[offset + i / 2];
                let nibble = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                info.params.dequantize(nibble as i32)
            })
            .collect()
    });

    let out = Tensor::new(DataType::F32, tensor.shape())?;
    out.write_f32_values(&values)?;
    Ok(out)
}

/// Quantizes to `int8` with independent parameters per index of `axis`.
pub fn quantize_int8_per_channel(
    tensor: &Tensor,
    axis: usize,
    calibration: Calibration,
) -> Result<(Tensor, ChannelQuantInfo)> {
    if tensor.dtype() != DataType::F32 {
        return unsupported_error("quantization source must be f32");
    }
    if axis >= tensor.ndim() {
        return invalid_argument_error("quantization axis out of range");
    }

    let values = tensor.read_f32_values()?;

    let channels = tensor.shape()[axis];
    let inner: usize = tensor.shape()[axis + 1..].iter().product();
    let outer: usize = tensor.shape()[..axis].iter().product();

    let mut params = Vec::with_capacity(channels);
    let mut quantized = vec![0u8; values.len()];

    let mut channel_values = Vec::with_capacity(outer * inner);
    for channel in 0..channels {
        channel_values.clear();
        for o in 0..outer {
            let base = o * channels * inner + channel * inner;
            channel_values.extend_from_slice(&values[base..base + inner]);
        }

        let channel_params = int8_params(&channel_values, calibration)?;

        for o in 0..outer {
            let base = o * channels * inner + channel * inner;
            for i in 0..inner {
                let q = channel_params.quantize(values[base + i], -128, 127);
                quantized[base + i] = q as i8 as u8;
            }
        }

        params.push(channel_params);
    }

    let out = Tensor::new(DataType::Int8, tensor.shape())?;
    out.with_bytes_mut(|bytes, offset| {
        bytes[offset..offset + quantized.len()].copy_from_slice(&quantized);
    });

    Ok((out, ChannelQuantInfo { axis, params, original: DataType::F32 }))
}

/// Dequantizes a per-channel `int8` tensor back to `f32`.
pub fn dequantize_int8_per_channel(tensor: &Tensor, info: &ChannelQuantInfo) -> Result<Tensor> {
    if tensor.dtype() != DataType::Int8 {
        return unsupported_error("dequantization source must be int8");
    }
    if info.axis >= tensor.ndim() || tensor.shape()[info.axis] != info.params.len() {
        return invalid_argument_error("channel parameters do not match tensor");
    }

    let size = tensor.size();
    let quantized: Vec<i8> = tensor
        .with_bytes(|bytes, offset| bytemuck::cast_slice(&bytes[offset..offset + size]).to_vec());

    let channels = tensor.shape()[info.axis];
    let inner: usize = tensor.shape()[info.axis + 1..].iter().product();
    let outer: usize = tensor.shape()[..info.axis].iter().product();

    let mut values = vec![0.0f32; size];
    for o in 0..outer {
        for channel in 0..channels {
            let params = &info.params[channel];
            let base = o * channels * inner + channel * inner;
            for i in 0..inner {
                values[base + i] = params.dequantize(quantized[base + i] as i32);
            }
        }
    }

    let out = Tensor::new(DataType::F32, tensor.shape())?;
    out.write_f32_values(&values)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn assert_round_trip(data: &[f32], calibration: Calibration) {
        let tensor = Tensor::from_f32(&[data.len()], data).unwrap();
        let (quantized, info) = quantize_int8(&tensor, calibration).unwrap();
        let back = dequantize_int8(&quantized, &info).unwrap();

        let values = back.to_f32_vec().unwrap();
        for (i, &x) in data.iter().enumerate() {
            assert!(
                (x - values[i]).abs() <= 2.0 * info.params.scale,
                "element {} diverged: {} vs {} (scale {})",
                i,
                x,
                values[i],
                info.params.scale
            );
        }
    }

    #[test]
    fn verify_min_max_round_trip() {
        assert_round_trip(&[-10.0, -5.0, 5.0, 10.0], Calibration::MinMax);
        assert_round_trip(&[0.0, 0.1, 0.2, 0.3], Calibration::MinMax);
    }

    #[test]
    fn verify_voice_time_round_trip() {
        let wave: Vec<f32> = (0..256).map(|i| (i as f32 * 0.1).sin() * 0.8).collect();
        assert_round_trip(&wave, Calibration::VoiceOptimized { domain: VoiceDomain::Time });
    }

    #[test]
    fn verify_mse_round_trip() {
        let wave: Vec<f32> = (0..128).map(|i| (i as f32 * 0.3).cos() * 4.0).collect();
        assert_round_trip(&wave, Calibration::MseOptimal { steps: 32 });
    }

    #[test]
    fn verify_random_inputs_round_trip() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(99);
        let data: Vec<f32> = (0..512).map(|_| rng.gen_range(-3.0f32..3.0)).collect();

        // Tail-free strategies must round-trip every element.
        for calibration in [
            Calibration::MinMax,
            Calibration::Percentile { tail: 0.0 },
            Calibration::MseOptimal { steps: 16 },
            Calibration::VoiceOptimized { domain: VoiceDomain::Time },
        ] {
            assert_round_trip(&data, calibration);
        }
    }

    #[test]
    fn verify_symmetric_zero_point() {
        let params = QuantParams::symmetric(-3.0, 5.0, 127);
        assert_eq!(params.zero_point, 0);
        assert_eq!(params.min, -5.0);
        assert_eq!(params.max, 5.0);
    }

    #[test]
    fn verify_percentile_ignores_outliers() {
        let mut data = vec![0.0f32; 1000];
        for (i, x) in data.iter_mut().enumerate() {
            *x = (i as f32 / 1000.0) * 2.0 - 1.0;
        }
        data[0] = -1000.0;
        data[999] = 1000.0;

        let (lo, hi) = calibrate(&data, Calibration::Percentile { tail: 0.01 }).unwrap();
        assert!(lo > -2.0 && hi < 2.0);
    }

    #[test]
    fn verify_kl_threshold_within_range() {
        let data: Vec<f32> = (0..4096).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect();
        let (lo, hi) = calibrate(&data, Calibration::KlDivergence { bins: 512 }).unwrap();

        assert!(lo < 0.0 && hi > 0.0);
        assert_eq!(-lo, hi);
        assert!(hi <= 0.51);
    }

    #[test]
    fn verify_int4_packing_low_nibble_first() {
        let tensor = Tensor::from_f32(&[3], &[0.0, 15.0, 7.0]).unwrap();
        let (quantized, _info) = quantize_int4(&tensor, Calibration::MinMax).unwrap();

        quantized.with_bytes(|bytes, offset| {
            // Values 0 and 15 share the first byte: low nibble first.
            assert_eq!(bytes[offset], 0xf0);
            assert_eq!(bytes[offset + 1] & 0x0f, 7);
        });

        assert_eq!(quantized.data_size(), 2);
    }

    #[test]
    fn verify_int4_round_trip() {
        let data = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        let tensor = Tensor::from_f32(&[6], &data).unwrap();

        let (quantized, info) = quantize_int4(&tensor, Calibration::MinMax).unwrap();
        let back = dequantize_int4(&quantized, &info).unwrap();

        let values = back.to_f32_vec().unwrap();
        for (i, &x) in data.iter().enumerate() {
            assert!((x - values[i]).abs() <= 2.0 * info.params.scale);
        }
    }

    #[test]
    fn verify_per_channel_scales_differ() {
        // Row 0 spans [-1, 1], row 1 spans [-100, 100].
        let tensor = Tensor::from_f32(
            &[2, 4],
            &[-1.0, -0.5, 0.5, 1.0, -100.0, -50.0, 50.0, 100.0],
        )
        .unwrap();

        let (quantized, info) =
            quantize_int8_per_channel(&tensor, 0, Calibration::MinMax).unwrap();

        assert_eq!(info.params.len(), 2);
        assert!(info.params[1].scale > info.params[0].scale * 10.0);

        let back = dequantize_int8_per_channel(&quantized, &info).unwrap();
        let values = back.to_f32_vec().unwrap();

        assert!((values[0] - -1.0).abs() <= 2.0 * info.params[0].scale);
        assert!((values[7] - 100.0).abs() <= 2.0 * info.params[1].scale);
    }

    #[test]
    fn verify_quantize_leaves_output_untouched_on_error() {
        let tensor = Tensor::zeros(DataType::Int32, &[4]).unwrap();
        assert!(quantize_int8(&tensor, Calibration::MinMax).is_err());
    }
}
