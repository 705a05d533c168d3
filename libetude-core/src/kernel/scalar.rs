// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scalar reference kernels.
//!
//! These are the normative implementations of every operation: portable, branch-simple, and the
//! oracle that accelerated kernels are compared against.

use crate::tensor::quant::QuantParams;

use super::{CpuFeatures, KernelDesc, KernelFn, KernelRegistry};

pub fn vector_add_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = a[i] + b[i];
    }
}

pub fn vector_sub_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = a[i] - b[i];
    }
}

pub fn vector_mul_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = a[i] * b[i];
    }
}

/// Element-wise division. Division by zero yields zero rather than an infinity so a silent mel
/// channel cannot poison downstream samples.
pub fn vector_div_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = if b[i] == 0.0 { 0.0 } else { a[i] / b[i] };
    }
}

pub fn vector_add_scalar_f32(a: &[f32], scalar: f32, out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = a[i] + scalar;
    }
}

pub fn vector_mul_scalar_f32(a: &[f32], scalar: f32, out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = a[i] * scalar;
    }
}

/// Row-major `A[m,k] * B[k,n] = C[m,n]`.
pub fn matmul_f32(a: &[f32], b: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    for row in 0..m {
        for col in 0..n {
            let mut acc = 0.0f32;
            for inner in 0..k {
                acc += a[row * k + inner] * b[inner * n + col];
            }
            out[row * n + col] = acc;
        }
    }
}

/// In-place softmax over one row, subtracting the row maximum for numerical stability.
pub fn softmax_f32(row: &mut [f32]) {
    if row.is_empty() {
        return;
    }

    let max = row.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));

    let mut sum = 0.0f32;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }

    let inv = 1.0 / sum;
    for x in row.iter_mut() {
        *x *= inv;
    }
}

pub fn quantize_int8(input: &[f32], out: &mut [i8], params: QuantParams) {
    let inv_scale = if params.scale == 0.0 { 0.0 } else { 1.0 / params.scale };

    for i in 0..out.len() {
        let q = (input[i] * inv_scale + params.zero_point as f32).round();
        out[i] = q.clamp(-128.0, 127.0) as i8;
    }
}

pub fn dequantize_int8(input: &[i8], out: &mut [f32], params: QuantParams) {
    for i in 0..out.len() {
        out[i] = params.scale * (input[i] as i32 - params.zero_point) as f32;
    }
}

/// Registers every scalar reference kernel into `registry`.
pub fn register_all(registry: &mut KernelRegistry) {
    let scalar = |name, func| KernelDesc {
        name,
        requires: CpuFeatures::SCALAR,
        optimal_len: 0,
        priority: 1,
        func,
    };

    registry.register(scalar("vector_add_f32", KernelFn::BinaryF32(vector_add_f32)));
    registry.register(scalar("vector_sub_f32", KernelFn::BinaryF32(vector_sub_f32)));
    registry.register(scalar("vector_mul_f32", KernelFn::BinaryF32(vector_mul_f32)));
    registry.register(scalar("vector_div_f32", KernelFn::BinaryF32(vector_div_f32)));
    registry.register(scalar("vector_add_scalar_f32", KernelFn::ScalarF32(vector_add_scalar_f32)));
    registry.register(scalar("vector_mul_scalar_f32", KernelFn::ScalarF32(vector_mul_scalar_f32)));
    registry.register(scalar("matmul_f32", KernelFn::MatMulF32(matmul_f32)));
    registry.register(scalar("softmax_f32", KernelFn::SoftmaxF32(softmax_f32)));
    registry.register(scalar("quantize_int8", KernelFn::QuantizeInt8(quantize_int8)));
    registry.register(scalar("dequantize_int8", KernelFn::DequantizeInt8(dequantize_int8)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_binary_ops() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 0.0];
        let mut out = [0.0f32; 3];

        vector_add_f32(&a, &b, &mut out);
        assert_eq!(out, [5.0, 7.0, 3.0]);

        vector_div_f32(&a, &b, &mut out);
        assert_eq!(out, [0.25, 0.4, 0.0]);
    }

    #[test]
    fn verify_matmul() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [2.0f32, 3.0, 4.0, 5.0];
        let mut out = [0.0f32; 4];

        matmul_f32(&a, &b, &mut out, 2, 2, 2);
        assert_eq!(out, [10.0, 13.0, 22.0, 29.0]);
    }

    #[test]
    fn verify_softmax_sums_to_one() {
        let mut row = [1.0f32, 2.0, 3.0, 4.0];
        softmax_f32(&mut row);

        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(row.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn verify_softmax_large_inputs_stable() {
        let mut row = [1000.0f32, 1001.0, 1002.0];
        softmax_f32(&mut row);

        assert!(row.iter().all(|x| x.is_finite()));
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn verify_quantize_round_trip() {
        let params = QuantParams { scale: 0.1, zero_point: 0, min: -12.8, max: 12.7 };

        let input = [-10.0f32, -5.0, 5.0, 10.0];
        let mut q = [0i8; 4];
        let mut back = [0.0f32; 4];

        quantize_int8(&input, &mut q, params);
        dequantize_int8(&q, &mut back, params);

        for i in 0..input.len() {
            assert!((input[i] - back[i]).abs() <= 2.0 * params.scale);
        }
    }
}
