// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `kernel` module implements registration and hardware-aware selection of compute kernels.
//!
//! Every named operation registers one or more kernels, each declaring the hardware features it
//! requires, an optimal data size, and a priority. At dispatch time the registry picks the
//! highest-priority kernel whose requirements are satisfied by the detected features, boosting
//! kernels once the data size reaches their optimal range. A scalar reference kernel exists for
//! every operation and doubles as the correctness oracle in tests.

pub mod scalar;

use std::collections::HashMap;

use bitflags::bitflags;
use log::info;
use once_cell::sync::Lazy;

use crate::tensor::quant::QuantParams;

bitflags! {
    /// Hardware capabilities a kernel may require.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CpuFeatures: u32 {
        /// Plain scalar code. Always available.
        const SCALAR = 0x01;
        const SSE2 = 0x02;
        const AVX2 = 0x04;
        const NEON = 0x08;
    }
}

/// Detects the host's CPU features, masked by the `LIBETUDE_SIMD` environment variable when set.
///
/// `LIBETUDE_SIMD` is a comma-separated subset of `sse2,avx2,neon`; unknown names are ignored.
pub fn detect_features() -> CpuFeatures {
    let mut features = detect_host_features();

    if let Ok(value) = std::env::var("LIBETUDE_SIMD") {
        let mut mask = CpuFeatures::SCALAR;
        for name in value.split(',') {
            match name.trim() {
                "sse2" => mask |= CpuFeatures::SSE2,
                "avx2" => mask |= CpuFeatures::AVX2,
                "neon" => mask |= CpuFeatures::NEON,
                _ => {}
            }
        }
        features &= mask;
        features |= CpuFeatures::SCALAR;
    }

    features
}

#[cfg(target_arch = "x86_64")]
fn detect_host_features() -> CpuFeatures {
    let mut features = CpuFeatures::SCALAR;
    if std::arch::is_x86_feature_detected!("sse2") {
        features |= CpuFeatures::SSE2;
    }
    if std::arch::is_x86_feature_detected!("avx2") {
        features |= CpuFeatures::AVX2;
    }
    features
}

#[cfg(target_arch = "aarch64")]
fn detect_host_features() -> CpuFeatures {
    let mut features = CpuFeatures::SCALAR;
    if std::arch::is_aarch64_feature_detected!("neon") {
        features |= CpuFeatures::NEON;
    }
    features
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_host_features() -> CpuFeatures {
    CpuFeatures::SCALAR
}

/// The typed entry point of a kernel.
///
/// Kernels are grouped by call signature; an operation name maps to exactly one signature.
#[derive(Copy, Clone)]
pub enum KernelFn {
    /// `(a, b, out)` element-wise binary operation over equal-length slices.
    BinaryF32(fn(&[f32], &[f32], &mut [f32])),
    /// `(a, scalar, out)` element-wise operation with a scalar operand.
    ScalarF32(fn(&[f32], f32, &mut [f32])),
    /// `(a, b, out, m, k, n)` row-major matrix multiply.
    MatMulF32(fn(&[f32], &[f32], &mut [f32], usize, usize, usize)),
    /// In-place numerically-stable softmax over one row.
    SoftmaxF32(fn(&mut [f32])),
    /// `(input, out, params)` affine quantization to `i8`.
    QuantizeInt8(fn(&[f32], &mut [i8], QuantParams)),
    /// `(input, out, params)` affine dequantization from `i8`.
    DequantizeInt8(fn(&[i8], &mut [f32], QuantParams)),
}

/// A registered kernel implementation for a named operation.
#[derive(Copy, Clone)]
pub struct KernelDesc {
    /// The operation name, e.g. `"vector_add_f32"`.
    pub name: &'static str,
    /// The hardware features this implementation requires.
    pub requires: CpuFeatures,
    /// Data sizes at or above this benefit most from this implementation.
    pub optimal_len: usize,
    /// Base selection priority. Higher wins.
    pub priority: u32,
    pub func: KernelFn,
}

/// `KernelRegistry` maps operation names to candidate kernels and selects among them.
pub struct KernelRegistry {
    kernels: HashMap<&'static str, Vec<KernelDesc>>,
    features: CpuFeatures,
}

impl KernelRegistry {
    /// Creates an empty registry for the given feature set.
    pub fn new(features: CpuFeatures) -> KernelRegistry {
        KernelRegistry { kernels: HashMap::new(), features: features | CpuFeatures::SCALAR }
    }

    /// Creates a registry with every scalar reference kernel registered, using the detected host
    /// features.
    pub fn with_defaults() -> KernelRegistry {
        let features = detect_features();
        info!("kernel dispatch features: {:?}", features);

        let mut registry = KernelRegistry::new(features);
        scalar::register_all(&mut registry);
        registry
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    pub fn register(&mut self, desc: KernelDesc) {
        self.kernels.entry(desc.name).or_default().push(desc);
    }

    /// Selects the best satisfiable kernel for an operation and data length.
    ///
    /// The effective priority of a kernel grows by a small boost once `len` reaches its optimal
    /// size, so wide implementations win on large data without starving small inputs.
    pub fn select(&self, name: &str, len: usize) -> Option<&KernelDesc> {
        let candidates = self.kernels.get(name)?;

        candidates
            .iter()
            .filter(|desc| self.features.contains(desc.requires))
            .max_by_key(|desc| {
                let boost = if len >= desc.optimal_len { desc.priority / 4 } else { 0 };
                desc.priority + boost
            })
    }

    /// The number of distinct operations registered.
    pub fn num_ops(&self) -> usize {
        self.kernels.len()
    }
}

static GLOBAL: Lazy<KernelRegistry> = Lazy::new(KernelRegistry::with_defaults);

/// The process-default registry used by tensor operations.
pub fn global() -> &'static KernelRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_stub(_a: &[f32], _b: &[f32], _out: &mut [f32]) {}

    #[test]
    fn verify_scalar_always_selectable() {
        let registry = KernelRegistry::with_defaults();
        assert!(registry.select("vector_add_f32", 1).is_some());
        assert!(registry.select("matmul_f32", 1).is_some());
        assert!(registry.select("no_such_op", 1).is_none());
    }

    #[test]
    fn verify_priority_selection() {
        let mut registry = KernelRegistry::new(CpuFeatures::SCALAR | CpuFeatures::AVX2);

        registry.register(KernelDesc {
            name: "vector_add_f32",
            requires: CpuFeatures::SCALAR,
            optimal_len: 0,
            priority: 10,
            func: KernelFn::BinaryF32(add_stub),
        });
        registry.register(KernelDesc {
            name: "vector_add_f32",
            requires: CpuFeatures::AVX2,
            optimal_len: 256,
            priority: 12,
            func: KernelFn::BinaryF32(add_stub),
        });

        let picked = registry.select("vector_add_f32", 1024).unwrap();
        assert!(picked.requires.contains(CpuFeatures::AVX2));
    }

    #[test]
    fn verify_unsatisfied_requirements_filtered() {
        let mut registry = KernelRegistry::new(CpuFeatures::SCALAR);

        registry.register(KernelDesc {
            name: "vector_add_f32",
            requires: CpuFeatures::NEON,
            optimal_len: 0,
            priority: 100,
            func: KernelFn::BinaryF32(add_stub),
        });
        registry.register(KernelDesc {
            name: "vector_add_f32",
            requires: CpuFeatures::SCALAR,
            optimal_len: 0,
            priority: 1,
            func: KernelFn::BinaryF32(add_stub),
        });

        let picked = registry.select("vector_add_f32", 16).unwrap();
        assert_eq!(picked.priority, 1);
    }

    #[test]
    fn verify_size_boost_prefers_wide_kernel() {
        let mut registry = KernelRegistry::new(CpuFeatures::SCALAR);

        registry.register(KernelDesc {
            name: "op",
            requires: CpuFeatures::SCALAR,
            optimal_len: usize::MAX,
            priority: 10,
            func: KernelFn::BinaryF32(add_stub),
        });
        registry.register(KernelDesc {
            name: "op",
            requires: CpuFeatures::SCALAR,
            optimal_len: 512,
            priority: 9,
            func: KernelFn::BinaryF32(add_stub),
        });

        // Below the optimal size the higher base priority wins; above it the boost flips the
        // outcome.
        assert_eq!(registry.select("op", 16).unwrap().priority, 10);
        assert_eq!(registry.select("op", 2048).unwrap().priority, 9);
    }
}
