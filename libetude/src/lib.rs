// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # LibEtude
//!
//! LibEtude is an on-device inference engine specialized for neural voice synthesis: it loads a
//! compact model file, executes a dataflow graph of tensor operators, and emits audio samples in
//! a single batch or as a real-time stream.
//!
//! # Usage
//!
//! The following steps describe the basic flow:
//!
//! 1. Open a model with [`default::open_model`] (memory-mapped) or
//!    [`default::open_model_streaming`] (on-demand layer loading with a bounded cache).
//! 2. Create a [`Vocoder`][vocoder::Vocoder] from the model path, or with
//!    [`Vocoder::new`][vocoder::Vocoder::new] and a [`VocoderConfig`][vocoder::VocoderConfig]
//!    for a model-free context.
//! 3. Convert a `[frames, mel_channels]` f32 [`Tensor`][core::tensor::Tensor] to audio with
//!    [`mel_to_audio`][vocoder::Vocoder::mel_to_audio], or drive a streaming session with
//!    [`start_streaming`][vocoder::Vocoder::start_streaming] /
//!    [`process_chunk`][vocoder::Vocoder::process_chunk] /
//!    [`stop_streaming`][vocoder::Vocoder::stop_streaming].
//!
//! Tensor storage, pooling, kernels, the DSP block graph, and the task scheduler live in
//! [`core`]; the LEF/LEFX container in [`lef`]; the vocoder runtime in [`vocoder`].

pub use libetude_core as core;
pub use libetude_format_lef as lef;
pub use libetude_vocoder as vocoder;

pub mod default {
    //! The `default` module provides convenience functions and pre-registered registries to get
    //! an implementer up-and-running as quickly as possible. Using it is optional and incurs no
    //! overhead unless actually used.

    use std::path::Path;

    use libetude_core::errors::Result;
    use libetude_core::kernel::KernelRegistry;
    use libetude_format_lef::{MmapModel, StreamingModel};

    /// Gets the process-default kernel registry: every scalar reference kernel registered, with
    /// the host's detected CPU features.
    pub fn get_kernels() -> &'static KernelRegistry {
        libetude_core::kernel::global()
    }

    /// Opens a LEF model with the memory-mapped loader.
    pub fn open_model(path: &Path) -> Result<MmapModel> {
        MmapModel::open(path)
    }

    /// Opens a LEF model with the streaming loader and the default cache budget.
    pub fn open_model_streaming(path: &Path) -> Result<StreamingModel> {
        StreamingModel::open(path)
    }
}
