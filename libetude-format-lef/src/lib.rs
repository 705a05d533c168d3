// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]

//! LEF and LEFX container support.
//!
//! LEF is LibEtude's base model container: a little-endian binary file holding a checksummed
//! header, fixed-size model metadata, a per-layer index, and optionally-compressed layer
//! payloads. LEFX is the differential extension container, bound to a base model by hash.
//!
//! Two loaders are provided. [`MmapModel`] maps the whole file and serves layer bytes straight
//! from the mapping; [`StreamingModel`] reads the header and index upfront and loads layers on
//! demand into a byte-budgeted LRU cache.

mod common;
mod lefx;
mod meta;
mod mmap;
mod stream;
mod writer;

pub use common::{
    HeaderFlags, LayerCodec, LayerEntry, LayerKind, LefHeader, ModelIdentity, QuantKind,
    LEF_MAGIC, LEF_VERSION_MAJOR, LEF_VERSION_MINOR,
};
pub use lefx::{BlendMode, ExtLayer, LefxBuilder, LefxFile, LefxMeta, LEFX_MAGIC};
pub use meta::{ArchInfo, AudioInfo, ModelMeta, TokenizerInfo};
pub use mmap::MmapModel;
pub use stream::{StreamingModel, StreamingOptions};
pub use writer::{LayerDesc, LefBuilder};
