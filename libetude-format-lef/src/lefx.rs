// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The LEFX differential extension container.
//!
//! An extension binds to exactly one base model, identified by the base's model hash plus its
//! name and version. Each extension layer references a base layer by id and declares how its
//! delta blends into the base weights. Applying an extension produces new effective weights; the
//! base model is never modified.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use libetude_core::checksum::Crc32;
use libetude_core::errors::{
    corrupt_error, incompatible_base_error, incompatible_version_error, invalid_argument_error,
    not_found_error, unsupported_error, Result,
};
use libetude_core::io::{ReadBytes, WriteBytes};

use crate::common::ModelIdentity;

/// The LEFX stream marker.
pub const LEFX_MAGIC: [u8; 4] = *b"LEFX";

pub const LEFX_VERSION_MAJOR: u16 = 1;
pub const LEFX_VERSION_MINOR: u16 = 0;

const NAME_LEN: usize = 64;
const VERSION_LEN: usize = 16;
const LANGUAGE_LEN: usize = 8;
const ACCENT_LEN: usize = 16;

/// How an extension layer's delta combines with the base layer's weights.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BlendMode {
    /// The delta replaces the base weights.
    Replace,
    /// `base + alpha * delta`.
    AddScaled(f32),
    /// `(1 - alpha) * base + alpha * delta`.
    Lerp(f32),
}

impl BlendMode {
    fn to_wire(self) -> (u32, f32) {
        match self {
            BlendMode::Replace => (0, 0.0),
            BlendMode::AddScaled(alpha) => (1, alpha),
            BlendMode::Lerp(alpha) => (2, alpha),
        }
    }

    fn from_wire(mode: u32, alpha: f32) -> Result<BlendMode> {
        match mode {
            0 => Ok(BlendMode::Replace),
            1 => Ok(BlendMode::AddScaled(alpha)),
            2 => Ok(BlendMode::Lerp(alpha)),
            _ => unsupported_error("unknown blend mode"),
        }
    }
}

/// Descriptive metadata of an extension voice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LefxMeta {
    pub name: String,
    pub version: String,
    pub language: String,
    pub accent: String,
    pub gender: u8,
    pub age: u8,
    /// Subjective quality rating in `[0, 1]`.
    pub quality: f32,
    /// Estimated relative performance cost of applying the extension.
    pub perf_impact: f32,
}

/// One extension layer: a delta over a base layer.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtLayer {
    pub base_layer_id: u32,
    pub mode: BlendMode,
    /// Delta weights as raw little-endian `f32` bytes.
    pub data: Vec<u8>,
}

/// `LefxBuilder` assembles and serializes an extension file.
pub struct LefxBuilder {
    base: ModelIdentity,
    meta: LefxMeta,
    layers: Vec<ExtLayer>,
}

impl LefxBuilder {
    /// Creates a builder binding to the given base model identity.
    pub fn new(base: ModelIdentity, meta: LefxMeta) -> LefxBuilder {
        LefxBuilder { base, meta, layers: Vec::new() }
    }

    pub fn add_layer(&mut self, layer: ExtLayer) -> Result<()> {
        if layer.data.is_empty() {
            return invalid_argument_error("extension layer payload is empty");
        }
        if self.layers.iter().any(|existing| existing.base_layer_id == layer.base_layer_id) {
            return invalid_argument_error("duplicate base layer reference");
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let header = self.header_bytes(0)?;
        let crc = Crc32::of(&header);
        writer.write_all(&self.header_bytes(crc)?)?;

        for layer in &self.layers {
            let (mode, alpha) = layer.mode.to_wire();
            writer.write_u32(layer.base_layer_id)?;
            writer.write_u32(mode)?;
            writer.write_f32(alpha)?;
            writer.write_u32(layer.data.len() as u32)?;
            writer.write_u32(Crc32::of(&layer.data))?;
            writer.write_all(&layer.data)?;
        }

        Ok(())
    }

    fn header_bytes(&self, crc: u32) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LEFX_MAGIC);
        bytes.write_u16(LEFX_VERSION_MAJOR)?;
        bytes.write_u16(LEFX_VERSION_MINOR)?;
        bytes.write_u32(self.base.hash)?;
        bytes.write_fixed_str(&self.base.name, NAME_LEN)?;
        bytes.write_fixed_str(&self.base.version, VERSION_LEN)?;
        bytes.write_fixed_str(&self.meta.name, NAME_LEN)?;
        bytes.write_fixed_str(&self.meta.version, VERSION_LEN)?;
        bytes.write_fixed_str(&self.meta.language, LANGUAGE_LEN)?;
        bytes.write_fixed_str(&self.meta.accent, ACCENT_LEN)?;
        bytes.write_u8(self.meta.gender)?;
        bytes.write_u8(self.meta.age)?;
        bytes.write_u16(0)?;
        bytes.write_f32(self.meta.quality)?;
        bytes.write_f32(self.meta.perf_impact)?;
        bytes.write_u32(self.layers.len() as u32)?;
        bytes.write_u32(crc)?;
        Ok(bytes)
    }
}

/// A parsed extension file.
#[derive(Debug)]
pub struct LefxFile {
    base: ModelIdentity,
    meta: LefxMeta,
    layers: Vec<ExtLayer>,
}

impl LefxFile {
    pub fn open(path: &Path) -> Result<LefxFile> {
        let mut file = File::open(path)?;
        LefxFile::read_from(&mut file)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<LefxFile> {
        let magic = reader.read_quad_bytes()?;
        if magic != LEFX_MAGIC {
            return corrupt_error("missing lefx stream marker");
        }

        let major = reader.read_u16()?;
        let _minor = reader.read_u16()?;
        if major != LEFX_VERSION_MAJOR {
            return incompatible_version_error("lefx major version is not supported");
        }

        let base_hash = reader.read_u32()?;
        let base_name = reader.read_fixed_str(NAME_LEN)?;
        let base_version = reader.read_fixed_str(VERSION_LEN)?;

        let meta = LefxMeta {
            name: reader.read_fixed_str(NAME_LEN)?,
            version: reader.read_fixed_str(VERSION_LEN)?,
            language: reader.read_fixed_str(LANGUAGE_LEN)?,
            accent: reader.read_fixed_str(ACCENT_LEN)?,
            gender: reader.read_u8()?,
            age: {
                let age = reader.read_u8()?;
                let _pad = reader.read_u16()?;
                age
            },
            quality: reader.read_f32()?,
            perf_impact: reader.read_f32()?,
        };

        let layer_count = reader.read_u32()?;
        let stored_crc = reader.read_u32()?;

        let base = ModelIdentity { hash: base_hash, name: base_name, version: base_version };

        // Re-serialize the header with a zeroed CRC field to verify it.
        let probe = LefxBuilder {
            base: base.clone(),
            meta: meta.clone(),
            layers: vec![ExtLayer { base_layer_id: 0, mode: BlendMode::Replace, data: vec![0] }; layer_count as usize],
        };
        if Crc32::of(&probe.header_bytes(0)?) != stored_crc {
            return corrupt_error("lefx header crc mismatch");
        }

        let mut layers = Vec::with_capacity(layer_count as usize);
        for _ in 0..layer_count {
            let base_layer_id = reader.read_u32()?;
            let mode = reader.read_u32()?;
            let alpha = reader.read_f32()?;
            let len = reader.read_u32()? as usize;
            let crc = reader.read_u32()?;

            let data = reader.read_boxed_slice_exact(len)?.into_vec();
            if Crc32::of(&data) != crc {
                return corrupt_error("lefx layer crc mismatch");
            }

            layers.push(ExtLayer {
                base_layer_id,
                mode: BlendMode::from_wire(mode, alpha)?,
                data,
            });
        }

        Ok(LefxFile { base, meta, layers })
    }

    pub fn base(&self) -> &ModelIdentity {
        &self.base
    }

    pub fn meta(&self) -> &LefxMeta {
        &self.meta
    }

    pub fn layers(&self) -> &[ExtLayer] {
        &self.layers
    }

    /// Checks that this extension binds to the loaded base model. Binding compares the base
    /// model hash first, then the name and version.
    pub fn bind(&self, base: &ModelIdentity) -> Result<()> {
        if self.base.hash != base.hash {
            return incompatible_base_error("extension was built for a different base model");
        }
        if self.base.name != base.name || self.base.version != base.version {
            return incompatible_base_error("base model name or version disagrees");
        }
        Ok(())
    }

    /// Applies the extension layer referencing `base_layer_id` to the given base weights,
    /// returning the new effective weights. The base slice is untouched.
    pub fn apply(&self, base_layer_id: u32, base: &[f32]) -> Result<Vec<f32>> {
        let layer = match self
            .layers
            .iter()
            .find(|layer| layer.base_layer_id == base_layer_id)
        {
            Some(layer) => layer,
            None => return not_found_error("extension does not cover the requested layer"),
        };

        if layer.data.len() != base.len() * 4 {
            return invalid_argument_error("extension delta length disagrees with base layer");
        }

        let delta: Vec<f32> = layer
            .data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let out = match layer.mode {
            BlendMode::Replace => delta,
            BlendMode::AddScaled(alpha) => {
                base.iter().zip(&delta).map(|(&b, &d)| b + alpha * d).collect()
            }
            BlendMode::Lerp(alpha) => base
                .iter()
                .zip(&delta)
                .map(|(&b, &d)| (1.0 - alpha) * b + alpha * d)
                .collect(),
        };

        Ok(out)
    }
}
