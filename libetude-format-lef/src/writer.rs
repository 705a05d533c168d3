// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The LEF writer.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use libetude_core::checksum::{Checksum, Crc32};
use libetude_core::errors::{invalid_argument_error, Result};

use crate::common::{
    compress, HeaderFlags, LayerCodec, LayerEntry, LayerKind, LefHeader, QuantKind, HEADER_SIZE,
    LAYER_ENTRY_SIZE, LEF_VERSION_MAJOR, LEF_VERSION_MINOR,
};
use crate::meta::{ModelMeta, META_SIZE};

/// A layer to be written into a LEF file.
pub struct LayerDesc {
    pub id: u32,
    pub kind: LayerKind,
    pub quant: QuantKind,
    /// Uncompressed weight bytes.
    pub data: Vec<u8>,
    /// Whether to compress this layer with the builder's codec.
    pub compress: bool,
}

/// `LefBuilder` assembles a model and serializes it as a LEF file.
///
/// Serialization writes the header with placeholder file size, the metadata block, the layer
/// index with placeholder offsets, then every payload; a final pass patches the real offsets and
/// file size and rewrites the header with its CRC. A layer whose compressed form is not smaller
/// than the raw bytes is stored raw, which the index encodes as equal compressed and
/// uncompressed sizes.
pub struct LefBuilder {
    meta: ModelMeta,
    layers: Vec<LayerDesc>,
    codec: LayerCodec,
}

impl LefBuilder {
    pub fn new(meta: ModelMeta) -> LefBuilder {
        LefBuilder { meta, layers: Vec::new(), codec: LayerCodec::Lz4 }
    }

    /// Selects the codec used for layers marked for compression.
    pub fn with_codec(mut self, codec: LayerCodec) -> LefBuilder {
        self.codec = codec;
        self
    }

    pub fn add_layer(&mut self, layer: LayerDesc) -> Result<()> {
        if self.layers.iter().any(|existing| existing.id == layer.id) {
            return invalid_argument_error("duplicate layer id");
        }
        if layer.data.is_empty() {
            return invalid_argument_error("layer payload is empty");
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// The model hash: CRC32 over the metadata block followed by every layer's uncompressed
    /// payload in ascending layer-id order.
    pub fn model_hash(&self) -> Result<u32> {
        let mut ids: Vec<usize> = (0..self.layers.len()).collect();
        ids.sort_by_key(|&index| self.layers[index].id);

        let mut crc = Crc32::new();
        crc.process_buf_bytes(&self.meta.to_bytes()?);
        for index in ids {
            crc.process_buf_bytes(&self.layers[index].data);
        }

        Ok(crc.checksum())
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        let mut layers: Vec<&LayerDesc> = self.layers.iter().collect();
        layers.sort_by_key(|layer| layer.id);

        let any_compressed = layers.iter().any(|layer| layer.compress);
        let any_quantized = layers.iter().any(|layer| layer.quant != QuantKind::None);

        let mut flags = HeaderFlags::from_bits_retain(if any_compressed {
            self.codec.to_flag_bits()
        }
        else {
            0
        });
        if any_compressed {
            flags |= HeaderFlags::COMPRESSED;
        }
        if any_quantized {
            flags |= HeaderFlags::QUANTIZED;
        }

        let meta_offset = HEADER_SIZE;
        let layer_index_offset = meta_offset + META_SIZE;
        let data_offset = layer_index_offset + layers.len() as u64 * LAYER_ENTRY_SIZE;

        let mut header = LefHeader {
            major: LEF_VERSION_MAJOR,
            minor: LEF_VERSION_MINOR,
            flags,
            model_hash: self.model_hash()?,
            meta_offset,
            layer_index_offset,
            layer_count: layers.len() as u32,
            data_offset,
            file_size: 0,
        };

        // First pass: header with placeholders, metadata, placeholder index.
        writer.seek(SeekFrom::Start(0))?;
        header.write_to(writer)?;
        self.meta.write_to(writer)?;

        let mut entries: Vec<LayerEntry> = layers
            .iter()
            .map(|layer| LayerEntry {
                id: layer.id,
                kind: layer.kind,
                quant: layer.quant,
                offset: 0,
                uncompressed_size: layer.data.len() as u64,
                compressed_size: 0,
                crc32: 0,
                dependency_count: 0,
                dependency_offset: 0,
            })
            .collect();

        for entry in &entries {
            entry.write_to(writer)?;
        }

        // Payloads, recording real offsets, stored sizes, and stored-byte CRCs.
        let mut cursor = data_offset;
        for (index, layer) in layers.iter().enumerate() {
            let stored = if layer.compress {
                let packed = compress(self.codec, &layer.data)?;
                if packed.len() < layer.data.len() {
                    packed
                }
                else {
                    // Incompressible payloads are stored raw.
                    layer.data.clone()
                }
            }
            else {
                layer.data.clone()
            };

            entries[index].offset = cursor;
            entries[index].compressed_size = stored.len() as u64;
            entries[index].crc32 = Crc32::of(&stored);

            writer.write_all(&stored)?;
            cursor += stored.len() as u64;
        }

        // Patch pass: real index entries, then the header with the final file size and CRC.
        header.file_size = cursor;

        writer.seek(SeekFrom::Start(layer_index_offset))?;
        for entry in &entries {
            entry.write_to(writer)?;
        }

        writer.seek(SeekFrom::Start(0))?;
        header.write_to(writer)?;
        writer.seek(SeekFrom::Start(cursor))?;

        debug!("wrote lef model: {} layers, {} bytes", entries.len(), cursor);
        Ok(())
    }
}
