// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared LEF structures: header, layer index, and the enums they carry.

use std::io::{Read, Write};

use bitflags::bitflags;

use libetude_core::checksum::Crc32;
use libetude_core::errors::{
    corrupt_error, incompatible_version_error, unsupported_error, Result,
};
use libetude_core::io::{ReadBytes, WriteBytes};

/// The LEF stream marker.
pub const LEF_MAGIC: [u8; 4] = *b"LEF1";

pub const LEF_VERSION_MAJOR: u16 = 1;
pub const LEF_VERSION_MINOR: u16 = 0;

/// The serialized size of [`LefHeader`] in bytes.
pub const HEADER_SIZE: u64 = 56;

/// The serialized size of one [`LayerEntry`] in bytes.
pub const LAYER_ENTRY_SIZE: u64 = 52;

bitflags! {
    /// Header flags. Bits 8-9 carry the [`LayerCodec`] used for compressed layers.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const COMPRESSED = 0x0000_0001;
        const QUANTIZED = 0x0000_0002;
        const EXTENDED = 0x0000_0004;
        const CODEC_MASK = 0x0000_0300;
    }
}

/// The compression codec applied to compressed layer payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerCodec {
    None,
    Lz4,
    Zstd,
}

impl LayerCodec {
    pub(crate) fn to_flag_bits(self) -> u32 {
        match self {
            LayerCodec::None => 0,
            LayerCodec::Lz4 => 0x0100,
            LayerCodec::Zstd => 0x0200,
        }
    }

    pub(crate) fn from_flags(flags: HeaderFlags) -> Result<LayerCodec> {
        match flags.bits() & HeaderFlags::CODEC_MASK.bits() {
            0 => Ok(LayerCodec::None),
            0x0100 => Ok(LayerCodec::Lz4),
            0x0200 => Ok(LayerCodec::Zstd),
            _ => unsupported_error("unknown layer codec"),
        }
    }
}

/// The role of a layer's weights within the model.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Linear,
    Conv1d,
    Embedding,
    Norm,
    Attention,
    Vocoder,
    Custom,
}

impl LayerKind {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            LayerKind::Linear => 0,
            LayerKind::Conv1d => 1,
            LayerKind::Embedding => 2,
            LayerKind::Norm => 3,
            LayerKind::Attention => 4,
            LayerKind::Vocoder => 5,
            LayerKind::Custom => 6,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Result<LayerKind> {
        match value {
            0 => Ok(LayerKind::Linear),
            1 => Ok(LayerKind::Conv1d),
            2 => Ok(LayerKind::Embedding),
            3 => Ok(LayerKind::Norm),
            4 => Ok(LayerKind::Attention),
            5 => Ok(LayerKind::Vocoder),
            6 => Ok(LayerKind::Custom),
            _ => unsupported_error("unknown layer kind"),
        }
    }
}

/// The quantization scheme of a layer's stored weights.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QuantKind {
    None,
    Int8,
    Int4,
    Bf16,
}

impl QuantKind {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            QuantKind::None => 0,
            QuantKind::Int8 => 1,
            QuantKind::Int4 => 2,
            QuantKind::Bf16 => 3,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Result<QuantKind> {
        match value {
            0 => Ok(QuantKind::None),
            1 => Ok(QuantKind::Int8),
            2 => Ok(QuantKind::Int4),
            3 => Ok(QuantKind::Bf16),
            _ => unsupported_error("unknown quantization kind"),
        }
    }
}

/// The LEF file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LefHeader {
    pub major: u16,
    pub minor: u16,
    pub flags: HeaderFlags,
    /// CRC32 of the model metadata followed by every layer's uncompressed payload in ascending
    /// layer-id order.
    pub model_hash: u32,
    pub meta_offset: u64,
    pub layer_index_offset: u64,
    pub layer_count: u32,
    pub data_offset: u64,
    pub file_size: u64,
}

impl LefHeader {
    /// Serializes the header. The CRC is computed over the serialized bytes with the CRC field
    /// itself zeroed.
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes(0);
        let crc = Crc32::of(&bytes);
        writer.write_all(&self.to_bytes(crc)).map_err(Into::into)
    }

    fn to_bytes(&self, crc: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE as usize);
        bytes.extend_from_slice(&LEF_MAGIC);
        bytes.extend_from_slice(&self.major.to_le_bytes());
        bytes.extend_from_slice(&self.minor.to_le_bytes());
        bytes.extend_from_slice(&self.flags.bits().to_le_bytes());
        bytes.extend_from_slice(&self.model_hash.to_le_bytes());
        bytes.extend_from_slice(&self.meta_offset.to_le_bytes());
        bytes.extend_from_slice(&self.layer_index_offset.to_le_bytes());
        bytes.extend_from_slice(&self.layer_count.to_le_bytes());
        bytes.extend_from_slice(&self.data_offset.to_le_bytes());
        bytes.extend_from_slice(&self.file_size.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Reads and validates a header: magic, version compatibility, and CRC, in that order. No
    /// offset is trusted before the CRC passes.
    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<LefHeader> {
        let magic = reader.read_quad_bytes()?;
        if magic != LEF_MAGIC {
            return corrupt_error("missing lef stream marker");
        }

        let major = reader.read_u16()?;
        let minor = reader.read_u16()?;

        // Equal major is required; any minor within the major remains readable because minor
        // revisions are additive.
        if major != LEF_VERSION_MAJOR {
            return incompatible_version_error("lef major version is not supported");
        }

        let flags = HeaderFlags::from_bits_retain(reader.read_u32()?);
        let model_hash = reader.read_u32()?;
        let meta_offset = reader.read_u64()?;
        let layer_index_offset = reader.read_u64()?;
        let layer_count = reader.read_u32()?;
        let data_offset = reader.read_u64()?;
        let file_size = reader.read_u64()?;
        let stored_crc = reader.read_u32()?;

        let header = LefHeader {
            major,
            minor,
            flags,
            model_hash,
            meta_offset,
            layer_index_offset,
            layer_count,
            data_offset,
            file_size,
        };

        if Crc32::of(&header.to_bytes(0)) != stored_crc {
            return corrupt_error("lef header crc mismatch");
        }

        Ok(header)
    }

    pub fn codec(&self) -> Result<LayerCodec> {
        LayerCodec::from_flags(self.flags)
    }
}

/// One entry of the layer index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LayerEntry {
    pub id: u32,
    pub kind: LayerKind,
    pub quant: QuantKind,
    /// Absolute file offset of the stored payload.
    pub offset: u64,
    pub uncompressed_size: u64,
    /// Stored payload size. Equal to `uncompressed_size` when the layer is stored raw.
    pub compressed_size: u64,
    /// CRC32 of the stored payload bytes.
    pub crc32: u32,
    pub dependency_count: u32,
    pub dependency_offset: u64,
}

impl LayerEntry {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != self.uncompressed_size
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32(self.id)?;
        writer.write_u32(self.kind.to_u32())?;
        writer.write_u32(self.quant.to_u32())?;
        writer.write_u64(self.offset)?;
        writer.write_u64(self.uncompressed_size)?;
        writer.write_u64(self.compressed_size)?;
        writer.write_u32(self.crc32)?;
        writer.write_u32(self.dependency_count)?;
        writer.write_u64(self.dependency_offset)?;
        Ok(())
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<LayerEntry> {
        Ok(LayerEntry {
            id: reader.read_u32()?,
            kind: LayerKind::from_u32(reader.read_u32()?)?,
            quant: QuantKind::from_u32(reader.read_u32()?)?,
            offset: reader.read_u64()?,
            uncompressed_size: reader.read_u64()?,
            compressed_size: reader.read_u64()?,
            crc32: reader.read_u32()?,
            dependency_count: reader.read_u32()?,
            dependency_offset: reader.read_u64()?,
        })
    }

    /// Checks that the stored payload range lies within the file.
    pub(crate) fn check_bounds(&self, file_size: u64) -> Result<()> {
        let end = self.offset.checked_add(self.compressed_size);
        match end {
            Some(end) if self.offset >= HEADER_SIZE && end <= file_size => Ok(()),
            _ => corrupt_error("layer payload range exceeds file"),
        }
    }
}

/// What identifies a base model to an extension: its hash plus name and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelIdentity {
    pub hash: u32,
    pub name: String,
    pub version: String,
}

/// Decompresses a stored payload with the declared codec.
pub(crate) fn decompress(
    codec: LayerCodec,
    stored: &[u8],
    uncompressed_size: usize,
) -> Result<Vec<u8>> {
    match codec {
        LayerCodec::None => {
            if stored.len() != uncompressed_size {
                return corrupt_error("raw payload has the wrong size");
            }
            Ok(stored.to_vec())
        }
        LayerCodec::Lz4 => match lz4_flex::block::decompress(stored, uncompressed_size) {
            Ok(data) if data.len() == uncompressed_size => Ok(data),
            Ok(_) => corrupt_error("lz4 payload has the wrong decompressed size"),
            Err(_) => corrupt_error("lz4 payload is malformed"),
        },
        LayerCodec::Zstd => match zstd::bulk::decompress(stored, uncompressed_size) {
            Ok(data) if data.len() == uncompressed_size => Ok(data),
            Ok(_) => corrupt_error("zstd payload has the wrong decompressed size"),
            Err(_) => corrupt_error("zstd payload is malformed"),
        },
    }
}

/// Compresses a payload with the declared codec.
pub(crate) fn compress(codec: LayerCodec, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        LayerCodec::None => Ok(data.to_vec()),
        LayerCodec::Lz4 => Ok(lz4_flex::block::compress(data)),
        LayerCodec::Zstd => zstd::bulk::compress(data, 0)
            .map_err(|err| libetude_core::errors::Error::with_source(
                libetude_core::errors::ErrorKind::Internal,
                "zstd compression failed",
                err,
            )),
    }
}
