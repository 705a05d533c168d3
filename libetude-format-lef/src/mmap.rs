// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memory-mapped LEF loader.

use std::borrow::Cow;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use memmap2::Mmap;
use parking_lot::Mutex;

use libetude_core::checksum::Crc32;
use libetude_core::errors::{corrupt_error, not_found_error, Result};

use crate::common::{decompress, LayerEntry, LefHeader, ModelIdentity};
use crate::meta::ModelMeta;

/// `MmapModel` maps a whole LEF file and serves layer bytes directly from the mapping.
///
/// The mapping is read-only for the model's lifetime. An uncompressed layer is returned as a
/// borrowed slice into the mapping; a compressed layer decompresses into an owned buffer. Every
/// layer's CRC is verified against its stored bytes on first access.
#[derive(Debug)]
pub struct MmapModel {
    mmap: Mmap,
    header: LefHeader,
    meta: ModelMeta,
    index: Vec<LayerEntry>,
    verified: Mutex<Vec<bool>>,
}

impl MmapModel {
    pub fn open(path: &Path) -> Result<MmapModel> {
        let file = File::open(path)?;

        // SAFETY: the mapping is held privately and never outlives the file handle. The model is
        // read-only by contract; an external writer mutating the file concurrently is outside
        // the supported use.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        let mut cursor = Cursor::new(&mmap[..]);
        let header = LefHeader::read_from(&mut cursor)?;

        if header.file_size != mmap.len() as u64 {
            return corrupt_error("lef file size disagrees with header");
        }

        cursor.set_position(header.meta_offset);
        let meta = ModelMeta::read_from(&mut cursor)?;

        cursor.set_position(header.layer_index_offset);
        let mut index = Vec::with_capacity(header.layer_count as usize);
        for _ in 0..header.layer_count {
            let entry = LayerEntry::read_from(&mut cursor)?;
            entry.check_bounds(header.file_size)?;
            index.push(entry);
        }

        let verified = Mutex::new(vec![false; index.len()]);

        Ok(MmapModel { mmap, header, meta, index, verified })
    }

    pub fn header(&self) -> &LefHeader {
        &self.header
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn layers(&self) -> &[LayerEntry] {
        &self.index
    }

    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            hash: self.header.model_hash,
            name: self.meta.name.clone(),
            version: self.meta.version.clone(),
        }
    }

    pub fn layer_entry(&self, id: u32) -> Result<&LayerEntry> {
        match self.index.iter().find(|entry| entry.id == id) {
            Some(entry) => Ok(entry),
            None => not_found_error("no layer with the requested id"),
        }
    }

    /// The uncompressed bytes of a layer: a slice into the mapping when stored raw, an owned
    /// buffer when stored compressed.
    pub fn layer_bytes(&self, id: u32) -> Result<Cow<'_, [u8]>> {
        let position = match self.index.iter().position(|entry| entry.id == id) {
            Some(position) => position,
            None => return not_found_error("no layer with the requested id"),
        };
        let entry = &self.index[position];

        let start = entry.offset as usize;
        let stored = &self.mmap[start..start + entry.compressed_size as usize];

        {
            let mut verified = self.verified.lock();
            if !verified[position] {
                if Crc32::of(stored) != entry.crc32 {
                    return corrupt_error("layer payload crc mismatch");
                }
                verified[position] = true;
            }
        }

        if entry.is_compressed() {
            let codec = self.header.codec()?;
            Ok(Cow::Owned(decompress(codec, stored, entry.uncompressed_size as usize)?))
        }
        else {
            Ok(Cow::Borrowed(stored))
        }
    }

    /// The uncompressed bytes of a layer reinterpreted as `f32` weights.
    pub fn layer_f32(&self, id: u32) -> Result<Vec<f32>> {
        let bytes = self.layer_bytes(id)?;
        if bytes.len() % 4 != 0 {
            return corrupt_error("layer payload is not a whole number of f32 values");
        }

        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
