// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The streaming LEF loader with a byte-budgeted LRU layer cache.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use lru::LruCache;
use parking_lot::Mutex;

use libetude_core::checksum::Crc32;
use libetude_core::errors::{corrupt_error, not_found_error, Result};
use libetude_core::mem::{ReuseCache, ReuseCacheOptions};

use crate::common::{decompress, LayerEntry, LefHeader, ModelIdentity};
use crate::meta::ModelMeta;

/// Options for opening a [`StreamingModel`].
#[derive(Copy, Clone, Debug)]
pub struct StreamingOptions {
    /// The layer cache budget in bytes of uncompressed layer data.
    pub cache_budget: usize,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        StreamingOptions { cache_budget: default_cache_budget() }
    }
}

/// The default cache budget: `LIBETUDE_CACHE_MB` when set and valid, 32 MiB otherwise.
fn default_cache_budget() -> usize {
    if let Ok(value) = std::env::var("LIBETUDE_CACHE_MB") {
        match value.trim().parse::<usize>() {
            Ok(mb) if mb > 0 => return mb << 20,
            _ => warn!("ignoring invalid LIBETUDE_CACHE_MB value"),
        }
    }
    32 << 20
}

#[derive(Debug)]
struct LayerCache {
    lru: LruCache<u32, Arc<Vec<u8>>>,
    usage: usize,
    budget: usize,
}

impl LayerCache {
    /// Evicts least-recently-used layers until `incoming` fits, then inserts it. A layer larger
    /// than the whole budget is returned uncached.
    fn insert(&mut self, id: u32, incoming: Arc<Vec<u8>>) {
        while self.usage + incoming.len() > self.budget {
            match self.lru.pop_lru() {
                Some((evicted, bytes)) => {
                    self.usage -= bytes.len();
                    debug!("evicted layer {} from streaming cache", evicted);
                }
                None => return,
            }
        }

        self.usage += incoming.len();
        self.lru.put(id, incoming);
    }

    fn remove(&mut self, id: u32) -> bool {
        match self.lru.pop(&id) {
            Some(bytes) => {
                self.usage -= bytes.len();
                true
            }
            None => false,
        }
    }
}

/// `StreamingModel` reads the LEF header and index upfront and loads layer payloads on demand.
///
/// Loaded layers are verified, decompressed, and held in an LRU cache bounded by a byte budget;
/// exceeding the budget evicts the least-recently-used layer. Loads block the caller until the
/// layer is verified and decompressed.
#[derive(Debug)]
pub struct StreamingModel {
    file: Mutex<File>,
    header: LefHeader,
    meta: ModelMeta,
    index: Vec<LayerEntry>,
    cache: Mutex<LayerCache>,
    scratch: ReuseCache,
}

impl StreamingModel {
    pub fn open(path: &Path) -> Result<StreamingModel> {
        StreamingModel::open_with(path, StreamingOptions::default())
    }

    pub fn open_with(path: &Path, opts: StreamingOptions) -> Result<StreamingModel> {
        let mut file = File::open(path)?;

        let header = LefHeader::read_from(&mut file)?;

        file.seek(SeekFrom::Start(header.meta_offset))?;
        let meta = ModelMeta::read_from(&mut file)?;

        file.seek(SeekFrom::Start(header.layer_index_offset))?;
        let mut index = Vec::with_capacity(header.layer_count as usize);
        for _ in 0..header.layer_count {
            let entry = LayerEntry::read_from(&mut file)?;
            entry.check_bounds(header.file_size)?;
            index.push(entry);
        }

        Ok(StreamingModel {
            file: Mutex::new(file),
            header,
            meta,
            index,
            cache: Mutex::new(LayerCache {
                lru: LruCache::unbounded(),
                usage: 0,
                budget: opts.cache_budget.max(1),
            }),
            scratch: ReuseCache::new(ReuseCacheOptions::default()),
        })
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

    /// Uncompressed bytes currently held by the layer cache.
    pub fn cache_usage(&self) -> usize {
        self.cache.lock().usage
    }

    /// Whether a layer is currently cached. Does not affect recency.
    pub fn is_cached(&self, id: u32) -> bool {
        self.cache.lock().lru.peek(&id).is_some()
    }

    /// Loads a layer, serving it from the cache when possible.
    pub fn load_layer(&self, id: u32) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.cache.lock().lru.get(&id) {
            return Ok(Arc::clone(bytes));
        }

        let entry = match self.index.iter().find(|entry| entry.id == id) {
            Some(entry) => *entry,
            None => return not_found_error("no layer with the requested id"),
        };

        let bytes = self.read_layer(&entry)?;
        let bytes = Arc::new(bytes);

        self.cache.lock().insert(id, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Loads a layer and reinterprets it as `f32` weights.
    pub fn load_layer_f32(&self, id: u32) -> Result<Vec<f32>> {
        let bytes = self.load_layer(id)?;
        if bytes.len() % 4 != 0 {
            return corrupt_error("layer payload is not a whole number of f32 values");
        }

        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Evicts a layer from the cache. Returns whether it was cached.
    pub fn unload_layer(&self, id: u32) -> bool {
        self.cache.lock().remove(id)
    }

    /// Reads, verifies, and decompresses one layer from the file. The read buffer is drawn from
    /// the model's reuse cache, so repeated on-demand loads recycle their scratch.
    fn read_layer(&self, entry: &LayerEntry) -> Result<Vec<u8>> {
        let stored_len = entry.compressed_size as usize;
        let mut buf = self.scratch.alloc(stored_len);

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut buf[..stored_len])?;
        }

        let stored = &buf[..stored_len];

        let result = if Crc32::of(stored) != entry.crc32 {
            corrupt_error("layer payload crc mismatch")
        }
        else if entry.is_compressed() {
            decompress(self.header.codec()?, stored, entry.uncompressed_size as usize)
        }
        else {
            Ok(stored.to_vec())
        };

        self.scratch.free(buf);
        result
    }
}
