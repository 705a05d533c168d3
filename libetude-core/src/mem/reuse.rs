// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-size-class recycling of heap buffers.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Options for creating a [`ReuseCache`].
#[derive(Copy, Clone, Debug)]
pub struct ReuseCacheOptions {
    /// The smallest size class. Requests below it are rounded up to it.
    pub min_size: usize,
    /// The largest size class. Requests above it bypass the cache entirely.
    pub max_size: usize,
    /// The maximum number of buffers retained per size class.
    pub max_per_class: usize,
    /// Buffers idle longer than this are candidates for cleanup.
    pub max_idle: Duration,
}

impl Default for ReuseCacheOptions {
    fn default() -> Self {
        ReuseCacheOptions {
            min_size: 64,
            max_size: 1 << 22,
            max_per_class: 16,
            max_idle: Duration::from_millis(5000),
        }
    }
}

/// A read-only snapshot of cache statistics.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReuseCacheStats {
    pub requests: u64,
    pub hits: u64,
    /// Buffers currently held across all size classes.
    pub cached_buffers: usize,
    /// Bytes currently held across all size classes.
    pub cached_bytes: usize,
}

impl ReuseCacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        }
        else {
            self.hits as f64 / self.requests as f64
        }
    }
}

#[derive(Debug)]
struct Entry {
    buf: Vec<u8>,
    stored_at: Instant,
}

#[derive(Debug)]
struct Bucket {
    class_size: usize,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct CacheState {
    buckets: Vec<Bucket>,
    requests: u64,
    hits: u64,
}

/// `ReuseCache` recycles heap buffers through bounded per-size-class stacks.
///
/// Sizes are rounded up to the next power of two, clamped to `[min_size, max_size]`. A request is
/// served from the matching bucket when possible and falls through to a fresh heap allocation
/// otherwise. Returned buffers are retained while the bucket is under capacity. The cache is
/// thread-safe.
#[derive(Debug)]
pub struct ReuseCache {
    state: Mutex<CacheState>,
    opts: ReuseCacheOptions,
}

impl ReuseCache {
    pub fn new(opts: ReuseCacheOptions) -> ReuseCache {
        let mut buckets = Vec::new();

        let mut class_size = opts.min_size.next_power_of_two();
        while class_size <= opts.max_size {
            buckets.push(Bucket { class_size, entries: Vec::new() });
            class_size *= 2;
        }

        ReuseCache { state: Mutex::new(CacheState { buckets, requests: 0, hits: 0 }), opts }
    }

    /// The size class a request of `size` bytes maps to, or `None` when it bypasses the cache.
    pub fn class_of(&self, size: usize) -> Option<usize> {
        if size > self.opts.max_size {
            return None;
        }
        Some(size.max(self.opts.min_size).next_power_of_two())
    }

    /// Gets a buffer of at least `size` bytes, recycled when possible.
    ///
    /// The returned buffer's length is its full size class and its contents are unspecified; the
    /// caller overwrites it. Oversized requests are served directly from the heap.
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        let class = match self.class_of(size) {
            Some(class) => class,
            None => return vec![0u8; size],
        };

        let mut state = self.state.lock();
        state.requests += 1;

        let bucket = state.bucket_mut(class);
        if let Some(entry) = bucket.entries.pop() {
            state.hits += 1;
            return entry.buf;
        }

        drop(state);
        vec![0u8; class]
    }

    /// Returns a buffer to its size class, dropping it when the class is full or the buffer does
    /// not match any class.
    pub fn free(&self, buf: Vec<u8>) {
        let len = buf.len();
        let min_class = self.opts.min_size.next_power_of_two();
        if len < min_class || len > self.opts.max_size || !len.is_power_of_two() {
            return;
        }

        let class = len;

        let mut state = self.state.lock();
        let max_per_class = self.opts.max_per_class;

        let bucket = state.bucket_mut(class);
        if bucket.class_size == class && bucket.entries.len() < max_per_class {
            bucket.entries.push(Entry { buf, stored_at: Instant::now() });
        }
    }

    /// Drops half of each bucket whose oldest entry has been idle past `max_idle`, or of every
    /// non-empty bucket when `force` is set.
    pub fn cleanup(&self, force: bool) {
        let now = Instant::now();
        let max_idle = self.opts.max_idle;

        let mut state = self.state.lock();
        for bucket in state.buckets.iter_mut() {
            if bucket.entries.is_empty() {
                continue;
            }

            let stale = bucket
                .entries
                .first()
                .map(|entry| now.duration_since(entry.stored_at) >= max_idle)
                .unwrap_or(false);

            if force || stale {
                // Entries are stacked in store order, so draining the front drops the oldest.
                let keep = bucket.entries.len() / 2;
                bucket.entries.drain(..bucket.entries.len() - keep);
            }
        }
    }

    pub fn stats(&self) -> ReuseCacheStats {
        let state = self.state.lock();

        let mut stats = ReuseCacheStats {
            requests: state.requests,
            hits: state.hits,
            ..Default::default()
        };

        for bucket in &state.buckets {
            stats.cached_buffers += bucket.entries.len();
            stats.cached_bytes += bucket.entries.len() * bucket.class_size;
        }

        stats
    }
}

impl Default for ReuseCache {
    fn default() -> Self {
        ReuseCache::new(ReuseCacheOptions::default())
    }
}

impl CacheState {
    fn bucket_mut(&mut self, class_size: usize) -> &mut Bucket {
        let idx = self
            .buckets
            .iter()
            .position(|bucket| bucket.class_size >= class_size)
            .unwrap_or(self.buckets.len() - 1);
        &mut self.buckets[idx]
    }
}
