// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The smart allocation manager.

use parking_lot::Mutex;

use crate::errors::{invalid_argument_error, Result};

use super::pool::{AllocStrategy, DynamicPool, PoolAlloc, PoolOptions, PoolStats};
use super::reuse::{ReuseCache, ReuseCacheOptions, ReuseCacheStats};
use super::scratch::ScratchContext;

/// Options for creating a [`SmartManager`].
#[derive(Copy, Clone, Debug)]
pub struct SmartManagerOptions {
    pub pool: PoolOptions,
    pub cache: ReuseCacheOptions,
    /// Initial scratch capacity in bytes.
    pub scratch_capacity: usize,
    /// External fragmentation above this triggers compaction on the periodic check.
    pub frag_threshold: f64,
    /// Re-evaluate fragmentation and strategy every this many allocations.
    pub check_interval: u64,
    /// Let the allocation-size histogram steer the pool's fit strategy.
    pub adaptive: bool,
}

impl Default for SmartManagerOptions {
    fn default() -> Self {
        SmartManagerOptions {
            pool: PoolOptions { capacity: 64 << 20, ..Default::default() },
            cache: ReuseCacheOptions::default(),
            scratch_capacity: 64 << 10,
            frag_threshold: 0.5,
            check_interval: 100,
            adaptive: true,
        }
    }
}

/// A live allocation produced by a [`SmartManager`]: a payload buffer plus its pool reservation.
#[derive(Debug)]
pub struct SmartAlloc {
    buf: Vec<u8>,
    reservation: PoolAlloc,
    size: usize,
}

impl SmartAlloc {
    /// The requested payload size. The buffer may be larger (its size class).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.size]
    }

    /// Splits the allocation into its parts so the buffer and reservation can be held in
    /// different owners. Rejoin them with [`SmartAlloc::from_raw`] before freeing.
    pub fn into_raw(self) -> (Vec<u8>, PoolAlloc) {
        (self.buf, self.reservation)
    }

    pub fn from_raw(buf: Vec<u8>, reservation: PoolAlloc) -> SmartAlloc {
        let size = reservation.size().min(buf.len());
        SmartAlloc { buf, reservation, size }
    }
}

/// A combined statistics snapshot.
#[derive(Copy, Clone, Debug)]
pub struct SmartStats {
    pub pool: PoolStats,
    pub cache: ReuseCacheStats,
    pub compactions: u64,
}

struct SmartState {
    alloc_count: u64,
    compactions: u64,
    // Allocation counts bucketed by size class exponent.
    histogram: [u64; usize::BITS as usize + 1],
}

/// `SmartManager` composes a [`DynamicPool`], a [`ReuseCache`], and a [`ScratchContext`] behind a
/// single allocation surface.
///
/// Payload buffers are recycled through the cache while the pool budgets and audits the bytes in
/// flight, so exhaustion, fragmentation, and leak reporting all remain observable. Every
/// `check_interval` allocations the manager compacts the pool when fragmentation crosses the
/// configured threshold and, when adaptive selection is enabled, re-picks the fit strategy from
/// the allocation-size histogram.
pub struct SmartManager {
    pool: DynamicPool,
    cache: ReuseCache,
    scratch: ScratchContext,
    state: Mutex<SmartState>,
    opts: SmartManagerOptions,
}

impl SmartManager {
    pub fn new(opts: SmartManagerOptions) -> Result<SmartManager> {
        Ok(SmartManager {
            pool: DynamicPool::with_options(opts.pool)?,
            cache: ReuseCache::new(opts.cache),
            scratch: ScratchContext::new(opts.scratch_capacity),
            state: Mutex::new(SmartState {
                alloc_count: 0,
                compactions: 0,
                histogram: [0; usize::BITS as usize + 1],
            }),
            opts,
        })
    }

    /// Allocates `size` bytes, recycling a cached buffer when one is available.
    ///
    /// When the pool cannot cover the request the cache is flushed back to the host allocator
    /// before the failure is reported.
    #[track_caller]
    pub fn alloc(&self, size: usize) -> Result<SmartAlloc> {
        if size == 0 {
            return invalid_argument_error("allocation size must be non-zero");
        }

        let reservation = match self.pool.alloc(size) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.cache.cleanup(true);
                return Err(err);
            }
        };

        let mut buf = self.cache.alloc(size);
        if buf.len() < size {
            buf.resize(size, 0);
        }

        self.on_alloc(size);

        Ok(SmartAlloc { buf, reservation, size })
    }

    /// Returns an allocation, recycling its buffer and releasing its pool reservation.
    pub fn free(&self, alloc: SmartAlloc) {
        // A stale handle here means the pool was reset under a live allocation; the buffer is
        // still recycled.
        let _ = self.pool.free(alloc.reservation);
        self.cache.free(alloc.buf);
    }

    pub fn pool(&self) -> &DynamicPool {
        &self.pool
    }

    pub fn cache(&self) -> &ReuseCache {
        &self.cache
    }

    pub fn scratch(&self) -> &ScratchContext {
        &self.scratch
    }

    pub fn stats(&self) -> SmartStats {
        SmartStats {
            pool: self.pool.stats(),
            cache: self.cache.stats(),
            compactions: self.state.lock().compactions,
        }
    }

    fn on_alloc(&self, size: usize) {
        let mut state = self.state.lock();

        state.alloc_count += 1;
        let class = size.next_power_of_two().trailing_zeros() as usize;
        state.histogram[class] += 1;

        if state.alloc_count % self.opts.check_interval != 0 {
            return;
        }

        if self.pool.fragmentation().external_fragmentation > self.opts.frag_threshold {
            self.pool.compact();
            state.compactions += 1;
        }

        if self.opts.adaptive {
            self.pool.set_strategy(pick_strategy(&state.histogram));
        }
    }
}

/// Picks a fit strategy from the allocation-size histogram: workloads dominated by small
/// allocations fragment less under best-fit, while large-buffer workloads favour the cheaper
/// first-fit scan.
fn pick_strategy(histogram: &[u64]) -> AllocStrategy {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return AllocStrategy::FirstFit;
    }

    // Size classes up to 4 KiB count as small.
    let small: u64 = histogram[..13.min(histogram.len())].iter().sum();

    if small * 4 >= total * 3 {
        AllocStrategy::BestFit
    }
    else {
        AllocStrategy::FirstFit
    }
}

#[cfg(test)]
mod tests {
    use super::{SmartManager, SmartManagerOptions};
    use crate::errors::ErrorKind;
    use crate::mem::PoolOptions;

    fn small_manager(capacity: usize) -> SmartManager {
        SmartManager::new(SmartManagerOptions {
            pool: PoolOptions { capacity, ..Default::default() },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn verify_alloc_free_accounting() {
        let manager = small_manager(1 << 16);

        let alloc = manager.alloc(1000).unwrap();
        assert!(manager.stats().pool.used_size >= 1000);

        manager.free(alloc);
        assert_eq!(manager.stats().pool.used_size, 0);
    }

    #[test]
    fn verify_buffer_recycled() {
        let manager = small_manager(1 << 16);

        let alloc = manager.alloc(500).unwrap();
        manager.free(alloc);

        let _again = manager.alloc(500).unwrap();
        assert_eq!(manager.stats().cache.hits, 1);
    }

    #[test]
    fn verify_exhaustion_reports_oom() {
        let manager = small_manager(4096);

        let _hold = manager.alloc(4000).unwrap();
        let err = manager.alloc(4096).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        // The failed request flushed the cache.
        assert_eq!(manager.stats().cache.cached_buffers, 0);
    }

    #[test]
    fn verify_write_through_alloc() {
        let manager = small_manager(1 << 16);

        let mut alloc = manager.alloc(16).unwrap();
        alloc.bytes_mut().copy_from_slice(&[7u8; 16]);
        assert_eq!(alloc.bytes()[15], 7);

        manager.free(alloc);
    }
}
