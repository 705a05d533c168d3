// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block-level pool allocators.

use std::panic::Location;
use std::time::{Duration, Instant};

use log::error;
use parking_lot::Mutex;

use crate::errors::{invalid_argument_error, invalid_state_error, out_of_memory_error, Result};

/// The strategy used to select a free block for an allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocStrategy {
    /// Use the first free block that fits. The default.
    FirstFit,
    /// Use the smallest free block that fits.
    BestFit,
    /// Use the largest free block that fits.
    WorstFit,
    /// Resume scanning from the block after the previous allocation.
    NextFit,
}

/// Options for creating a [`DynamicPool`].
#[derive(Copy, Clone, Debug)]
pub struct PoolOptions {
    /// Total payload capacity of the pool in bytes.
    pub capacity: usize,
    /// Alignment of every returned offset. Must be a power of two.
    pub alignment: usize,
    /// A split leaving a residual at or below this size is suppressed.
    pub min_block_size: usize,
    /// The block selection strategy.
    pub strategy: AllocStrategy,
    /// Allocate an arena so payload bytes can be addressed through the pool.
    pub backed: bool,
    /// In debug builds, log still-live allocations when the pool is dropped.
    pub report_leaks_on_drop: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            capacity: 1 << 20,
            alignment: 16,
            min_block_size: 32,
            strategy: AllocStrategy::FirstFit,
            backed: false,
            report_leaks_on_drop: false,
        }
    }
}

/// A handle to a live allocation in a [`DynamicPool`].
///
/// The handle is a plain value; returning it to [`DynamicPool::free`] ends the allocation. The
/// pool validates handles on every use, so a stale or double-freed handle is reported as an error
/// instead of corrupting the block table.
#[derive(Copy, Clone, Debug)]
pub struct PoolAlloc {
    block: usize,
    seq: u64,
    offset: usize,
    size: usize,
}

impl PoolAlloc {
    /// The aligned payload offset of the allocation within the pool.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The usable payload size of the allocation in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A read-only snapshot of pool statistics.
#[derive(Copy, Clone, Debug, Default)]
pub struct PoolStats {
    pub total_size: usize,
    pub used_size: usize,
    pub peak_used: usize,
    pub alloc_count: u64,
    pub free_count: u64,
    pub reset_count: u64,
    /// The fraction of the pool currently in use.
    pub utilization: f64,
}

/// A fragmentation analysis of a pool's free space.
#[derive(Copy, Clone, Debug, Default)]
pub struct FragmentationReport {
    pub total_free: usize,
    pub largest_free: usize,
    pub num_free_blocks: usize,
    /// `1 - largest_free / total_free`. Zero when the pool has no free space.
    pub external_fragmentation: f64,
    /// Free bytes unusable by a request the size of the largest free block.
    pub wasted: usize,
}

/// A leak analysis of a pool's live allocations.
#[derive(Clone, Debug, Default)]
pub struct LeakReport {
    /// The number of live allocations.
    pub active_blocks: usize,
    /// Live allocations older than the requested threshold.
    pub stale_blocks: usize,
    /// Total payload bytes held by stale allocations.
    pub stale_bytes: usize,
    /// Allocation site and age of each stale allocation, oldest first.
    pub stale_sites: Vec<(&'static Location<'static>, usize, Duration)>,
}

const NONE: usize = usize::MAX;

struct Block {
    offset: usize,
    size: usize,
    free: bool,
    // Physical neighbour chain, in address order.
    prev_phys: usize,
    next_phys: usize,
    // Membership chain: the free list when free, the used list otherwise.
    prev_link: usize,
    next_link: usize,
    // Handle validation sequence, bumped on every allocation of this slot.
    seq: u64,
    site: Option<&'static Location<'static>>,
    stamp: Option<Instant>,
}

struct PoolState {
    capacity: usize,
    alignment: usize,
    min_block_size: usize,
    strategy: AllocStrategy,
    report_leaks_on_drop: bool,
    arena: Option<Vec<u8>>,
    blocks: Vec<Block>,
    dead: Vec<usize>,
    free_head: usize,
    used_head: usize,
    next_fit_cursor: usize,
    used_size: usize,
    peak_used: usize,
    alloc_count: u64,
    free_count: u64,
    reset_count: u64,
    seq: u64,
}

/// `DynamicPool` is a variable-size block allocator over a fixed byte capacity.
///
/// Free blocks are tracked on an index-linked free list over a block table. Allocation selects a
/// block with the configured [`AllocStrategy`], splits it when the residual is worth keeping, and
/// returns an aligned [`PoolAlloc`] handle. Freeing eagerly coalesces the block with its
/// physically-adjacent successor when that block is also free.
///
/// All operations serialize on an internal mutex, so a pool may be shared between threads.
pub struct DynamicPool {
    state: Mutex<PoolState>,
}

impl DynamicPool {
    /// Creates a metadata-only pool with the default options and the given capacity and alignment.
    pub fn new(capacity: usize, alignment: usize) -> Result<DynamicPool> {
        DynamicPool::with_options(PoolOptions { capacity, alignment, ..Default::default() })
    }

    /// Creates an arena-backed pool whose payload bytes are addressed through
    /// [`write`](DynamicPool::write) and [`read`](DynamicPool::read).
    pub fn with_storage(capacity: usize, alignment: usize) -> Result<DynamicPool> {
        DynamicPool::with_options(PoolOptions {
            capacity,
            alignment,
            backed: true,
            ..Default::default()
        })
    }

    pub fn with_options(opts: PoolOptions) -> Result<DynamicPool> {
        if opts.capacity == 0 {
            return invalid_argument_error("pool capacity must be non-zero");
        }
        if opts.alignment == 0 || !opts.alignment.is_power_of_two() {
            return invalid_argument_error("pool alignment must be a power of two");
        }

        let mut state = PoolState {
            capacity: opts.capacity,
            alignment: opts.alignment,
            min_block_size: opts.min_block_size.max(opts.alignment),
            strategy: opts.strategy,
            report_leaks_on_drop: opts.report_leaks_on_drop,
            arena: if opts.backed { Some(vec![0u8; opts.capacity]) } else { None },
            blocks: Vec::new(),
            dead: Vec::new(),
            free_head: NONE,
            used_head: NONE,
            next_fit_cursor: NONE,
            used_size: 0,
            peak_used: 0,
            alloc_count: 0,
            free_count: 0,
            reset_count: 0,
            seq: 0,
        };

        let initial = state.new_block(0, opts.capacity);
        state.push_free(initial);

        Ok(DynamicPool { state: Mutex::new(state) })
    }

    /// Changes the block selection strategy for subsequent allocations.
    pub fn set_strategy(&self, strategy: AllocStrategy) {
        self.state.lock().strategy = strategy;
    }

    /// Allocates `size` bytes aligned to the pool alignment.
    #[track_caller]
    pub fn alloc(&self, size: usize) -> Result<PoolAlloc> {
        let alignment = self.state.lock().alignment;
        self.alloc_aligned(size, alignment)
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// The request is oversized by `align - 1` so the returned offset can be rounded up to the
    /// requested alignment inside the selected block.
    #[track_caller]
    pub fn alloc_aligned(&self, size: usize, align: usize) -> Result<PoolAlloc> {
        let site = Location::caller();

        if size == 0 {
            return invalid_argument_error("allocation size must be non-zero");
        }
        if align == 0 || !align.is_power_of_two() {
            return invalid_argument_error("allocation alignment must be a power of two");
        }

        let mut state = self.state.lock();

        let slack = align.saturating_sub(state.alignment);
        let need = round_up(size + slack, state.alignment);

        let block = match state.select_block(need) {
            Some(block) => block,
            None => {
                error!("pool exhausted: {} bytes requested, {} in use", size, state.used_size);
                return out_of_memory_error("pool cannot satisfy allocation");
            }
        };

        state.split_block(block, need);
        state.unlink_free(block);

        state.blocks[block].free = false;
        state.blocks[block].site = Some(site);
        state.blocks[block].stamp = Some(Instant::now());

        state.seq += 1;
        let seq = state.seq;
        state.blocks[block].seq = seq;

        state.push_used(block);

        state.used_size += state.blocks[block].size;
        state.peak_used = state.peak_used.max(state.used_size);
        state.alloc_count += 1;

        let offset = round_up(state.blocks[block].offset, align);

        Ok(PoolAlloc { block, seq, offset, size })
    }

    /// Frees an allocation, returning its block to the free list and eagerly coalescing with the
    /// physically-adjacent successor when that block is also free.
    pub fn free(&self, alloc: PoolAlloc) -> Result<()> {
        let mut state = self.state.lock();

        if alloc.block >= state.blocks.len() {
            return invalid_argument_error("allocation handle does not belong to this pool");
        }

        if state.blocks[alloc.block].free {
            match state.blocks[alloc.block].site {
                Some(site) => {
                    error!("double free of block allocated at {}:{}", site.file(), site.line())
                }
                None => error!("double free of untracked block"),
            }
            return invalid_state_error("allocation was already freed");
        }

        if state.blocks[alloc.block].seq != alloc.seq {
            return invalid_argument_error("stale allocation handle");
        }

        state.used_size -= state.blocks[alloc.block].size;
        state.free_count += 1;

        state.unlink_used(alloc.block);
        state.blocks[alloc.block].free = true;
        state.push_free(alloc.block);

        // Coalesce with the physical successor, then let a free predecessor absorb the result, so
        // that a full free sequence in any order collapses back to maximal free runs.
        state.merge_with_next(alloc.block);

        let prev = state.blocks[alloc.block].prev_phys;
        if prev != NONE && state.blocks[prev].free {
            state.merge_with_next(prev);
        }

        Ok(())
    }

    /// Copies `data` into the allocation's payload starting at `at`. Requires an arena-backed
    /// pool.
    pub fn write(&self, alloc: &PoolAlloc, at: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.check_handle(alloc)?;

        let start = state.payload_range(alloc, at, data.len())?;
        match state.arena.as_mut() {
            Some(arena) => {
                arena[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            None => invalid_state_error("pool is not arena-backed"),
        }
    }

    /// Copies bytes from the allocation's payload starting at `at`. Requires an arena-backed
    /// pool.
    pub fn read(&self, alloc: &PoolAlloc, at: usize, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        state.check_handle(alloc)?;

        let start = state.payload_range(alloc, at, out.len())?;
        match state.arena.as_ref() {
            Some(arena) => {
                out.copy_from_slice(&arena[start..start + out.len()]);
                Ok(())
            }
            None => invalid_state_error("pool is not arena-backed"),
        }
    }

    /// Releases every allocation and restores the pool to a single free block.
    pub fn reset(&self) {
        let mut state = self.state.lock();

        let capacity = state.capacity;
        state.blocks.clear();
        state.dead.clear();
        state.free_head = NONE;
        state.used_head = NONE;
        state.next_fit_cursor = NONE;
        state.used_size = 0;
        state.reset_count += 1;

        let initial = state.new_block(0, capacity);
        state.push_free(initial);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();

        PoolStats {
            total_size: state.capacity,
            used_size: state.used_size,
            peak_used: state.peak_used,
            alloc_count: state.alloc_count,
            free_count: state.free_count,
            reset_count: state.reset_count,
            utilization: state.used_size as f64 / state.capacity as f64,
        }
    }

    /// Analyzes the free space of the pool.
    pub fn fragmentation(&self) -> FragmentationReport {
        let state = self.state.lock();

        let mut report = FragmentationReport::default();

        let mut cursor = state.free_head;
        while cursor != NONE {
            let block = &state.blocks[cursor];
            report.total_free += block.size;
            report.largest_free = report.largest_free.max(block.size);
            report.num_free_blocks += 1;
            cursor = block.next_link;
        }

        if report.total_free > 0 {
            report.external_fragmentation =
                1.0 - report.largest_free as f64 / report.total_free as f64;
            report.wasted = report.total_free - report.largest_free;
        }

        report
    }

    /// Merges every run of physically-adjacent free blocks. Returns the number of merges.
    ///
    /// Compaction only touches free blocks; `used_size` is unchanged.
    pub fn compact(&self) -> usize {
        let mut state = self.state.lock();

        let mut merges = 0;

        let mut cursor = state.first_phys();
        while cursor != NONE {
            if state.blocks[cursor].free {
                while state.merge_with_next(cursor) {
                    merges += 1;
                }
            }
            cursor = state.blocks[cursor].next_phys;
        }

        merges
    }

    /// Reports live allocations, flagging those older than `threshold`.
    pub fn leaks(&self, threshold: Duration) -> LeakReport {
        let state = self.state.lock();
        let now = Instant::now();

        let mut report = LeakReport::default();

        let mut cursor = state.used_head;
        while cursor != NONE {
            let block = &state.blocks[cursor];
            report.active_blocks += 1;

            let age = block.stamp.map(|stamp| now.duration_since(stamp)).unwrap_or_default();
            if age >= threshold {
                report.stale_blocks += 1;
                report.stale_bytes += block.size;
                if let Some(site) = block.site {
                    report.stale_sites.push((site, block.size, age));
                }
            }

            cursor = block.next_link;
        }

        report.stale_sites.sort_by(|a, b| b.2.cmp(&a.2));
        report
    }
}

impl Drop for DynamicPool {
    fn drop(&mut self) {
        // Leak tracking is a debug facility; release builds skip the walk entirely.
        if !cfg!(debug_assertions) {
            return;
        }

        let state = self.state.get_mut();
        if !state.report_leaks_on_drop {
            return;
        }

        let mut cursor = state.used_head;
        while cursor != NONE {
            let block = &state.blocks[cursor];
            match block.site {
                Some(site) => error!(
                    "pool dropped with live {}-byte allocation from {}:{}",
                    block.size,
                    site.file(),
                    site.line()
                ),
                None => error!("pool dropped with live {}-byte allocation", block.size),
            }
            cursor = block.next_link;
        }
    }
}

impl PoolState {
    fn new_block(&mut self, offset: usize, size: usize) -> usize {
        let block = Block {
            offset,
            size,
            free: true,
            prev_phys: NONE,
            next_phys: NONE,
            prev_link: NONE,
            next_link: NONE,
            seq: 0,
            site: None,
            stamp: None,
        };

        match self.dead.pop() {
            Some(slot) => {
                self.blocks[slot] = block;
                slot
            }
            None => {
                self.blocks.push(block);
                self.blocks.len() - 1
            }
        }
    }

    fn first_phys(&self) -> usize {
        // The block at offset zero is never merged away, so walk any chain back to its head.
        let mut cursor = if self.free_head != NONE { self.free_head } else { self.used_head };
        if cursor == NONE {
            return NONE;
        }
        while self.blocks[cursor].prev_phys != NONE {
            cursor = self.blocks[cursor].prev_phys;
        }
        cursor
    }

    fn select_block(&mut self, need: usize) -> Option<usize> {
        match self.strategy {
            AllocStrategy::FirstFit => {
                let mut cursor = self.free_head;
                while cursor != NONE {
                    if self.blocks[cursor].size >= need {
                        return Some(cursor);
                    }
                    cursor = self.blocks[cursor].next_link;
                }
                None
            }
            AllocStrategy::BestFit | AllocStrategy::WorstFit => {
                let best_fit = self.strategy == AllocStrategy::BestFit;
                let mut best = NONE;

                let mut cursor = self.free_head;
                while cursor != NONE {
                    let size = self.blocks[cursor].size;
                    if size >= need {
                        let better = best == NONE
                            || (best_fit && size < self.blocks[best].size)
                            || (!best_fit && size > self.blocks[best].size);
                        if better {
                            best = cursor;
                        }
                    }
                    cursor = self.blocks[cursor].next_link;
                }

                if best != NONE {
                    Some(best)
                }
                else {
                    None
                }
            }
            AllocStrategy::NextFit => {
                let start = if self.next_fit_cursor != NONE { self.next_fit_cursor } else { self.free_head };
                if start == NONE {
                    return None;
                }

                // One full lap over the circular view of the free list.
                let mut cursor = start;
                loop {
                    if self.blocks[cursor].size >= need {
                        self.next_fit_cursor = self.blocks[cursor].next_link;
                        return Some(cursor);
                    }

                    cursor = self.blocks[cursor].next_link;
                    if cursor == NONE {
                        cursor = self.free_head;
                    }
                    if cursor == start {
                        return None;
                    }
                }
            }
        }
    }

    /// Splits `block` so its size becomes `need`, inserting the residual as a new free block,
    /// unless the residual is too small to be useful.
    fn split_block(&mut self, block: usize, need: usize) {
        let size = self.blocks[block].size;
        if size <= need || size - need <= self.min_block_size {
            return;
        }

        let offset = self.blocks[block].offset;
        let residual = self.new_block(offset + need, size - need);
        self.blocks[block].size = need;

        // Link the residual after `block` in the physical chain.
        let next = self.blocks[block].next_phys;
        self.blocks[residual].prev_phys = block;
        self.blocks[residual].next_phys = next;
        self.blocks[block].next_phys = residual;
        if next != NONE {
            self.blocks[next].prev_phys = residual;
        }

        self.push_free(residual);
    }

    /// Merges `block` with its physical successor when both are free. Returns true on a merge.
    fn merge_with_next(&mut self, block: usize) -> bool {
        let next = self.blocks[block].next_phys;
        if next == NONE || !self.blocks[block].free || !self.blocks[next].free {
            return false;
        }

        self.unlink_free(next);

        self.blocks[block].size += self.blocks[next].size;

        let after = self.blocks[next].next_phys;
        self.blocks[block].next_phys = after;
        if after != NONE {
            self.blocks[after].prev_phys = block;
        }

        if self.next_fit_cursor == next {
            self.next_fit_cursor = NONE;
        }

        self.blocks[next].size = 0;
        self.dead.push(next);

        true
    }

    fn push_free(&mut self, block: usize) {
        self.blocks[block].prev_link = NONE;
        self.blocks[block].next_link = self.free_head;
        if self.free_head != NONE {
            self.blocks[self.free_head].prev_link = block;
        }
        self.free_head = block;
    }

    fn unlink_free(&mut self, block: usize) {
        let prev = self.blocks[block].prev_link;
        let next = self.blocks[block].next_link;

        if prev != NONE {
            self.blocks[prev].next_link = next;
        }
        else {
            self.free_head = next;
        }
        if next != NONE {
            self.blocks[next].prev_link = prev;
        }

        if self.next_fit_cursor == block {
            self.next_fit_cursor = next;
        }

        self.blocks[block].prev_link = NONE;
        self.blocks[block].next_link = NONE;
    }

    fn push_used(&mut self, block: usize) {
        self.blocks[block].prev_link = NONE;
        self.blocks[block].next_link = self.used_head;
        if self.used_head != NONE {
            self.blocks[self.used_head].prev_link = block;
        }
        self.used_head = block;
    }

    fn unlink_used(&mut self, block: usize) {
        let prev = self.blocks[block].prev_link;
        let next = self.blocks[block].next_link;

        if prev != NONE {
            self.blocks[prev].next_link = next;
        }
        else {
            self.used_head = next;
        }
        if next != NONE {
            self.blocks[next].prev_link = prev;
        }

        self.blocks[block].prev_link = NONE;
        self.blocks[block].next_link = NONE;
    }

    fn check_handle(&self, alloc: &PoolAlloc) -> Result<()> {
        if alloc.block >= self.blocks.len()
            || self.blocks[alloc.block].free
            || self.blocks[alloc.block].seq != alloc.seq
        {
            return invalid_argument_error("stale allocation handle");
        }
        Ok(())
    }

    fn payload_range(&self, alloc: &PoolAlloc, at: usize, len: usize) -> Result<usize> {
        let end = self.blocks[alloc.block].offset + self.blocks[alloc.block].size;
        let start = alloc.offset + at;

        if start + len > end {
            return invalid_argument_error("access outside allocation payload");
        }
        Ok(start)
    }
}

/// `FixedPool` partitions its capacity into equal slots tracked by an occupancy bitmap.
pub struct FixedPool {
    state: Mutex<FixedState>,
}

/// A handle to a live slot in a [`FixedPool`].
#[derive(Copy, Clone, Debug)]
pub struct FixedAlloc {
    slot: usize,
    offset: usize,
    size: usize,
}

impl FixedAlloc {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

struct FixedState {
    block_size: usize,
    count: usize,
    bitmap: Vec<u64>,
    used_count: usize,
    peak_count: usize,
    alloc_count: u64,
    free_count: u64,
    reset_count: u64,
}

impl FixedPool {
    /// Creates a pool of `capacity / block_size` equal slots.
    ///
    /// `block_size` is rounded up to `alignment`, so every slot offset is aligned.
    pub fn new(capacity: usize, block_size: usize, alignment: usize) -> Result<FixedPool> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return invalid_argument_error("pool alignment must be a power of two");
        }
        if block_size == 0 {
            return invalid_argument_error("block size must be non-zero");
        }

        let block_size = round_up(block_size, alignment);
        let count = capacity / block_size;
        if count == 0 {
            return invalid_argument_error("capacity is smaller than one block");
        }

        Ok(FixedPool {
            state: Mutex::new(FixedState {
                block_size,
                count,
                bitmap: vec![0u64; (count + 63) / 64],
                used_count: 0,
                peak_count: 0,
                alloc_count: 0,
                free_count: 0,
                reset_count: 0,
            }),
        })
    }

    /// Allocates one slot. Requests larger than the slot size are refused.
    pub fn alloc(&self, size: usize) -> Result<FixedAlloc> {
        self.alloc_aligned(size, 1)
    }

    /// Allocates one slot with an additional alignment request.
    ///
    /// The oversizing of `align - 1` bytes must still fit within a single slot, otherwise the
    /// request is refused.
    pub fn alloc_aligned(&self, size: usize, align: usize) -> Result<FixedAlloc> {
        let mut state = self.state.lock();

        if size == 0 {
            return invalid_argument_error("allocation size must be non-zero");
        }
        if align == 0 || !align.is_power_of_two() {
            return invalid_argument_error("allocation alignment must be a power of two");
        }
        if size + (align - 1) > state.block_size {
            return invalid_argument_error("request exceeds fixed pool block size");
        }

        for word in 0..state.bitmap.len() {
            if state.bitmap[word] == u64::MAX {
                continue;
            }

            let bit = state.bitmap[word].trailing_ones() as usize;
            let slot = word * 64 + bit;
            if slot >= state.count {
                break;
            }

            state.bitmap[word] |= 1 << bit;
            state.used_count += 1;
            state.peak_count = state.peak_count.max(state.used_count);
            state.alloc_count += 1;

            let offset = round_up(slot * state.block_size, align);
            return Ok(FixedAlloc { slot, offset, size });
        }

        out_of_memory_error("fixed pool has no free slots")
    }

    pub fn free(&self, alloc: FixedAlloc) -> Result<()> {
        let mut state = self.state.lock();

        if alloc.slot >= state.count {
            return invalid_argument_error("slot does not belong to this pool");
        }

        let word = alloc.slot / 64;
        let bit = alloc.slot % 64;

        if state.bitmap[word] & (1 << bit) == 0 {
            error!("double free of fixed pool slot {}", alloc.slot);
            return invalid_state_error("slot was already freed");
        }

        state.bitmap[word] &= !(1 << bit);
        state.used_count -= 1;
        state.free_count += 1;

        Ok(())
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        for word in state.bitmap.iter_mut() {
            *word = 0;
        }
        state.used_count = 0;
        state.reset_count += 1;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let total = state.count * state.block_size;

        PoolStats {
            total_size: total,
            used_size: state.used_count * state.block_size,
            peak_used: state.peak_count * state.block_size,
            alloc_count: state.alloc_count,
            free_count: state.free_count,
            reset_count: state.reset_count,
            utilization: (state.used_count * state.block_size) as f64 / total as f64,
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AllocStrategy, DynamicPool, FixedPool, PoolOptions};
    use crate::errors::ErrorKind;

    #[test]
    fn verify_alloc_free_round_trip() {
        let pool = DynamicPool::new(4096, 16).unwrap();

        let before = pool.stats();
        let frag_before = pool.fragmentation();

        let allocs: Vec<_> =
            [100, 200, 50, 300].iter().map(|&size| pool.alloc(size).unwrap()).collect();

        assert!(pool.stats().used_size > 0);

        for alloc in allocs {
            pool.free(alloc).unwrap();
        }

        let after = pool.stats();
        assert_eq!(after.used_size, before.used_size);
        assert!(pool.fragmentation().num_free_blocks <= frag_before.num_free_blocks.max(1));
    }

    #[test]
    fn verify_alignment() {
        let pool = DynamicPool::new(4096, 32).unwrap();

        let a = pool.alloc(10).unwrap();
        let b = pool.alloc(10).unwrap();
        assert_eq!(a.offset() % 32, 0);
        assert_eq!(b.offset() % 32, 0);

        let c = pool.alloc_aligned(10, 128).unwrap();
        assert_eq!(c.offset() % 128, 0);
    }

    #[test]
    fn verify_fragmentation_scenario() {
        // Allocate [64, 128, 256, 128, 64], then free indices 0, 2, 4.
        let pool = DynamicPool::new(4096, 32).unwrap();

        let allocs: Vec<_> =
            [64, 128, 256, 128, 64].iter().map(|&size| pool.alloc(size).unwrap()).collect();

        pool.free(allocs[0]).unwrap();
        pool.free(allocs[2]).unwrap();
        pool.free(allocs[4]).unwrap();

        let report = pool.fragmentation();
        assert!(report.num_free_blocks == 2 || report.num_free_blocks == 3);
        assert!(report.largest_free >= 256);
        assert!(report.external_fragmentation <= 0.75);

        let used_before = pool.stats().used_size;
        pool.compact();
        assert_eq!(pool.stats().used_size, used_before);
    }

    #[test]
    fn verify_out_of_memory() {
        let pool = DynamicPool::new(256, 16).unwrap();

        let err = pool.alloc(512).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn verify_double_free_detected() {
        let pool = DynamicPool::new(1024, 16).unwrap();

        let alloc = pool.alloc(64).unwrap();
        pool.free(alloc).unwrap();

        let err = pool.free(alloc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // The pool stays usable.
        assert!(pool.alloc(64).is_ok());
    }

    #[test]
    fn verify_coalesce_on_free() {
        let pool = DynamicPool::new(1024, 16).unwrap();

        let a = pool.alloc(128).unwrap();
        let b = pool.alloc(128).unwrap();
        let _hold = pool.alloc(128).unwrap();

        // Free the successor first, then its predecessor. Freeing `a` must merge forward into
        // `b`'s block.
        pool.free(b).unwrap();
        let frag = pool.fragmentation();

        pool.free(a).unwrap();
        let merged = pool.fragmentation();

        assert_eq!(merged.num_free_blocks, frag.num_free_blocks);
        assert!(merged.largest_free >= 256);
    }

    #[test]
    fn verify_strategies_allocate() {
        for strategy in [
            AllocStrategy::FirstFit,
            AllocStrategy::BestFit,
            AllocStrategy::WorstFit,
            AllocStrategy::NextFit,
        ] {
            let pool = DynamicPool::with_options(PoolOptions {
                capacity: 4096,
                strategy,
                ..Default::default()
            })
            .unwrap();

            let a = pool.alloc(100).unwrap();
            let b = pool.alloc(700).unwrap();
            pool.free(a).unwrap();

            // A request that only fits the large remaining region.
            let c = pool.alloc(1024).unwrap();

            pool.free(b).unwrap();
            pool.free(c).unwrap();
            assert_eq!(pool.stats().used_size, 0);
        }
    }

    #[test]
    fn verify_best_fit_prefers_tight_block() {
        let pool = DynamicPool::with_options(PoolOptions {
            capacity: 4096,
            alignment: 16,
            strategy: AllocStrategy::BestFit,
            ..Default::default()
        })
        .unwrap();

        // Carve out free holes of 128 and 512 bytes.
        let a = pool.alloc(128).unwrap();
        let _g1 = pool.alloc(64).unwrap();
        let b = pool.alloc(512).unwrap();
        let _g2 = pool.alloc(64).unwrap();
        pool.free(a).unwrap();
        pool.free(b).unwrap();

        // A 100-byte request should land in the 128-byte hole.
        let c = pool.alloc(100).unwrap();
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn verify_backed_pool_read_write() {
        let pool = DynamicPool::with_storage(1024, 16).unwrap();

        let alloc = pool.alloc(64).unwrap();
        pool.write(&alloc, 0, b"etude").unwrap();

        let mut out = [0u8; 5];
        pool.read(&alloc, 0, &mut out).unwrap();
        assert_eq!(&out, b"etude");

        assert!(pool.write(&alloc, 62, b"xyz").is_err());
    }

    #[test]
    fn verify_leak_report() {
        let pool = DynamicPool::new(1024, 16).unwrap();

        let _leaked = pool.alloc(64).unwrap();
        let freed = pool.alloc(64).unwrap();
        pool.free(freed).unwrap();

        let report = pool.leaks(Duration::ZERO);
        assert_eq!(report.active_blocks, 1);
        assert_eq!(report.stale_blocks, 1);
        assert!(report.stale_bytes >= 64);
        assert!(report.stale_sites[0].0.file().ends_with("pool.rs"));
    }

    #[test]
    fn verify_fixed_pool() {
        let pool = FixedPool::new(1024, 128, 32).unwrap();

        // Oversized requests are refused outright.
        let err = pool.alloc(256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut allocs = Vec::new();
        for _ in 0..8 {
            allocs.push(pool.alloc(100).unwrap());
        }

        let err = pool.alloc(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        pool.free(allocs.pop().unwrap()).unwrap();
        assert!(pool.alloc(1).is_ok());
    }

    #[test]
    fn verify_fixed_pool_double_free() {
        let pool = FixedPool::new(1024, 128, 32).unwrap();

        let alloc = pool.alloc(64).unwrap();
        pool.free(alloc).unwrap();
        assert_eq!(pool.free(alloc).unwrap_err().kind(), ErrorKind::InvalidState);
    }
}
