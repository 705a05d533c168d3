// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mem` module implements the pooled memory subsystem.
//!
//! Four cooperating pieces are provided:
//!
//!  * [`DynamicPool`] and [`FixedPool`], block-level allocators over a fixed byte capacity.
//!  * [`ReuseCache`], a per-size-class recycler for heap buffers.
//!  * [`ScratchContext`], an aligned scratch buffer for overlapping copies and swaps.
//!  * [`SmartManager`], which composes the three behind a single allocation surface.
//!
//! Block metadata lives in an index-linked table rather than in-band headers, so the allocators
//! carry no raw pointers. A pool may be *backed* (it owns an arena addressed through
//! [`DynamicPool::write`]/[`DynamicPool::read`]) or metadata-only, in which case it budgets and
//! audits allocations whose payload bytes live elsewhere.

mod pool;
mod reuse;
mod scratch;
mod smart;

pub use pool::{
    AllocStrategy, DynamicPool, FixedAlloc, FixedPool, FragmentationReport, LeakReport, PoolAlloc,
    PoolOptions, PoolStats,
};
pub use reuse::{ReuseCache, ReuseCacheOptions, ReuseCacheStats};
pub use scratch::ScratchContext;
pub use smart::{SmartAlloc, SmartManager, SmartManagerOptions, SmartStats};
