// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-place operation scratch space.

use parking_lot::Mutex;

use crate::errors::{invalid_argument_error, Result};

/// `ScratchContext` is a single reusable scratch buffer backing in-place buffer operations.
///
/// Copies between overlapping ranges of one buffer are staged through the scratch so the source
/// bytes are never clobbered mid-copy, and range swaps are performed as three-step exchanges.
/// Non-overlapping copies bypass the scratch. Calls serialize on an internal mutex, so one
/// context may serve multiple threads.
pub struct ScratchContext {
    scratch: Mutex<Vec<u8>>,
}

impl ScratchContext {
    /// Creates a context with `capacity` bytes of scratch. The scratch grows on demand if an
    /// operation needs more.
    pub fn new(capacity: usize) -> ScratchContext {
        ScratchContext { scratch: Mutex::new(vec![0u8; capacity]) }
    }

    /// Copies `len` bytes within `buf` from `src` to `dst`, tolerating overlap.
    pub fn copy_within(&self, buf: &mut [u8], src: usize, dst: usize, len: usize) -> Result<()> {
        if src + len > buf.len() || dst + len > buf.len() {
            return invalid_argument_error("copy range exceeds buffer");
        }
        if len == 0 || src == dst {
            return Ok(());
        }

        if ranges_overlap(src, dst, len) {
            let mut scratch = self.scratch.lock();
            if scratch.len() < len {
                scratch.resize(len, 0);
            }

            scratch[..len].copy_from_slice(&buf[src..src + len]);
            buf[dst..dst + len].copy_from_slice(&scratch[..len]);
        }
        else {
            buf.copy_within(src..src + len, dst);
        }

        Ok(())
    }

    /// Swaps the `len`-byte ranges at `a` and `b` within `buf` as a three-step exchange through
    /// the scratch. The ranges must not overlap.
    pub fn swap_ranges(&self, buf: &mut [u8], a: usize, b: usize, len: usize) -> Result<()> {
        if a + len > buf.len() || b + len > buf.len() {
            return invalid_argument_error("swap range exceeds buffer");
        }
        if ranges_overlap(a, b, len) && a != b {
            return invalid_argument_error("swap ranges overlap");
        }
        if len == 0 || a == b {
            return Ok(());
        }

        let mut scratch = self.scratch.lock();
        if scratch.len() < len {
            scratch.resize(len, 0);
        }

        scratch[..len].copy_from_slice(&buf[a..a + len]);
        buf.copy_within(b..b + len, a);
        buf[b..b + len].copy_from_slice(&scratch[..len]);

        Ok(())
    }
}

fn ranges_overlap(a: usize, b: usize, len: usize) -> bool {
    a < b + len && b < a + len
}

#[cfg(test)]
mod tests {
    use super::ScratchContext;

    #[test]
    fn verify_overlapping_forward_copy() {
        let ctx = ScratchContext::new(16);

        let mut buf: Vec<u8> = (0..10).collect();
        ctx.copy_within(&mut buf, 0, 3, 6).unwrap();
        assert_eq!(buf, [0, 1, 2, 0, 1, 2, 3, 4, 5, 9]);
    }

    #[test]
    fn verify_overlapping_backward_copy() {
        let ctx = ScratchContext::new(16);

        let mut buf: Vec<u8> = (0..10).collect();
        ctx.copy_within(&mut buf, 3, 0, 6).unwrap();
        assert_eq!(buf, [3, 4, 5, 6, 7, 8, 6, 7, 8, 9]);
    }

    #[test]
    fn verify_disjoint_copy() {
        let ctx = ScratchContext::new(16);

        let mut buf: Vec<u8> = (0..10).collect();
        ctx.copy_within(&mut buf, 0, 5, 3).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 4, 0, 1, 2, 8, 9]);
    }

    #[test]
    fn verify_swap() {
        let ctx = ScratchContext::new(4);

        let mut buf: Vec<u8> = (0..8).collect();
        ctx.swap_ranges(&mut buf, 0, 4, 4).unwrap();
        assert_eq!(buf, [4, 5, 6, 7, 0, 1, 2, 3]);
    }

    #[test]
    fn verify_swap_rejects_overlap() {
        let ctx = ScratchContext::new(8);

        let mut buf: Vec<u8> = (0..8).collect();
        assert!(ctx.swap_ranges(&mut buf, 0, 2, 4).is_err());
    }

    #[test]
    fn verify_scratch_grows_on_demand() {
        let ctx = ScratchContext::new(2);

        let mut buf: Vec<u8> = (0..12).collect();
        ctx.copy_within(&mut buf, 0, 2, 10).unwrap();
        assert_eq!(&buf[2..12], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
