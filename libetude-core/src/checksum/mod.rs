// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `checksum` module provides implementations of common error-detecting codes.

mod crc32;

pub use crc32::Crc32;

/// A `Checksum` processes a stream of bytes into a fixed-width digest.
pub trait Checksum {
    type Output;

    /// Process a single byte.
    fn process_byte(&mut self, byte: u8);

    /// Process a buffer of bytes.
    fn process_buf_bytes(&mut self, buf: &[u8]);

    /// Get the checksum over all bytes processed so far.
    fn checksum(&self) -> Self::Output;
}
