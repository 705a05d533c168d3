// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use once_cell::sync::Lazy;

use super::Checksum;

/// The reflected IEEE (zlib) CRC32 polynomial.
const POLYNOMIAL: u32 = 0xedb8_8320;

static CRC32_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;

        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
        }

        *entry = crc;
    }

    table
});

/// `Crc32` implements the IEEE (zlib) CRC32 error-detecting code.
///
/// This is the code used for the LEF header checksum, per-layer payload checksums, and the model
/// hash.
#[derive(Copy, Clone)]
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 { crc: !0 }
    }

    /// Computes the CRC32 of a single buffer in one step.
    pub fn of(buf: &[u8]) -> u32 {
        let mut crc = Crc32::new();
        crc.process_buf_bytes(buf);
        crc.checksum()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32::new()
    }
}

impl Checksum for Crc32 {
    type Output = u32;

    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        self.crc = (self.crc >> 8) ^ CRC32_TABLE[((self.crc ^ u32::from(byte)) & 0xff) as usize];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }

    fn checksum(&self) -> u32 {
        !self.crc
    }
}

#[cfg(test)]
mod tests {
    use super::super::Checksum;
    use super::Crc32;

    #[test]
    fn verify_crc32_known_vectors() {
        // Reference values produced by zlib's crc32().
        assert_eq!(Crc32::of(b""), 0x0000_0000);
        assert_eq!(Crc32::of(b"123456789"), 0xcbf4_3926);
        assert_eq!(Crc32::of(b"The quick brown fox jumps over the lazy dog"), 0x414f_a339);
    }

    #[test]
    fn verify_crc32_incremental_matches_one_shot() {
        let data = b"incremental processing must match the one-shot helper";

        let mut crc = Crc32::new();
        for chunk in data.chunks(7) {
            crc.process_buf_bytes(chunk);
        }

        assert_eq!(crc.checksum(), Crc32::of(data));
    }
}
