// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements byte-level reading and writing of little-endian values.
//!
//! The LEF and LEFX containers are little-endian throughout, so unlike a general media toolkit
//! only the little-endian interpretation is provided. [`ReadBytes`] and [`WriteBytes`] are blanket
//! extension traits over [`std::io::Read`] and [`std::io::Write`].

use std::io;

use crate::errors::{corrupt_error, invalid_argument_error, Result};

/// `ReadBytes` provides methods to read bytes and interpret them as little-endian unsigned
/// integers or floating-point values of standard widths.
pub trait ReadBytes: io::Read {
    /// Reads a single unsigned byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as a signed 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Reads eight bytes from the stream and interprets them as an unsigned 64-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as a 32-bit little-endian IEEE-754
    /// floating-point value.
    #[inline(always)]
    fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and returns them in read-order or an error.
    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads exactly the number of bytes required to fill the provided buffer or returns an error.
    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)?;
        Ok(())
    }

    /// Reads exactly `len` bytes and returns a boxed slice of the data or an error.
    fn read_boxed_slice_exact(&mut self, len: usize) -> Result<Box<[u8]>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    /// Reads a fixed-size field of `len` bytes holding a NUL-terminated UTF-8 string.
    ///
    /// Bytes after the first NUL are ignored. A field without any NUL uses all `len` bytes.
    fn read_fixed_str(&mut self, len: usize) -> Result<String> {
        let raw = self.read_boxed_slice_exact(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);

        match std::str::from_utf8(&raw[..end]) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => corrupt_error("string field is not valid utf-8"),
        }
    }

    /// Ignores the specified number of bytes from the stream or returns an error.
    fn ignore_bytes(&mut self, mut count: u64) -> Result<()> {
        let mut sink = [0u8; 512];
        while count > 0 {
            let span = sink.len().min(count as usize);
            self.read_exact(&mut sink[..span])?;
            count -= span as u64;
        }
        Ok(())
    }
}

impl<R: io::Read> ReadBytes for R {}

/// `WriteBytes` provides methods to write little-endian unsigned integers or floating-point
/// values of standard widths.
pub trait WriteBytes: io::Write {
    /// Writes a single unsigned byte to the stream or returns an error.
    #[inline(always)]
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    /// Writes an unsigned 16-bit integer in little-endian order or returns an error.
    #[inline(always)]
    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Writes an unsigned 32-bit integer in little-endian order or returns an error.
    #[inline(always)]
    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Writes a signed 32-bit integer in little-endian order or returns an error.
    #[inline(always)]
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Writes an unsigned 64-bit integer in little-endian order or returns an error.
    #[inline(always)]
    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Writes a 32-bit IEEE-754 floating-point value in little-endian order or returns an error.
    #[inline(always)]
    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Writes a string into a fixed-size field of `len` bytes, NUL-padded.
    ///
    /// The string must be strictly shorter than `len` so the field always carries a terminating
    /// NUL.
    fn write_fixed_str(&mut self, value: &str, len: usize) -> Result<()> {
        if value.len() >= len {
            return invalid_argument_error("string does not fit fixed-size field");
        }

        self.write_all(value.as_bytes())?;

        let pad = vec![0u8; len - value.len()];
        self.write_all(&pad)?;
        Ok(())
    }
}

impl<W: io::Write> WriteBytes for W {}
