// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::result;

/// `ErrorKind` is the closed set of error categories reported by LibEtude.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-provided argument was rejected. Never recovered internally.
    InvalidArgument,
    /// A pool, cache, or the host allocator could not satisfy a request.
    OutOfMemory,
    /// An IO error occurred while reading, writing, or seeking a stream.
    Io,
    /// Stored data failed an integrity check (magic, CRC, or bounds).
    Corrupt,
    /// A container declared a version this implementation cannot read.
    IncompatibleVersion,
    /// An extension does not bind to the loaded base model.
    IncompatibleBase,
    /// A declared feature, kind, or codec is not supported.
    Unsupported,
    /// A referenced entity (layer, block, task) does not exist.
    NotFound,
    /// The operation is not legal in the object's current state.
    InvalidState,
    /// A block diagram failed validation or is not a DAG.
    InvalidDiagram,
    /// Source and destination buffer capacities disagree.
    BufferSizeMismatch,
    /// A required hardware capability is absent.
    Hardware,
    /// An internal invariant was violated.
    Internal,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Io => "io error",
            ErrorKind::Corrupt => "corrupt data",
            ErrorKind::IncompatibleVersion => "incompatible version",
            ErrorKind::IncompatibleBase => "incompatible base model",
            ErrorKind::Unsupported => "unsupported feature",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::InvalidDiagram => "invalid diagram",
            ErrorKind::BufferSizeMismatch => "buffer size mismatch",
            ErrorKind::Hardware => "hardware error",
            ErrorKind::Internal => "internal error",
        }
    }
}

/// `Error` is the single error record produced by all fallible operations.
///
/// An `Error` carries its [`ErrorKind`], a short static message, and the source location that
/// constructed it. The capture site is recorded with `#[track_caller]`, so the location names the
/// function that reported the failure, not this module.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
    site: &'static Location<'static>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error of the given kind.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: &'static str) -> Error {
        Error { kind, message, site: Location::caller(), source: None }
    }

    /// Creates a new error of the given kind wrapping an underlying error.
    #[track_caller]
    pub fn with_source<E>(kind: ErrorKind, message: &'static str, source: E) -> Error
    where
        E: StdError + Send + Sync + 'static,
    {
        Error { kind, message, site: Location::caller(), source: Some(Box::new(source)) }
    }

    /// The category of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The short message describing the failure.
    pub fn message(&self) -> &'static str {
        self.message
    }

    /// The source location that reported the failure.
    pub fn site(&self) -> &'static Location<'static> {
        self.site
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}:{})",
            self.kind.as_str(),
            self.message,
            self.site.file(),
            self.site.line()
        )
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|err| err.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::with_source(ErrorKind::Corrupt, "unexpected end of file", err)
            }
            _ => Error::with_source(ErrorKind::Io, "io operation failed", err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create an invalid argument error.
#[track_caller]
pub fn invalid_argument_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::InvalidArgument, message))
}

/// Convenience function to create an out-of-memory error.
#[track_caller]
pub fn out_of_memory_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::OutOfMemory, message))
}

/// Convenience function to create a corrupt data error.
#[track_caller]
pub fn corrupt_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::Corrupt, message))
}

/// Convenience function to create an incompatible version error.
#[track_caller]
pub fn incompatible_version_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::IncompatibleVersion, message))
}

/// Convenience function to create an incompatible base model error.
#[track_caller]
pub fn incompatible_base_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::IncompatibleBase, message))
}

/// Convenience function to create an unsupported feature error.
#[track_caller]
pub fn unsupported_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::Unsupported, message))
}

/// Convenience function to create a not-found error.
#[track_caller]
pub fn not_found_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::NotFound, message))
}

/// Convenience function to create an invalid state error.
#[track_caller]
pub fn invalid_state_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::InvalidState, message))
}

/// Convenience function to create an invalid diagram error.
#[track_caller]
pub fn invalid_diagram_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::InvalidDiagram, message))
}

/// Convenience function to create a buffer size mismatch error.
#[track_caller]
pub fn buffer_size_mismatch_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::BufferSizeMismatch, message))
}

/// Convenience function to create a hardware error.
#[track_caller]
pub fn hardware_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::Hardware, message))
}

/// Convenience function to create an internal error.
#[track_caller]
pub fn internal_error<T>(message: &'static str) -> Result<T> {
    Err(Error::new(ErrorKind::Internal, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_error_kind() {
        let err = invalid_argument_error::<()>("bad shape").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.message(), "bad shape");
    }

    #[test]
    fn verify_error_site_is_caller() {
        let err = Error::new(ErrorKind::Internal, "check site");
        assert!(err.site().file().ends_with("errors.rs"));
    }

    #[test]
    fn verify_io_error_conversion() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(Error::from(eof).kind(), ErrorKind::Corrupt);

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(Error::from(other).kind(), ErrorKind::Io);
    }
}
