//! Error types for bootregion-core
//!
//! This module provides a no_std compatible error type shared by the
//! registry, the region parser, both key/value stores and the FAT driver.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Argument errors
    /// Malformed or missing argument
    Param,

    // Driver resolution errors
    /// Driver name prefix matched more than one driver
    Ambiguous,
    /// Driver name prefix matched no driver
    NoDriver,

    // Region errors
    /// The driver's open step failed
    Open,
    /// Operation attempted on a closed descriptor
    Closed,
    /// Operation is not implemented by the bound driver
    Unsupported,
    /// Region lies outside the medium
    AddressOutOfBounds,
    /// Driver is already in use further up the call stack
    Busy,

    // Store errors
    /// A fixed-size append-only buffer is full
    OutOfMemory,
    /// Key is not registered or not present
    NotFound,

    // I/O errors
    /// A read or write returned an inconsistent or truncated result
    IoFailure,

    // Filesystem errors
    /// Signature or structure validation failed
    BadFilesystem,
    /// Path does not name an existing file
    FileNotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param => write!(f, "invalid parameter"),
            Self::Ambiguous => write!(f, "ambiguous driver name"),
            Self::NoDriver => write!(f, "no such driver"),
            Self::Open => write!(f, "unable to open region"),
            Self::Closed => write!(f, "region is not open"),
            Self::Unsupported => write!(f, "operation not supported by driver"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::Busy => write!(f, "driver busy"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotFound => write!(f, "key not found"),
            Self::IoFailure => write!(f, "I/O failure"),
            Self::BadFilesystem => write!(f, "unrecognized filesystem"),
            Self::FileNotFound => write!(f, "file not found"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;

        match self {
            Self::Param | Self::Ambiguous => ErrorKind::InvalidInput,
            Self::NoDriver | Self::NotFound | Self::FileNotFound => ErrorKind::NotFound,
            Self::Unsupported => ErrorKind::Unsupported,
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::AddressOutOfBounds => ErrorKind::InvalidInput,
            Self::BadFilesystem => ErrorKind::InvalidData,
            Self::Busy => ErrorKind::Other,
            Self::Open | Self::Closed | Self::IoFailure => ErrorKind::Other,
        }
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
