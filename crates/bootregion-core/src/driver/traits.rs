//! Driver trait definitions
//!
//! A driver is a named, partially implemented set of operations on one
//! storage or I/O backend. Every operation has a default implementation that
//! reports [`Error::Unsupported`], and the set of operations a driver really
//! provides is advertised up front through [`Ops`] so callers never have to
//! probe for support by calling.

use alloc::string::String;
use core::fmt;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::region::RegionDescriptor;

bitflags! {
    /// Driver trait flags
    ///
    /// These describe what kind of backend a driver is, independent of which
    /// operations it implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DriverTraits: u32 {
        /// Byte-stream serial device
        const SERIAL        = 1 << 0;
        /// May be used as the console
        const CONSOLE       = 1 << 1;
        /// Directly addressable memory
        const MEMORY        = 1 << 2;
        /// Region text after `driver:` is a filesystem path
        const FS_DESCRIBING = 1 << 3;
        /// Probe succeeded; the backend is present
        const PRESENT       = 1 << 4;
    }
}

impl Default for DriverTraits {
    fn default() -> Self {
        DriverTraits::empty()
    }
}

bitflags! {
    /// Operations implemented by a driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Ops: u32 {
        /// One-time self test
        const PROBE = 1 << 0;
        /// Bind and unbind a region
        const OPEN  = 1 << 1;
        /// Read from the region
        const READ  = 1 << 2;
        /// Write to the region
        const WRITE = 1 << 3;
        /// Erase part of the region
        const ERASE = 1 << 4;
        /// Move the region cursor
        const SEEK  = 1 << 5;
        /// Non-blocking readiness check
        const POLL  = 1 << 6;
        /// Human-readable diagnostic dump
        const INFO  = 1 << 7;
    }
}

/// Origin for a seek request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Relative to the start of the region
    Set,
    /// Relative to the current cursor
    Current,
    /// Relative to the end of the region
    End,
}

/// Identity of a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Name used for prefix matching
    pub name: String,
    /// Short human-readable description
    pub description: String,
    /// Trait flags
    pub traits: DriverTraits,
    /// Number of bytes between progress marks when writing; 0 for none
    pub write_granularity: u32,
}

impl DriverInfo {
    /// Create driver identity with no traits
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            traits: DriverTraits::empty(),
            write_granularity: 0,
        }
    }

    /// Add trait flags
    pub fn with_traits(mut self, traits: DriverTraits) -> Self {
        self.traits |= traits;
        self
    }

    /// Set the write-progress granularity
    pub fn with_write_granularity(mut self, granularity: u32) -> Self {
        self.write_granularity = granularity;
        self
    }

    /// Check whether the driver interprets region text as a path
    pub fn is_fs_describing(&self) -> bool {
        self.traits.contains(DriverTraits::FS_DESCRIBING)
    }
}

/// Storage or I/O backend
///
/// Leaf drivers (NOR, NAND, CompactFlash, Ethernet) implement this trait
/// over their hardware. The FAT driver implements it over another region.
///
/// The descriptor passed to each operation is the one being operated on;
/// its `index` is the cursor relative to `start`. Drivers advance the cursor
/// on read and write.
pub trait Driver {
    /// Identity of this driver
    fn describe(&self) -> &DriverInfo;

    /// Operations this driver implements
    fn ops(&self) -> Ops;

    /// Self test, run once at registration
    fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    /// Bind a descriptor
    ///
    /// Drivers may clamp `start` and `length` to the medium. The returned
    /// handle is stored in the descriptor and handed back on every call.
    fn open(&mut self, _d: &mut RegionDescriptor) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Unbind a descriptor
    fn close(&mut self, _d: &mut RegionDescriptor) {}

    /// Read from the cursor, returning the number of bytes transferred
    fn read(&mut self, _d: &mut RegionDescriptor, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Write at the cursor, returning the number of bytes transferred
    fn write(&mut self, _d: &mut RegionDescriptor, _data: &[u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Erase `len` bytes at the cursor, returning the number of bytes erased
    fn erase(&mut self, _d: &mut RegionDescriptor, _len: u64) -> Result<u64> {
        Err(Error::Unsupported)
    }

    /// Move the cursor, returning its new position
    fn seek(&mut self, _d: &mut RegionDescriptor, _offset: i64, _whence: Whence) -> Result<u64> {
        Err(Error::Unsupported)
    }

    /// Check without blocking whether `len` bytes can be transferred
    fn poll(&mut self, _d: &RegionDescriptor, _len: usize) -> bool {
        true
    }

    /// Write a diagnostic dump
    fn info(&mut self, _d: Option<&RegionDescriptor>, out: &mut dyn fmt::Write) -> fmt::Result {
        let info = self.describe();
        writeln!(out, "{}: {}", info.name, info.description)
    }
}

/// Compute the cursor position a seek would move to, clamped to
/// `0..=length`, without moving the cursor
pub fn resolve_seek(d: &RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
    let base = match whence {
        Whence::Set => 0i128,
        Whence::Current => d.index as i128,
        Whence::End => d.length as i128,
    };
    let target = base + offset as i128;
    if target < 0 {
        return Err(Error::Param);
    }
    Ok((target as u128).min(d.length as u128) as u64)
}

/// Seek within the bounds of a descriptor
///
/// Shared by drivers whose cursor is a plain offset.
pub fn seek_helper(d: &mut RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
    let target = resolve_seek(d, offset, whence)?;
    d.index = target;
    Ok(target)
}
