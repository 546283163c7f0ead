//! Built-in memory driver
//!
//! Regions on this driver address a RAM arena directly: `mem:0x20200000+2m`
//! names 2 MiB starting at address 0x20200000 of an arena whose first byte
//! sits at `base`.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::driver::{seek_helper, Driver, DriverInfo, DriverTraits, Ops, Whence, DEFAULT_DRIVER};
use crate::error::{Error, Result};
use crate::region::RegionDescriptor;

/// Directly addressable RAM
pub struct MemoryDriver {
    info: DriverInfo,
    base: u64,
    data: Vec<u8>,
}

impl MemoryDriver {
    /// Create a zero-filled arena of `size` bytes at address `base`
    pub fn new(base: u64, size: usize) -> Self {
        Self::with_data(base, vec![0; size])
    }

    /// Create an arena over existing contents
    pub fn with_data(base: u64, data: Vec<u8>) -> Self {
        Self {
            info: DriverInfo::new(DEFAULT_DRIVER, "Memory").with_traits(DriverTraits::MEMORY),
            base,
            data,
        }
    }

    /// Address of the first byte of the arena
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Get a reference to the arena contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the arena contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn span(&self, d: &RegionDescriptor, len: usize) -> Result<core::ops::Range<usize>> {
        let offset = d
            .position()
            .checked_sub(self.base)
            .ok_or(Error::AddressOutOfBounds)?;
        let offset = usize::try_from(offset).map_err(|_| Error::AddressOutOfBounds)?;
        let len = len.min(usize::try_from(d.remaining()).unwrap_or(usize::MAX));
        let end = offset.checked_add(len).ok_or(Error::AddressOutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(offset..end)
    }
}

impl Driver for MemoryDriver {
    fn describe(&self) -> &DriverInfo {
        &self.info
    }

    fn ops(&self) -> Ops {
        Ops::OPEN | Ops::READ | Ops::WRITE | Ops::SEEK | Ops::POLL | Ops::INFO
    }

    fn open(&mut self, d: &mut RegionDescriptor) -> Result<usize> {
        d.bind_to_range(self.base, self.data.len() as u64)?;
        Ok(0)
    }

    fn read(&mut self, d: &mut RegionDescriptor, buf: &mut [u8]) -> Result<usize> {
        let span = self.span(d, buf.len())?;
        let n = span.len();
        buf[..n].copy_from_slice(&self.data[span]);
        d.index += n as u64;
        Ok(n)
    }

    fn write(&mut self, d: &mut RegionDescriptor, data: &[u8]) -> Result<usize> {
        let span = self.span(d, data.len())?;
        let n = span.len();
        self.data[span].copy_from_slice(&data[..n]);
        d.index += n as u64;
        Ok(n)
    }

    fn seek(&mut self, d: &mut RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
        seek_helper(d, offset, whence)
    }

    fn info(&mut self, _d: Option<&RegionDescriptor>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "{}: 0x{:08x}-0x{:08x} ({} bytes)",
            self.info.name,
            self.base,
            self.base + self.data.len() as u64,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Registry;
    use std::string::String;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(MemoryDriver::new(0x2020_0000, 0x1000))
            .unwrap();
        registry
    }

    #[test]
    fn test_read_write() {
        let registry = registry();
        let mut d = registry.open("mem:0x20200010+8").unwrap();
        assert_eq!(d.write(b"abcdefghij").unwrap(), 8);
        assert_eq!(d.write(b"z").unwrap(), 0);

        let mut d = registry.open("mem:0x20200010+16").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(d.read(&mut buf).unwrap(), 16);
        assert_eq!(&buf[..8], b"abcdefgh");
        assert_eq!(&buf[8..], &[0u8; 8]);
    }

    #[test]
    fn test_open_ended_clamps_to_arena() {
        let registry = registry();
        let d = registry.open("mem:0x20200800").unwrap();
        assert_eq!(d.length, 0x800);
    }

    #[test]
    fn test_out_of_bounds() {
        let registry = registry();
        assert_eq!(
            registry.open("mem:0x100+16").err(),
            Some(Error::AddressOutOfBounds)
        );
        assert_eq!(
            registry.open("mem:0x20200f00+0x200").err(),
            Some(Error::AddressOutOfBounds)
        );
    }

    #[test]
    fn test_seek_clamps() {
        let registry = registry();
        let mut d = registry.open("mem:0x20200000+0x100").unwrap();
        assert_eq!(d.seek(0x40, Whence::Set).unwrap(), 0x40);
        assert_eq!(d.seek(0x10, Whence::Current).unwrap(), 0x50);
        assert_eq!(d.seek(0x1000, Whence::Current).unwrap(), 0x100);
        assert_eq!(d.seek(-0x10, Whence::End).unwrap(), 0xf0);
        assert_eq!(d.seek(-1, Whence::Set).err(), Some(Error::Param));
    }

    #[test]
    fn test_closed_descriptor_unusable() {
        let registry = registry();
        let mut d = registry.open("mem:0x20200000+0x100").unwrap();
        d.close();
        assert!(!d.is_open());
        assert_eq!(d.length, 0);
        let mut buf = [0u8; 4];
        assert_eq!(d.read(&mut buf).err(), Some(Error::Closed));
        assert!(!d.poll(4));
    }

    #[test]
    fn test_unsupported_erase() {
        let registry = registry();
        let mut d = registry.open("mem:0x20200000+0x100").unwrap();
        assert_eq!(d.erase(0x10).err(), Some(Error::Unsupported));
    }

    #[test]
    fn test_info() {
        let registry = registry();
        let mut d = registry.open("mem:0x20200000+0x100").unwrap();
        let mut out = String::new();
        d.info(&mut out).unwrap();
        assert!(out.contains("0x20200000"));
    }
}
