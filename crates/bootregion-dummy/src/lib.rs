//! bootregion-dummy - In-memory storage emulators
//!
//! This crate provides drivers that emulate bootloader storage in memory:
//! a NOR flash with real program/erase semantics and a sector-addressed
//! block device standing in for a CompactFlash card. They are used by the
//! host tool and in tests, without real hardware.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;
#[cfg(feature = "alloc")]
use core::fmt;

#[cfg(feature = "alloc")]
use bootregion_core::driver::{seek_helper, Driver, DriverInfo, Ops, Whence};
#[cfg(feature = "alloc")]
use bootregion_core::error::{Error, Result};
#[cfg(feature = "alloc")]
use bootregion_core::region::RegionDescriptor;

/// Configuration for the dummy NOR flash
#[derive(Debug, Clone)]
pub struct NorConfig {
    /// Flash size in bytes
    pub size: usize,
    /// Smallest erase unit
    pub sector_size: usize,
    /// Largest program operation; writes never cross a page boundary
    pub page_size: usize,
}

impl Default for NorConfig {
    fn default() -> Self {
        Self {
            size: 1024 * 1024,
            sector_size: 64 * 1024,
            page_size: 256,
        }
    }
}

/// Dummy NOR flash
///
/// Programming can only clear bits; erasing sets whole sectors back to
/// 0xFF.
#[cfg(feature = "alloc")]
pub struct NorFlash {
    info: DriverInfo,
    config: NorConfig,
    data: Vec<u8>,
    dirty: bool,
}

#[cfg(feature = "alloc")]
impl NorFlash {
    /// Create an erased flash
    pub fn new(name: &str, config: NorConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            info: DriverInfo::new(name, "NOR flash (emulated)")
                .with_write_granularity(config.sector_size as u32),
            config,
            data,
            dirty: false,
        }
    }

    /// Create a flash with pre-filled data
    pub fn with_data(name: &str, config: NorConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(name, config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Override the description shown by `drivers`
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get the configuration
    pub fn config(&self) -> &NorConfig {
        &self.config
    }

    /// Check whether anything was programmed or erased since the last
    /// [`NorFlash::clear_dirty`]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forget pending modifications
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(feature = "alloc")]
impl Driver for NorFlash {
    fn describe(&self) -> &DriverInfo {
        &self.info
    }

    fn ops(&self) -> Ops {
        Ops::PROBE
            | Ops::OPEN
            | Ops::READ
            | Ops::WRITE
            | Ops::ERASE
            | Ops::SEEK
            | Ops::POLL
            | Ops::INFO
    }

    fn probe(&mut self) -> Result<()> {
        let c = &self.config;
        if c.size == 0
            || c.sector_size == 0
            || c.page_size == 0
            || c.size % c.sector_size != 0
            || c.sector_size % c.page_size != 0
        {
            log::warn!("{}: inconsistent geometry {:?}", self.info.name, c);
            return Err(Error::Param);
        }
        Ok(())
    }

    fn open(&mut self, d: &mut RegionDescriptor) -> Result<usize> {
        d.bind_to_medium(self.data.len() as u64)?;
        Ok(0)
    }

    fn read(&mut self, d: &mut RegionDescriptor, buf: &mut [u8]) -> Result<usize> {
        let addr = d.position() as usize;
        let n = (buf.len() as u64).min(d.remaining()) as usize;
        buf[..n].copy_from_slice(&self.data[addr..addr + n]);
        d.index += n as u64;
        Ok(n)
    }

    fn write(&mut self, d: &mut RegionDescriptor, data: &[u8]) -> Result<usize> {
        let addr = d.position() as usize;
        let page_left = self.config.page_size - addr % self.config.page_size;
        let n = (data.len() as u64).min(d.remaining()).min(page_left as u64) as usize;

        // Flash programming: can only change 1 -> 0
        for (dst, &src) in self.data[addr..addr + n].iter_mut().zip(data) {
            *dst &= src;
        }
        if n > 0 {
            self.dirty = true;
        }
        d.index += n as u64;
        Ok(n)
    }

    fn erase(&mut self, d: &mut RegionDescriptor, len: u64) -> Result<u64> {
        let sector = self.config.sector_size as u64;
        let addr = d.position();
        if addr % sector != 0 {
            log::warn!("{}: erase at 0x{:x} is not sector aligned", self.info.name, addr);
            return Err(Error::Param);
        }
        let len = len.min(d.remaining());
        let span = len.div_ceil(sector) * sector;
        if addr + span > d.start + d.length {
            log::warn!(
                "{}: erasing 0x{:x} bytes at 0x{:x} would run past the region",
                self.info.name,
                span,
                addr
            );
            return Err(Error::AddressOutOfBounds);
        }

        let (start, end) = (addr as usize, (addr + span) as usize);
        self.data[start..end].fill(0xFF);
        if span > 0 {
            self.dirty = true;
        }
        log::debug!("{}: erased 0x{:x}..0x{:x}", self.info.name, start, end);
        d.index += len;
        Ok(len)
    }

    fn seek(&mut self, d: &mut RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
        seek_helper(d, offset, whence)
    }

    fn info(&mut self, _d: Option<&RegionDescriptor>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "{}: {} bytes, {} byte sectors, {} byte pages{}",
            self.info.name,
            self.data.len(),
            self.config.sector_size,
            self.config.page_size,
            if self.dirty { ", modified" } else { "" }
        )
    }
}

/// Dummy block device
///
/// Transfers never cross a sector boundary, so callers see short reads
/// and writes the way they would from a CompactFlash controller.
#[cfg(feature = "alloc")]
pub struct BlockDevice {
    info: DriverInfo,
    sector_size: usize,
    data: Vec<u8>,
    dirty: bool,
}

#[cfg(feature = "alloc")]
impl BlockDevice {
    /// Default sector size
    pub const SECTOR_SIZE: usize = 512;

    /// Create a zeroed device of `size` bytes
    pub fn new(name: &str, size: usize, sector_size: usize) -> Self {
        Self::with_data(name, vec![0; size], sector_size)
    }

    /// Create a device over an existing image
    pub fn with_data(name: &str, data: Vec<u8>, sector_size: usize) -> Self {
        Self {
            info: DriverInfo::new(name, "Block device (emulated)")
                .with_write_granularity(sector_size as u32),
            sector_size,
            data,
            dirty: false,
        }
    }

    /// Override the description shown by `drivers`
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    /// Get a reference to the device contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Check whether anything was written since the last
    /// [`BlockDevice::clear_dirty`]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forget pending modifications
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn span(&self, d: &RegionDescriptor, len: usize) -> core::ops::Range<usize> {
        let addr = d.position() as usize;
        let sector_left = self.sector_size - addr % self.sector_size;
        let n = (len as u64).min(d.remaining()).min(sector_left as u64) as usize;
        addr..addr + n
    }
}

#[cfg(feature = "alloc")]
impl Driver for BlockDevice {
    fn describe(&self) -> &DriverInfo {
        &self.info
    }

    fn ops(&self) -> Ops {
        Ops::PROBE | Ops::OPEN | Ops::READ | Ops::WRITE | Ops::SEEK | Ops::POLL | Ops::INFO
    }

    fn probe(&mut self) -> Result<()> {
        if self.sector_size == 0 || self.data.is_empty() || self.data.len() % self.sector_size != 0 {
            log::warn!(
                "{}: {} bytes is not a whole number of {} byte sectors",
                self.info.name,
                self.data.len(),
                self.sector_size
            );
            return Err(Error::Param);
        }
        Ok(())
    }

    fn open(&mut self, d: &mut RegionDescriptor) -> Result<usize> {
        d.bind_to_medium(self.data.len() as u64)?;
        Ok(0)
    }

    fn read(&mut self, d: &mut RegionDescriptor, buf: &mut [u8]) -> Result<usize> {
        let span = self.span(d, buf.len());
        let n = span.len();
        buf[..n].copy_from_slice(&self.data[span]);
        d.index += n as u64;
        Ok(n)
    }

    fn write(&mut self, d: &mut RegionDescriptor, data: &[u8]) -> Result<usize> {
        let span = self.span(d, data.len());
        let n = span.len();
        self.data[span].copy_from_slice(&data[..n]);
        if n > 0 {
            self.dirty = true;
        }
        d.index += n as u64;
        Ok(n)
    }

    fn seek(&mut self, d: &mut RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
        seek_helper(d, offset, whence)
    }

    fn info(&mut self, _d: Option<&RegionDescriptor>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "{}: {} sectors of {} bytes{}",
            self.info.name,
            self.data.len() / self.sector_size.max(1),
            self.sector_size,
            if self.dirty { ", modified" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootregion_core::driver::Registry;
    use bootregion_core::env::{EnvKeys, EnvStore};

    fn small_nor() -> NorConfig {
        NorConfig {
            size: 16 * 1024,
            sector_size: 4096,
            page_size: 256,
        }
    }

    #[test]
    fn test_nor_program_clears_bits() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();

        let mut d = registry.open("nor:0x100+4").unwrap();
        d.write_all_at(0, &[0x0F, 0xF0, 0x12, 0x34]).unwrap();
        d.write_all_at(0, &[0xF3, 0xFF, 0xFF, 0xFF]).unwrap();

        let mut buf = [0u8; 4];
        d.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x03, 0xF0, 0x12, 0x34]);
    }

    #[test]
    fn test_nor_writes_stop_at_page_boundary() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();

        let mut d = registry.open("nor:0xf0+0x100").unwrap();
        assert_eq!(d.write(&[0u8; 0x100]).unwrap(), 0x10);
        assert_eq!(d.write(&[0u8; 0x100]).unwrap(), 0xf0);
    }

    #[test]
    fn test_nor_erase() {
        let mut registry = Registry::new();
        let nor = NorFlash::with_data("nor", small_nor(), &[0u8; 16 * 1024]);
        registry.register(nor).unwrap();

        let mut d = registry.open("nor:4k+8k").unwrap();
        assert_eq!(d.erase(100).unwrap(), 100);
        let mut buf = [0u8; 4];
        d.read_exact_at(4092, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
        d.read_exact_at(4096, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);

        d.seek(10, Whence::Set).unwrap();
        assert_eq!(d.erase(4096).err(), Some(Error::Param));
    }

    #[test]
    fn test_nor_erase_stays_in_region() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();
        let mut d = registry.open("nor:0+1k").unwrap();
        assert_eq!(d.erase(1024).err(), Some(Error::AddressOutOfBounds));
    }

    #[test]
    fn test_bad_geometry_not_present() {
        let mut registry = Registry::new();
        let config = NorConfig {
            size: 1000,
            ..small_nor()
        };
        registry.register(NorFlash::new("nor", config)).unwrap();
        assert!(!registry.lookup("nor").unwrap().is_present());
        assert_eq!(registry.open("nor:+1k").err(), Some(Error::Open));
    }

    #[test]
    fn test_block_short_transfers() {
        let mut registry = Registry::new();
        registry
            .register(BlockDevice::new("cf", 4096, BlockDevice::SECTOR_SIZE))
            .unwrap();

        let mut d = registry.open("cf:500+100").unwrap();
        assert_eq!(d.write(&[0xAB; 100]).unwrap(), 12);
        assert_eq!(d.write(&[0xAB; 100]).unwrap(), 88);

        let mut buf = [0u8; 100];
        d.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 100]);
        assert_eq!(d.erase(512).err(), Some(Error::Unsupported));
    }

    fn env_keys() -> EnvKeys {
        let mut keys = EnvKeys::new();
        keys.register("bootargs", "console=ttyS0", "Kernel command line")
            .unwrap();
        keys.register("startup", "", "Commands run at boot").unwrap();
        keys
    }

    #[test]
    fn test_environment_on_nor() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();

        let mut env = EnvStore::open(env_keys(), registry.parse("nor:12k+4k").unwrap());
        env.store("bootargs", "console=ttyAM0").unwrap();
        env.store("bootargs", "console=ttyAM1").unwrap();
        env.store("startup", "boot").unwrap();
        env.erase("startup").unwrap();

        let env = EnvStore::open(env_keys(), registry.parse("nor:12k+4k").unwrap());
        assert_eq!(env.fetch("bootargs"), Some("console=ttyAM1"));
        assert_eq!(env.fetch("startup"), Some(""));
        assert_eq!(env.log().records().count(), 3);
    }

    #[test]
    fn test_environment_compaction() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();
        let mut env = EnvStore::open(env_keys(), registry.parse("nor:0+4k").unwrap());

        let value = "x".repeat(200);
        let mut stored = 0;
        while env.store("startup", &value).is_ok() {
            stored += 1;
        }
        assert_eq!(stored, 4096 / 202);
        assert_eq!(
            env.store("startup", &value).err(),
            Some(Error::OutOfMemory)
        );

        env.compact().unwrap();
        assert_eq!(env.log().records().count(), 1);
        assert_eq!(env.fetch("startup"), Some(value.as_str()));
        env.store("bootargs", "quiet").unwrap();

        let env = EnvStore::open(env_keys(), registry.parse("nor:0+4k").unwrap());
        assert_eq!(env.fetch("bootargs"), Some("quiet"));
        assert_eq!(env.fetch("startup"), Some(value.as_str()));
    }

    #[test]
    fn test_environment_erase_all() {
        let mut registry = Registry::new();
        registry.register(NorFlash::new("nor", small_nor())).unwrap();
        let mut env = EnvStore::open(env_keys(), registry.parse("nor:0+4k").unwrap());
        env.store("bootargs", "quiet").unwrap();
        env.erase_all().unwrap();
        assert_eq!(env.fetch("bootargs"), Some("console=ttyS0"));
        assert_eq!(env.log().tail(), 0);
    }
}
