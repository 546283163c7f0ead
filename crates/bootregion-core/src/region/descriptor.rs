//! Region descriptor
//!
//! The descriptor is the handle every caller reads and writes through. It
//! owns its cursor; drivers mutate `start`, `length` and `index` only while
//! an operation on the descriptor is in progress.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::driver::{Driver, DriverRef, Ops, Whence};
use crate::error::{Error, Result};

/// Length meaning "to the limit of the medium"
pub const OPEN_ENDED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Parsed,
    Open,
    Closed,
}

/// A bound handle onto a byte range of a driver
#[derive(Clone)]
pub struct RegionDescriptor {
    /// Driver this region is bound to
    pub driver: DriverRef,
    /// Driver name as typed, for diagnostics
    pub driver_name: String,
    /// First byte of the region on the medium
    pub start: u64,
    /// Length of the region, or [`OPEN_ENDED`]
    pub length: u64,
    /// Cursor, relative to `start`
    pub index: u64,
    /// Path segments, for filesystem drivers
    pub segments: Vec<String>,
    /// Index of the first real path segment; earlier ones are driver options
    pub root: usize,
    /// Handle returned by the driver's open
    pub handle: usize,
    present: bool,
    state: State,
}

impl RegionDescriptor {
    /// Create an unopened descriptor on a driver
    pub fn new(driver: DriverRef, driver_name: impl Into<String>, start: u64, length: u64) -> Self {
        Self {
            driver,
            driver_name: driver_name.into(),
            start,
            length,
            index: 0,
            segments: Vec::new(),
            root: 0,
            handle: 0,
            present: true,
            state: State::Parsed,
        }
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    /// Check if the descriptor is open
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Driver option segments (before the real path)
    pub fn options(&self) -> &[String] {
        &self.segments[..self.root.min(self.segments.len())]
    }

    /// Real path segments
    pub fn path(&self) -> &[String] {
        &self.segments[self.root.min(self.segments.len())..]
    }

    /// Bytes between the cursor and the end of the region
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.index)
    }

    /// Absolute offset of the cursor on the medium
    pub fn position(&self) -> u64 {
        self.start.saturating_add(self.index)
    }

    /// Bind the descriptor to a medium of `size` bytes
    ///
    /// An open-ended length is clamped to the end of the medium. Helper for
    /// drivers' `open`.
    pub fn bind_to_medium(&mut self, size: u64) -> Result<()> {
        self.bind_to_range(0, size)
    }

    /// Bind the descriptor to a medium covering `base..base + size`
    pub fn bind_to_range(&mut self, base: u64, size: u64) -> Result<()> {
        let end = base.checked_add(size).ok_or(Error::AddressOutOfBounds)?;
        if self.start < base || self.start > end {
            return Err(Error::AddressOutOfBounds);
        }
        let available = end - self.start;
        if self.length == OPEN_ENDED {
            self.length = available;
        } else if self.length > available {
            log::debug!(
                "Region {}:0x{:x}+0x{:x} extends past the medium end 0x{:x}",
                self.driver_name,
                self.start,
                self.length,
                end
            );
            return Err(Error::AddressOutOfBounds);
        }
        Ok(())
    }

    /// Open the descriptor through its driver
    pub fn open(&mut self) -> Result<()> {
        if self.state != State::Parsed {
            return Err(Error::Param);
        }
        if !self.present {
            log::warn!("Driver '{}' is not present", self.driver_name);
            return Err(Error::Open);
        }

        let driver = Rc::clone(&self.driver);
        let mut drv = driver.try_borrow_mut().map_err(|_| Error::Busy)?;
        if drv.ops().contains(Ops::OPEN) {
            self.handle = drv.open(self).map_err(|e| {
                log::debug!("Open of '{}' failed: {}", self.driver_name, e);
                match e {
                    Error::Unsupported => Error::Open,
                    other => other,
                }
            })?;
        }
        if self.length == OPEN_ENDED {
            return Err(Error::Open);
        }
        self.index = 0;
        self.state = State::Open;
        Ok(())
    }

    /// Close the descriptor, leaving it zeroed and unusable
    pub fn close(&mut self) {
        if self.state == State::Open {
            let driver = Rc::clone(&self.driver);
            if let Ok(mut drv) = driver.try_borrow_mut() {
                if drv.ops().contains(Ops::OPEN) {
                    drv.close(self);
                }
            };
        }
        self.start = 0;
        self.length = 0;
        self.index = 0;
        self.handle = 0;
        self.segments.clear();
        self.root = 0;
        self.state = State::Closed;
    }

    fn call<T>(
        &mut self,
        op: Ops,
        f: impl FnOnce(&mut dyn Driver, &mut Self) -> Result<T>,
    ) -> Result<T> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        let driver = Rc::clone(&self.driver);
        let mut drv = driver.try_borrow_mut().map_err(|_| Error::Busy)?;
        if !drv.ops().contains(op) {
            return Err(Error::Unsupported);
        }
        let result = f(&mut *drv, self);
        debug_assert!(self.index <= self.length);
        result
    }

    /// Check whether the driver implements an operation
    pub fn supports(&self, op: Ops) -> bool {
        self.driver
            .try_borrow()
            .map(|d| d.ops().contains(op))
            .unwrap_or(false)
    }

    /// Read at the cursor
    ///
    /// Returns the number of bytes read, which may be short. Zero means the
    /// end of the region.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.call(Ops::READ, |drv, d| drv.read(d, buf))
    }

    /// Write at the cursor, returning the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.call(Ops::WRITE, |drv, d| drv.write(d, data))
    }

    /// Erase `len` bytes at the cursor
    pub fn erase(&mut self, len: u64) -> Result<u64> {
        self.call(Ops::ERASE, |drv, d| drv.erase(d, len))
    }

    /// Move the cursor, returning its new position
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.call(Ops::SEEK, |drv, d| drv.seek(d, offset, whence))
    }

    /// Check without blocking whether `len` bytes can be transferred
    pub fn poll(&mut self, len: usize) -> bool {
        if !self.is_open() {
            return false;
        }
        let driver = Rc::clone(&self.driver);
        let result = match driver.try_borrow_mut() {
            Ok(mut drv) if drv.ops().contains(Ops::POLL) => drv.poll(self, len),
            Ok(_) => true,
            Err(_) => false,
        };
        result
    }

    /// Write the driver's diagnostic dump for this region
    pub fn info(&mut self, out: &mut dyn fmt::Write) -> Result<()> {
        let driver = Rc::clone(&self.driver);
        let mut drv = driver.try_borrow_mut().map_err(|_| Error::Busy)?;
        let region = if self.is_open() { Some(&*self) } else { None };
        drv.info(region, out).map_err(|_| Error::IoFailure)
    }

    /// Fill `buf` from `offset`, looping over short reads
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = i64::try_from(offset).map_err(|_| Error::Param)?;
        if self.seek(offset, Whence::Set)? != offset as u64 {
            return Err(Error::IoFailure);
        }
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::IoFailure);
            }
            filled += n;
        }
        Ok(())
    }

    /// Write all of `data` at `offset`, looping over short writes
    pub fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let offset = i64::try_from(offset).map_err(|_| Error::Param)?;
        if self.seek(offset, Whence::Set)? != offset as u64 {
            return Err(Error::IoFailure);
        }
        let mut written = 0;
        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                return Err(Error::IoFailure);
            }
            written += n;
        }
        Ok(())
    }
}

impl PartialEq for RegionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.driver, &other.driver)
            && self.driver_name == other.driver_name
            && self.start == other.start
            && self.length == other.length
            && self.index == other.index
            && self.segments == other.segments
            && self.root == other.root
            && self.state == other.state
    }
}

impl fmt::Debug for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionDescriptor")
            .field("driver", &self.driver_name)
            .field("start", &format_args!("0x{:x}", self.start))
            .field("length", &format_args!("0x{:x}", self.length))
            .field("index", &self.index)
            .field("segments", &self.segments)
            .field("root", &self.root)
            .field("state", &self.state)
            .finish()
    }
}

impl embedded_io::ErrorType for RegionDescriptor {
    type Error = Error;
}

impl embedded_io::Read for RegionDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        RegionDescriptor::read(self, buf)
    }
}

impl embedded_io::Write for RegionDescriptor {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        RegionDescriptor::write(self, buf)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl embedded_io::Seek for RegionDescriptor {
    fn seek(&mut self, pos: embedded_io::SeekFrom) -> Result<u64> {
        let (offset, whence) = match pos {
            embedded_io::SeekFrom::Start(n) => {
                (i64::try_from(n).map_err(|_| Error::Param)?, Whence::Set)
            }
            embedded_io::SeekFrom::Current(n) => (n, Whence::Current),
            embedded_io::SeekFrom::End(n) => (n, Whence::End),
        };
        RegionDescriptor::seek(self, offset, whence)
    }
}
