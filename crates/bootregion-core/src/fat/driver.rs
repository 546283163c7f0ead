//! FAT16 region driver

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use super::types::DirectoryEntry;
use super::volume::{FatVolume, Link};
use crate::driver::{resolve_seek, Driver, DriverInfo, DriverTraits, Ops, Whence};
use crate::error::{Error, Result};
use crate::region::RegionDescriptor;

/// Name the FAT driver registers under
pub const FAT_DRIVER: &str = "fat";

struct OpenFile {
    handle: usize,
    entry: DirectoryEntry,
    cluster: u16,
    cluster_start: u64,
}

/// Driver exposing files of a FAT16 volume as regions
///
/// Region text after `fat:` is a path, optionally preceded by a
/// `//partition/` option. One file is current at a time: opening another
/// file invalidates the descriptor of the previous one, and reads through a
/// stale descriptor fail with [`Error::IoFailure`].
pub struct FatDriver {
    info: DriverInfo,
    block: RegionDescriptor,
    volume: Option<FatVolume>,
    current: Option<OpenFile>,
    generation: usize,
}

impl FatDriver {
    /// Create a driver over a block region
    ///
    /// The region is not touched until the first file is opened.
    pub fn new(block: RegionDescriptor) -> Self {
        Self::with_name(FAT_DRIVER, block)
    }

    /// Create a driver registered under another name
    pub fn with_name(name: &str, block: RegionDescriptor) -> Self {
        Self {
            info: DriverInfo::new(name, "FAT16 filesystem").with_traits(DriverTraits::FS_DESCRIBING),
            block,
            volume: None,
            current: None,
            generation: 0,
        }
    }

    /// The identified volume, if any
    pub fn volume(&self) -> Option<&FatVolume> {
        self.volume.as_ref()
    }

    /// Identify the volume on `partition`, reusing the cached volume when
    /// it already is that partition
    pub fn identify(&mut self, partition: Option<usize>) -> Result<&mut FatVolume> {
        let cached = match (&self.volume, partition) {
            (Some(v), None) => v.default_partition() == Some(v.partition()),
            (Some(v), Some(p)) => v.partition() == p,
            (None, _) => false,
        };
        if !cached {
            self.current = None;
            self.volume = None;
            self.volume = Some(FatVolume::identify(self.block.clone(), partition)?);
        }
        self.volume.as_mut().ok_or(Error::BadFilesystem)
    }

    /// List the directory a parsed `fat:` region names
    pub fn list(&mut self, d: &RegionDescriptor) -> Result<Vec<DirectoryEntry>> {
        let partition = partition_option(d)?;
        self.identify(partition)?.list(d.path())
    }

    fn current_for(&mut self, d: &RegionDescriptor) -> Result<&mut OpenFile> {
        match self.current.as_mut() {
            Some(file) if file.handle == d.handle => Ok(file),
            _ => {
                log::warn!("'{}' is no longer the open FAT file", d.path().join("/"));
                Err(Error::IoFailure)
            }
        }
    }
}

fn partition_option(d: &RegionDescriptor) -> Result<Option<usize>> {
    match d.options().first() {
        Some(option) => option.parse::<usize>().map(Some).map_err(|_| {
            log::warn!("Bad partition option '{}'", option);
            Error::Param
        }),
        None => Ok(None),
    }
}

impl Driver for FatDriver {
    fn describe(&self) -> &DriverInfo {
        &self.info
    }

    fn ops(&self) -> Ops {
        Ops::OPEN | Ops::READ | Ops::SEEK | Ops::POLL | Ops::INFO
    }

    fn open(&mut self, d: &mut RegionDescriptor) -> Result<usize> {
        if d.path().is_empty() {
            return Err(Error::Param);
        }
        let partition = partition_option(d)?;
        let entry = self.identify(partition)?.lookup_path(d.path())?;
        if entry.is_dir() {
            return Err(Error::FileNotFound);
        }

        self.generation = self.generation.wrapping_add(1).max(1);
        if self.current.is_some() {
            log::debug!("Replacing the open FAT file");
        }
        self.current = Some(OpenFile {
            handle: self.generation,
            entry,
            cluster: entry.first_cluster(),
            cluster_start: 0,
        });

        d.start = 0;
        d.length = entry.file_size() as u64;
        log::debug!(
            "Opened {} ({} bytes, cluster {})",
            entry.short_name(),
            entry.file_size(),
            entry.first_cluster()
        );
        Ok(self.generation)
    }

    fn close(&mut self, d: &mut RegionDescriptor) {
        if self.current.as_ref().is_some_and(|f| f.handle == d.handle) {
            self.current = None;
        }
    }

    fn read(&mut self, d: &mut RegionDescriptor, buf: &mut [u8]) -> Result<usize> {
        let pos = d.index;
        if pos >= d.length || buf.is_empty() {
            return Ok(0);
        }

        let (mut cluster, mut cluster_start) = {
            let file = self.current_for(d)?;
            (file.cluster, file.cluster_start)
        };
        if pos < cluster_start {
            log::debug!("Backward FAT read to {} (cluster starts at {})", pos, cluster_start);
            return Err(Error::IoFailure);
        }

        let volume = self.volume.as_mut().ok_or(Error::IoFailure)?;
        let cluster_size = volume.cluster_size();
        while pos >= cluster_start + cluster_size {
            match volume.next_cluster(cluster)? {
                Link::Next(next) => {
                    cluster = next;
                    cluster_start += cluster_size;
                }
                Link::End => {
                    log::warn!("FAT chain ends before offset {} of {}", pos, d.length);
                    return Err(Error::IoFailure);
                }
            }
        }

        let within = pos - cluster_start;
        let n = (buf.len() as u64)
            .min(cluster_size - within)
            .min(d.length - pos) as usize;
        let at = volume.cluster_offset(cluster)? + within;
        volume.read_at(at, &mut buf[..n])?;

        let file = self.current_for(d)?;
        file.cluster = cluster;
        file.cluster_start = cluster_start;
        d.index += n as u64;
        Ok(n)
    }

    fn seek(&mut self, d: &mut RegionDescriptor, offset: i64, whence: Whence) -> Result<u64> {
        let target = resolve_seek(d, offset, whence)?;
        if target < d.index {
            log::debug!("Backward FAT seek from {} to {}", d.index, target);
            return Err(Error::IoFailure);
        }
        d.index = target;
        Ok(target)
    }

    fn info(&mut self, d: Option<&RegionDescriptor>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{}: FAT16 on {}", self.info.name, self.block.driver_name)?;
        let partition = d.and_then(|d| partition_option(d).ok().flatten());
        match self.identify(partition) {
            Ok(volume) => volume.dump(out)?,
            Err(e) => writeln!(out, "  not identified: {}", e)?,
        }
        if let Some(file) = &self.current {
            writeln!(
                out,
                "  open: {} ({} bytes), cluster {} at offset {}",
                file.entry.short_name(),
                file.entry.file_size(),
                file.cluster,
                file.cluster_start
            )?;
        }
        Ok(())
    }
}

/// Format a directory entry the way `ls` prints it
pub fn format_entry(entry: &DirectoryEntry) -> String {
    let mut line = entry.short_name();
    if entry.is_dir() {
        line.push('/');
    }
    alloc::format!("{:<14}{:>10}", line, entry.file_size())
}
