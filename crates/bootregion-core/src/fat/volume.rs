//! FAT16 volume geometry and traversal

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::ControlFlow;

use zerocopy::{FromBytes, FromZeros};

use super::types::*;
use crate::error::{Error, Result};
use crate::region::RegionDescriptor;

/// Result of following one FAT link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Chain continues at this cluster
    Next(u16),
    /// Chain ends here
    End,
}

/// Directory to scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// Fixed-size root directory
    Root,
    /// Directory stored in a cluster chain
    Chain(u16),
}

impl Dir {
    fn of(entry: &DirectoryEntry) -> Self {
        // ".." entries point at cluster 0 when the parent is the root
        match entry.first_cluster() {
            0 => Dir::Root,
            c => Dir::Chain(c),
        }
    }
}

/// An identified FAT16 partition on a block region
pub struct FatVolume {
    block: RegionDescriptor,
    partitions: [PartitionEntry; PARTITION_COUNT],
    partition: usize,
    base: u64,
    bpb: BiosParameterBlock,
    fat_cache: Vec<u8>,
    fat_sector: Option<u32>,
}

impl FatVolume {
    /// Read the partition table and BPB through `block`
    ///
    /// `partition` is 1-based; `None` selects the first used partition.
    pub fn identify(mut block: RegionDescriptor, partition: Option<usize>) -> Result<Self> {
        if !block.is_open() {
            block.open()?;
        }

        let mut mbr = [0u8; MBR_SECTOR_SIZE];
        block.read_exact_at(0, &mut mbr)?;
        if mbr[510..512] != BOOT_SIGNATURE {
            log::debug!("No boot signature on {}", block.driver_name);
            return Err(Error::BadFilesystem);
        }

        let mut partitions = [PartitionEntry::new_zeroed(); PARTITION_COUNT];
        for (i, slot) in partitions.iter_mut().enumerate() {
            let offset = PARTITION_TABLE_OFFSET + i * core::mem::size_of::<PartitionEntry>();
            *slot = PartitionEntry::read_from_prefix(&mbr[offset..])
                .map_err(|_| Error::BadFilesystem)?
                .0;
        }

        let partition = match partition {
            Some(n @ 1..=PARTITION_COUNT) => n,
            Some(n) => {
                log::warn!("Partition {} does not exist", n);
                return Err(Error::Param);
            }
            None => partitions
                .iter()
                .position(|p| p.is_used())
                .map(|i| i + 1)
                .ok_or(Error::BadFilesystem)?,
        };
        let entry = partitions[partition - 1];
        if !entry.is_used() {
            log::debug!("Partition {} is empty", partition);
            return Err(Error::BadFilesystem);
        }

        let base = entry.start.get() as u64 * MBR_SECTOR_SIZE as u64;
        let mut boot = [0u8; core::mem::size_of::<BiosParameterBlock>()];
        block.read_exact_at(base, &mut boot)?;
        let bpb = BiosParameterBlock::read_from_bytes(&boot[..]).map_err(|_| Error::BadFilesystem)?;
        validate(&bpb)?;

        let volume = Self {
            block,
            partitions,
            partition,
            base,
            fat_cache: vec![0; bpb.bytes_per_sector.get() as usize],
            bpb,
            fat_sector: None,
        };
        let clusters = volume.cluster_count();
        if !(FAT16_MIN_CLUSTERS..=FAT16_MAX_CLUSTERS).contains(&clusters) {
            log::warn!(
                "Partition {} has {} clusters, not a FAT16 volume",
                partition,
                clusters
            );
            return Err(Error::BadFilesystem);
        }
        log::info!(
            "FAT16 partition {}: {} sectors of {} bytes, {} byte clusters",
            partition,
            volume.bpb.total_sectors(),
            volume.sector_size(),
            volume.cluster_size()
        );
        Ok(volume)
    }

    /// Selected partition, 1-based
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Partition taken when a region names none: the first used one
    pub fn default_partition(&self) -> Option<usize> {
        self.partitions.iter().position(|p| p.is_used()).map(|i| i + 1)
    }

    /// Partition table
    pub fn partitions(&self) -> &[PartitionEntry; PARTITION_COUNT] {
        &self.partitions
    }

    /// Cached BIOS parameter block
    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    /// Bytes per sector
    pub fn sector_size(&self) -> u64 {
        self.bpb.bytes_per_sector.get() as u64
    }

    /// Bytes per cluster
    pub fn cluster_size(&self) -> u64 {
        self.bpb.sectors_per_cluster as u64 * self.sector_size()
    }

    fn fat_start(&self) -> u64 {
        self.bpb.reserved_sectors.get() as u64 * self.sector_size()
    }

    fn root_start(&self) -> u64 {
        let fats = self.bpb.fat_count as u64 * self.bpb.sectors_per_fat.get() as u64;
        self.fat_start() + fats * self.sector_size()
    }

    fn root_size(&self) -> u64 {
        let bytes = self.bpb.root_entries.get() as u64 * DIR_ENTRY_SIZE as u64;
        bytes.div_ceil(self.sector_size()) * self.sector_size()
    }

    fn data_start(&self) -> u64 {
        self.root_start() + self.root_size()
    }

    /// Number of data clusters
    pub fn cluster_count(&self) -> u32 {
        let data_sectors = (self.bpb.total_sectors() as u64)
            .saturating_sub(self.data_start() / self.sector_size());
        (data_sectors / self.bpb.sectors_per_cluster as u64) as u32
    }

    /// Offset of a cluster relative to the partition
    pub fn cluster_offset(&self, cluster: u16) -> Result<u64> {
        if cluster < 2 || cluster as u32 >= self.cluster_count() + 2 {
            log::debug!("Cluster {} outside the data area", cluster);
            return Err(Error::IoFailure);
        }
        Ok(self.data_start() + (cluster as u64 - 2) * self.cluster_size())
    }

    /// Read `buf.len()` bytes at an offset relative to the partition
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.block.read_exact_at(self.base + offset, buf)
    }

    /// Follow the FAT link out of `cluster`
    pub fn next_cluster(&mut self, cluster: u16) -> Result<Link> {
        let offset = cluster as u64 * 2;
        let sector = (offset / self.sector_size()) as u32;
        let within = (offset % self.sector_size()) as usize;

        if self.fat_sector != Some(sector) {
            let at = self.fat_start() + sector as u64 * self.sector_size();
            let mut cache = core::mem::take(&mut self.fat_cache);
            let read = self.read_at(at, &mut cache);
            self.fat_cache = cache;
            read?;
            self.fat_sector = Some(sector);
            log::trace!("Cached FAT sector {}", sector);
        }

        let next = u16::from_le_bytes([self.fat_cache[within], self.fat_cache[within + 1]]);
        match next {
            n if n >= FAT16_EOC => Ok(Link::End),
            n if n < 2 || n >= FAT16_RESERVED || n as u32 >= self.cluster_count() + 2 => {
                log::warn!("Bad FAT link 0x{:04x} out of cluster {}", n, cluster);
                Err(Error::IoFailure)
            }
            n => Ok(Link::Next(n)),
        }
    }

    /// Visit every visible entry of a directory in storage order
    ///
    /// Stops at the end-of-directory entry, or when `f` breaks.
    pub fn scan_dir<T>(
        &mut self,
        dir: Dir,
        mut f: impl FnMut(&DirectoryEntry) -> ControlFlow<T>,
    ) -> Result<Option<T>> {
        let sector_size = self.sector_size();
        let mut sector = vec![0u8; sector_size as usize];

        match dir {
            Dir::Root => {
                let start = self.root_start();
                for i in 0..self.root_size() / sector_size {
                    let at = start + i * sector_size;
                    if let ControlFlow::Break(found) = self.scan_sector(at, &mut sector, &mut f)? {
                        return Ok(found);
                    }
                }
                Ok(None)
            }
            Dir::Chain(first) => {
                let mut cluster = first;
                let sectors = self.bpb.sectors_per_cluster as u64;
                for _ in 0..=self.cluster_count() {
                    let start = self.cluster_offset(cluster)?;
                    for i in 0..sectors {
                        let at = start + i * sector_size;
                        if let ControlFlow::Break(found) =
                            self.scan_sector(at, &mut sector, &mut f)?
                        {
                            return Ok(found);
                        }
                    }
                    match self.next_cluster(cluster)? {
                        Link::Next(next) => cluster = next,
                        Link::End => return Ok(None),
                    }
                }
                log::warn!("Directory chain at cluster {} loops", first);
                Err(Error::IoFailure)
            }
        }
    }

    fn scan_sector<T>(
        &mut self,
        at: u64,
        sector: &mut [u8],
        f: &mut impl FnMut(&DirectoryEntry) -> ControlFlow<T>,
    ) -> Result<ControlFlow<Option<T>>> {
        self.read_at(at, sector)?;
        for raw in sector.chunks_exact(DIR_ENTRY_SIZE) {
            let entry = DirectoryEntry::read_from_bytes(raw).map_err(|_| Error::IoFailure)?;
            if entry.is_end() {
                return Ok(ControlFlow::Break(None));
            }
            if !entry.is_visible() {
                continue;
            }
            if let ControlFlow::Break(found) = f(&entry) {
                return Ok(ControlFlow::Break(Some(found)));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Find an entry by 8.3 name in a directory
    pub fn find(&mut self, dir: Dir, name: &[u8; 11]) -> Result<Option<DirectoryEntry>> {
        self.scan_dir(dir, |entry| {
            if entry.raw_name() == *name {
                ControlFlow::Break(*entry)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// Resolve a path to its directory entry
    ///
    /// Every segment but the last must be a subdirectory.
    pub fn lookup_path(&mut self, path: &[String]) -> Result<DirectoryEntry> {
        let (last, parents) = path.split_last().ok_or(Error::Param)?;

        let mut dir = Dir::Root;
        for segment in parents {
            let entry = self.find_segment(dir, segment)?;
            if !entry.is_dir() {
                return Err(Error::FileNotFound);
            }
            dir = Dir::of(&entry);
        }
        self.find_segment(dir, last)
    }

    fn find_segment(&mut self, dir: Dir, segment: &str) -> Result<DirectoryEntry> {
        let name = to_short_name(segment).ok_or(Error::FileNotFound)?;
        match self.find(dir, &name)? {
            Some(entry) => Ok(entry),
            None => {
                log::debug!("'{}' not found", segment);
                Err(Error::FileNotFound)
            }
        }
    }

    /// List a directory given by path; an empty path lists the root
    pub fn list(&mut self, path: &[String]) -> Result<Vec<DirectoryEntry>> {
        let dir = if path.is_empty() {
            Dir::Root
        } else {
            let entry = self.lookup_path(path)?;
            if !entry.is_dir() {
                return Ok(vec![entry]);
            }
            Dir::of(&entry)
        };

        let mut entries = Vec::new();
        self.scan_dir::<()>(dir, |entry| {
            entries.push(*entry);
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// Write the partition table and BPB summary
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (i, p) in self.partitions.iter().enumerate() {
            if !p.is_used() {
                continue;
            }
            writeln!(
                out,
                "  partition {}{}: type 0x{:02x}, start {}, {} sectors{}",
                i + 1,
                if i + 1 == self.partition { "*" } else { "" },
                p.kind,
                p.start.get(),
                p.length.get(),
                if p.boot & 0x80 != 0 { ", bootable" } else { "" }
            )?;
        }
        let bpb = &self.bpb;
        writeln!(
            out,
            "  oem '{}', label '{}', serial {:08x}",
            ascii(&bpb.oem_name),
            ascii(&bpb.volume_label),
            bpb.serial.get()
        )?;
        writeln!(
            out,
            "  {} bytes/sector, {} sectors/cluster, {} reserved, {} FATs of {} sectors",
            bpb.bytes_per_sector.get(),
            bpb.sectors_per_cluster,
            bpb.reserved_sectors.get(),
            bpb.fat_count,
            bpb.sectors_per_fat.get()
        )?;
        writeln!(
            out,
            "  {} root entries, {} sectors, {} clusters",
            bpb.root_entries.get(),
            bpb.total_sectors(),
            self.cluster_count()
        )
    }
}

fn ascii(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("?").trim_end()
}

fn validate(bpb: &BiosParameterBlock) -> Result<()> {
    let bps = bpb.bytes_per_sector.get();
    let spc = bpb.sectors_per_cluster;
    let ok = (512..=4096).contains(&bps)
        && bps.is_power_of_two()
        && spc != 0
        && spc.is_power_of_two()
        && bpb.fat_count != 0
        && bpb.sectors_per_fat.get() != 0
        && bpb.root_entries.get() != 0
        && bpb.total_sectors() != 0;
    if !ok {
        log::debug!("BPB rejected: {:?}", bpb);
        return Err(Error::BadFilesystem);
    }
    Ok(())
}
