//! On-disk FAT16 structures

use alloc::string::String;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Sector size assumed by the partition table
pub const MBR_SECTOR_SIZE: usize = 512;

/// Offset of the partition table in sector 0
pub const PARTITION_TABLE_OFFSET: usize = 446;

/// Number of primary partition entries
pub const PARTITION_COUNT: usize = 4;

/// Boot signature bytes at offsets 510 and 511
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Size of a directory entry
pub const DIR_ENTRY_SIZE: usize = 32;

/// Read-only file
pub const ATTR_READ_ONLY: u8 = 0x01;
/// Hidden file
pub const ATTR_HIDDEN: u8 = 0x02;
/// System file
pub const ATTR_SYSTEM: u8 = 0x04;
/// Volume label
pub const ATTR_VOLUME_ID: u8 = 0x08;
/// Subdirectory
pub const ATTR_DIRECTORY: u8 = 0x10;
/// Archive
pub const ATTR_ARCHIVE: u8 = 0x20;
/// VFAT long filename fragment
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// First name byte of a deleted entry
pub const ENTRY_DELETED: u8 = 0xE5;
/// First name byte of the entry ending a directory
pub const ENTRY_END: u8 = 0x00;
/// First name byte standing in for a literal 0xE5
const ENTRY_KANJI_E5: u8 = 0x05;

/// Clusters at or above this value end a chain
pub const FAT16_EOC: u16 = 0xFFF8;
/// First reserved cluster value
pub const FAT16_RESERVED: u16 = 0xFFF0;
/// Fewest data clusters a FAT16 volume has; smaller volumes are FAT12
pub const FAT16_MIN_CLUSTERS: u32 = 4085;
/// Most data clusters a FAT16 volume has; larger volumes are FAT32
pub const FAT16_MAX_CLUSTERS: u32 = 65524;

/// Primary partition table entry
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct PartitionEntry {
    /// 0x80 when bootable
    pub boot: u8,
    /// CHS address of the first sector
    pub chs_start: [u8; 3],
    /// Partition type
    pub kind: u8,
    /// CHS address of the last sector
    pub chs_end: [u8; 3],
    /// LBA of the first sector
    pub start: U32,
    /// Number of sectors
    pub length: U32,
}

impl PartitionEntry {
    /// Check whether the slot describes a partition
    pub fn is_used(&self) -> bool {
        self.length.get() != 0
    }
}

/// BIOS parameter block with the FAT12/16 extended fields
#[allow(missing_docs)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct BiosParameterBlock {
    pub jump: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: U16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: U16,
    pub fat_count: u8,
    pub root_entries: U16,
    pub total_sectors_16: U16,
    pub media: u8,
    pub sectors_per_fat: U16,
    pub sectors_per_track: U16,
    pub heads: U16,
    pub hidden_sectors: U32,
    pub total_sectors_32: U32,
    pub drive_number: u8,
    pub reserved: u8,
    pub boot_signature: u8,
    pub serial: U32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl BiosParameterBlock {
    /// Total sector count from whichever field holds it
    pub fn total_sectors(&self) -> u32 {
        match self.total_sectors_16.get() {
            0 => self.total_sectors_32.get(),
            n => n as u32,
        }
    }
}

/// 8.3 directory entry
#[allow(missing_docs)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct DirectoryEntry {
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub attr: u8,
    pub reserved: u8,
    pub create_time_tenth: u8,
    pub create_time: U16,
    pub create_date: U16,
    pub access_date: U16,
    pub cluster_high: U16,
    pub write_time: U16,
    pub write_date: U16,
    pub cluster: U16,
    pub size: U32,
}

impl DirectoryEntry {
    /// Check whether this entry ends the directory
    pub fn is_end(&self) -> bool {
        self.name[0] == ENTRY_END
    }

    /// Check whether this entry names a file or directory
    ///
    /// Deleted slots, long-name fragments and volume labels do not.
    pub fn is_visible(&self) -> bool {
        self.name[0] != ENTRY_END
            && self.name[0] != ENTRY_DELETED
            && self.attr != ATTR_LONG_NAME
            && self.attr & ATTR_VOLUME_ID == 0
    }

    /// Check whether this entry is a subdirectory
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// First cluster of the file's chain
    pub fn first_cluster(&self) -> u16 {
        self.cluster.get()
    }

    /// File size in bytes
    pub fn file_size(&self) -> u32 {
        self.size.get()
    }

    /// Padded 11-byte name as it compares against [`to_short_name`]
    pub fn raw_name(&self) -> [u8; 11] {
        let mut raw = [b' '; 11];
        raw[..8].copy_from_slice(&self.name);
        raw[8..].copy_from_slice(&self.ext);
        if raw[0] == ENTRY_KANJI_E5 {
            raw[0] = ENTRY_DELETED;
        }
        raw
    }

    /// Display form of the name, e.g. `ZIMAGE.BIN`
    pub fn short_name(&self) -> String {
        let raw = self.raw_name();
        let mut out = String::new();
        for &b in raw[..8].iter().take_while(|&&b| b != b' ') {
            out.push(b as char);
        }
        let ext: String = raw[8..]
            .iter()
            .take_while(|&&b| b != b' ')
            .map(|&b| b as char)
            .collect();
        if !ext.is_empty() {
            out.push('.');
            out.push_str(&ext);
        }
        out
    }
}

/// Convert a path segment to a padded, upper-cased 8.3 name
///
/// Returns `None` when the segment cannot be an 8.3 name.
pub fn to_short_name(segment: &str) -> Option<[u8; 11]> {
    let (base, ext) = match segment.rfind('.') {
        Some(0) | None => (segment, ""),
        Some(dot) => (&segment[..dot], &segment[dot + 1..]),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }

    let mut name = [b' '; 11];
    for (dst, c) in name[..8].iter_mut().zip(base.bytes()) {
        *dst = short_name_byte(c)?;
    }
    for (dst, c) in name[8..].iter_mut().zip(ext.bytes()) {
        *dst = short_name_byte(c)?;
    }
    Some(name)
}

fn short_name_byte(c: u8) -> Option<u8> {
    match c {
        b'a'..=b'z' => Some(c.to_ascii_uppercase()),
        b'A'..=b'Z' | b'0'..=b'9' => Some(c),
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'-' | b'@' | b'^' | b'_'
        | b'`' | b'{' | b'}' | b'~' | b'.' => Some(c),
        _ => None,
    }
}
