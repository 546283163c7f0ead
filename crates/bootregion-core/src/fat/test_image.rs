//! In-memory FAT16 disk images for tests
//!
//! One partition at LBA 1 holding the smallest FAT16 volume: boot sector,
//! two FATs of 17 sectors, a one-sector root directory of 16 entries, then
//! 4100 one-sector clusters. Clusters are handed out with a stride of two
//! from cluster 2 so chains are never contiguous; odd clusters are left
//! for files placed on explicit chains.

use std::vec;
use std::vec::Vec;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromZeros, IntoBytes};

use super::types::*;

pub(crate) const SECTOR: usize = 512;
pub(crate) const CLUSTER_SIZE: usize = SECTOR;
const PART_START: usize = 1;
const FAT_SECTORS: usize = 17;
const ROOT_SECTORS: usize = 1;
const DATA_CLUSTERS: usize = 4100;
const PART_SECTORS: usize = 1 + 2 * FAT_SECTORS + ROOT_SECTORS + DATA_CLUSTERS;
const ROOT_ENTRIES: usize = 16;

enum Kind {
    Hidden,
    File(Vec<u8>),
    Dir(Vec<FileSpec>),
    Truncated(u32),
    Placed(Vec<u8>, Vec<u16>),
}

pub(crate) struct FileSpec {
    name: [u8; 11],
    attr: u8,
    kind: Kind,
}

fn name(text: &str) -> [u8; 11] {
    let mut raw = [b' '; 11];
    raw.copy_from_slice(&text.as_bytes()[..11]);
    raw
}

impl FileSpec {
    pub(crate) fn file(n: &str, data: &[u8]) -> Self {
        Self {
            name: name(n),
            attr: ATTR_ARCHIVE,
            kind: Kind::File(data.to_vec()),
        }
    }

    pub(crate) fn dir(n: &str, children: Vec<FileSpec>) -> Self {
        Self {
            name: name(n),
            attr: ATTR_DIRECTORY,
            kind: Kind::Dir(children),
        }
    }

    /// File whose size claims more than its one-cluster chain holds
    pub(crate) fn truncated(n: &str, size: u32) -> Self {
        Self {
            name: name(n),
            attr: ATTR_ARCHIVE,
            kind: Kind::Truncated(size),
        }
    }

    /// File stored on the given chain of (odd) clusters
    pub(crate) fn placed(n: &str, data: &[u8], chain: &[u16]) -> Self {
        assert!(data.len() <= chain.len() * CLUSTER_SIZE);
        Self {
            name: name(n),
            attr: ATTR_ARCHIVE,
            kind: Kind::Placed(data.to_vec(), chain.to_vec()),
        }
    }

    pub(crate) fn deleted(n: &str) -> Self {
        let mut raw = name(n);
        raw[0] = ENTRY_DELETED;
        Self {
            name: raw,
            attr: ATTR_ARCHIVE,
            kind: Kind::Hidden,
        }
    }

    pub(crate) fn volume_label(n: &str) -> Self {
        Self {
            name: name(n),
            attr: ATTR_VOLUME_ID,
            kind: Kind::Hidden,
        }
    }

    pub(crate) fn long_name_fragment() -> Self {
        Self {
            name: *b"Ah\0e\0l\0l\0o\0",
            attr: ATTR_LONG_NAME,
            kind: Kind::Hidden,
        }
    }
}

struct Builder {
    image: Vec<u8>,
    next: u16,
}

impl Builder {
    fn part(&self) -> usize {
        PART_START * SECTOR
    }

    fn cluster_offset(&self, cluster: u16) -> usize {
        let data = 1 + 2 * FAT_SECTORS + ROOT_SECTORS;
        self.part() + data * SECTOR + (cluster as usize - 2) * CLUSTER_SIZE
    }

    fn set_fat(&mut self, cluster: u16, value: u16) {
        for fat in 0..2 {
            let at = self.part() + (1 + fat * FAT_SECTORS) * SECTOR + cluster as usize * 2;
            self.image[at..at + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn alloc_chain(&mut self, count: usize) -> Vec<u16> {
        let chain: Vec<u16> = (0..count.max(1))
            .map(|_| {
                let c = self.next;
                self.next += 2;
                c
            })
            .collect();
        self.link(&chain);
        chain
    }

    fn link(&mut self, chain: &[u16]) {
        for pair in chain.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.set_fat(last, 0xFFFF);
        }
    }

    fn fill_chain(&mut self, chain: &[u16], data: &[u8]) {
        for (c, chunk) in chain.iter().zip(data.chunks(CLUSTER_SIZE)) {
            let at = self.cluster_offset(*c);
            self.image[at..at + chunk.len()].copy_from_slice(chunk);
        }
    }

    fn write_dir(&mut self, offset: usize, specs: &[FileSpec]) {
        for (i, spec) in specs.iter().enumerate() {
            let mut entry = DirectoryEntry::new_zeroed();
            entry.name.copy_from_slice(&spec.name[..8]);
            entry.ext.copy_from_slice(&spec.name[8..]);
            entry.attr = spec.attr;

            match &spec.kind {
                Kind::Hidden => {}
                Kind::File(data) => {
                    if !data.is_empty() {
                        let chain = self.alloc_chain(data.len().div_ceil(CLUSTER_SIZE));
                        self.fill_chain(&chain, data);
                        entry.cluster = U16::new(chain[0]);
                    }
                    entry.size = U32::new(data.len() as u32);
                }
                Kind::Dir(children) => {
                    let chain = self.alloc_chain(1);
                    let at = self.cluster_offset(chain[0]);
                    self.write_dir(at, children);
                    entry.cluster = U16::new(chain[0]);
                }
                Kind::Placed(data, chain) => {
                    self.link(chain);
                    self.fill_chain(chain, data);
                    entry.cluster = U16::new(chain[0]);
                    entry.size = U32::new(data.len() as u32);
                }
                Kind::Truncated(size) => {
                    let chain = self.alloc_chain(1);
                    let at = self.cluster_offset(chain[0]);
                    self.image[at..at + CLUSTER_SIZE].fill(0xAA);
                    entry.cluster = U16::new(chain[0]);
                    entry.size = U32::new(*size);
                }
            }

            let at = offset + i * DIR_ENTRY_SIZE;
            self.image[at..at + DIR_ENTRY_SIZE].copy_from_slice(entry.as_bytes());
        }
    }
}

/// Build a disk image holding `root` in its root directory
pub(crate) fn build(root: &[FileSpec]) -> Vec<u8> {
    assert!(root.len() <= ROOT_ENTRIES);
    let mut b = Builder {
        image: vec![0; (PART_START + PART_SECTORS) * SECTOR],
        next: 2,
    };

    let mut partition = PartitionEntry::new_zeroed();
    partition.boot = 0x80;
    partition.kind = 0x06;
    partition.start = U32::new(PART_START as u32);
    partition.length = U32::new(PART_SECTORS as u32);
    b.image[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16]
        .copy_from_slice(partition.as_bytes());
    b.image[510..512].copy_from_slice(&BOOT_SIGNATURE);

    let mut bpb = BiosParameterBlock::new_zeroed();
    bpb.jump = [0xEB, 0x3C, 0x90];
    bpb.oem_name = *b"BOOTRGN ";
    bpb.bytes_per_sector = U16::new(SECTOR as u16);
    bpb.sectors_per_cluster = 1;
    bpb.reserved_sectors = U16::new(1);
    bpb.fat_count = 2;
    bpb.root_entries = U16::new(ROOT_ENTRIES as u16);
    bpb.total_sectors_16 = U16::new(PART_SECTORS as u16);
    bpb.media = 0xF8;
    bpb.sectors_per_fat = U16::new(FAT_SECTORS as u16);
    bpb.boot_signature = 0x29;
    bpb.serial = U32::new(0x1234_abcd);
    bpb.volume_label = *b"NO NAME    ";
    bpb.fs_type = *b"FAT16   ";
    let part = b.part();
    b.image[part..part + core::mem::size_of::<BiosParameterBlock>()]
        .copy_from_slice(bpb.as_bytes());
    b.image[part + 510..part + 512].copy_from_slice(&BOOT_SIGNATURE);

    b.set_fat(0, 0xFFF8);
    b.set_fat(1, 0xFFFF);
    b.write_dir(part + (1 + 2 * FAT_SECTORS) * SECTOR, root);
    b.image
}

/// Copy the first partition table entry into another (0-based) slot
pub(crate) fn mirror_partition(image: &mut [u8], slot: usize) {
    let at = PARTITION_TABLE_OFFSET + slot * 16;
    image.copy_within(PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + 16, at);
}

/// Shrink the volume's declared size to `sectors`
pub(crate) fn set_total_sectors(image: &mut [u8], sectors: u16) {
    let at = PART_START * SECTOR + 19;
    image[at..at + 2].copy_from_slice(&sectors.to_le_bytes());
}
