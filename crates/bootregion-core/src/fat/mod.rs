//! FAT16 filesystem driver
//!
//! The driver sits on top of another region (a CompactFlash card, a disk
//! image in RAM) and resolves paths to byte streams. Reading is forward
//! only: the cluster chain is followed one link at a time with a single FAT
//! sector cached.

mod driver;
#[cfg(test)]
pub(crate) mod test_image;
mod types;
mod volume;

pub use driver::{format_entry, FatDriver, FAT_DRIVER};
pub use types::*;
pub use volume::{Dir, FatVolume, Link};
