//! Region descriptors and the region string parser
//!
//! A region is a bound handle onto a byte range of some driver:
//!
//! ```text
//! nor:128k+64k            64 KiB at 128 KiB into driver "nor"
//! +1k                     first 1 KiB of the default (memory) driver
//! mem:0x20200000+2m       2 MiB of memory at 0x20200000
//! fat://2/boot/zimage     file on the second partition of a FAT volume
//! ```

mod descriptor;
mod parser;
mod transfer;

pub use descriptor::{RegionDescriptor, OPEN_ENDED};
pub use parser::{parse, parse_count, parse_number};
pub use transfer::copy;
