//! bootregion-core - Storage core for a small firmware bootloader
//!
//! This crate provides a uniform device-access layer ("regions") over
//! heterogeneous storage backends, a parser for human-typed region strings,
//! a persistent key/value environment living in raw flash, transient
//! variable and alias stores, and a FAT16 driver that rides on the region
//! layer. It is `no_std` (with `alloc`) for use inside the bootloader itself.
//!
//! # Features
//!
//! - `std` - Enable standard library support, board configuration files
//!   and `std::error::Error` impls
//!
//! # Example
//!
//! ```ignore
//! use bootregion_core::session::SessionBuilder;
//!
//! let mut session = SessionBuilder::new()
//!     .driver(nor)
//!     .env_key("bootargs", "console=ttyS0", "Kernel command line")
//!     .environment("nor:0x30000+16k")
//!     .build()?;
//!
//! session.env_mut().store("bootargs", "console=ttyAM0")?;
//! let mut kernel = session.open("mem:0x20200000+2m")?;
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

#[cfg(feature = "std")]
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod fat;
pub mod memory;
pub mod region;
pub mod session;
pub mod vars;

pub use error::{Error, Result};
