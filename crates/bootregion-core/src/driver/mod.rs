//! Driver capabilities and the driver registry
//!
//! This module defines the [`Driver`] trait every storage backend
//! implements, and the [`Registry`] that resolves typed driver names to
//! drivers by case-insensitive prefix.

mod registry;
mod traits;

pub use registry::{RegisteredDriver, Registry, DEFAULT_DRIVER};
pub use traits::*;

use alloc::rc::Rc;
use core::cell::RefCell;

/// Shared, owning reference to a registered driver
///
/// Drivers live in a `RefCell`: a driver that is called while it is already
/// borrowed further up the stack reports [`crate::Error::Busy`] instead of
/// re-entering.
pub type DriverRef = Rc<RefCell<dyn Driver>>;
