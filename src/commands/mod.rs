//! Command implementations

pub mod env;
pub mod fat;
pub mod list;
pub mod region;
