//! Persistent environment
//!
//! A fixed set of keys is registered at start-up. Values live in an
//! append-only record log in raw flash: storing a value tombstones the old
//! record in place and appends a new one, so no erase cycle is needed until
//! the region fills up and is compacted.

mod record;
mod store;

pub use record::{
    encode_record, Marker, Record, RecordBuf, RecordLog, Records, ENV_END, ENV_KEY_MASK,
    ENV_KEY_MAX, ENV_LIVE, ENV_RECORD_MAX,
};
pub use store::{Entries, EnvEntry, EnvKey, EnvKeys, EnvStore, KeyIndex};
