//! Environment key table and store

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::record::{encode_record, Marker, RecordLog, ENV_KEY_MAX};
use crate::driver::Ops;
use crate::error::{Error, Result};
use crate::region::RegionDescriptor;

/// Index of a registered environment key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyIndex(u8);

impl KeyIndex {
    /// Raw index as stored in record markers
    pub fn get(self) -> u8 {
        self.0
    }
}

/// A registered environment key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvKey {
    /// Key name
    pub name: String,
    /// Value used while no live record exists
    pub default: String,
    /// Human-readable description
    pub description: String,
}

/// Start-up table of environment keys
///
/// Indices are assigned densely in registration order. The table is moved
/// into an [`EnvStore`] once start-up is done, after which it is fixed.
#[derive(Debug, Clone, Default)]
pub struct EnvKeys {
    keys: Vec<EnvKey>,
}

impl EnvKeys {
    /// Create an empty key table
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Register a key
    pub fn register(
        &mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<KeyIndex> {
        let name = name.into();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '\0') {
            return Err(Error::Param);
        }
        if self.find(&name).is_some() {
            log::error!("Environment key '{}' registered twice", name);
            return Err(Error::Param);
        }
        if self.keys.len() >= ENV_KEY_MAX {
            log::error!("Environment key table full, '{}' not registered", name);
            return Err(Error::OutOfMemory);
        }

        let index = KeyIndex(self.keys.len() as u8);
        self.keys.push(EnvKey {
            name,
            default: default.into(),
            description: description.into(),
        });
        Ok(index)
    }

    /// Index of a key by exact name
    pub fn find(&self, name: &str) -> Option<KeyIndex> {
        self.keys
            .iter()
            .position(|k| k.name == name)
            .map(|i| KeyIndex(i as u8))
    }

    /// Key at an index
    pub fn get(&self, index: KeyIndex) -> Option<&EnvKey> {
        self.keys.get(index.0 as usize)
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if no key is registered
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One key as seen by enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvEntry<'a> {
    /// Key index
    pub index: KeyIndex,
    /// Key name
    pub key: &'a str,
    /// Live value, or the default
    pub value: &'a str,
    /// Whether `value` is the default
    pub is_default: bool,
    /// Key description
    pub description: &'a str,
}

/// Persistent environment backed by a flash region
pub struct EnvStore {
    keys: EnvKeys,
    log: RecordLog,
    region: Option<RegionDescriptor>,
}

impl EnvStore {
    /// Create a store with no backing region
    ///
    /// Every key reads as its default and every write is refused.
    pub fn detached(keys: EnvKeys) -> Self {
        Self {
            keys,
            log: RecordLog::default(),
            region: None,
        }
    }

    /// Create a store over a backing region, opening it if needed
    ///
    /// A region that fails to open or read leaves the store detached.
    pub fn open(keys: EnvKeys, mut region: RegionDescriptor) -> Self {
        if !region.is_open() {
            if let Err(e) = region.open() {
                log::warn!("Environment region unavailable: {}", e);
                return Self::detached(keys);
            }
        }

        let Ok(size) = usize::try_from(region.length) else {
            log::warn!("Environment region too large");
            return Self::detached(keys);
        };
        let mut image = vec![0u8; size];
        if let Err(e) = region.read_exact_at(0, &mut image) {
            log::warn!("Environment region unreadable: {}", e);
            return Self::detached(keys);
        }

        let log = RecordLog::from_image(image);
        log::info!(
            "Environment: {} keys, {} of {} bytes used",
            keys.len(),
            log.tail(),
            log.capacity()
        );
        Self {
            keys,
            log,
            region: Some(region),
        }
    }

    /// Check whether a backing region is attached
    pub fn is_attached(&self) -> bool {
        self.region.is_some()
    }

    /// Registered keys
    pub fn keys(&self) -> &EnvKeys {
        &self.keys
    }

    /// Record log mirror
    pub fn log(&self) -> &RecordLog {
        &self.log
    }

    /// Current value of a key: its live value, else its default
    ///
    /// Returns `None` for unregistered keys.
    pub fn fetch(&self, name: &str) -> Option<&str> {
        let index = self.keys.find(name)?;
        Some(self.value_of(index).0)
    }

    fn value_of(&self, index: KeyIndex) -> (&str, bool) {
        let key = &self.keys.keys[index.0 as usize];
        match self.log.find_live(index.0) {
            Some(record) => match core::str::from_utf8(record.value) {
                Ok(value) => (value, false),
                Err(_) => {
                    log::warn!("Environment value for '{}' is not UTF-8", key.name);
                    (key.default.as_str(), true)
                }
            },
            None => (key.default.as_str(), true),
        }
    }

    fn writable_region(&mut self) -> Result<&mut RegionDescriptor> {
        let region = self.region.as_mut().ok_or(Error::Unsupported)?;
        if !region.supports(Ops::WRITE) {
            return Err(Error::Unsupported);
        }
        Ok(region)
    }

    /// Store a new value for a key
    ///
    /// Any live record for the key is tombstoned, then the new record is
    /// appended. Values too long for one record are truncated.
    pub fn store(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || value.is_empty() {
            return Err(Error::Param);
        }
        self.writable_region()?;
        let index = self.keys.find(name).ok_or(Error::NotFound)?;

        let (record, truncated) = encode_record(index.0, value)?;
        if truncated {
            log::warn!(
                "Value for '{}' truncated to {} bytes",
                name,
                record.len() - 2
            );
        }
        let seal = usize::from(self.log.torn().is_some());
        if record.len() + seal > self.log.free() {
            log::warn!("Environment region full");
            return Err(Error::OutOfMemory);
        }

        self.seal_torn()?;
        self.tombstone(index)?;
        let tail = self.log.tail();
        self.append_record(tail, &record)
    }

    /// Close off a record an interrupted store left unterminated
    ///
    /// The fragment gets a NUL at the tail and its marker is tombstoned, so
    /// the next record starts on erased flash and the fragment never reads
    /// as a live value.
    fn seal_torn(&mut self) -> Result<()> {
        let Some(offset) = self.log.torn() else {
            return Ok(());
        };
        log::warn!(
            "Sealing torn environment record at 0x{:x}, run compactenv to reclaim it",
            offset
        );
        let end = self.log.tail();
        self.append_record(end, &[0])?;

        let marker = Marker::from_byte(self.log.image()[offset]).tombstoned();
        let region = self.writable_region()?;
        region.write_all_at(offset as u64, &[marker.byte()])?;
        self.log.apply_tombstone(offset);
        Ok(())
    }

    /// Tombstone a key's live value, reverting it to its default
    pub fn erase(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Param);
        }
        self.writable_region()?;
        let index = self.keys.find(name).ok_or(Error::NotFound)?;
        self.tombstone(index)
    }

    fn tombstone(&mut self, index: KeyIndex) -> Result<()> {
        let live: Vec<(usize, Marker)> = self
            .log
            .records()
            .filter(|r| r.marker.is_live() && r.marker.key_index() == index.0)
            .map(|r| (r.offset, r.marker))
            .collect();

        for (offset, marker) in live {
            let region = self.writable_region()?;
            region.write_all_at(offset as u64, &[marker.tombstoned().byte()])?;
            self.log.apply_tombstone(offset);
            log::debug!("Tombstoned environment record at 0x{:x}", offset);
        }
        Ok(())
    }

    fn append_record(&mut self, offset: usize, record: &[u8]) -> Result<()> {
        let region = self.writable_region()?;
        region.write_all_at(offset as u64, record)?;
        self.log.apply_append(offset, record)
    }

    /// Erase the whole backing region
    pub fn erase_all(&mut self) -> Result<()> {
        let region = self.writable_region()?;
        if !region.supports(Ops::ERASE) {
            return Err(Error::Unsupported);
        }
        let length = region.length;
        region.seek(0, crate::driver::Whence::Set)?;
        let erased = region.erase(length)?;
        if erased < length {
            return Err(Error::IoFailure);
        }
        self.log.apply_erase();
        log::info!("Environment erased");
        Ok(())
    }

    /// Rewrite the backing region with live records only
    ///
    /// Reclaims the space held by tombstoned records. Live values are held
    /// in RAM across the bulk erase.
    pub fn compact(&mut self) -> Result<()> {
        let live: Vec<(u8, Vec<u8>)> = self
            .log
            .records()
            .filter(|r| r.marker.is_live())
            .map(|r| (r.marker.key_index(), r.value.to_vec()))
            .collect();
        let before = self.log.tail();

        self.erase_all()?;

        let mut offset = 0;
        for (index, value) in live {
            let mut record = Vec::with_capacity(value.len() + 2);
            record.push(Marker::live(index).byte());
            record.extend_from_slice(&value);
            record.push(0);
            self.append_record(offset, &record)?;
            offset += record.len();
        }
        log::info!("Environment compacted from {} to {} bytes", before, offset);
        Ok(())
    }

    /// Step a restartable enumeration over all registered keys
    ///
    /// Start with `*cursor == 0`; returns `None` once every key has been
    /// visited.
    pub fn enumerate(&self, cursor: &mut usize) -> Option<EnvEntry<'_>> {
        let key = self.keys.keys.get(*cursor)?;
        let index = KeyIndex(*cursor as u8);
        *cursor += 1;
        let (value, is_default) = self.value_of(index);
        Some(EnvEntry {
            index,
            key: &key.name,
            value,
            is_default,
            description: &key.description,
        })
    }

    /// Iterate over all registered keys in registration order
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            store: self,
            cursor: 0,
        }
    }
}

/// Iterator over environment entries
pub struct Entries<'a> {
    store: &'a EnvStore,
    cursor: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = EnvEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.store.enumerate(&mut self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Registry;
    use crate::env::record::{ENV_END, ENV_RECORD_MAX};
    use crate::memory::MemoryDriver;
    use std::string::ToString;

    fn keys() -> EnvKeys {
        let mut keys = EnvKeys::new();
        keys.register("bootargs", "console=ttyS0", "Kernel command line")
            .unwrap();
        keys.register("startup", "", "Commands run at boot").unwrap();
        keys.register("ipaddr", "192.168.0.10", "Local IP address")
            .unwrap();
        keys
    }

    fn store_with_size(size: usize) -> EnvStore {
        let mut registry = Registry::new();
        registry
            .register(MemoryDriver::with_data(0, vec![ENV_END; size]))
            .unwrap();
        let region = registry.parse(&std::format!("mem:0+{}", size)).unwrap();
        EnvStore::open(keys(), region)
    }

    fn store() -> EnvStore {
        store_with_size(1024)
    }

    fn live_count(store: &EnvStore, name: &str) -> usize {
        let index = store.keys().find(name).unwrap().get();
        store
            .log()
            .records()
            .filter(|r| r.marker.is_live() && r.marker.key_index() == index)
            .count()
    }

    #[test]
    fn test_key_indices_dense() {
        let keys = keys();
        assert_eq!(keys.find("bootargs").unwrap().get(), 0);
        assert_eq!(keys.find("startup").unwrap().get(), 1);
        assert_eq!(keys.find("ipaddr").unwrap().get(), 2);
        assert_eq!(keys.find("serverip"), None);
    }

    #[test]
    fn test_key_table_limits() {
        let mut keys = EnvKeys::new();
        for i in 0..ENV_KEY_MAX {
            keys.register(std::format!("key{}", i), "", "").unwrap();
        }
        assert_eq!(
            keys.register("overflow", "", "").err(),
            Some(Error::OutOfMemory)
        );
        assert_eq!(keys.register("key0", "", "").err(), Some(Error::Param));
        assert_eq!(EnvKeys::new().register("", "", "").err(), Some(Error::Param));
    }

    #[test]
    fn test_fetch_default_then_stored() {
        let mut store = store();
        assert_eq!(store.fetch("bootargs"), Some("console=ttyS0"));
        store.store("bootargs", "console=ttyAM0").unwrap();
        assert_eq!(store.fetch("bootargs"), Some("console=ttyAM0"));
        assert_eq!(store.fetch("ipaddr"), Some("192.168.0.10"));
        assert_eq!(store.fetch("nope"), None);

        for _ in 0..2 {
            let entry = store.entries().next().unwrap();
            assert_eq!(entry.value, "console=ttyAM0");
            assert!(!entry.is_default);
        }
    }

    #[test]
    fn test_store_twice_leaves_one_live() {
        let mut store = store();
        store.store("ipaddr", "10.0.0.1").unwrap();
        store.store("ipaddr", "10.0.0.2").unwrap();

        assert_eq!(live_count(&store, "ipaddr"), 1);
        assert_eq!(store.log().records().count(), 2);
        let first = store.log().records().next().unwrap();
        assert!(!first.marker.is_live());
        assert_eq!(first.value, b"10.0.0.1");
        assert_eq!(store.fetch("ipaddr"), Some("10.0.0.2"));
    }

    #[test]
    fn test_store_persists_through_region() {
        let mut registry = Registry::new();
        registry
            .register(MemoryDriver::with_data(0, vec![ENV_END; 256]))
            .unwrap();
        let region = registry.parse("mem:0+256").unwrap();
        let mut store = EnvStore::open(keys(), region);
        store.store("startup", "boot").unwrap();
        drop(store);

        let region = registry.parse("mem:0+256").unwrap();
        let store = EnvStore::open(keys(), region);
        assert_eq!(store.fetch("startup"), Some("boot"));
        assert_eq!(store.log().tail(), 6);
    }

    #[test]
    fn test_erase_reverts_to_default() {
        let mut store = store();
        store.store("bootargs", "quiet").unwrap();
        store.erase("bootargs").unwrap();
        assert_eq!(store.fetch("bootargs"), Some("console=ttyS0"));
        assert_eq!(live_count(&store, "bootargs"), 0);
        store.erase("bootargs").unwrap();
    }

    #[test]
    fn test_enumerate_flags_defaults() {
        let mut store = store();
        store.store("startup", "boot").unwrap();

        let mut cursor = 0;
        let mut seen = std::vec::Vec::new();
        while let Some(entry) = store.enumerate(&mut cursor) {
            seen.push((entry.key.to_string(), entry.value.to_string(), entry.is_default));
        }
        assert_eq!(
            seen,
            [
                ("bootargs".to_string(), "console=ttyS0".to_string(), true),
                ("startup".to_string(), "boot".to_string(), false),
                ("ipaddr".to_string(), "192.168.0.10".to_string(), true),
            ]
        );
        assert!(store.enumerate(&mut cursor).is_none());
    }

    #[test]
    fn test_errors() {
        let mut store = store();
        assert_eq!(store.store("nope", "x").err(), Some(Error::NotFound));
        assert_eq!(store.store("bootargs", "").err(), Some(Error::Param));
        assert_eq!(store.store("", "x").err(), Some(Error::Param));
        assert_eq!(store.erase("nope").err(), Some(Error::NotFound));
    }

    #[test]
    fn test_detached_store() {
        let mut store = EnvStore::detached(keys());
        assert!(!store.is_attached());
        assert_eq!(store.fetch("bootargs"), Some("console=ttyS0"));
        assert_eq!(
            store.store("bootargs", "quiet").err(),
            Some(Error::Unsupported)
        );
    }

    #[test]
    fn test_unopenable_region_detaches() {
        let mut registry = Registry::new();
        registry.register(MemoryDriver::new(0, 64)).unwrap();
        let region = registry.parse("mem:0+128").unwrap();
        let mut store = EnvStore::open(keys(), region);
        assert!(!store.is_attached());
        assert_eq!(store.store("startup", "x").err(), Some(Error::Unsupported));
    }

    #[test]
    fn test_full_region() {
        let mut store = store_with_size(16);
        store.store("startup", "0123456789").unwrap();
        assert_eq!(
            store.store("ipaddr", "10.0.0.1").err(),
            Some(Error::OutOfMemory)
        );
        assert_eq!(store.fetch("startup"), Some("0123456789"));
    }

    #[test]
    fn test_long_value_truncated() {
        let mut store = store();
        let long = "a".repeat(ENV_RECORD_MAX + 10);
        store.store("bootargs", &long).unwrap();
        assert_eq!(store.fetch("bootargs").unwrap().len(), ENV_RECORD_MAX - 2);
    }

    #[test]
    fn test_erase_all_unsupported_on_memory() {
        let mut store = store();
        assert_eq!(store.erase_all().err(), Some(Error::Unsupported));
    }

    #[test]
    fn test_store_after_torn_record() {
        let mut image = vec![ENV_END; 64];
        image[..3].copy_from_slice(&[0x81, b'a', b'b']);
        let mut registry = Registry::new();
        registry.register(MemoryDriver::with_data(0, image)).unwrap();
        let region = registry.parse("mem:0+64").unwrap();
        let mut store = EnvStore::open(keys(), region);
        assert_eq!(store.fetch("startup"), Some(""));

        store.store("ipaddr", "x").unwrap();
        assert_eq!(store.fetch("ipaddr"), Some("x"));
        assert_eq!(store.fetch("bootargs"), Some("console=ttyS0"));
        assert_eq!(store.fetch("startup"), Some(""));
        assert_eq!(&store.log().image()[..7], &[0x01, b'a', b'b', 0, 0x82, b'x', 0]);
        assert_eq!(store.log().torn(), None);

        let region = registry.parse("mem:0+64").unwrap();
        let reopened = EnvStore::open(keys(), region);
        assert_eq!(reopened.fetch("ipaddr"), Some("x"));
        assert_eq!(reopened.fetch("startup"), Some(""));
    }
}
