//! Bootloader storage session
//!
//! A [`Session`] owns everything the storage core keeps between commands:
//! the driver registry, the persistent environment and the transient
//! variable and alias stores. It is assembled once at start-up through
//! [`SessionBuilder`], after which the set of drivers and keys is fixed.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::driver::{Driver, DriverRef, Registry};
use crate::env::{EnvKeys, EnvStore};
use crate::error::Result;
use crate::fat::{FatDriver, FAT_DRIVER};
use crate::memory::MemoryDriver;
use crate::region::RegionDescriptor;
use crate::vars::{AliasStore, VariableStore};

/// Start-up registration of drivers and environment keys
#[derive(Default)]
pub struct SessionBuilder {
    memory: Option<MemoryDriver>,
    drivers: Vec<DriverRef>,
    keys: Vec<(String, String, String)>,
    environment: Option<String>,
    fat: Option<(String, String)>,
}

impl SessionBuilder {
    /// Start an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the arena behind the built-in memory driver
    ///
    /// Without one, the memory driver addresses an empty arena.
    pub fn memory(mut self, memory: MemoryDriver) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Register a driver
    pub fn driver<D: Driver + 'static>(self, driver: D) -> Self {
        self.shared_driver(Rc::new(RefCell::new(driver)))
    }

    /// Register a driver the caller keeps a reference to
    pub fn shared_driver(mut self, driver: DriverRef) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Register an environment key
    pub fn env_key(
        mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.keys
            .push((name.into(), default.into(), description.into()));
        self
    }

    /// Back the environment with a region
    pub fn environment(mut self, region: impl Into<String>) -> Self {
        self.environment = Some(region.into());
        self
    }

    /// Mount a FAT volume found on a block region, under the name `fat`
    pub fn fat(self, block: impl Into<String>) -> Self {
        self.fat_named(FAT_DRIVER, block)
    }

    /// Mount a FAT volume under another driver name
    pub fn fat_named(mut self, name: impl Into<String>, block: impl Into<String>) -> Self {
        self.fat = Some((name.into(), block.into()));
        self
    }

    /// Register everything and open the environment
    ///
    /// Drivers are registered in order: memory first, then the added
    /// drivers, then the FAT driver. An environment region that cannot be
    /// opened leaves the environment detached rather than failing the
    /// session.
    pub fn build(self) -> Result<Session> {
        let mut registry = Registry::new();
        registry.register(self.memory.unwrap_or_else(|| MemoryDriver::new(0, 0)))?;
        for driver in self.drivers {
            registry.register_shared(driver)?;
        }

        let fat = match self.fat {
            Some((name, block)) => {
                let block = registry.parse(&block)?;
                let fat = Rc::new(RefCell::new(FatDriver::with_name(&name, block)));
                registry.register_shared(fat.clone())?;
                Some(fat)
            }
            None => None,
        };

        let mut keys = EnvKeys::new();
        for (name, default, description) in self.keys {
            keys.register(name, default, description)?;
        }

        let env = match self.environment {
            Some(text) => match registry.parse(&text) {
                Ok(region) => EnvStore::open(keys, region),
                Err(e) => {
                    log::warn!("Environment region '{}': {}", text, e);
                    EnvStore::detached(keys)
                }
            },
            None => EnvStore::detached(keys),
        };

        log::debug!("Session drivers: {}", registry.names());
        Ok(Session {
            registry,
            env,
            variables: VariableStore::new(),
            aliases: AliasStore::new(),
            fat,
        })
    }
}

/// All storage state of a running bootloader
pub struct Session {
    registry: Registry,
    env: EnvStore,
    variables: VariableStore,
    aliases: AliasStore,
    fat: Option<Rc<RefCell<FatDriver>>>,
}

impl Session {
    /// Driver registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parse a region string without opening it
    pub fn parse(&self, text: &str) -> Result<RegionDescriptor> {
        self.registry.parse(text)
    }

    /// Parse and open a region string
    pub fn open(&self, text: &str) -> Result<RegionDescriptor> {
        self.registry.open(text)
    }

    /// Persistent environment
    pub fn env(&self) -> &EnvStore {
        &self.env
    }

    /// Persistent environment, mutably
    pub fn env_mut(&mut self) -> &mut EnvStore {
        &mut self.env
    }

    /// Shell variables
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Shell variables, mutably
    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    /// Command aliases
    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    /// Command aliases, mutably
    pub fn aliases_mut(&mut self) -> &mut AliasStore {
        &mut self.aliases
    }

    /// The mounted FAT driver, if any
    pub fn fat(&self) -> Option<&Rc<RefCell<FatDriver>>> {
        self.fat.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ENV_END;
    use crate::error::Error;
    use crate::fat::test_image::{self, FileSpec};
    use std::vec;

    fn session() -> Session {
        let disk = test_image::build(&[FileSpec::file("ZIMAGE     ", b"zImage")]);
        let mut arena = vec![0u8; 0x9000 + disk.len()];
        arena[0x8000..0x8100].fill(ENV_END);
        arena[0x9000..].copy_from_slice(&disk);

        SessionBuilder::new()
            .memory(MemoryDriver::with_data(0x2000_0000, arena))
            .env_key("bootargs", "console=ttyS0", "Kernel command line")
            .env_key("startup", "", "Commands run at boot")
            .environment("mem:0x20008000+256")
            .fat("mem:0x20009000")
            .build()
            .unwrap()
    }

    #[test]
    fn test_registration_order() {
        let session = session();
        let names: Vec<_> = session.registry().iter().map(|r| r.info.name.clone()).collect();
        assert_eq!(names, ["memory", "fat"]);
    }

    #[test]
    fn test_environment_attached() {
        let mut session = session();
        assert!(session.env().is_attached());
        session.env_mut().store("startup", "boot").unwrap();
        assert_eq!(session.env().fetch("startup"), Some("boot"));
    }

    #[test]
    fn test_missing_environment_detaches() {
        let session = SessionBuilder::new()
            .env_key("bootargs", "quiet", "")
            .environment("nor:0+16k")
            .build()
            .unwrap();
        assert!(!session.env().is_attached());
        assert_eq!(session.env().fetch("bootargs"), Some("quiet"));
    }

    #[test]
    fn test_fat_over_memory() {
        let session = session();
        let mut d = session.open("fat:zimage").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(d.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"zImage");
        assert!(session.fat().is_some());
    }

    #[test]
    fn test_duplicate_key_fails_build() {
        let result = SessionBuilder::new()
            .env_key("a", "", "")
            .env_key("a", "", "")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_stores_independent() {
        let mut session = session();
        session.variables_mut().set("kernel", "fat:zimage").unwrap();
        session.aliases_mut().set("boot", "copy").unwrap();
        assert_eq!(session.variables().lookup("boot"), None);
        assert_eq!(session.aliases().lookup("kernel"), None);
        assert_eq!(session.open("nand:0").err(), Some(Error::NoDriver));
    }
}
