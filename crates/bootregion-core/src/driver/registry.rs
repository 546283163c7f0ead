//! Driver registry
//!
//! Drivers are registered explicitly at start-up, in order. The set is fixed
//! once the session is built; lookups never mutate it.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::{Driver, DriverInfo, DriverRef, DriverTraits, Ops};
use crate::error::{Error, Result};
use crate::region::{self, RegionDescriptor};

/// Name of the driver used when a region string names none
pub const DEFAULT_DRIVER: &str = "memory";

/// A driver together with its registration-time identity
#[derive(Clone)]
pub struct RegisteredDriver {
    /// Identity, with `PRESENT` set when the probe succeeded
    pub info: DriverInfo,
    /// Operations the driver implements
    pub ops: Ops,
    /// The driver itself
    pub driver: DriverRef,
}

impl RegisteredDriver {
    /// Check whether the probe found the backend
    pub fn is_present(&self) -> bool {
        self.info.traits.contains(DriverTraits::PRESENT)
    }
}

/// Ordered set of drivers, looked up by case-insensitive prefix
#[derive(Default)]
pub struct Registry {
    drivers: Vec<RegisteredDriver>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a driver, taking ownership of it
    ///
    /// Returns the shared reference under which the driver is now known.
    pub fn register<D: Driver + 'static>(&mut self, driver: D) -> Result<DriverRef> {
        let driver: DriverRef = Rc::new(RefCell::new(driver));
        self.register_shared(Rc::clone(&driver))?;
        Ok(driver)
    }

    /// Register a driver the caller keeps a typed reference to
    ///
    /// The driver's probe runs once, here. A driver whose probe fails stays
    /// registered without the `PRESENT` trait and refuses to open regions.
    pub fn register_shared(&mut self, driver: DriverRef) -> Result<()> {
        let (mut info, ops) = {
            let d = driver.try_borrow().map_err(|_| Error::Busy)?;
            (d.describe().clone(), d.ops())
        };

        if info.name.is_empty() {
            return Err(Error::Param);
        }
        if self
            .drivers
            .iter()
            .any(|r| r.info.name.eq_ignore_ascii_case(&info.name))
        {
            log::error!("Driver '{}' registered twice", info.name);
            return Err(Error::Param);
        }

        let probed = if ops.contains(Ops::PROBE) {
            driver.try_borrow_mut().map_err(|_| Error::Busy)?.probe()
        } else {
            Ok(())
        };
        match probed {
            Ok(()) => {
                info.traits |= DriverTraits::PRESENT;
                log::debug!("Registered driver '{}' ({})", info.name, info.description);
            }
            Err(e) => {
                info.traits.remove(DriverTraits::PRESENT);
                log::warn!("Driver '{}' probe failed: {}", info.name, e);
            }
        }

        self.drivers.push(RegisteredDriver { info, ops, driver });
        Ok(())
    }

    /// Resolve a driver name
    ///
    /// Matching is case-insensitive. An exact match wins immediately.
    /// Otherwise the query must be a prefix of exactly one driver name.
    pub fn lookup(&self, name: &str) -> Result<&RegisteredDriver> {
        let mut candidate: Option<&RegisteredDriver> = None;
        let mut ambiguous = false;

        for entry in &self.drivers {
            let registered = entry.info.name.as_str();
            if registered.eq_ignore_ascii_case(name) {
                return Ok(entry);
            }
            if !name.is_empty() && starts_with_ignore_case(registered, name) {
                if candidate.is_some() {
                    ambiguous = true;
                } else {
                    candidate = Some(entry);
                }
            }
        }

        if ambiguous {
            log::debug!("Driver name '{}' is ambiguous", name);
            return Err(Error::Ambiguous);
        }
        candidate.ok_or(Error::NoDriver)
    }

    /// Parse a region string into an unopened descriptor
    pub fn parse(&self, text: &str) -> Result<RegionDescriptor> {
        region::parse(self, text)
    }

    /// Parse a region string and open the resulting descriptor
    pub fn open(&self, text: &str) -> Result<RegionDescriptor> {
        let mut d = self.parse(text)?;
        d.open()?;
        Ok(d)
    }

    /// Iterate over registered drivers in registration order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredDriver> {
        self.drivers.iter()
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Check if no driver is registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Names of all registered drivers, comma separated
    pub fn names(&self) -> String {
        let names: Vec<&str> = self.drivers.iter().map(|r| r.info.name.as_str()).collect();
        names.join(", ")
    }
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack.len() >= prefix.len()
        && haystack.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedDriver {
        info: DriverInfo,
        fail_probe: bool,
    }

    impl NamedDriver {
        fn new(name: &str) -> Self {
            Self {
                info: DriverInfo::new(name, "test driver"),
                fail_probe: false,
            }
        }
    }

    impl Driver for NamedDriver {
        fn describe(&self) -> &DriverInfo {
            &self.info
        }

        fn ops(&self) -> Ops {
            Ops::PROBE | Ops::OPEN
        }

        fn probe(&mut self) -> Result<()> {
            if self.fail_probe {
                Err(Error::IoFailure)
            } else {
                Ok(())
            }
        }
    }

    fn registry(names: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for name in names {
            registry.register(NamedDriver::new(name)).unwrap();
        }
        registry
    }

    #[test]
    fn test_prefix_ambiguous() {
        let registry = registry(&["nor-cfi", "nor2"]);
        assert_eq!(registry.lookup("nor").err(), Some(Error::Ambiguous));
    }

    #[test]
    fn test_prefix_unique() {
        let registry = registry(&["nor-cfi", "nor2"]);
        assert_eq!(registry.lookup("nor-").unwrap().info.name, "nor-cfi");
    }

    #[test]
    fn test_exact_match() {
        let registry = registry(&["nor-cfi", "nor2"]);
        assert_eq!(registry.lookup("nor2").unwrap().info.name, "nor2");
    }

    #[test]
    fn test_exact_beats_prefix() {
        let registry = registry(&["cfx", "cf"]);
        assert_eq!(registry.lookup("cf").unwrap().info.name, "cf");
    }

    #[test]
    fn test_case_insensitive() {
        let registry = registry(&["memory", "nor"]);
        assert_eq!(registry.lookup("MEM").unwrap().info.name, "memory");
        assert_eq!(registry.lookup("Nor").unwrap().info.name, "nor");
    }

    #[test]
    fn test_not_found() {
        let registry = registry(&["memory"]);
        assert_eq!(registry.lookup("nand").err(), Some(Error::NoDriver));
        assert_eq!(registry.lookup("").err(), Some(Error::NoDriver));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = registry(&["nor"]);
        assert_eq!(
            registry.register(NamedDriver::new("NOR")).err(),
            Some(Error::Param)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_probe_not_present() {
        let mut registry = Registry::new();
        let mut driver = NamedDriver::new("cf");
        driver.fail_probe = true;
        registry.register(driver).unwrap();
        registry.register(NamedDriver::new("nor")).unwrap();

        assert!(!registry.lookup("cf").unwrap().is_present());
        assert!(registry.lookup("nor").unwrap().is_present());
        assert_eq!(registry.open("cf:+1k").err(), Some(Error::Open));
    }
}
