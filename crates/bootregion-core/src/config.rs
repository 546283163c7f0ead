//! Board configuration files
//!
//! A board file describes the storage a host-side session emulates:
//!
//! ```toml
//! [memory]
//! base = 0x20000000
//! size = "4 MiB"
//!
//! [[device]]
//! name = "nor"
//! kind = "nor"
//! image = "nor.bin"
//! size = "1 MiB"
//! sector_size = "64 KiB"
//!
//! [[device]]
//! name = "cf"
//! kind = "block"
//! image = "card.img"
//!
//! [environment]
//! region = "nor:0xf0000+64k"
//!
//! [[environment.key]]
//! name = "bootargs"
//! default = "console=ttyS0"
//! description = "Kernel command line"
//!
//! [fat]
//! block = "cf:"
//! ```
//!
//! Relative image paths are resolved against the directory of the board
//! file.

use std::fs;
use std::path::{Path, PathBuf};
use std::string::String;
use std::vec::Vec;
use std::format;

use serde::Deserialize;

use crate::region;

/// Errors loading a board file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path of the board file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the schema
    #[error("invalid board file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The file parsed but describes an impossible board
    #[error("invalid board: {0}")]
    Invalid(String),
}

/// Kind of emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NOR flash: programming clears bits, erase works on sectors
    Nor,
    /// Sector-addressed block device
    Block,
}

/// RAM arena behind the memory driver
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryConfig {
    /// Address of the first byte
    #[serde(default, deserialize_with = "deserialize_number")]
    pub base: u64,
    /// Arena size
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u64,
    /// Optional file preloaded into the arena
    pub image: Option<PathBuf>,
}

/// One emulated device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    /// Driver name
    pub name: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Backing image file
    pub image: PathBuf,
    /// Device size; defaults to the image size
    #[serde(default, deserialize_with = "deserialize_optional_size")]
    pub size: Option<u64>,
    /// Erase sector (NOR) or block size
    #[serde(default, deserialize_with = "deserialize_optional_size")]
    pub sector_size: Option<u64>,
    /// Human-readable description
    pub description: Option<String>,
}

/// A registered environment key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyConfig {
    /// Key name
    pub name: String,
    /// Default value
    #[serde(default)]
    pub default: String,
    /// Description
    #[serde(default)]
    pub description: String,
}

/// Persistent environment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvironmentConfig {
    /// Backing region string
    pub region: Option<String>,
    /// Keys, in index order
    #[serde(default, rename = "key")]
    pub keys: Vec<KeyConfig>,
}

/// FAT volume mount
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FatConfig {
    /// Driver name; defaults to `fat`
    pub name: Option<String>,
    /// Block region holding the disk
    pub block: String,
}

/// Board description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BoardConfig {
    /// Memory arena
    pub memory: Option<MemoryConfig>,
    /// Devices, registered in order
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
    /// Environment
    pub environment: Option<EnvironmentConfig>,
    /// FAT mount
    pub fat: Option<FatConfig>,
}

impl BoardConfig {
    /// Load a board file, resolving image paths against its directory
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Parse a board description
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BoardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, device) in self.devices.iter().enumerate() {
            if device.name.is_empty() {
                return Err(ConfigError::Invalid(format!("device {} has no name", i)));
            }
            if self.devices[..i]
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(&device.name))
            {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' defined twice",
                    device.name
                )));
            }
            if device.sector_size == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' has a zero sector size",
                    device.name
                )));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        if let Some(image) = self.memory.as_mut().and_then(|m| m.image.as_mut()) {
            resolve(image);
        }
        for device in &mut self.devices {
            resolve(&mut device.image);
        }
    }
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeOrInt {
        Int(u64),
        Str(String),
    }

    match SizeOrInt::deserialize(deserializer)? {
        SizeOrInt::Int(n) => Ok(n),
        SizeOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_optional_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_size(deserializer).map(Some)
}

/// Parse a number the way region strings spell them
///
/// Hex (`0x...`) or decimal, with an optional `k`/`m` multiplier.
pub fn parse_number(s: &str) -> Result<u64, String> {
    region::parse_count(s).map_err(|_| format!("invalid number: {}", s.trim()))
}

/// Parse a size string like "64 KiB", "64k", "0x10000" or "4096"
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num = parse_number(num).map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}
