//! Board assembly
//!
//! Turns a [`BoardConfig`] into a [`Session`] by loading image files into the
//! emulated devices, and writes modified images back afterwards.

use bootregion_core::config::{BoardConfig, DeviceConfig, DeviceKind, MemoryConfig};
use bootregion_core::driver::DriverRef;
use bootregion_core::memory::MemoryDriver;
use bootregion_core::session::{Session, SessionBuilder};
use bootregion_dummy::{BlockDevice, NorConfig, NorFlash};
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Default NOR erase sector
const NOR_SECTOR_SIZE: u64 = 64 * 1024;

enum Device {
    Nor(Rc<RefCell<NorFlash>>),
    Block(Rc<RefCell<BlockDevice>>),
}

impl Device {
    fn driver(&self) -> DriverRef {
        match self {
            Device::Nor(nor) => nor.clone(),
            Device::Block(block) => block.clone(),
        }
    }

    /// Take the contents if they changed since the last save
    fn take_dirty(&self) -> Option<Vec<u8>> {
        match self {
            Device::Nor(nor) => {
                let mut nor = nor.borrow_mut();
                nor.is_dirty().then(|| {
                    nor.clear_dirty();
                    nor.data().to_vec()
                })
            }
            Device::Block(block) => {
                let mut block = block.borrow_mut();
                block.is_dirty().then(|| {
                    block.clear_dirty();
                    block.data().to_vec()
                })
            }
        }
    }
}

struct Mounted {
    name: String,
    image: PathBuf,
    device: Device,
}

/// A running session plus the image files behind its devices
pub struct Board {
    session: Session,
    devices: Vec<Mounted>,
}

impl Board {
    /// Load a board file and build its session
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config = BoardConfig::from_toml_file(path)?;
        log::debug!("Loaded board file {}", path.display());
        Self::from_config(&config)
    }

    /// Build a session from a parsed board
    pub fn from_config(config: &BoardConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut builder = SessionBuilder::new();
        if let Some(memory) = &config.memory {
            builder = builder.memory(load_memory(memory)?);
        }

        let mut devices = Vec::with_capacity(config.devices.len());
        for device in &config.devices {
            let mounted = load_device(device)?;
            builder = builder.shared_driver(mounted.device.driver());
            devices.push(mounted);
        }

        if let Some(env) = &config.environment {
            for key in &env.keys {
                builder = builder.env_key(&key.name, &key.default, &key.description);
            }
            if let Some(region) = &env.region {
                builder = builder.environment(region);
            }
        }

        if let Some(fat) = &config.fat {
            builder = match &fat.name {
                Some(name) => builder.fat_named(name, &fat.block),
                None => builder.fat(&fat.block),
            };
        }

        Ok(Self {
            session: builder.build()?,
            devices,
        })
    }

    /// The storage session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The storage session, mutably
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Write every modified device image back to its file
    pub fn save(&self) -> io::Result<()> {
        for mounted in &self.devices {
            if let Some(data) = mounted.device.take_dirty() {
                fs::write(&mounted.image, data)?;
                log::info!("Saved {} to {}", mounted.name, mounted.image.display());
            }
        }
        Ok(())
    }
}

fn load_memory(config: &MemoryConfig) -> Result<MemoryDriver, Box<dyn std::error::Error>> {
    let size = usize::try_from(config.size)?;
    let mut data = match &config.image {
        Some(path) => read_image(path)?,
        None => Vec::new(),
    };
    if data.len() > size {
        log::warn!(
            "Memory image is {} bytes, truncating to the {} byte arena",
            data.len(),
            size
        );
    }
    data.resize(size, 0);
    Ok(MemoryDriver::with_data(config.base, data))
}

fn load_device(config: &DeviceConfig) -> Result<Mounted, Box<dyn std::error::Error>> {
    let image = if config.image.exists() {
        read_image(&config.image)?
    } else if config.size.is_some() {
        log::info!(
            "{} does not exist, starting with a blank {}",
            config.image.display(),
            config.name
        );
        Vec::new()
    } else {
        return Err(format!(
            "image {} for '{}' does not exist and no size is given",
            config.image.display(),
            config.name
        )
        .into());
    };

    let device = match config.kind {
        DeviceKind::Nor => {
            let sector_size = config.sector_size.unwrap_or(NOR_SECTOR_SIZE);
            let size = config.size.unwrap_or_else(|| round_up(image.len() as u64, sector_size));
            let nor_config = NorConfig {
                size: usize::try_from(size)?,
                sector_size: usize::try_from(sector_size)?,
                ..NorConfig::default()
            };
            let mut nor = NorFlash::with_data(&config.name, nor_config, &image);
            if let Some(description) = &config.description {
                nor = nor.with_description(description);
            }
            Device::Nor(Rc::new(RefCell::new(nor)))
        }
        DeviceKind::Block => {
            let sector_size = config.sector_size.unwrap_or(BlockDevice::SECTOR_SIZE as u64);
            let size = config.size.unwrap_or_else(|| round_up(image.len() as u64, sector_size));
            let mut data = image;
            data.resize(usize::try_from(size)?, 0);
            let mut block = BlockDevice::with_data(&config.name, data, usize::try_from(sector_size)?);
            if let Some(description) = &config.description {
                block = block.with_description(description);
            }
            Device::Block(Rc::new(RefCell::new(block)))
        }
    };

    Ok(Mounted {
        name: config.name.clone(),
        image: config.image.clone(),
        device,
    })
}

fn read_image(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    fs::read(path).map_err(|e| format!("failed to read {}: {}", path.display(), e).into())
}

fn round_up(n: u64, multiple: u64) -> u64 {
    n.div_ceil(multiple) * multiple
}
