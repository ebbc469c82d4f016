//! Persisted user settings - remembered tracker and daily step target

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// The tracker the user picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub device: Option<DeviceIdentity>,
    /// 0 when never set
    #[serde(default)]
    pub steps_target: u32,
}

/// Settings the session and shell read and write.
///
/// A missing value reads as `0` / `None`. Read-modify-write is not atomic.
/// Calls may block on file I/O, so a [`Session`](crate::Session) reads the
/// target once at construction and never from its event loop.
pub trait SettingsStore: Send + Sync {
    fn read_target(&self) -> u32;
    fn write_target(&self, target: u32) -> Result<(), SettingsError>;
    fn read_device_identity(&self) -> Option<DeviceIdentity>;
    fn write_device_identity(&self, identity: &DeviceIdentity) -> Result<(), SettingsError>;
}

/// Get EZON_HOME directory, creating it if needed
pub fn ezon_home() -> Result<PathBuf, SettingsError> {
    let home = match std::env::var_os("EZON_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir().ok_or(SettingsError::NoHome)?.join(".ezon"),
    };

    if !home.exists() {
        fs::create_dir_all(&home)?;
    }

    Ok(home)
}

/// Settings kept as JSON in a file
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub const FILE_NAME: &'static str = "settings.json";

    /// `settings.json` in EZON_HOME
    pub fn open_default() -> Result<Self, SettingsError> {
        Ok(Self::in_dir(&ezon_home()?))
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self { path: dir.join(Self::FILE_NAME) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, defaults when the file is missing or unreadable
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring settings file");
                Settings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<(), SettingsError> {
        let mut settings = self.load();
        f(&mut settings);
        self.save(&settings)
    }
}

impl SettingsStore for FileSettings {
    fn read_target(&self) -> u32 {
        self.load().steps_target
    }

    fn write_target(&self, target: u32) -> Result<(), SettingsError> {
        self.update(|s| s.steps_target = target)
    }

    fn read_device_identity(&self) -> Option<DeviceIdentity> {
        self.load().device
    }

    fn write_device_identity(&self, identity: &DeviceIdentity) -> Result<(), SettingsError> {
        self.update(|s| s.device = Some(identity.clone()))
    }
}

/// In-memory settings, nothing survives the process
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self { inner: Mutex::new(settings) }
    }

    pub fn with_target(target: u32) -> Self {
        Self::new(Settings { device: None, steps_target: target })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        // a poisoned lock still holds plain data
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for MemorySettings {
    fn read_target(&self) -> u32 {
        self.lock().steps_target
    }

    fn write_target(&self, target: u32) -> Result<(), SettingsError> {
        self.lock().steps_target = target;
        Ok(())
    }

    fn read_device_identity(&self) -> Option<DeviceIdentity> {
        self.lock().device.clone()
    }

    fn write_device_identity(&self, identity: &DeviceIdentity) -> Result<(), SettingsError> {
        self.lock().device = Some(identity.clone());
        Ok(())
    }
}
