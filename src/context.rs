use std::path::{Path, PathBuf};

use crate::config::{ConfigError, ConfigStore};
use crate::settings::{SettingsError, SettingsStore};

pub const CONFIG_FILE: &str = "consoles.toml";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug)]
pub enum PersistError {
    Config(ConfigError),
    Settings(SettingsError),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Config(error) => write!(f, "{error}"),
            PersistError::Settings(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<ConfigError> for PersistError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<SettingsError> for PersistError {
    fn from(value: SettingsError) -> Self {
        Self::Settings(value)
    }
}

/// Process-wide context: the configuration and settings stores, constructed
/// explicitly and passed to whoever needs them. Init is load-or-default;
/// teardown is [`AppContext::persist`], called after the shutdown sequence
/// has terminated every console.
#[derive(Debug)]
pub struct AppContext {
    pub config: ConfigStore,
    pub settings: SettingsStore,
}

impl AppContext {
    pub fn init(dir: &Path) -> Self {
        Self {
            config: ConfigStore::load_or_default(dir.join(CONFIG_FILE)),
            settings: SettingsStore::load_or_default(dir.join(SETTINGS_FILE)),
        }
    }

    pub fn init_with_paths(config_path: PathBuf, settings_path: PathBuf) -> Self {
        Self {
            config: ConfigStore::load_or_default(config_path),
            settings: SettingsStore::load_or_default(settings_path),
        }
    }

    /// Writes both documents; both are attempted even if the first fails.
    pub fn persist(&self) -> Result<(), PersistError> {
        let config_result = self.config.save();
        let settings_result = self.settings.save();
        config_result?;
        settings_result?;
        Ok(())
    }
}
