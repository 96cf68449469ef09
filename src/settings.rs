use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

/// Passive UI preferences. The core persists these verbatim for the GUI
/// collaborator and never interprets them; unknown keys round-trip through
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<[u32; 2]>,
    #[serde(default)]
    pub always_on_top: bool,
    #[serde(default)]
    pub start_hidden: bool,
    #[serde(default)]
    pub auto_start_app: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub enum SettingsError {
    Serialize(serde_json::Error),
    Write {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Serialize(error) => {
                write!(f, "failed to serialize settings: {error}")
            }
            SettingsError::Write { path, error } => {
                write!(f, "failed to write `{}`: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for SettingsError {}

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    pub settings: UiSettings,
}

impl SettingsStore {
    /// Missing or unreadable settings fall back to defaults; the on-disk
    /// file is never touched by a failed load.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => settings,
                Err(error) => {
                    warn!(
                        "failed to parse `{}`: {error}; using default settings",
                        path.display()
                    );
                    UiSettings::default()
                }
            },
            Err(_) => UiSettings::default(),
        };
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let rendered =
            serde_json::to_string_pretty(&self.settings).map_err(SettingsError::Serialize)?;
        fs::write(&self.path, rendered).map_err(|error| SettingsError::Write {
            path: self.path.clone(),
            error,
        })
    }
}
