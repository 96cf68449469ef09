use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{info, warn};

/// Console arguments as configured: either an explicit token list or a raw
/// string split on whitespace at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConsoleArgs {
    List(Vec<String>),
    Raw(String),
}

impl Default for ConsoleArgs {
    fn default() -> Self {
        ConsoleArgs::List(Vec::new())
    }
}

impl ConsoleArgs {
    pub fn tokens(&self) -> Vec<String> {
        match self {
            ConsoleArgs::List(tokens) => tokens.clone(),
            ConsoleArgs::Raw(raw) => raw.split_whitespace().map(str::to_owned).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ConsoleArgs::List(tokens) => tokens.is_empty(),
            ConsoleArgs::Raw(raw) => raw.trim().is_empty(),
        }
    }
}

/// Immutable-once-saved definition of one console. The map key in
/// [`ConfigDocument::consoles`] is the console name and the stable identity
/// used everywhere; renames are delete-then-recreate.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsoleConfig {
    pub program: String,
    #[serde(default, skip_serializing_if = "ConsoleArgs::is_empty")]
    pub args: ConsoleArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub auto_start: bool,
}

impl ConsoleConfig {
    /// Configured working directory, defaulting to the current directory.
    pub fn resolved_work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub consoles: IndexMap<String, ConsoleConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEntry>,
}

impl ConfigDocument {
    /// Registers a service descriptor; an existing entry with the same name
    /// is updated in place.
    pub fn add_service(&mut self, name: impl Into<String>, display_name: impl Into<String>) {
        let name = name.into();
        let display_name = display_name.into();
        let display_name = if display_name.is_empty() {
            name.clone()
        } else {
            display_name
        };
        if let Some(existing) = self.services.iter_mut().find(|entry| entry.name == name) {
            existing.display_name = display_name;
        } else {
            self.services.push(ServiceEntry { name, display_name });
        }
    }

    pub fn remove_service(&mut self, name: &str) -> bool {
        let before = self.services.len();
        self.services.retain(|entry| entry.name != name);
        self.services.len() != before
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    ParseToml {
        path: PathBuf,
        error: toml::de::Error,
    },
    ParseJson {
        path: PathBuf,
        error: serde_json::Error,
    },
    Serialize(String),
    Write {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, error } => {
                write!(f, "failed to read `{}`: {error}", path.display())
            }
            ConfigError::ParseToml { path, error } => {
                write!(f, "failed to parse `{}`: {error}", path.display())
            }
            ConfigError::ParseJson { path, error } => {
                write!(f, "failed to parse `{}`: {error}", path.display())
            }
            ConfigError::Serialize(error) => {
                write!(f, "failed to serialize configuration: {error}")
            }
            ConfigError::Write { path, error } => {
                write!(f, "failed to write `{}`: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// On-disk configuration document: console definitions plus service
/// descriptors, written on every mutating action and on shutdown.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    pub document: ConfigDocument,
}

impl ConfigStore {
    /// Loads the document at `path`. A missing file yields the empty
    /// document; a corrupt file is left untouched on disk and an empty
    /// document is used in memory, so a bad load never destroys saved
    /// state.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match read_document(&path) {
            Ok(Some(document)) => {
                info!(
                    "loaded {} console(s) and {} service(s) from {}",
                    document.consoles.len(),
                    document.services.len(),
                    path.display()
                );
                document
            }
            Ok(None) => ConfigDocument::default(),
            Err(error) => {
                warn!("{error}; starting with an empty configuration (file left untouched)");
                ConfigDocument::default()
            }
        };
        Self { path, document }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let rendered = toml::to_string_pretty(&self.document)
            .map_err(|error| ConfigError::Serialize(error.to_string()))?;
        fs::write(&self.path, rendered).map_err(|error| ConfigError::Write {
            path: self.path.clone(),
            error,
        })
    }

    /// Merges consoles and services from another document into this one.
    /// Existing names win; returns how many consoles were added.
    pub fn import_merge(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let Some(imported) = read_document(path)? else {
            return Err(ConfigError::Read {
                path: path.to_owned(),
                error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        };
        let mut added = 0usize;
        for (name, config) in imported.consoles {
            if !self.document.consoles.contains_key(&name) {
                self.document.consoles.insert(name, config);
                added += 1;
            }
        }
        for service in imported.services {
            if !self
                .document
                .services
                .iter()
                .any(|entry| entry.name == service.name)
            {
                self.document.services.push(service);
            }
        }
        Ok(added)
    }

    /// Writes the document to `path`, as JSON when the extension says so
    /// and TOML otherwise.
    pub fn export(&self, path: &Path) -> Result<(), ConfigError> {
        let rendered = if has_json_extension(path) {
            serde_json::to_string_pretty(&self.document)
                .map_err(|error| ConfigError::Serialize(error.to_string()))?
        } else {
            toml::to_string_pretty(&self.document)
                .map_err(|error| ConfigError::Serialize(error.to_string()))?
        };
        fs::write(path, rendered).map_err(|error| ConfigError::Write {
            path: path.to_owned(),
            error,
        })
    }
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn read_document(path: &Path) -> Result<Option<ConfigDocument>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_owned(),
        error,
    })?;
    let document = if has_json_extension(path) {
        serde_json::from_str(&raw).map_err(|error| ConfigError::ParseJson {
            path: path.to_owned(),
            error,
        })?
    } else {
        toml::from_str(&raw).map_err(|error| ConfigError::ParseToml {
            path: path.to_owned(),
            error,
        })?
    };
    Ok(Some(document))
}
