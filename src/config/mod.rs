//! Engine configuration.
//!
//! One file holds every section: worker pool, graph compilation and logging.
//! Missing sections and fields fall back to their defaults, so an empty file
//! is a valid configuration.
//!
//! # Location
//!
//! The default file lives in the platform configuration directory:
//! - **Linux**: `~/.config/pipemotion/engine.toml`
//! - **macOS**: `~/Library/Application Support/pipemotion/engine.toml`
//! - **Windows**: `%APPDATA%\pipemotion\engine.toml`
//!
//! # Formats
//!
//! Files ending in `.toml` are read and written as TOML, anything else as JSON.
//!
//! # Example
//!
//! ```ignore
//! use pipemotion::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("engine.toml");
//! let queue = TaskQueue::new(handlers, &config.pool)?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier used for the configuration directory.
pub const APP_ID: &str = "pipemotion";

/// Default configuration filename.
pub const CONFIG_FILE: &str = "engine.toml";

/// Current configuration format version.
pub const CONFIG_VERSION: u32 = 1;

/// Platform configuration directory for this application.
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version for future migration support
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            pool: PoolSettings::default(),
            graph: GraphSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

impl EngineConfig {
    /// Path of the default configuration file.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join(CONFIG_FILE))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;

        if is_toml(path) {
            toml::from_str::<Self>(&content)
                .map_err(|e| Error::Config(e.to_string()))
                .with_context(|| format!("Failed to parse configuration {:?}", path))
        } else {
            serde_json::from_str::<Self>(&content)
                .with_context(|| format!("Failed to parse configuration {:?}", path))
        }
    }

    /// Load a configuration file, returning defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load configuration, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create configuration directory")?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration {:?}", path))
    }
}
