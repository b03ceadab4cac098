//! Session configuration persisted as JSON in the user's config directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::DEFAULT_HISTORY_DEPTH;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for a [`crate::Session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Maximum number of undo entries
    pub history_depth: usize,
    /// Repair order keys after every batch that upserts elements
    pub repair_on_upsert: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            repair_on_upsert: true,
        }
    }
}

impl SessionConfig {
    /// `$XDG_CONFIG_HOME/inkboard/session.json`, falling back to `~/.config`
    pub fn default_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".config")
            });
        config_dir.join("inkboard").join("session.json")
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }
}
