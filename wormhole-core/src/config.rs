//! Persisted user settings: rendezvous URL and code length.
//!
//! Stored as JSON in `<data_dir>/wormhole-william.json`. Empty URL or non-positive length mean
//! "engine default". A missing or unreadable file yields defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::SessionParams;

pub const CONFIG_FILE_NAME: &str = "wormhole-william.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rendezvous_url: String,
    #[serde(default, rename = "code_len")]
    pub code_length: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Config {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE_NAME)
    }

    /// Load from `data_dir`; defaults when the file is missing or malformed.
    pub fn load(data_dir: &Path) -> Config {
        let path = Self::path(data_dir);
        let content = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file, using defaults");
                return Config::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                Config::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(data_dir).map_err(|source| ConfigError::CreateDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = Self::path(data_dir);
        let json = serde_json::to_string(self)?;
        fs::write(&path, json).map_err(|source| ConfigError::Write { path, source })
    }

    /// Engine parameters for a new session.
    pub fn session_params(&self) -> SessionParams {
        let url = self.rendezvous_url.trim();
        SessionParams {
            rendezvous_url: (!url.is_empty()).then(|| url.to_string()),
            code_length: u32::try_from(self.code_length).ok().filter(|n| *n > 0),
        }
    }
}
