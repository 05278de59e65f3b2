//! Host settings: where data and downloads live, plus the persisted transfer settings.
//!
//! Layering: defaults, then `<data_dir>/wormhole-william.json`, then environment, then flags.
//! Env overrides: WORMHOLE_DATA_DIR, WORMHOLE_DOWNLOAD_DIR, WORMHOLE_RENDEZVOUS_URL,
//! WORMHOLE_CODE_LENGTH.

use std::path::PathBuf;

use tracing::warn;
use wormhole_core::Config;

pub const DATA_DIR_ENV: &str = "WORMHOLE_DATA_DIR";
pub const DOWNLOAD_DIR_ENV: &str = "WORMHOLE_DOWNLOAD_DIR";
pub const RENDEZVOUS_ENV: &str = "WORMHOLE_RENDEZVOUS_URL";
pub const CODE_LENGTH_ENV: &str = "WORMHOLE_CODE_LENGTH";

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Effective transfer settings (file + env). Not what is on disk.
    pub config: Config,
}

/// Values from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
}

pub fn load(overrides: &Overrides) -> Settings {
    load_with(|key| std::env::var(key).ok(), overrides)
}

fn load_with(env: impl Fn(&str) -> Option<String>, overrides: &Overrides) -> Settings {
    let home = env("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let data_dir = overrides
        .data_dir
        .clone()
        .or_else(|| env(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| home.join(".local/share/wormhole"));
    let download_dir = overrides
        .download_dir
        .clone()
        .or_else(|| env(DOWNLOAD_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| home.join("Downloads"));

    let mut config = Config::load(&data_dir);
    if let Some(url) = env(RENDEZVOUS_ENV) {
        config.rendezvous_url = url;
    }
    if let Some(s) = env(CODE_LENGTH_ENV) {
        match s.trim().parse::<i64>() {
            Ok(n) => config.code_length = n,
            Err(e) => warn!(value = %s, error = %e, "ignoring {}", CODE_LENGTH_ENV),
        }
    }

    Settings {
        data_dir,
        download_dir,
        config,
    }
}
