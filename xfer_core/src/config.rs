use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::transfer::constants::TRANSFER_PORT;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "xfer";
const APP_NAME: &str = "xfer";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (tests, containers)
pub const CONFIG_DIR_ENV: &str = "XFER_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port the server listens on
    pub listen_port: u16,
    /// Root directory the server stores and serves files from
    pub storage_dir: PathBuf,
    /// Where the client puts retrieved files
    pub download_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: TRANSFER_PORT,
            storage_dir: PathBuf::from("."),
            download_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from the default location, or defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no config directory on this platform",
            )),
        }
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
