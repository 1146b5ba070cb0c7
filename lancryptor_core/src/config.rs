use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::constants::{DEFAULT_MAX_PAYLOAD, TRANSFER_PORT};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "lancryptor";
const APP_NAME: &str = "lancryptor";
const CONFIG_FILE: &str = "config.json";

/// Directory holding `config.json`, overrides the platform config dir
pub const CONFIG_DIR_ENV: &str = "LANCRYPTOR_CONFIG_DIR";
/// Overrides the listening / target port
pub const PORT_ENV: &str = "LANCRYPTOR_PORT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    /// Where `private_key.pem` and `public_key.pem` live
    pub key_dir: PathBuf,
    pub received_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// How long a sender waits for the receiver's human to answer
    pub confirmation_timeout_secs: u64,
    pub max_payload_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: TRANSFER_PORT,
            key_dir: PathBuf::from("."),
            received_dir: PathBuf::from("Received"),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            confirmation_timeout_secs: 120,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default, then apply env overrides
    pub fn load() -> Self {
        let mut config = match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };

        if let Ok(port) = std::env::var(PORT_ENV) {
            match port.parse() {
                Ok(p) => config.port = p,
                Err(_) => tracing::warn!("Ignoring invalid {}={}", PORT_ENV, port),
            }
        }

        config
    }

    /// Read one config file; a missing or invalid file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
