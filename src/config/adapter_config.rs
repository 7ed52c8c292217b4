use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{DEFAULT_INBOX_CAPACITY, DEFAULT_SCAN_TIMEOUT_MS};
use crate::core::error::AdapterError;

/// What connect does when another peripheral is already active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectPolicy {
    /// Disconnect the active peripheral, then connect the new one
    #[default]
    Replace,
    /// Refuse with `AlreadyConnected`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Scan window used when a request does not give one.
    pub default_scan_timeout_ms: u64,

    /// Upper bound on connect plus service discovery. Unset waits forever.
    pub connect_timeout_ms: Option<u64>,

    /// Upper bound on a read, discovery included. Unset waits forever.
    pub read_timeout_ms: Option<u64>,

    /// Upper bound on a write, discovery included. Unset waits forever.
    pub write_timeout_ms: Option<u64>,

    /// Advertisements weaker than this are ignored
    pub min_rssi: Option<i16>,

    pub connect_policy: ConnectPolicy,

    /// Write mode when a request does not say
    pub write_without_response: bool,

    /// Requests that may queue before submitters wait
    pub inbox_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            default_scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            min_rssi: None,
            connect_policy: ConnectPolicy::default(),
            write_without_response: true,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl AdapterConfig {
    pub fn default_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.default_scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.default_scan_timeout_ms == 0 {
            return Err(AdapterError::InvalidConfig(
                "default_scan_timeout_ms must be > 0".to_string(),
            ));
        }
        let timeouts = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(AdapterError::InvalidConfig(format!("{name} must be > 0 when set")));
            }
        }
        if self.inbox_capacity == 0 {
            return Err(AdapterError::InvalidConfig(
                "inbox_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the config from a configuration file.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Loads the config, writing the defaults to `path` first when no file
    /// exists there yet.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();
        if file_path.exists() {
            return Self::load_config(file_path).await;
        }

        let config = Self::default();
        if let Err(e) = config.save_config(file_path).await {
            warn!("Could not write default config to {:?}: {}", file_path.to_string_lossy(), e);
        }
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        let missing_dir = file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty() && !dir.exists());
        if let Some(config_dir) = missing_dir {
            if let Err(e) = fs::create_dir_all(config_dir).await {
                error!("Failed to create config directory {:?}: {}", config_dir, e);
                return Err(e.into());
            }
            info!("Created config directory {:?}", config_dir);
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize adapter config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Adapter config saved to {:?}.", file_path.to_string_lossy());
        Ok(())
    }
}
