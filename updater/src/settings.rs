//! Settings file management

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::UpdaterError;
use crate::logs::LogLevel;

/// Updater settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Concentrator configuration
    #[serde(default)]
    pub concentrator: ConcentratorSettings,

    /// Firmware transfer configuration
    #[serde(default)]
    pub transfer: TransferSettings,

    /// Update run timing
    #[serde(default)]
    pub timing: TimingSettings,

    /// Directory holding firmware images
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: String,

    /// Query each device for its live IP and system info during inventory
    #[serde(default)]
    pub enrich_inventory: bool,

    /// When set, devices whose version starts with this prefix are skipped
    /// instead of comparing date codes
    #[serde(default)]
    pub skip_version_prefix: Option<String>,
}

fn default_firmware_dir() -> String {
    "firmware".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            concentrator: ConcentratorSettings::default(),
            transfer: TransferSettings::default(),
            timing: TimingSettings::default(),
            firmware_dir: default_firmware_dir(),
            enrich_inventory: false,
            skip_version_prefix: None,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, UpdaterError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await.map_err(|e| {
            UpdaterError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }
}

/// Concentrator connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentratorSettings {
    /// Concentrator host
    #[serde(default = "default_concentrator_host")]
    pub host: String,

    /// Concentrator UDP port
    #[serde(default = "default_concentrator_port")]
    pub port: u16,

    /// Per-command reply timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_concentrator_host() -> String {
    "10.0.1.89".to_string()
}

fn default_concentrator_port() -> u16 {
    3456
}

fn default_command_timeout() -> u64 {
    3000
}

impl Default for ConcentratorSettings {
    fn default() -> Self {
        Self {
            host: default_concentrator_host(),
            port: default_concentrator_port(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

/// TFTP transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Per-block acknowledgement timeout in milliseconds
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Transmission attempts per block before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_ack_timeout() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Update run timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Seconds to wait after device resets and polling state changes
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Seconds to wait before finalizing a transferred image
    #[serde(default = "default_pre_finalize_secs")]
    pub pre_finalize_secs: u64,

    /// Seconds to wait between consecutive device updates
    #[serde(default = "default_inter_device_secs")]
    pub inter_device_secs: u64,

    /// Give up waiting for the inventory job after this many one-second polls
    #[serde(default = "default_job_poll_limit")]
    pub job_poll_limit: u32,
}

fn default_settle_secs() -> u64 {
    2
}

fn default_pre_finalize_secs() -> u64 {
    3
}

fn default_inter_device_secs() -> u64 {
    5
}

fn default_job_poll_limit() -> u32 {
    60
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            pre_finalize_secs: default_pre_finalize_secs(),
            inter_device_secs: default_inter_device_secs(),
            job_poll_limit: default_job_poll_limit(),
        }
    }
}
