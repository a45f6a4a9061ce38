//! Application configuration options

use std::time::Duration;

use crate::settings::Settings;
use crate::update::OrchestratorOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Concentrator connection
    pub concentrator: ConcentratorOptions,

    /// TFTP transfer tuning
    pub transfer: TransferOptions,

    /// Update run timing and behaviour
    pub orchestrator: OrchestratorOptions,

    /// Directory holding firmware images
    pub firmware_dir: String,

    /// When set, devices whose version starts with this prefix are skipped
    /// instead of comparing date codes
    pub skip_version_prefix: Option<String>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            concentrator: ConcentratorOptions::default(),
            transfer: TransferOptions::default(),
            orchestrator: OrchestratorOptions::default(),
            firmware_dir: "firmware".to_string(),
            skip_version_prefix: None,
        }
    }
}

impl AppOptions {
    /// Build options from a settings file
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            concentrator: ConcentratorOptions {
                host: settings.concentrator.host.clone(),
                port: settings.concentrator.port,
                command_timeout: Duration::from_millis(settings.concentrator.command_timeout_ms),
            },
            transfer: TransferOptions {
                ack_timeout: Duration::from_millis(settings.transfer.ack_timeout_ms),
                max_attempts: settings.transfer.max_attempts,
            },
            orchestrator: OrchestratorOptions {
                settle_delay: Duration::from_secs(settings.timing.settle_secs),
                pre_finalize_delay: Duration::from_secs(settings.timing.pre_finalize_secs),
                inter_device_delay: Duration::from_secs(settings.timing.inter_device_secs),
                job_poll_limit: settings.timing.job_poll_limit,
                enrich_inventory: settings.enrich_inventory,
                ..Default::default()
            },
            firmware_dir: settings.firmware_dir.clone(),
            skip_version_prefix: settings.skip_version_prefix.clone(),
        }
    }
}

/// Concentrator connection options
#[derive(Debug, Clone)]
pub struct ConcentratorOptions {
    /// Concentrator host
    pub host: String,

    /// Concentrator UDP port
    pub port: u16,

    /// Per-command reply timeout
    pub command_timeout: Duration,
}

impl Default for ConcentratorOptions {
    fn default() -> Self {
        Self {
            host: "10.0.1.89".to_string(),
            port: 3456,
            command_timeout: Duration::from_millis(3000),
        }
    }
}

/// TFTP transfer options
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Per-block acknowledgement timeout
    pub ack_timeout: Duration,

    /// Transmission attempts per block before giving up
    pub max_attempts: u32,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(5000),
            max_attempts: 3,
        }
    }
}
