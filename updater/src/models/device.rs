//! Reader device model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol-level device handle.
///
/// Shown as uppercase hex with no prefix on the wire (`exe 2561 reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Parse the hex token used in inventory responses and commands
    pub fn parse(token: &str) -> Option<Self> {
        u16::from_str_radix(token, 16).ok().map(DeviceId)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

/// One reader as seen by the concentrator during a single update run.
///
/// Created from an inventory response and mutated in place as phases
/// complete. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Protocol handle, immutable after creation
    id: DeviceId,

    /// IP address reported by the concentrator
    pub ip_address: String,

    /// Firmware version currently on the device
    pub firmware_version: String,

    /// Whether the device answered the last inventory poll
    pub available: bool,

    /// Whether the analyzer marked this device for update
    pub needs_update: bool,

    /// Whether the window watchdog was found enabled
    pub watchdog_enabled: bool,

    /// Human-readable status text
    pub status: String,

    /// Update attempts made so far, only ever increases
    attempts: u32,

    /// Last error seen for this device
    pub last_error: Option<String>,

    /// Timestamp of the last status change
    pub last_status_update: DateTime<Utc>,
}

impl Device {
    /// Create a device from inventory fields.
    ///
    /// A version containing `?` means the device did not answer the poll;
    /// it is kept in the list but flagged unavailable and never eligible
    /// for update.
    pub fn new(id: DeviceId, ip: impl Into<String>, version: impl Into<String>) -> Self {
        let firmware_version = version.into();
        let available = !firmware_version.contains('?');
        Self {
            id,
            ip_address: ip.into(),
            firmware_version,
            available,
            needs_update: available,
            watchdog_enabled: false,
            status: "discovered".to_string(),
            attempts: 0,
            last_error: None,
            last_status_update: Utc::now(),
        }
    }

    /// The immutable protocol handle
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Number of update attempts made
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record the start of another update attempt
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.touch();
    }

    /// Update the status text and timestamp
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.touch();
    }

    /// Mark the device failed with a reason
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status = format!("failed: {}", reason);
        self.last_error = Some(reason);
        self.touch();
    }

    /// Mark the device unreachable
    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        self.available = false;
        self.mark_failed(reason);
    }

    /// Mark the device successfully updated
    pub fn mark_updated(&mut self) {
        self.status = "updated".to_string();
        self.needs_update = false;
        self.last_error = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_status_update = Utc::now();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lsr {} ({}): {} - {}",
            self.id, self.ip_address, self.firmware_version, self.status
        )
    }
}
