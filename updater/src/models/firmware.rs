//! Firmware file model

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A firmware image on local disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Absolute path to the image
    pub path: PathBuf,

    /// File name (e.g. `lsr4-20221202.bin`)
    pub file_name: String,

    /// Size in bytes
    pub size: u64,

    /// Date-coded version extracted from the file name, if present
    pub version: Option<String>,

    /// Last modification time
    pub modified: Option<DateTime<Utc>>,

    /// SHA-256 digest of the file contents, hex-encoded
    pub sha256: Option<String>,
}

impl FirmwareInfo {
    /// Size in megabytes
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// Extract the date-coded version from a firmware file name.
///
/// `lsr4-20221202.bin` yields `2022-12-02`. Returns `None` when the name
/// does not carry an 8-digit date after the first dash.
pub fn date_code_from_name(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".bin").unwrap_or(file_name);
    let (_, tail) = stem.split_once('-')?;
    let digits: String = tail.chars().take(8).collect();
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}-{}-{}", &digits[0..4], &digits[4..6], &digits[6..8]))
}
