//! Version comparison policies
//!
//! The fleet has carried two different rules for "does this device need the
//! new firmware": comparing date-coded identifiers, and a plain version
//! prefix check. Both exist here behind one trait; the orchestrator takes
//! whichever the caller configures.

use crate::models::firmware::FirmwareInfo;

/// Decides whether a device's reported version needs the target firmware
pub trait VersionPolicy: Send + Sync {
    fn needs_update(&self, device_version: &str, target: &FirmwareInfo) -> bool;
}

/// Default policy: compare date-coded identifiers.
///
/// The target's date comes from its file name (`lsr4-20221202.bin`); the
/// device's from any 8-digit run in its version string. A device whose
/// version carries no date code is assumed stale and updated.
#[derive(Debug, Default)]
pub struct DateCodedPolicy;

impl VersionPolicy for DateCodedPolicy {
    fn needs_update(&self, device_version: &str, target: &FirmwareInfo) -> bool {
        let Some(target_date) = target.version.as_deref() else {
            // Target file carries no date code; nothing to compare against,
            // update everything that answered
            return true;
        };
        match date_code_from_version(device_version) {
            // ISO dates compare correctly as strings
            Some(device_date) => device_date.as_str() < target_date,
            None => true,
        }
    }
}

/// Alternate policy: a device is current when its version starts with a
/// fixed prefix.
#[derive(Debug)]
pub struct PrefixPolicy {
    prefix: String,
}

impl PrefixPolicy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl VersionPolicy for PrefixPolicy {
    fn needs_update(&self, device_version: &str, _target: &FirmwareInfo) -> bool {
        !device_version.starts_with(&self.prefix)
    }
}

/// Find an 8-digit date run in a version string and format it `YYYY-MM-DD`
fn date_code_from_version(version: &str) -> Option<String> {
    let bytes = version.as_bytes();
    let mut run_start = None;
    let mut run_len = 0;

    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if run_len == 0 {
                run_start = Some(i);
            }
            run_len += 1;
            if run_len == 8 {
                let start = run_start?;
                // A longer digit run is not a date code
                if bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    continue;
                }
                let digits = &version[start..start + 8];
                return Some(format!(
                    "{}-{}-{}",
                    &digits[0..4],
                    &digits[4..6],
                    &digits[6..8]
                ));
            }
        } else {
            run_len = 0;
            run_start = None;
        }
    }

    // Already-formatted dates count too. Version strings come off the wire
    // and may hold multibyte characters, so only slice at char boundaries.
    for (window_start, _) in version.char_indices() {
        let Some(window) = version.get(window_start..window_start + 10) else {
            continue;
        };
        if is_iso_date(window) {
            return Some(window.to_string());
        }
    }

    None
}

fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    s.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && s.char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() })
}
