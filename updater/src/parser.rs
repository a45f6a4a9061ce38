//! Concentrator response parsing
//!
//! The BKR speaks a free-form text protocol; these functions extract
//! structured facts from it. All of them are pure and never fail on
//! malformed input - lines that do not parse are skipped.

use std::collections::HashMap;

use tracing::debug;

use crate::models::device::{Device, DeviceId};

/// Keywords that mark a response as a failure, matched case-insensitively.
///
/// The device firmware is not consistent about its error wording, so this is
/// the union of everything observed in the field.
const ERROR_KEYWORDS: &[&str] = &["error", "err", "fail", "unknown", "invalid"];

/// Whether a response indicates failure.
///
/// An empty response counts as an error: every protocol command is expected
/// to produce at least an echo.
pub fn is_error_response(response: &str) -> bool {
    if response.trim().is_empty() {
        return true;
    }
    let lowered = response.to_lowercase();
    ERROR_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Extract a human-readable error message from a response.
///
/// Prefers the remainder of a line after an `error:`/`err:`/`fail:` marker,
/// falls back to the first non-empty line, then to a fixed placeholder.
pub fn extract_error_message(response: &str) -> String {
    for line in response.lines() {
        // ASCII lowercasing keeps byte offsets valid for slicing `line`;
        // the markers themselves are plain ASCII
        let lowered = line.to_ascii_lowercase();
        for marker in ["error:", "err:", "fail:"] {
            if let Some(pos) = lowered.find(marker) {
                return line[pos + marker.len()..].trim().to_string();
            }
        }
    }

    response
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("<empty response>")
        .to_string()
}

/// Parse the status code of the asynchronous collection job.
///
/// Scans for the first `[<index>] <number>` pattern and returns the number;
/// 0 means the job finished, anything else means still running. Returns -1
/// when no pattern is present.
pub fn parse_status_code(response: &str) -> i32 {
    let mut search_from = 0;
    while let Some(open_rel) = response[search_from..].find('[') {
        let open = search_from + open_rel;
        let Some(close_rel) = response[open + 1..].find(']') else {
            return -1;
        };
        let close = open + 1 + close_rel;
        search_from = close + 1;

        let index = &response[open + 1..close];
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let rest = &response[close + 1..];
        let trimmed = rest.trim_start();
        if trimmed.len() == rest.len() {
            // Pattern requires whitespace between "]" and the number
            continue;
        }
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return code;
        }
    }
    -1
}

/// Parse a device inventory response (`lsr llv`).
///
/// Each non-blank line with at least three whitespace-separated tokens yields
/// a device as `(id, ip, version)`. A version containing `?` produces a
/// device flagged unavailable rather than being dropped, so the run
/// statistics can account for it.
pub fn parse_device_inventory(response: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in response.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            if !line.trim().is_empty() {
                debug!("Skipping malformed inventory line: {:?}", line);
            }
            continue;
        }

        let Some(id) = DeviceId::parse(tokens[0]) else {
            debug!("Skipping inventory line with bad id: {:?}", line);
            continue;
        };

        devices.push(Device::new(id, tokens[1], tokens[2]));
    }

    devices
}

/// First IPv4-shaped token in a response (`d{1,3}.d{1,3}.d{1,3}.d{1,3}`)
pub fn parse_ip_address(response: &str) -> Option<String> {
    for token in response.split_whitespace() {
        let candidate = token.trim_matches(|c: char| !c.is_ascii_digit());
        if looks_like_ipv4(candidate) {
            return Some(candidate.to_string());
        }
    }
    None
}

fn looks_like_ipv4(token: &str) -> bool {
    let octets: Vec<&str> = token.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| (1..=3).contains(&o.len()) && o.chars().all(|c| c.is_ascii_digit()))
}

/// Whether a watchdog query response reports the watchdog enabled.
///
/// The `wwdg` command answers with a bare flag; a `1` anywhere in the
/// trimmed response means enabled, everything else means disabled.
pub fn parse_watchdog_enabled(response: &str) -> bool {
    response.trim().contains('1')
}

/// Parse `key: value` / `key = value` lines (`sys info`) into a map.
///
/// Later duplicate keys overwrite earlier ones; line order is otherwise not
/// significant.
pub fn parse_key_value_info(response: &str) -> HashMap<String, String> {
    let mut info = HashMap::new();

    for line in response.lines() {
        let Some(sep) = line.find([':', '=']) else {
            continue;
        };
        let key = line[..sep].trim();
        let value = line[sep + 1..].trim();
        if !key.is_empty() {
            info.insert(key.to_string(), value.to_string());
        }
    }

    info
}
