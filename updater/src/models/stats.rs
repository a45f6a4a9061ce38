//! Update run statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::update::fsm::UpdatePhase;

/// Statistics for one update run.
///
/// A fresh instance is created per run; nothing carries over. Counters only
/// grow and `successful + failed + skipped + unavailable` never exceeds
/// `total`. Progress is monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatistics {
    /// Run identifier
    pub run_id: String,

    /// Run start time
    pub started_at: DateTime<Utc>,

    /// Run end time, set when a terminal phase is reached
    pub finished_at: Option<DateTime<Utc>>,

    /// Total devices discovered
    pub total: usize,

    /// Devices updated successfully
    pub successful: usize,

    /// Devices that failed during update
    pub failed: usize,

    /// Devices skipped (already on the target version)
    pub skipped: usize,

    /// Devices that never answered
    pub unavailable: usize,

    /// Every error message collected, in order
    pub errors: Vec<String>,

    /// Every warning collected, in order
    pub warnings: Vec<String>,

    /// Current phase
    pub phase: UpdatePhase,

    /// Progress percentage (0-100), never decreases
    pub progress: u8,

    /// Description of the operation in flight
    pub current_operation: String,
}

impl UpdateStatistics {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            unavailable: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            phase: UpdatePhase::Idle,
            progress: 0,
            current_operation: String::new(),
        }
    }

    /// Record a successful device update
    pub fn record_success(&mut self) {
        debug_assert!(self.accounted() < self.total);
        self.successful += 1;
    }

    /// Record a failed device update with its reason
    pub fn record_failure(&mut self, error: impl Into<String>) {
        debug_assert!(self.accounted() < self.total);
        self.failed += 1;
        self.errors.push(error.into());
    }

    /// Record a device skipped as already current
    pub fn record_skip(&mut self) {
        debug_assert!(self.accounted() < self.total);
        self.skipped += 1;
    }

    /// Record a device that never answered
    pub fn record_unavailable(&mut self, warning: impl Into<String>) {
        debug_assert!(self.accounted() < self.total);
        self.unavailable += 1;
        self.warnings.push(warning.into());
    }

    /// Append an error not tied to a single device
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Append a warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Advance the progress percentage; regressions are ignored
    pub fn set_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
        }
    }

    /// Set the in-flight operation description
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.current_operation = operation.into();
    }

    /// Mark the run finished in `phase`
    pub fn finish(&mut self, phase: UpdatePhase) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
    }

    /// Run duration so far (or final duration once finished)
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "total {} | updated {} | failed {} | skipped {} | unavailable {}",
            self.total, self.successful, self.failed, self.skipped, self.unavailable
        )
    }

    fn accounted(&self) -> usize {
        self.successful + self.failed + self.skipped + self.unavailable
    }
}

impl Default for UpdateStatistics {
    fn default() -> Self {
        Self::new()
    }
}
