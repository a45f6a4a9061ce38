//! Progress and error reporting
//!
//! Every component that talks to the network reports human-readable progress
//! through a [`ProgressSink`] passed in at construction. There are no global
//! subscribers; callers that want ordering guarantees can install a
//! collecting sink and inspect it afterwards.

use std::sync::Mutex;

use tracing::{error, info};

/// Sink for human-readable progress and error messages
pub trait ProgressSink: Send + Sync {
    /// Report a progress message
    fn info(&self, message: &str);

    /// Report an error message
    fn error(&self, message: &str);
}

/// Default sink writing through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}

/// Sink collecting messages in memory, used by tests and the summary view
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<(bool, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in arrival order, errors flagged
    pub fn entries(&self) -> Vec<(bool, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// Only the error messages, in arrival order
    pub fn errors(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(is_error, _)| *is_error)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl ProgressSink for CollectingSink {
    fn info(&self, message: &str) {
        self.entries.lock().unwrap().push((false, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.entries.lock().unwrap().push((true, message.to_string()));
    }
}
