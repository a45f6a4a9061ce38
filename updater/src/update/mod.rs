//! Update run orchestration

pub mod fsm;
pub mod orchestrator;
pub mod transfer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use orchestrator::{OrchestratorOptions, UpdateOrchestrator, UpdateRun};
pub use transfer::{FirmwareTransfer, TftpTransfer};

/// Cooperative cancellation flag.
///
/// Observed at phase boundaries and between per-device iterations, never
/// mid-command: a request may let one in-flight command or transfer complete
/// before taking effect.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
