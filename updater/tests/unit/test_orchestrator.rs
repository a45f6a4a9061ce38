//! Update run tests against a scripted concentrator

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lsrupd::channel::CommandTransport;
use lsrupd::device::DeviceExecutor;
use lsrupd::errors::UpdaterError;
use lsrupd::models::device::DeviceId;
use lsrupd::models::firmware::FirmwareInfo;
use lsrupd::progress::CollectingSink;
use lsrupd::update::fsm::UpdatePhase;
use lsrupd::update::{
    CancelFlag, FirmwareTransfer, OrchestratorOptions, UpdateOrchestrator,
};
use lsrupd::version::DateCodedPolicy;

/// Concentrator stand-in answering from a canned script.
struct MockConcentrator {
    /// Every command sent, in order
    log: Arc<Mutex<Vec<String>>>,
    /// Response to `lsr llv`
    inventory: String,
    /// Response to `bkr`
    job_status: String,
    /// Device ids whose `phy ipaddr` query answers with an error
    dead: HashSet<String>,
    /// Refuse the initial connect
    fail_connect: bool,
}

impl MockConcentrator {
    fn new(inventory: &str) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            inventory: inventory.to_string(),
            job_status: "[1] 0".to_string(),
            dead: HashSet::new(),
            fail_connect: false,
        }
    }

    fn respond(&self, command: &str) -> String {
        if let Some(rest) = command.strip_prefix("exe ") {
            let mut parts = rest.splitn(2, ' ');
            let id = parts.next().unwrap_or("");
            let op = parts.next().unwrap_or("");
            return match op {
                "phy ipaddr" if self.dead.contains(id) => "error: no reply".to_string(),
                "phy ipaddr" => format!("ip 10.0.1.{}", 100 + (id.len() as u8)),
                "wwdg" => "0".to_string(),
                _ => "done".to_string(),
            };
        }
        match command {
            "bkr" => self.job_status.clone(),
            "lsr llv" => self.inventory.clone(),
            _ => "done".to_string(),
        }
    }
}

#[async_trait]
impl CommandTransport for MockConcentrator {
    async fn connect(&mut self) -> Result<(), UpdaterError> {
        if self.fail_connect {
            return Err(UpdaterError::ConnectionError("host unreachable".to_string()));
        }
        Ok(())
    }

    fn disconnect(&mut self) {}

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, UpdaterError> {
        self.log.lock().unwrap().push(command.to_string());
        Ok(Some(self.respond(command)))
    }

    async fn send_command_with_timeout(
        &mut self,
        command: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, UpdaterError> {
        self.send_command(command).await
    }

    async fn send_fire_and_forget(&mut self, command: &str) -> Result<(), UpdaterError> {
        self.log.lock().unwrap().push(command.to_string());
        Ok(())
    }
}

/// Records uploads instead of speaking TFTP.
struct MockTransfer {
    uploads: Arc<Mutex<Vec<(String, String)>>>,
    fail_for_ip: Option<String>,
    /// Cancel the run while the first upload is in flight
    cancel_during_first: Option<CancelFlag>,
}

impl MockTransfer {
    fn new() -> Self {
        Self {
            uploads: Arc::new(Mutex::new(Vec::new())),
            fail_for_ip: None,
            cancel_during_first: None,
        }
    }
}

#[async_trait]
impl FirmwareTransfer for MockTransfer {
    async fn upload(
        &self,
        device_ip: &str,
        _local_path: &Path,
        remote_name: &str,
    ) -> Result<u64, UpdaterError> {
        let count = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((device_ip.to_string(), remote_name.to_string()));
            uploads.len()
        };
        if let (1, Some(cancel)) = (count, &self.cancel_during_first) {
            cancel.cancel();
        }
        if self.fail_for_ip.as_deref() == Some(device_ip) {
            return Err(UpdaterError::TransferError("no ack for block 1".to_string()));
        }
        Ok(512)
    }
}

fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        settle_delay: Duration::ZERO,
        pre_finalize_delay: Duration::ZERO,
        inter_device_delay: Duration::ZERO,
        job_poll_interval: Duration::ZERO,
        job_poll_limit: 5,
        enrich_inventory: false,
    }
}

fn firmware() -> FirmwareInfo {
    FirmwareInfo {
        path: PathBuf::from("/fw/lsr4-20230101.bin"),
        file_name: "lsr4-20230101.bin".to_string(),
        size: 1024,
        version: Some("2023-01-01".to_string()),
        modified: None,
        sha256: None,
    }
}

fn orchestrator(
    transport: MockConcentrator,
    transfer: MockTransfer,
    cancel: CancelFlag,
) -> UpdateOrchestrator<MockConcentrator> {
    let sink = Arc::new(CollectingSink::new());
    let executor = DeviceExecutor::new(transport, sink.clone());
    UpdateOrchestrator::new(
        executor,
        Box::new(transfer),
        Box::new(DateCodedPolicy),
        fast_options(),
        cancel,
        sink,
    )
}

#[tokio::test]
async fn test_run_classifies_and_updates_devices() {
    // 2561 is older than the target, 2562 never answered the poll,
    // 2563 already runs a newer build
    let transport = MockConcentrator::new(
        "2561 10.0.1.101 20221202\n\
         2562 10.0.1.102 ?\n\
         2563 10.0.1.103 v4-20230601",
    );
    let log = transport.log.clone();
    let transfer = MockTransfer::new();
    let uploads = transfer.uploads.clone();

    let mut orchestrator = orchestrator(transport, transfer, CancelFlag::new());
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    let stats = run.statistics;
    assert_eq!(stats.phase, UpdatePhase::Completed);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.unavailable, 1);
    assert_eq!(stats.progress, 100);
    assert!(stats.finished_at.is_some());

    // Only the stale device got an image
    assert_eq!(uploads.lock().unwrap().len(), 1);
    assert_eq!(run.devices[0].status, "updated");
    assert!(!run.devices[1].available);
    assert_eq!(run.devices[2].status, "up to date");

    // Polling was stopped at the start and resumed at the end
    let log = log.lock().unwrap();
    assert_eq!(log.first().map(String::as_str), Some("phy stop"));
    assert_eq!(log.last().map(String::as_str), Some("phy start"));
    assert!(log.iter().any(|c| c == "eth promiscuous 1"));
    assert!(log.iter().any(|c| c == "eth promiscuous 0"));
}

#[tokio::test]
async fn test_unreachable_device_fails_without_stopping_the_run() {
    let mut transport = MockConcentrator::new(
        "2561 10.0.1.101 20221202\n\
         2562 10.0.1.102 20221202\n\
         2563 10.0.1.103 20221202",
    );
    transport.dead.insert("2562".to_string());
    let transfer = MockTransfer::new();
    let uploads = transfer.uploads.clone();

    let mut orchestrator = orchestrator(transport, transfer, CancelFlag::new());
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    assert_eq!(run.statistics.phase, UpdatePhase::Completed);
    assert_eq!(run.statistics.successful, 2);
    assert_eq!(run.statistics.failed, 1);
    assert_eq!(uploads.lock().unwrap().len(), 2);

    // The silent device was flagged, the one after it still got updated
    assert!(!run.devices[1].available);
    assert!(run.devices[1].last_error.is_some());
    assert_eq!(run.devices[2].status, "updated");
}

#[tokio::test]
async fn test_cancel_between_devices_skips_the_rest() {
    let transport = MockConcentrator::new(
        "2561 10.0.1.101 20221202\n\
         2563 10.0.1.103 20221202",
    );
    let log = transport.log.clone();

    let cancel = CancelFlag::new();
    let mut transfer = MockTransfer::new();
    transfer.cancel_during_first = Some(cancel.clone());
    let uploads = transfer.uploads.clone();

    let mut orchestrator = orchestrator(transport, transfer, cancel);
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    assert_eq!(run.statistics.phase, UpdatePhase::Cancelled);
    assert_eq!(run.statistics.successful, 1);
    assert_eq!(uploads.lock().unwrap().len(), 1);

    // The second device was never touched, but the concentrator was restored
    let log = log.lock().unwrap();
    assert!(!log.iter().any(|c| c.starts_with("exe 2563")));
    assert!(log.iter().any(|c| c == "phy start"));
}

#[tokio::test]
async fn test_connect_failure_ends_in_error_phase() {
    let mut transport = MockConcentrator::new("");
    transport.fail_connect = true;

    let mut orchestrator = orchestrator(transport, MockTransfer::new(), CancelFlag::new());
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    assert_eq!(run.statistics.phase, UpdatePhase::Error);
    assert!(!run.statistics.errors.is_empty());
    assert_eq!(run.statistics.total, 0);
    assert!(run.devices.is_empty());
}

#[tokio::test]
async fn test_stuck_inventory_job_ends_in_error_phase() {
    let mut transport = MockConcentrator::new("2561 10.0.1.101 20221202");
    transport.job_status = "[1] 7".to_string();
    let log = transport.log.clone();

    let mut orchestrator = orchestrator(transport, MockTransfer::new(), CancelFlag::new());
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    assert_eq!(run.statistics.phase, UpdatePhase::Error);
    assert!(!run.statistics.errors.is_empty());

    // Polling was still resumed on the way out
    assert!(log.lock().unwrap().iter().any(|c| c == "phy start"));
}

#[tokio::test]
async fn test_transfer_failure_marks_device_failed() {
    let transport = MockConcentrator::new("2561 10.0.1.101 20221202");
    let mut transfer = MockTransfer::new();
    // query_ip rewrites the address before the transfer; id "2561" maps
    // to 10.0.1.104 in the mock
    transfer.fail_for_ip = Some("10.0.1.104".to_string());

    let mut orchestrator = orchestrator(transport, transfer, CancelFlag::new());
    let run = orchestrator.run_update(&firmware()).await.unwrap();

    assert_eq!(run.statistics.phase, UpdatePhase::Completed);
    assert_eq!(run.statistics.successful, 0);
    assert_eq!(run.statistics.failed, 1);
    assert!(run.devices[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("transfer failed"));
}

#[tokio::test]
async fn test_rollback_erases_and_restores() {
    let transport = MockConcentrator::new("");
    let log = transport.log.clone();

    let mut orchestrator = orchestrator(transport, MockTransfer::new(), CancelFlag::new());
    let id = DeviceId::parse("2561").unwrap();
    orchestrator.rollback_device(id).await.unwrap();

    let log = log.lock().unwrap();
    assert!(log.iter().any(|c| c == "exe 2561 flash erase1"));
    assert!(log.iter().any(|c| c == "exe 2561 eeprom iwdg rst 3600"));
    assert!(log.iter().any(|c| c == "exe 2561 eeprom iwdg rst 0"));
    assert_eq!(log.last().map(String::as_str), Some("phy start"));
}
