//! Drives a full firmware update run against the concentrator

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::channel::CommandTransport;
use crate::device::executor::TRANSFER_GUARD_SECS;
use crate::device::DeviceExecutor;
use crate::errors::UpdaterError;
use crate::models::device::{Device, DeviceId};
use crate::models::firmware::FirmwareInfo;
use crate::models::stats::UpdateStatistics;
use crate::progress::ProgressSink;
use crate::update::fsm::{UpdateFsm, UpdatePhase};
use crate::update::transfer::FirmwareTransfer;
use crate::update::CancelFlag;
use crate::version::VersionPolicy;

/// Timing knobs for an update run.
///
/// The defaults match the concentrator's observed settle behaviour; tests
/// zero them out.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Pause after commands that restart a device or change polling state
    pub settle_delay: Duration,

    /// Pause between the last data block and the finalize commands, so the
    /// reader can commit the image
    pub pre_finalize_delay: Duration,

    /// Pause between consecutive device updates
    pub inter_device_delay: Duration,

    /// Interval between inventory job status polls
    pub job_poll_interval: Duration,

    /// Give up waiting for the inventory job after this many polls
    pub job_poll_limit: u32,

    /// Query each available device for its live IP and system info after
    /// the inventory listing
    pub enrich_inventory: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            pre_finalize_delay: Duration::from_secs(3),
            inter_device_delay: Duration::from_secs(5),
            job_poll_interval: Duration::from_secs(1),
            job_poll_limit: 60,
            enrich_inventory: false,
        }
    }
}

/// Everything a finished run produced: the statistics and the final device
/// list with per-device status and error text.
#[derive(Debug)]
pub struct UpdateRun {
    pub statistics: UpdateStatistics,
    pub devices: Vec<Device>,
}

/// Runs the update workflow: initialize, gather, analyze, update each
/// device, restore.
///
/// `run_update` returns `Err` only for internal bugs (invalid phase
/// transitions). Operational failures end the run in the `Error` phase with
/// the cause recorded in the statistics.
pub struct UpdateOrchestrator<T: CommandTransport> {
    executor: DeviceExecutor<T>,
    transfer: Box<dyn FirmwareTransfer>,
    policy: Box<dyn VersionPolicy>,
    options: OrchestratorOptions,
    cancel: CancelFlag,
    sink: Arc<dyn ProgressSink>,
}

impl<T: CommandTransport> UpdateOrchestrator<T> {
    pub fn new(
        executor: DeviceExecutor<T>,
        transfer: Box<dyn FirmwareTransfer>,
        policy: Box<dyn VersionPolicy>,
        options: OrchestratorOptions,
        cancel: CancelFlag,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            executor,
            transfer,
            policy,
            options,
            cancel,
            sink,
        }
    }

    /// Handle used to request cancellation from another task
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run a full update of every reader that needs `firmware`.
    pub async fn run_update(&mut self, firmware: &FirmwareInfo) -> Result<UpdateRun, UpdaterError> {
        let mut fsm = UpdateFsm::new();
        let mut stats = UpdateStatistics::new();
        let mut devices: Vec<Device> = Vec::new();

        self.sink.info(&format!(
            "Starting update run {} with {} ({:.1} MB)",
            stats.run_id,
            firmware.file_name,
            firmware.size_mb()
        ));

        // --- Initializing ---
        self.enter(&mut fsm, &mut stats, UpdatePhase::Initializing, 5, "initializing concentrator")?;
        if let Err(e) = self.initialize().await {
            self.sink.error(&format!("Initialization failed: {}", e));
            stats.add_error(format!("initialization failed: {}", e));
            self.finish(&mut fsm, &mut stats, UpdatePhase::Error)?;
            self.executor.disconnect();
            return Ok(UpdateRun { statistics: stats, devices });
        }

        // --- GatheringInfo ---
        self.enter(&mut fsm, &mut stats, UpdatePhase::GatheringInfo, 15, "collecting device inventory")?;
        if self.cancel.is_cancelled() {
            return self.cancel_run(fsm, stats, devices).await;
        }
        match self.gather().await {
            Ok(found) => devices = found,
            Err(e) => {
                self.sink.error(&format!("Inventory collection failed: {}", e));
                stats.add_error(format!("inventory collection failed: {}", e));
                // Best-effort restore so the concentrator is not left with
                // polling stopped.
                for warning in self.restore().await {
                    stats.add_warning(warning);
                }
                self.finish(&mut fsm, &mut stats, UpdatePhase::Error)?;
                self.executor.disconnect();
                return Ok(UpdateRun { statistics: stats, devices });
            }
        }

        // --- Analyzing ---
        self.enter(&mut fsm, &mut stats, UpdatePhase::Analyzing, 25, "classifying devices")?;
        if self.cancel.is_cancelled() {
            return self.cancel_run(fsm, stats, devices).await;
        }
        let pending = self.analyze(&mut devices, firmware, &mut stats);
        self.sink.info(&format!(
            "{} of {} devices need {}",
            pending.len(),
            devices.len(),
            firmware.file_name
        ));

        // --- Updating ---
        let mut cancelled = false;
        if pending.is_empty() {
            self.sink.info("Nothing to update");
        } else {
            self.enter(&mut fsm, &mut stats, UpdatePhase::Updating, 30, "updating devices")?;
            cancelled = self
                .update_devices(&mut devices, &pending, firmware, &mut stats)
                .await;
        }

        // --- Restoring ---
        self.enter(&mut fsm, &mut stats, UpdatePhase::Restoring, 95, "restoring concentrator state")?;
        for warning in self.restore().await {
            stats.add_warning(warning);
        }
        self.executor.disconnect();

        let terminal = if cancelled || self.cancel.is_cancelled() {
            UpdatePhase::Cancelled
        } else {
            UpdatePhase::Completed
        };
        if terminal == UpdatePhase::Completed {
            stats.set_progress(100);
        }
        self.finish(&mut fsm, &mut stats, terminal)?;
        Ok(UpdateRun { statistics: stats, devices })
    }

    /// Erase the staged firmware on a single reader so it boots back into
    /// its factory image. Wrapped in the same stop/restore bracket as an
    /// update run.
    pub async fn rollback_device(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        self.sink.info(&format!("Starting rollback of lsr {}", id));

        self.initialize().await?;
        if self.cancel.is_cancelled() {
            self.teardown().await;
            return Err(UpdaterError::Cancelled);
        }
        if let Err(e) = self.executor.set_promiscuous(true).await {
            self.teardown().await;
            return Err(e);
        }

        let result = self.rollback_inner(id).await;

        self.teardown().await;
        result
    }

    async fn rollback_inner(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        if let Err(e) = self
            .executor
            .set_watchdog_reset(id, TRANSFER_GUARD_SECS)
            .await
        {
            warn!("Could not arm watchdog guard for lsr {}: {}", id, e);
        }
        if let Err(e) = self.executor.reset_device(id).await {
            warn!("Reset of lsr {} reported an error: {}", id, e);
        }
        sleep(self.options.settle_delay).await;

        // The device must prove it is reachable before we touch its flash.
        let ip = self.executor.query_ip(id).await.map_err(|e| {
            UpdaterError::DeviceUnavailable(format!("lsr {} did not answer after reset: {}", id, e))
        })?;
        self.sink.info(&format!("lsr {} answered at {}", id, ip));

        match self.executor.query_watchdog(id).await {
            Ok(true) => {
                self.sink.info(&format!("lsr {}: disabling window watchdog", id));
                if let Err(e) = self.executor.disable_watchdog(id).await {
                    warn!("Could not disable watchdog on lsr {}: {}", id, e);
                }
                if let Err(e) = self.executor.reset_device(id).await {
                    warn!("Reset of lsr {} reported an error: {}", id, e);
                }
                sleep(self.options.settle_delay).await;
            }
            Ok(false) => {}
            Err(e) => warn!("Watchdog query on lsr {} failed: {}", id, e),
        }

        self.sink.info(&format!("lsr {}: erasing staged firmware bank", id));
        let erase = self.executor.erase_flash(id).await;

        if let Err(e) = self.executor.clear_watchdog_reset(id).await {
            warn!("Could not clear watchdog guard for lsr {}: {}", id, e);
        }
        if let Err(e) = self.executor.reset_device(id).await {
            warn!("Final reset of lsr {} reported an error: {}", id, e);
        }

        erase?;
        self.sink.info(&format!("Rollback of lsr {} complete", id));
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), UpdaterError> {
        self.executor.connect().await?;
        self.executor.stop_polling().await?;
        sleep(self.options.settle_delay).await;
        self.executor.clear_poll_queue().await?;
        Ok(())
    }

    async fn gather(&mut self) -> Result<Vec<Device>, UpdaterError> {
        self.executor.trigger_poll().await?;
        self.wait_for_inventory_job().await?;
        self.executor.set_promiscuous(true).await?;

        let mut devices = self.executor.list_versions().await?;
        self.sink
            .info(&format!("Inventory returned {} devices", devices.len()));

        if self.options.enrich_inventory {
            for device in devices.iter_mut().filter(|d| d.available) {
                let id = device.id();
                match self.executor.query_ip(id).await {
                    Ok(ip) => device.ip_address = ip,
                    Err(e) => debug!("IP query for lsr {} failed: {}", id, e),
                }
                match self.executor.system_info(id).await {
                    Ok(info) => debug!("lsr {} reported {} system info fields", id, info.len()),
                    Err(e) => debug!("System info query for lsr {} failed: {}", id, e),
                }
            }
        }

        Ok(devices)
    }

    /// Poll the concentrator until the inventory job reports idle (0).
    ///
    /// Error replies and per-command timeouts are tolerated while the job
    /// runs; only transport failures and poll exhaustion end the wait.
    async fn wait_for_inventory_job(&mut self) -> Result<(), UpdaterError> {
        for poll in 0..self.options.job_poll_limit {
            match self.executor.job_status().await {
                Ok(0) => return Ok(()),
                Ok(code) => {
                    if poll % 5 == 0 {
                        self.sink
                            .info(&format!("Inventory job still running (status {})", code));
                    }
                }
                Err(UpdaterError::TransportError(e)) => {
                    return Err(UpdaterError::TransportError(e))
                }
                Err(e) => debug!("Job status poll failed: {}", e),
            }
            sleep(self.options.job_poll_interval).await;
        }
        Err(UpdaterError::TimeoutError {
            command: "bkr".to_string(),
            timeout_ms: self.options.job_poll_limit as u64
                * self.options.job_poll_interval.as_millis() as u64,
        })
    }

    /// Classify every inventoried device; returns the indices scheduled for
    /// update.
    fn analyze(
        &self,
        devices: &mut [Device],
        firmware: &FirmwareInfo,
        stats: &mut UpdateStatistics,
    ) -> Vec<usize> {
        stats.total = devices.len();
        let mut pending = Vec::new();

        for (idx, device) in devices.iter_mut().enumerate() {
            if !device.available {
                device.set_status("unavailable");
                stats.record_unavailable(format!(
                    "lsr {} did not answer the inventory poll",
                    device.id()
                ));
                continue;
            }
            if !self
                .policy
                .needs_update(&device.firmware_version, firmware)
            {
                device.needs_update = false;
                device.set_status("up to date");
                stats.record_skip();
                debug!(
                    "lsr {} already at {}, skipping",
                    device.id(),
                    device.firmware_version
                );
                continue;
            }
            device.needs_update = true;
            device.set_status("scheduled");
            pending.push(idx);
        }

        pending
    }

    /// Update each pending device in turn. Returns true if the run was
    /// cancelled between devices.
    async fn update_devices(
        &mut self,
        devices: &mut [Device],
        pending: &[usize],
        firmware: &FirmwareInfo,
        stats: &mut UpdateStatistics,
    ) -> bool {
        let total = pending.len();

        for (i, &idx) in pending.iter().enumerate() {
            if i > 0 {
                if self.cancel.is_cancelled() {
                    self.sink
                        .info("Cancellation requested, stopping before next device");
                    return true;
                }
                sleep(self.options.inter_device_delay).await;
            }

            let device = &mut devices[idx];
            let id = device.id();
            device.record_attempt();
            stats.set_operation(format!("updating lsr {}", id));
            self.sink.info(&format!(
                "[{}/{}] updating lsr {} ({}) from {}",
                i + 1,
                total,
                id,
                device.ip_address,
                device.firmware_version
            ));

            match self.update_one(device, firmware).await {
                Ok(()) => {
                    device.mark_updated();
                    stats.record_success();
                    self.sink.info(&format!("lsr {} updated", id));
                }
                Err(reason) => {
                    stats.record_failure(format!("lsr {}: {}", id, reason));
                    self.sink.error(&format!("lsr {} failed: {}", id, reason));
                }
            }

            stats.set_progress((30 + 65 * (i + 1) / total) as u8);
        }

        false
    }

    /// Prepare, transfer, finalize for a single device. The device is
    /// marked failed or unavailable before the error reason is returned.
    async fn update_one(
        &mut self,
        device: &mut Device,
        firmware: &FirmwareInfo,
    ) -> Result<(), String> {
        let id = device.id();

        // Prepare: arm the guard, reset into the bootloader, confirm the
        // device comes back, make sure no watchdog interrupts the transfer.
        device.set_status("preparing");
        if let Err(e) = self
            .executor
            .set_watchdog_reset(id, TRANSFER_GUARD_SECS)
            .await
        {
            let reason = format!("could not arm watchdog guard: {}", e);
            device.mark_failed(&reason);
            return Err(reason);
        }
        if let Err(e) = self.executor.reset_device(id).await {
            let reason = format!("reset failed: {}", e);
            device.mark_failed(&reason);
            return Err(reason);
        }
        sleep(self.options.settle_delay).await;

        match self.executor.query_ip(id).await {
            Ok(ip) => device.ip_address = ip,
            Err(e) => {
                let reason = format!("did not answer after reset: {}", e);
                device.mark_unavailable(&reason);
                return Err(reason);
            }
        }

        match self.executor.query_watchdog(id).await {
            Ok(true) => {
                device.watchdog_enabled = true;
                self.sink
                    .info(&format!("lsr {}: disabling window watchdog", id));
                if let Err(e) = self.executor.disable_watchdog(id).await {
                    let reason = format!("could not disable watchdog: {}", e);
                    device.mark_failed(&reason);
                    return Err(reason);
                }
                if let Err(e) = self.executor.reset_device(id).await {
                    let reason = format!("reset after watchdog disable failed: {}", e);
                    device.mark_failed(&reason);
                    return Err(reason);
                }
                sleep(self.options.settle_delay).await;
            }
            Ok(false) => device.watchdog_enabled = false,
            Err(e) => {
                let reason = format!("watchdog query failed: {}", e);
                device.mark_failed(&reason);
                return Err(reason);
            }
        }

        // Transfer
        device.set_status("transferring");
        if let Err(e) = self
            .transfer
            .upload(&device.ip_address, &firmware.path, &firmware.file_name)
            .await
        {
            let reason = format!("transfer failed: {}", e);
            device.mark_failed(&reason);
            return Err(reason);
        }

        // Finalize: give the reader time to commit the image, drop the
        // guard, reboot into the new firmware.
        device.set_status("finalizing");
        sleep(self.options.pre_finalize_delay).await;
        if let Err(e) = self.executor.clear_watchdog_reset(id).await {
            let reason = format!("could not clear watchdog guard: {}", e);
            device.mark_failed(&reason);
            return Err(reason);
        }
        if let Err(e) = self.executor.reset_device(id).await {
            let reason = format!("final reset failed: {}", e);
            device.mark_failed(&reason);
            return Err(reason);
        }
        sleep(self.options.settle_delay).await;

        Ok(())
    }

    /// Best-effort restore of concentrator state; returns warnings for
    /// anything that failed.
    async fn restore(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.executor.set_promiscuous(false).await {
            let msg = format!("could not disable promiscuous mode: {}", e);
            self.sink.error(&msg);
            warnings.push(msg);
        }
        if let Err(e) = self.executor.start_polling().await {
            let msg = format!("could not resume polling: {}", e);
            self.sink.error(&msg);
            warnings.push(msg);
        }

        warnings
    }

    /// Restore and disconnect without touching run state; used by rollback.
    async fn teardown(&mut self) {
        for warning in self.restore().await {
            warn!("{}", warning);
        }
        self.executor.disconnect();
    }

    /// End the run in the Cancelled phase, restoring concentrator state
    /// first.
    async fn cancel_run(
        &mut self,
        mut fsm: UpdateFsm,
        mut stats: UpdateStatistics,
        devices: Vec<Device>,
    ) -> Result<UpdateRun, UpdaterError> {
        self.sink.info("Cancellation requested");
        fsm.transition(UpdatePhase::Restoring)
            .map_err(UpdaterError::Internal)?;
        stats.phase = UpdatePhase::Restoring;
        for warning in self.restore().await {
            stats.add_warning(warning);
        }
        self.executor.disconnect();
        self.finish(&mut fsm, &mut stats, UpdatePhase::Cancelled)?;
        Ok(UpdateRun { statistics: stats, devices })
    }

    fn enter(
        &self,
        fsm: &mut UpdateFsm,
        stats: &mut UpdateStatistics,
        phase: UpdatePhase,
        progress: u8,
        operation: &str,
    ) -> Result<(), UpdaterError> {
        fsm.transition(phase).map_err(UpdaterError::Internal)?;
        stats.phase = phase;
        stats.set_progress(progress);
        stats.set_operation(operation);
        debug!("Entering phase {:?}: {}", phase, operation);
        Ok(())
    }

    fn finish(
        &self,
        fsm: &mut UpdateFsm,
        stats: &mut UpdateStatistics,
        phase: UpdatePhase,
    ) -> Result<(), UpdaterError> {
        fsm.transition(phase).map_err(UpdaterError::Internal)?;
        stats.finish(phase);
        self.sink.info(&format!(
            "Run {} finished in phase {:?} after {}s: {}",
            stats.run_id,
            phase,
            stats.duration().num_seconds(),
            stats.summary()
        ));
        Ok(())
    }
}
