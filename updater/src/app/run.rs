//! Top-level update and rollback entry points

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::channel::CommandChannel;
use crate::device::DeviceExecutor;
use crate::errors::UpdaterError;
use crate::firmware::FirmwareRepository;
use crate::models::device::DeviceId;
use crate::models::stats::UpdateStatistics;
use crate::progress::{ProgressSink, TracingSink};
use crate::update::{CancelFlag, TftpTransfer, UpdateOrchestrator};
use crate::version::{DateCodedPolicy, PrefixPolicy, VersionPolicy};

/// Update every reader that needs the named firmware image.
///
/// Returns the run statistics; the process exit code is derived from them
/// by the caller.
pub async fn run_update(
    options: AppOptions,
    firmware_name: &str,
) -> Result<UpdateStatistics, UpdaterError> {
    let sink: Arc<dyn ProgressSink> = Arc::new(TracingSink);

    let repository = FirmwareRepository::new(&options.firmware_dir, sink.clone());
    let firmware = repository.resolve(firmware_name).await?;

    let mut orchestrator = build_orchestrator(&options, sink);
    spawn_cancel_on_ctrl_c(orchestrator.cancel_flag());

    let run = orchestrator.run_update(&firmware).await?;

    for device in &run.devices {
        info!("{}", device);
    }
    if run.statistics.failed > 0 || !run.statistics.errors.is_empty() {
        error!("Run finished with errors: {}", run.statistics.summary());
    } else {
        info!("Run finished: {}", run.statistics.summary());
    }

    Ok(run.statistics)
}

/// Erase the staged firmware on one reader so it boots its factory image.
pub async fn run_rollback(options: AppOptions, device_token: &str) -> Result<(), UpdaterError> {
    let id = DeviceId::parse(device_token).ok_or_else(|| {
        UpdaterError::ConfigError(format!("'{}' is not a valid device id", device_token))
    })?;

    let sink: Arc<dyn ProgressSink> = Arc::new(TracingSink);
    let mut orchestrator = build_orchestrator(&options, sink);
    spawn_cancel_on_ctrl_c(orchestrator.cancel_flag());

    orchestrator.rollback_device(id).await
}

fn build_orchestrator(
    options: &AppOptions,
    sink: Arc<dyn ProgressSink>,
) -> UpdateOrchestrator<CommandChannel> {
    let channel = CommandChannel::new(
        options.concentrator.host.clone(),
        options.concentrator.port,
        options.concentrator.command_timeout,
        sink.clone(),
    );
    let executor = DeviceExecutor::new(channel, sink.clone());

    let transfer = TftpTransfer::new(sink.clone())
        .with_timing(options.transfer.ack_timeout, options.transfer.max_attempts);

    let policy: Box<dyn VersionPolicy> = match &options.skip_version_prefix {
        Some(prefix) => Box::new(PrefixPolicy::new(prefix.clone())),
        None => Box::new(DateCodedPolicy),
    };

    UpdateOrchestrator::new(
        executor,
        Box::new(transfer),
        policy,
        options.orchestrator.clone(),
        CancelFlag::new(),
        sink,
    )
}

/// Cancel the run on the first Ctrl-C; a second Ctrl-C kills the process
/// through the default handler once this task has exited.
fn spawn_cancel_on_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling after the current device...");
            cancel.cancel();
        }
    });
}
