//! Firmware delivery seam between the orchestrator and the wire protocol

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::UpdaterError;
use crate::progress::ProgressSink;
use crate::tftp::TftpClient;

/// Delivers a firmware image to a single reader.
///
/// The orchestrator only cares that the image arrives, not how. The
/// production implementation is [`TftpTransfer`].
#[async_trait]
pub trait FirmwareTransfer: Send + Sync {
    /// Upload `local_path` to the device at `device_ip`, stored under
    /// `remote_name`. Returns the number of bytes delivered.
    async fn upload(
        &self,
        device_ip: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<u64, UpdaterError>;
}

/// TFTP-backed transfer: each upload opens a fresh write session against
/// the device's TFTP server.
pub struct TftpTransfer {
    ack_timeout: Duration,
    max_attempts: u32,
    sink: Arc<dyn ProgressSink>,
}

impl TftpTransfer {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            ack_timeout: Duration::from_millis(5000),
            max_attempts: 3,
            sink,
        }
    }

    pub fn with_timing(mut self, ack_timeout: Duration, max_attempts: u32) -> Self {
        self.ack_timeout = ack_timeout;
        self.max_attempts = max_attempts;
        self
    }
}

#[async_trait]
impl FirmwareTransfer for TftpTransfer {
    async fn upload(
        &self,
        device_ip: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<u64, UpdaterError> {
        let client = TftpClient::new(device_ip, self.sink.clone())
            .with_timing(self.ack_timeout, self.max_attempts);
        client.send_file(local_path, remote_name).await
    }
}
