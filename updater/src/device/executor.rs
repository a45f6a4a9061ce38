//! Device command executor
//!
//! Thin adapter mapping high-level device operations onto command-channel
//! calls plus response parsing. Each operation sends exactly one command and
//! never retries - retry policy belongs to the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::CommandTransport;
use crate::errors::UpdaterError;
use crate::models::device::{Device, DeviceId};
use crate::parser;
use crate::progress::ProgressSink;

/// Watchdog-reset timeout set while a firmware transfer is in flight
pub const TRANSFER_GUARD_SECS: u32 = 3600;

/// Flash erase is slow; give it a longer reply window
const ERASE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Executor for concentrator and per-device commands
pub struct DeviceExecutor<T: CommandTransport> {
    transport: T,
    sink: Arc<dyn ProgressSink>,
}

impl<T: CommandTransport> DeviceExecutor<T> {
    pub fn new(transport: T, sink: Arc<dyn ProgressSink>) -> Self {
        Self { transport, sink }
    }

    /// Establish the command channel
    pub async fn connect(&mut self) -> Result<(), UpdaterError> {
        self.transport.connect().await
    }

    /// Release the command channel
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Stop the concentrator polling loop (`phy stop`)
    pub async fn stop_polling(&mut self) -> Result<(), UpdaterError> {
        self.run("phy stop".to_string(), None).await.map(|_| ())
    }

    /// Resume the concentrator polling loop (`phy start`)
    pub async fn start_polling(&mut self) -> Result<(), UpdaterError> {
        self.run("phy start".to_string(), None).await.map(|_| ())
    }

    /// Clear the pending poll queue (`lsr poll clear`)
    pub async fn clear_poll_queue(&mut self) -> Result<(), UpdaterError> {
        self.run("lsr poll clear".to_string(), None).await.map(|_| ())
    }

    /// Start an inventory collection job (`lsr poll`)
    pub async fn trigger_poll(&mut self) -> Result<(), UpdaterError> {
        self.run("lsr poll".to_string(), None).await.map(|_| ())
    }

    /// Status of the collection job (`bkr`); 0 means finished
    pub async fn job_status(&mut self) -> Result<i32, UpdaterError> {
        let response = self.run("bkr".to_string(), None).await?;
        Ok(parser::parse_status_code(&response))
    }

    /// Fetch the device inventory (`lsr llv`)
    pub async fn list_versions(&mut self) -> Result<Vec<Device>, UpdaterError> {
        let response = self.run("lsr llv".to_string(), None).await?;
        Ok(parser::parse_device_inventory(&response))
    }

    /// Toggle relay/promiscuous mode, required before devices answer
    /// direct traffic (`eth promiscuous {0|1}`)
    pub async fn set_promiscuous(&mut self, enabled: bool) -> Result<(), UpdaterError> {
        let flag = if enabled { 1 } else { 0 };
        self.run(format!("eth promiscuous {}", flag), None)
            .await
            .map(|_| ())
    }

    /// Arm the independent watchdog reset timer
    /// (`exe <ID> eeprom iwdg rst <secs>`)
    pub async fn set_watchdog_reset(
        &mut self,
        id: DeviceId,
        seconds: u32,
    ) -> Result<(), UpdaterError> {
        self.run(format!("exe {} eeprom iwdg rst {}", id, seconds), None)
            .await
            .map(|_| ())
    }

    /// Disarm the independent watchdog reset timer
    pub async fn clear_watchdog_reset(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        self.set_watchdog_reset(id, 0).await
    }

    /// Reset a device (`exe <ID> reset`)
    pub async fn reset_device(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        self.run(format!("exe {} reset", id), None).await.map(|_| ())
    }

    /// Query a device's IP address (`exe <ID> phy ipaddr`)
    pub async fn query_ip(&mut self, id: DeviceId) -> Result<String, UpdaterError> {
        let response = self.run(format!("exe {} phy ipaddr", id), None).await?;
        parser::parse_ip_address(&response).ok_or_else(|| {
            UpdaterError::ProtocolError(format!("no IP address in reply for lsr {}", id))
        })
    }

    /// Query whether a device's window watchdog is enabled (`exe <ID> wwdg`)
    pub async fn query_watchdog(&mut self, id: DeviceId) -> Result<bool, UpdaterError> {
        let response = self.run(format!("exe {} wwdg", id), None).await?;
        Ok(parser::parse_watchdog_enabled(&response))
    }

    /// Toggle the window watchdog EEPROM flag (`exe <ID> eeprom wwdg`);
    /// takes effect after the next reset
    pub async fn disable_watchdog(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        self.run(format!("exe {} eeprom wwdg", id), None)
            .await
            .map(|_| ())
    }

    /// Fetch a device's system info (`exe <ID> sys info`)
    pub async fn system_info(
        &mut self,
        id: DeviceId,
    ) -> Result<HashMap<String, String>, UpdaterError> {
        let response = self.run(format!("exe {} sys info", id), None).await?;
        Ok(parser::parse_key_value_info(&response))
    }

    /// Erase a device's flash so it boots the factory image
    /// (`exe <ID> flash erase1`)
    pub async fn erase_flash(&mut self, id: DeviceId) -> Result<(), UpdaterError> {
        self.run(format!("exe {} flash erase1", id), Some(ERASE_TIMEOUT))
            .await
            .map(|_| ())
    }

    /// Send one command and classify the reply. An absent reply or one that
    /// matches the error vocabulary is a failure.
    async fn run(
        &mut self,
        command: String,
        timeout: Option<Duration>,
    ) -> Result<String, UpdaterError> {
        let response = match timeout {
            Some(t) => self.transport.send_command_with_timeout(&command, t).await?,
            None => self.transport.send_command(&command).await?,
        };
        let response = response.unwrap_or_default();

        if parser::is_error_response(&response) {
            let message = parser::extract_error_message(&response);
            self.sink
                .error(&format!("'{}' failed: {}", command, message));
            return Err(UpdaterError::ProtocolError(format!(
                "'{}': {}",
                command, message
            )));
        }

        Ok(response)
    }
}
