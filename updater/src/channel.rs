//! UDP command channel to the concentrator
//!
//! Request/response over a single connected UDP socket. "Reliable" here
//! means correlated, not guaranteed: each command waits for exactly one
//! datagram or times out, and datagram loss surfaces as a timeout that the
//! caller decides how to handle. The channel never retries on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::errors::UpdaterError;
use crate::progress::ProgressSink;

/// Largest UDP payload the concentrator can produce
const MAX_DATAGRAM: usize = 65507;

/// Longest response prefix echoed into progress events
const PREVIEW_LEN: usize = 100;

/// Transport seam for issuing concentrator commands.
///
/// `&mut self` enforces the one-in-flight-request contract: the wire
/// protocol has no request ids, so overlapping commands on one channel
/// would correlate the wrong responses.
#[async_trait]
pub trait CommandTransport: Send {
    /// Establish the transport; must precede any command
    async fn connect(&mut self) -> Result<(), UpdaterError>;

    /// Release the transport; idempotent
    fn disconnect(&mut self);

    /// Send a command and wait for one response datagram.
    ///
    /// Returns `None` on timeout; the caller decides whether that is fatal.
    async fn send_command(&mut self, command: &str) -> Result<Option<String>, UpdaterError>;

    /// Same as [`send_command`](Self::send_command) with an explicit timeout
    async fn send_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<String>, UpdaterError>;

    /// Send without waiting for a reply
    async fn send_fire_and_forget(&mut self, command: &str) -> Result<(), UpdaterError>;
}

/// UDP command channel to the BKR
pub struct CommandChannel {
    host: String,
    port: u16,
    command_timeout: Duration,
    socket: Option<UdpSocket>,
    sink: Arc<dyn ProgressSink>,
}

impl CommandChannel {
    /// Create a disconnected channel
    pub fn new(
        host: impl Into<String>,
        port: u16,
        command_timeout: Duration,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            command_timeout,
            socket: None,
            sink,
        }
    }

    /// Whether the channel holds a connected socket
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Bind a socket fixed to the concentrator address
    pub async fn connect(&mut self) -> Result<(), UpdaterError> {
        self.disconnect();

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| UpdaterError::ConnectionError(format!("bind failed: {}", e)))?;
        socket
            .connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                UpdaterError::ConnectionError(format!(
                    "cannot reach {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;

        self.socket = Some(socket);
        self.sink
            .info(&format!("Connected to BKR {}:{}", self.host, self.port));
        Ok(())
    }

    /// Release the socket; safe to call when not connected
    pub fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            self.sink.info("Disconnected from BKR");
        }
    }

    fn socket(&self) -> Result<&UdpSocket, UpdaterError> {
        self.socket
            .as_ref()
            .ok_or_else(|| UpdaterError::TransportError("channel not connected".to_string()))
    }

    async fn send_line(&self, command: &str) -> Result<(), UpdaterError> {
        let socket = self.socket()?;
        let mut data = command.as_bytes().to_vec();
        data.push(b'\n');
        socket
            .send(&data)
            .await
            .map_err(|e| UpdaterError::TransportError(format!("send failed: {}", e)))?;
        Ok(())
    }
}

fn preview(response: &str) -> &str {
    let end = response
        .char_indices()
        .nth(PREVIEW_LEN)
        .map(|(i, _)| i)
        .unwrap_or(response.len());
    &response[..end]
}

#[async_trait]
impl CommandTransport for CommandChannel {
    async fn connect(&mut self) -> Result<(), UpdaterError> {
        CommandChannel::connect(self).await
    }

    fn disconnect(&mut self) {
        CommandChannel::disconnect(self)
    }

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, UpdaterError> {
        let timeout = self.command_timeout;
        self.send_command_with_timeout(command, timeout).await
    }

    async fn send_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<String>, UpdaterError> {
        self.send_line(command).await?;
        self.sink.info(&format!("-> {}", command));

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let socket = self.socket()?;

        match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                let response = String::from_utf8_lossy(&buf[..len]).into_owned();
                self.sink.info(&format!("<- {}", preview(&response)));
                Ok(Some(response))
            }
            Ok(Err(e)) => Err(UpdaterError::TransportError(format!("recv failed: {}", e))),
            Err(_) => {
                warn!(
                    "No reply to '{}' within {}ms",
                    command,
                    timeout.as_millis()
                );
                self.sink.error(&format!(
                    "Timeout on '{}' ({}ms)",
                    command,
                    timeout.as_millis()
                ));
                Ok(None)
            }
        }
    }

    async fn send_fire_and_forget(&mut self, command: &str) -> Result<(), UpdaterError> {
        self.send_line(command).await?;
        debug!("Sent without waiting for reply: {:?}", command);
        Ok(())
    }
}

impl CommandChannel {
    /// Send a bare line terminator (terminal Enter)
    pub async fn send_enter(&mut self) -> Result<(), UpdaterError> {
        self.send_fire_and_forget("").await
    }

    /// Send an interrupt byte (Ctrl-C) to abort a long-running command
    pub async fn send_interrupt(&mut self) -> Result<(), UpdaterError> {
        self.send_fire_and_forget("\u{0003}").await
    }
}
