//! TFTP transfer client
//!
//! One dedicated UDP socket per transfer, separate from the command channel.
//! The server may answer the initial request from an ephemeral port; once the
//! first reply arrives the client locks onto that endpoint for the rest of
//! the transfer.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::errors::UpdaterError;
use crate::progress::ProgressSink;
use crate::tftp::packet::{TftpPacket, BLOCK_SIZE};

/// Well-known port for the initial request
const TFTP_PORT: u16 = 69;

/// Default wait for an acknowledgment
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Retransmissions of one packet before the transfer fails
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// TFTP client bound to one server address
pub struct TftpClient {
    server_ip: String,
    server_port: u16,
    ack_timeout: Duration,
    max_attempts: u32,
    sink: Arc<dyn ProgressSink>,
}

impl TftpClient {
    /// Create a client with the default RFC timings
    pub fn new(server_ip: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            server_ip: server_ip.into(),
            server_port: TFTP_PORT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sink,
        }
    }

    /// Override ack timeout and attempt ceiling (tests use short timings)
    pub fn with_timing(mut self, ack_timeout: Duration, max_attempts: u32) -> Self {
        self.ack_timeout = ack_timeout;
        self.max_attempts = max_attempts;
        self
    }

    /// Use a non-standard server port instead of 69
    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Upload a local file under `remote_name`. Returns the bytes sent.
    ///
    /// Files whose length is an exact multiple of 512 are terminated with a
    /// trailing empty data packet, as RFC 1350 requires.
    pub async fn send_file(
        &self,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<u64, UpdaterError> {
        let total = fs::metadata(local_path)
            .await
            .map_err(|_| UpdaterError::FileNotFound(local_path.display().to_string()))?
            .len();

        let socket = bind_socket().await?;
        self.sink.info(&format!(
            "TFTP: sending {} ({} bytes) to {}:{}",
            remote_name, total, self.server_ip, self.server_port
        ));

        let wrq = TftpPacket::WriteRequest {
            filename: remote_name.to_string(),
        }
        .encode();
        socket
            .send_to(&wrq, (self.server_ip.as_str(), self.server_port))
            .await
            .map_err(|e| UpdaterError::TransportError(format!("TFTP send failed: {}", e)))?;

        // The first ack both opens the transfer and reveals the server's
        // ephemeral port.
        let mut buf = vec![0u8; 4 + BLOCK_SIZE];
        let (len, server) = match tokio::time::timeout(self.ack_timeout, socket.recv_from(&mut buf))
            .await
        {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                return Err(UpdaterError::TransportError(format!(
                    "TFTP recv failed: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(UpdaterError::ProtocolError(
                    "no ack on write-request".to_string(),
                ))
            }
        };
        match TftpPacket::decode(&buf[..len])? {
            TftpPacket::Ack { block: 0 } => {}
            TftpPacket::Error { code, message } => {
                return Err(UpdaterError::ProtocolError(format!(
                    "TFTP error {} on write-request: {}",
                    code, message
                )))
            }
            other => {
                return Err(UpdaterError::ProtocolError(format!(
                    "unexpected reply to write-request: {:?}",
                    other
                )))
            }
        }
        socket
            .connect(server)
            .await
            .map_err(|e| UpdaterError::TransportError(format!("TFTP connect failed: {}", e)))?;
        debug!("TFTP server answered from {}", server);

        let mut file = fs::File::open(local_path).await?;
        let mut block: u16 = 0;
        let mut transferred: u64 = 0;

        loop {
            let chunk = read_chunk(&mut file).await?;
            block = block.checked_add(1).ok_or_else(|| {
                UpdaterError::ProtocolError("block number would wrap past 65535".to_string())
            })?;

            let packet = TftpPacket::Data {
                block,
                payload: chunk.clone(),
            }
            .encode();
            self.send_until_acked(&socket, &packet, block).await?;

            transferred += chunk.len() as u64;
            let percent = if total == 0 {
                100.0
            } else {
                transferred as f64 / total as f64 * 100.0
            };
            self.sink.info(&format!(
                "TFTP: {:.1}% ({}/{} bytes)",
                percent, transferred, total
            ));

            if chunk.len() < BLOCK_SIZE {
                break;
            }
        }

        self.sink.info(&format!(
            "TFTP: {} transferred ({} bytes)",
            remote_name, transferred
        ));
        Ok(transferred)
    }

    /// Download `remote_name` into a local file. Returns the bytes received.
    pub async fn receive_file(
        &self,
        remote_name: &str,
        local_path: &Path,
    ) -> Result<u64, UpdaterError> {
        let socket = bind_socket().await?;
        self.sink.info(&format!(
            "TFTP: fetching {} from {}:{}",
            remote_name, self.server_ip, self.server_port
        ));

        let rrq = TftpPacket::ReadRequest {
            filename: remote_name.to_string(),
        }
        .encode();
        socket
            .send_to(&rrq, (self.server_ip.as_str(), self.server_port))
            .await
            .map_err(|e| UpdaterError::TransportError(format!("TFTP send failed: {}", e)))?;

        let mut file = fs::File::create(local_path).await?;
        let mut server: Option<SocketAddr> = None;
        let mut last_ack: Option<Vec<u8>> = None;
        let mut expected: u16 = 1;
        let mut received: u64 = 0;
        let mut attempts: u32 = 1;
        let mut buf = vec![0u8; 4 + BLOCK_SIZE];

        loop {
            let (len, from) =
                match tokio::time::timeout(self.ack_timeout, socket.recv_from(&mut buf)).await {
                    Ok(Ok(ok)) => ok,
                    Ok(Err(e)) => {
                        return Err(UpdaterError::TransportError(format!(
                            "TFTP recv failed: {}",
                            e
                        )))
                    }
                    Err(_) => {
                        attempts += 1;
                        if attempts > self.max_attempts {
                            return Err(UpdaterError::TransferError(format!(
                                "no data for block {} after {} attempts",
                                expected, self.max_attempts
                            )));
                        }
                        // Retransmit the request (or last ack) and keep waiting
                        match (&server, &last_ack) {
                            (Some(addr), Some(ack)) => {
                                socket.send_to(ack, addr).await.map_err(|e| {
                                    UpdaterError::TransportError(format!("TFTP send failed: {}", e))
                                })?;
                            }
                            _ => {
                                socket
                                    .send_to(&rrq, (self.server_ip.as_str(), self.server_port))
                                    .await
                                    .map_err(|e| {
                                        UpdaterError::TransportError(format!(
                                            "TFTP send failed: {}",
                                            e
                                        ))
                                    })?;
                            }
                        }
                        continue;
                    }
                };

            match server {
                Some(addr) if addr != from => continue, // stray datagram
                None => server = Some(from),
                _ => {}
            }
            attempts = 1;

            match TftpPacket::decode(&buf[..len])? {
                TftpPacket::Data { block, payload } if block == expected => {
                    file.write_all(&payload).await?;
                    received += payload.len() as u64;

                    let ack = TftpPacket::Ack { block }.encode();
                    socket.send_to(&ack, from).await.map_err(|e| {
                        UpdaterError::TransportError(format!("TFTP send failed: {}", e))
                    })?;
                    last_ack = Some(ack);
                    self.sink
                        .info(&format!("TFTP: {} bytes received", received));

                    if payload.len() < BLOCK_SIZE {
                        break;
                    }
                    expected = expected.checked_add(1).ok_or_else(|| {
                        UpdaterError::ProtocolError(
                            "block number would wrap past 65535".to_string(),
                        )
                    })?;
                }
                TftpPacket::Data { block, .. } if block.wrapping_add(1) == expected => {
                    // Duplicate of the previous block; our ack was lost
                    let ack = TftpPacket::Ack { block }.encode();
                    socket.send_to(&ack, from).await.map_err(|e| {
                        UpdaterError::TransportError(format!("TFTP send failed: {}", e))
                    })?;
                }
                TftpPacket::Data { block, .. } => {
                    return Err(UpdaterError::ProtocolError(format!(
                        "desynchronized: got block {}, expected {}",
                        block, expected
                    )));
                }
                TftpPacket::Error { code, message } => {
                    return Err(UpdaterError::ProtocolError(format!(
                        "TFTP error {}: {}",
                        code, message
                    )));
                }
                other => {
                    return Err(UpdaterError::ProtocolError(format!(
                        "unexpected packet during download: {:?}",
                        other
                    )));
                }
            }
        }

        file.flush().await?;
        self.sink.info(&format!(
            "TFTP: {} downloaded ({} bytes) -> {}",
            remote_name,
            received,
            local_path.display()
        ));
        Ok(received)
    }

    /// Send one data packet until its ack arrives, retransmitting on timeout
    /// up to the attempt ceiling.
    async fn send_until_acked(
        &self,
        socket: &UdpSocket,
        packet: &[u8],
        block: u16,
    ) -> Result<(), UpdaterError> {
        let mut buf = [0u8; 4 + BLOCK_SIZE];

        for _ in 0..self.max_attempts {
            socket
                .send(packet)
                .await
                .map_err(|e| UpdaterError::TransportError(format!("TFTP send failed: {}", e)))?;

            match tokio::time::timeout(self.ack_timeout, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => match TftpPacket::decode(&buf[..len])? {
                    TftpPacket::Ack { block: acked } if acked == block => return Ok(()),
                    TftpPacket::Ack { block: acked } => {
                        return Err(UpdaterError::ProtocolError(format!(
                            "desynchronized: ack for block {}, expected {}",
                            acked, block
                        )));
                    }
                    TftpPacket::Error { code, message } => {
                        return Err(UpdaterError::ProtocolError(format!(
                            "TFTP error {}: {}",
                            code, message
                        )));
                    }
                    other => {
                        return Err(UpdaterError::ProtocolError(format!(
                            "unexpected packet while waiting for ack: {:?}",
                            other
                        )));
                    }
                },
                Ok(Err(e)) => {
                    return Err(UpdaterError::TransportError(format!(
                        "TFTP recv failed: {}",
                        e
                    )))
                }
                Err(_) => {
                    debug!("Ack timeout for block {}, retransmitting", block);
                }
            }
        }

        Err(UpdaterError::TransferError(format!(
            "no ack for block {} after {} attempts",
            block, self.max_attempts
        )))
    }
}

async fn bind_socket() -> Result<UdpSocket, UpdaterError> {
    UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| UpdaterError::TransportError(format!("TFTP bind failed: {}", e)))
}

/// Read up to one block, filling the chunk even when the underlying reads
/// come back short.
async fn read_chunk(file: &mut fs::File) -> Result<Vec<u8>, UpdaterError> {
    let mut chunk = vec![0u8; BLOCK_SIZE];
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = file.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}
