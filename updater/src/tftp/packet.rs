//! TFTP packet encoding and decoding
//!
//! Wire format per RFC 1350: 2-byte big-endian opcode, then opcode-specific
//! fields. Only octet (binary) mode is used.

use crate::errors::UpdaterError;

/// Fixed data block size
pub const BLOCK_SIZE: usize = 512;

/// Transfer mode sent in read/write requests
const MODE: &str = "octet";

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;

/// One TFTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    /// Read request (opcode 1)
    ReadRequest { filename: String },

    /// Write request (opcode 2)
    WriteRequest { filename: String },

    /// Data block (opcode 3), payload is at most [`BLOCK_SIZE`] bytes
    Data { block: u16, payload: Vec<u8> },

    /// Acknowledgment (opcode 4)
    Ack { block: u16 },

    /// Error (opcode 5)
    Error { code: u16, message: String },
}

impl TftpPacket {
    /// Encode into wire bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TftpPacket::ReadRequest { filename } => encode_request(OP_RRQ, filename),
            TftpPacket::WriteRequest { filename } => encode_request(OP_WRQ, filename),
            TftpPacket::Data { block, payload } => {
                let mut buf = Vec::with_capacity(4 + payload.len());
                buf.extend_from_slice(&OP_DATA.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            TftpPacket::Ack { block } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&OP_ACK.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf
            }
            TftpPacket::Error { code, message } => {
                let mut buf = Vec::with_capacity(5 + message.len());
                buf.extend_from_slice(&OP_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Decode from wire bytes
    pub fn decode(data: &[u8]) -> Result<Self, UpdaterError> {
        if data.len() < 4 {
            return Err(UpdaterError::ProtocolError(format!(
                "TFTP packet too short ({} bytes)",
                data.len()
            )));
        }

        let opcode = u16::from_be_bytes([data[0], data[1]]);
        match opcode {
            OP_RRQ | OP_WRQ => {
                let filename = read_cstr(&data[2..])?;
                if opcode == OP_RRQ {
                    Ok(TftpPacket::ReadRequest { filename })
                } else {
                    Ok(TftpPacket::WriteRequest { filename })
                }
            }
            OP_DATA => {
                let block = u16::from_be_bytes([data[2], data[3]]);
                let payload = data[4..].to_vec();
                if payload.len() > BLOCK_SIZE {
                    return Err(UpdaterError::ProtocolError(format!(
                        "TFTP data block {} oversized ({} bytes)",
                        block,
                        payload.len()
                    )));
                }
                Ok(TftpPacket::Data { block, payload })
            }
            OP_ACK => {
                let block = u16::from_be_bytes([data[2], data[3]]);
                Ok(TftpPacket::Ack { block })
            }
            OP_ERROR => {
                let code = u16::from_be_bytes([data[2], data[3]]);
                let message = read_cstr(&data[4..]).unwrap_or_default();
                Ok(TftpPacket::Error { code, message })
            }
            other => Err(UpdaterError::ProtocolError(format!(
                "Unknown TFTP opcode {}",
                other
            ))),
        }
    }
}

fn encode_request(opcode: u16, filename: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + filename.len() + MODE.len());
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(MODE.as_bytes());
    buf.push(0);
    buf
}

fn read_cstr(data: &[u8]) -> Result<String, UpdaterError> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| UpdaterError::ProtocolError("Unterminated TFTP string".to_string()))?;
    Ok(String::from_utf8_lossy(&data[..end]).into_owned())
}
