//! From-scratch TFTP client (RFC 1350, octet mode)

pub mod client;
pub mod packet;

pub use client::TftpClient;
pub use packet::TftpPacket;
