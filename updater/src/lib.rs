//! LSR Updater Library
//!
//! Firmware update engine for LSR readers attached to a BKR concentrator.
//! Commands travel over a UDP text channel to the concentrator; firmware
//! images travel directly to each reader over TFTP.

pub mod app;
pub mod channel;
pub mod device;
pub mod errors;
pub mod firmware;
pub mod logs;
pub mod models;
pub mod parser;
pub mod progress;
pub mod settings;
pub mod tftp;
pub mod update;
pub mod utils;
pub mod version;
