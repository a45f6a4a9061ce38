//! Data models

pub mod device;
pub mod firmware;
pub mod stats;
