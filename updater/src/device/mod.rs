//! Protocol-level device operations

pub mod executor;

pub use executor::DeviceExecutor;
