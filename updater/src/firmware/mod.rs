//! Local firmware file management

pub mod repo;

pub use repo::FirmwareRepository;
