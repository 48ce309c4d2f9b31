pub mod driver;
pub mod manager;
pub mod models;

pub use driver::{ArduinoDriver, DriverConfig, ProbeConfig};
pub use manager::DeviceManager;
pub use models::*;

use crate::serial::{QueueError, SerialError};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Serial communication error: {0}")]
    SerialError(#[from] SerialError),

    #[error("Command failed: {0}")]
    QueueError(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
