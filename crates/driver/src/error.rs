//! Driver error types

use common::{DeviceKey, SessionHandle, UsbError};
use serde::Serialize;
use thiserror::Error;

/// Failure of one acquisition (control + interrupt exchange)
///
/// Recoverable: the session stays usable and the next query tries again.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", content = "status", rename_all = "lowercase")]
pub enum TransferError {
    /// The measurement command could not be sent; nothing was read
    #[error("control transfer failed: {0}")]
    Control(UsbError),

    /// The command was sent but the reply could not be read
    #[error("interrupt transfer failed: {0}")]
    Interrupt(UsbError),
}

impl TransferError {
    /// Bus status of the failed transfer
    pub fn status(&self) -> &UsbError {
        match self {
            TransferError::Control(e) | TransferError::Interrupt(e) => e,
        }
    }

    /// Negative errno-style code of the failed transfer
    pub fn code(&self) -> i32 {
        self.status().errno()
    }

    pub fn is_timeout(&self) -> bool {
        self.status().is_timeout()
    }
}

/// Errors surfaced by the driver core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Attach: the data interface has no interrupt IN endpoint
    #[error("no interrupt IN endpoint found")]
    NoSuitableEndpoint,

    /// Attach: a session buffer could not be allocated
    #[error("could not allocate {what} ({size} bytes)")]
    ResourceExhausted { what: &'static str, size: usize },

    /// Attach: the physical device already has a session
    #[error("device {0} is already attached")]
    AlreadyAttached(DeviceKey),

    /// Query against a handle with no live session
    #[error("no session for handle {0}")]
    UnknownHandle(SessionHandle),

    /// Command query with a verb the node does not understand
    #[error("invalid request {0:#010x}")]
    InvalidRequest(u32),

    /// Acquisition failure reported verbatim
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Acquisition failure reported through the command surface
    #[error("I/O fault: {0}")]
    Fault(TransferError),

    /// The host USB stack refused to open or describe the device
    #[error("USB error: {0}")]
    Usb(UsbError),
}

impl DriverError {
    /// Negative errno-style code, as the command surface reports it
    pub fn errno(&self) -> i32 {
        match self {
            DriverError::NoSuitableEndpoint => -19,
            DriverError::ResourceExhausted { .. } => -12,
            DriverError::AlreadyAttached(_) => -16,
            DriverError::UnknownHandle(_) => -19,
            DriverError::InvalidRequest(_) => -22,
            DriverError::Transfer(e) => e.code(),
            DriverError::Fault(_) => -14,
            DriverError::Usb(e) => e.errno(),
        }
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;
