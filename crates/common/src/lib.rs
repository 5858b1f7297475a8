//! Common utilities for temper
//!
//! This crate provides the pieces shared between the driver core and its
//! front-ends: the USB abstractions the core is written against (endpoint
//! descriptors, device identity, the transport seam), the channel bridge to
//! the USB worker thread, logging setup, and error handling.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{DriverBridge, DriverEvent, DriverWorker, WorkerCommand, create_driver_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    DeviceKey, EndpointDescriptor, EndpointTransfer, SessionHandle, UsbError, UsbTransport,
};
