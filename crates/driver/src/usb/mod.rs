//! USB subsystem
//!
//! rusb backend of the driver:
//! - enumeration and hot-plug detection of TEMPer2 keys
//! - opening keys into transports the driver core runs transfers on
//! - the worker thread that serializes attach and detach
//!
//! The worker runs in a dedicated thread so libusb's event loop never blocks
//! the Tokio runtime of the front-end.

pub mod device;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use device::{RusbTransport, UsbDevice};
pub use manager::{DeviceManager, HotplugEvent};
pub use transfers::map_rusb_error;
pub use worker::{UsbWorkerThread, spawn_usb_worker};
