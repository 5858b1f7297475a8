//! TEMPer2 driver core
//!
//! Binds to TEMPer2 keys, keeps one [`session::Session`] per attached key, and
//! answers temperature queries by running the key's command/reply exchange.
//!
//! The core is written against [`common::UsbTransport`]. The [`usb`] module
//! provides the rusb implementation plus enumeration and hot-plug handling.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockTransport, reply_for_raw, temper_endpoints};
//! use common::DeviceKey;
//! use driver::TemperDriver;
//! use protocol::GET_INNER;
//! use std::sync::Arc;
//!
//! let driver = TemperDriver::default();
//! let key = Arc::new(MockTransport::new(DeviceKey::new(1, 4)));
//! key.set_default_reply(reply_for_raw(400, 368));
//!
//! let handle = driver.attach(key, &temper_endpoints()).unwrap();
//! assert_eq!(driver.command_query(handle, GET_INNER).unwrap(), 1200);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod exposure;
pub mod registry;
pub mod session;
pub mod usb;

pub use config::DriverConfig;
pub use engine::TransferTimeouts;
pub use error::{DriverError, Result, TransferError};
pub use exposure::{Snapshot, TemperDriver};
pub use registry::SessionRegistry;
pub use session::{Session, SessionInfo, SessionState, select_endpoint};
