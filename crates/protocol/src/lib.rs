//! Wire protocol for the TEMPer2 USB temperature key
//!
//! This crate describes everything the host needs to know about talking to the
//! key that does not involve actually moving bytes: the match identifiers, the
//! fixed control request that triggers a measurement, the layout of the
//! interrupt reply, the command verb codes of the per-device node, and the
//! textual presentation of readings.
//!
//! # Example
//!
//! ```
//! use protocol::{decode, Probe};
//!
//! let reply = [0x80, 0x02, 0x01, 0x90, 0x01, 0x70, 0x00, 0x00];
//! let reading = decode(&reply);
//! assert_eq!(reading.get(Probe::Inner), 1200);
//! assert_eq!(reading.get(Probe::Outer), 1104);
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod format;
pub mod types;
pub mod wire;

pub use codec::{MILLI_C_PER_RAW, decode, raw_values};
pub use command::{GET_INNER, GET_OUTER, command_for_probe, probe_for_command};
pub use error::{ProtocolError, Result};
pub use format::{format_milli_celsius, render_probe, render_snapshot};
pub use types::{Probe, Reading};
pub use wire::{
    CONTROL_INDEX, CONTROL_REQUEST, CONTROL_REQUEST_TYPE, CONTROL_VALUE, DATA_INTERFACE,
    DEFAULT_TRANSFER_TIMEOUT, PRODUCT_ID, READ_COMMAND, REPLY_MIN_LEN, VENDOR_ID, matches_device,
};
