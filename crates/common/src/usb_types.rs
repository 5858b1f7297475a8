//! USB type abstractions shared by the driver and its backends
//!
//! The driver core never talks to a USB stack directly. It is written against
//! [`UsbTransport`], which the rusb backend implements for real hardware and
//! [`crate::test_utils::MockTransport`] implements for tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Direction bit of `bEndpointAddress`
pub const ENDPOINT_DIR_MASK: u8 = 0x80;
/// Direction value for device-to-host endpoints
pub const ENDPOINT_DIR_IN: u8 = 0x80;
/// Transfer type bits of `bmAttributes`
pub const ENDPOINT_XFERTYPE_MASK: u8 = 0x03;

/// Bus-level identity of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl DeviceKey {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// External handle of a session (minor-number equivalent)
///
/// Assigned when a device is attached and valid until it is detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u32);

impl SessionHandle {
    /// Name of the device node exposing this session
    pub fn node_name(&self) -> String {
        format!("temper{}", self.0)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Endpoint transfer type (`bmAttributes & 0x03`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointTransfer {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointTransfer {
    fn from_attributes(attributes: u8) -> Self {
        match attributes & ENDPOINT_XFERTYPE_MASK {
            0 => EndpointTransfer::Control,
            1 => EndpointTransfer::Isochronous,
            2 => EndpointTransfer::Bulk,
            _ => EndpointTransfer::Interrupt,
        }
    }

    fn attributes(self) -> u8 {
        match self {
            EndpointTransfer::Control => 0,
            EndpointTransfer::Isochronous => 1,
            EndpointTransfer::Bulk => 2,
            EndpointTransfer::Interrupt => 3,
        }
    }
}

/// Endpoint descriptor fields the driver cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// `bEndpointAddress` (direction bit included)
    pub address: u8,
    /// `bmAttributes`
    pub attributes: u8,
    /// `wMaxPacketSize`
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn new(address: u8, transfer: EndpointTransfer, max_packet_size: u16) -> Self {
        Self {
            address,
            attributes: transfer.attributes(),
            max_packet_size,
        }
    }

    /// Interrupt IN endpoint with the given endpoint number
    pub fn interrupt_in(number: u8, max_packet_size: u16) -> Self {
        Self::new(ENDPOINT_DIR_IN | number, EndpointTransfer::Interrupt, max_packet_size)
    }

    pub fn is_in(&self) -> bool {
        self.address & ENDPOINT_DIR_MASK == ENDPOINT_DIR_IN
    }

    pub fn transfer_type(&self) -> EndpointTransfer {
        EndpointTransfer::from_attributes(self.attributes)
    }

    pub fn is_interrupt_in(&self) -> bool {
        self.is_in() && self.transfer_type() == EndpointTransfer::Interrupt
    }
}

/// USB bus status of a failed transfer
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UsbError {
    #[error("operation timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("device disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("device sent more data than requested")]
    Overflow,
    #[error("input/output error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied")]
    Access,
    #[error("interrupted")]
    Interrupted,
    #[error("{message}")]
    Other { message: String },
}

impl UsbError {
    /// Negative errno-style status code, as a kernel USB core would report it
    pub fn errno(&self) -> i32 {
        match self {
            UsbError::Timeout => -110,
            UsbError::Pipe => -32,
            UsbError::NoDevice => -19,
            UsbError::NotFound => -2,
            UsbError::Busy => -16,
            UsbError::Overflow => -75,
            UsbError::Io => -5,
            UsbError::InvalidParam => -22,
            UsbError::Access => -13,
            UsbError::Interrupted => -4,
            UsbError::Other { .. } => -71,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UsbError::Timeout)
    }
}

/// Blocking transfer primitives of an opened physical device
///
/// Implementations must bound every call by `timeout` and return
/// [`UsbError::Timeout`] rather than hang. A transport is shared by reference
/// counting: every session holding an `Arc` keeps the device open.
pub trait UsbTransport: Send + Sync {
    /// Bus identity of the device behind this transport
    fn device_key(&self) -> DeviceKey;

    /// Host-to-device control transfer on the default pipe
    ///
    /// Returns the number of bytes written.
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Interrupt IN transfer into `buf`
    ///
    /// Returns the number of bytes received.
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;
}
