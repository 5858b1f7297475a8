//! Fixed identifiers and request parameters of the TEMPer2 key

use std::time::Duration;

/// USB Vendor ID of the key (Microdia)
pub const VENDOR_ID: u16 = 0x0c45;

/// USB Product ID of the key
pub const PRODUCT_ID: u16 = 0x7401;

/// bmRequestType: host-to-device, class request, interface recipient
pub const CONTROL_REQUEST_TYPE: u8 = 0x21;

/// bRequest: HID SET_REPORT
pub const CONTROL_REQUEST: u8 = 0x09;

/// wValue: output report, report id 0
pub const CONTROL_VALUE: u16 = 0x0200;

/// wIndex: the data interface
pub const CONTROL_INDEX: u16 = 0x0001;

/// Interface carrying the measurement endpoint (same as `CONTROL_INDEX`)
pub const DATA_INTERFACE: u8 = CONTROL_INDEX as u8;

/// Payload of the control request asking the key for a fresh measurement
pub const READ_COMMAND: [u8; 8] = [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Smallest interrupt buffer the host allocates, whatever the endpoint reports
pub const REPLY_MIN_LEN: usize = 8;

/// Nominal bound on each of the two transfers
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether a VID/PID pair identifies a TEMPer2 key
pub fn matches_device(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VENDOR_ID && product_id == PRODUCT_ID
}
