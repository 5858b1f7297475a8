//! USB transfer execution
//!
//! Blocking control and interrupt transfers on an opened key, with rusb
//! errors mapped to the bus status the driver core understands.

use common::{DeviceKey, UsbError, UsbTransport};
use std::time::Duration;
use tracing::{debug, warn};

use crate::usb::device::RusbTransport;

impl UsbTransport for RusbTransport {
    fn device_key(&self) -> DeviceKey {
        self.key
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            request_type,
            request,
            value,
            index,
            data.len()
        );

        match self
            .handle
            .write_control(request_type, request, value, index, data, timeout)
        {
            Ok(len) => {
                debug!("Control transfer succeeded: {} bytes", len);
                Ok(len)
            }
            Err(e) => {
                warn!("Control transfer failed on {}: {}", self.key, e);
                Err(map_rusb_error(e))
            }
        }
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        debug!(
            "Interrupt transfer: endpoint={:#x}, buf_len={}, timeout={}ms",
            endpoint,
            buf.len(),
            timeout.as_millis()
        );

        match self.handle.read_interrupt(endpoint, buf, timeout) {
            Ok(len) => {
                debug!("Interrupt transfer succeeded: {} bytes", len);
                Ok(len)
            }
            Err(e) => {
                warn!("Interrupt transfer failed on {}: {}", self.key, e);
                Err(map_rusb_error(e))
            }
        }
    }
}

/// Map rusb::Error to the shared bus status
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::Interrupted => UsbError::Interrupted,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
