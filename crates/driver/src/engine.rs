//! Transfer engine
//!
//! One acquisition is always the same two blocking transfers, in this order:
//!
//! 1. a class control request (SET_REPORT) carrying the 8-byte measurement
//!    command on the default pipe;
//! 2. an interrupt IN read of the reply from the session's endpoint.
//!
//! The key has no request identifier, so the pair must never be reordered or
//! overlapped with another pair on the same device. The caller guarantees
//! that by holding the session lock across [`acquire_reading`].

use std::time::Duration;

use protocol::{
    CONTROL_INDEX, CONTROL_REQUEST, CONTROL_REQUEST_TYPE, CONTROL_VALUE, REPLY_MIN_LEN, Reading,
    decode,
};
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::session::SessionIo;

/// Bounds on the two transfers of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    pub control: Duration,
    pub interrupt: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            control: protocol::DEFAULT_TRANSFER_TIMEOUT,
            interrupt: protocol::DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}

/// Run one command/reply exchange and decode the reply
///
/// On success the decoded reading is stored in `last_reading` and returned.
/// A control failure leaves both the inbound buffer and `last_reading`
/// untouched. An interrupt failure sets `last_reading` to the sentinel.
pub(crate) fn acquire_reading(
    io: &mut SessionIo,
    endpoint: u8,
    last_reading: &mut Reading,
    timeouts: &TransferTimeouts,
) -> Result<Reading, TransferError> {
    let key = io.device.device_key();

    io.device
        .write_control(
            CONTROL_REQUEST_TYPE,
            CONTROL_REQUEST,
            CONTROL_VALUE,
            CONTROL_INDEX,
            &io.outbound,
            timeouts.control,
        )
        .map_err(|e| {
            warn!("{}: control message failed ({}): {}", key, e.errno(), e);
            TransferError::Control(e)
        })?;

    io.inbound.fill(0);
    let received = match io
        .device
        .read_interrupt(endpoint, &mut io.inbound, timeouts.interrupt)
    {
        Ok(len) => len,
        Err(e) => {
            warn!("{}: interrupt message failed ({}): {}", key, e.errno(), e);
            *last_reading = Reading::UNAVAILABLE;
            return Err(TransferError::Interrupt(e));
        }
    };

    if received < REPLY_MIN_LEN {
        debug!("{}: short reply ({} bytes)", key, received);
    }

    let reading = decode(&io.inbound);
    *last_reading = reading;

    debug!(
        "{}: inner={} outer={} (m°C)",
        key, reading.inner_milli_c, reading.outer_milli_c
    );
    Ok(reading)
}
