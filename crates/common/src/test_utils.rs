//! Test utilities for temper
//!
//! Provides a scripted, in-memory [`UsbTransport`] standing in for a TEMPer2
//! key, plus helpers for building descriptor sets.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockTransport, reply_for_raw};
//! use common::{DeviceKey, UsbTransport};
//! use std::time::Duration;
//!
//! let mock = MockTransport::new(DeviceKey::new(1, 2));
//! mock.push_reply(reply_for_raw(400, 368));
//!
//! let mut buf = [0u8; 8];
//! let len = mock.read_interrupt(0x82, &mut buf, Duration::from_secs(2)).unwrap();
//! assert_eq!(len, 8);
//! assert_eq!(&buf[2..6], &[0x01, 0x90, 0x01, 0x70]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::usb_types::{DeviceKey, EndpointDescriptor, EndpointTransfer, UsbError, UsbTransport};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build an 8-byte interrupt reply carrying the given raw sensor words
pub fn reply_for_raw(inner_raw: u16, outer_raw: u16) -> Vec<u8> {
    let [ih, il] = inner_raw.to_be_bytes();
    let [oh, ol] = outer_raw.to_be_bytes();
    vec![0x80, 0x04, ih, il, oh, ol, 0x00, 0x00]
}

/// Descriptor set of a real TEMPer2 data interface (one interrupt IN endpoint)
pub fn temper_endpoints() -> Vec<EndpointDescriptor> {
    vec![EndpointDescriptor::interrupt_in(2, 8)]
}

/// Descriptor set with only non-matching endpoints
pub fn endpoints_without_interrupt_in() -> Vec<EndpointDescriptor> {
    vec![
        EndpointDescriptor::new(0x01, EndpointTransfer::Interrupt, 8),
        EndpointDescriptor::new(0x81, EndpointTransfer::Bulk, 64),
        EndpointDescriptor::new(0x02, EndpointTransfer::Bulk, 64),
        EndpointDescriptor::new(0x83, EndpointTransfer::Isochronous, 192),
    ]
}

/// One transfer observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Control {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
        timeout: Duration,
    },
    Interrupt {
        endpoint: u8,
        len: usize,
        timeout: Duration,
    },
}

#[derive(Default)]
struct Script {
    control: VecDeque<Result<(), UsbError>>,
    replies: VecDeque<Result<Vec<u8>, UsbError>>,
    default_reply: Vec<u8>,
    delay: Duration,
    calls: Vec<TransportCall>,
}

#[derive(Default)]
struct Gate {
    closed: bool,
    waiting: usize,
}

/// Scripted simulated transport
///
/// Control transfers succeed unless a failure was queued with
/// [`push_control_error`](Self::push_control_error). Interrupt transfers
/// return queued replies in order, then the default reply. Concurrent
/// transfer calls are counted so tests can prove a session never overlaps
/// two exchanges.
pub struct MockTransport {
    key: DeviceKey,
    script: Mutex<Script>,
    gate: Mutex<Gate>,
    gate_cv: Condvar,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(key: DeviceKey) -> Self {
        Self {
            key,
            script: Mutex::new(Script {
                default_reply: reply_for_raw(0, 0),
                ..Script::default()
            }),
            gate: Mutex::new(Gate::default()),
            gate_cv: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of the next control transfer
    pub fn push_control_error(&self, error: UsbError) {
        self.script().control.push_back(Err(error));
    }

    /// Queue a successful interrupt reply
    pub fn push_reply(&self, reply: Vec<u8>) {
        self.script().replies.push_back(Ok(reply));
    }

    /// Queue a failed interrupt transfer
    pub fn push_interrupt_error(&self, error: UsbError) {
        self.script().replies.push_back(Err(error));
    }

    /// Reply returned once the queue is exhausted
    pub fn set_default_reply(&self, reply: Vec<u8>) {
        self.script().default_reply = reply;
    }

    /// Sleep this long inside every transfer
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = delay;
    }

    /// Every transfer issued so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.script().calls.clone()
    }

    pub fn control_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Control { .. }))
            .count()
    }

    pub fn interrupt_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Interrupt { .. }))
            .count()
    }

    /// Highest number of transfers that were ever running at the same time
    pub fn max_concurrent_transfers(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Make interrupt transfers block until [`open_gate`](Self::open_gate)
    pub fn close_gate(&self) {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
    }

    /// Release interrupt transfers blocked by [`close_gate`](Self::close_gate)
    pub fn open_gate(&self) {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).closed = false;
        self.gate_cv.notify_all();
    }

    /// Wait until an interrupt transfer is blocked at the gate
    ///
    /// Returns false if none arrived within `timeout`.
    pub fn wait_for_blocked_transfer(&self, timeout: Duration) -> bool {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let (gate, _) = self
            .gate_cv
            .wait_timeout_while(gate, timeout, |g| g.waiting == 0)
            .unwrap_or_else(PoisonError::into_inner);
        gate.waiting > 0
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn pass_gate(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.waiting += 1;
        self.gate_cv.notify_all();
        while gate.closed {
            gate = self
                .gate_cv
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        gate.waiting -= 1;
    }
}

impl UsbTransport for MockTransport {
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
        self.enter();
        let (outcome, delay) = {
            let mut script = self.script();
            script.calls.push(TransportCall::Control {
                request_type,
                request,
                value,
                index,
                data: data.to_vec(),
                timeout,
            });
            (script.control.pop_front().unwrap_or(Ok(())), script.delay)
        };
        std::thread::sleep(delay);
        self.leave();

        tracing::trace!("mock control transfer on {}: {:?}", self.key, outcome);
        outcome.map(|()| data.len())
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.enter();
        let (outcome, delay) = {
            let mut script = self.script();
            script.calls.push(TransportCall::Interrupt {
                endpoint,
                len: buf.len(),
                timeout,
            });
            let outcome = script
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(script.default_reply.clone()));
            (outcome, script.delay)
        };
        self.pass_gate();
        std::thread::sleep(delay);

        let result = outcome.map(|reply| {
            let len = reply.len().min(buf.len());
            buf[..len].copy_from_slice(&reply[..len]);
            len
        });
        self.leave();

        tracing::trace!("mock interrupt transfer on {}: {:?}", self.key, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_for_raw_layout() {
        assert_eq!(
            reply_for_raw(0x0190, 0x0170),
            vec![0x80, 0x04, 0x01, 0x90, 0x01, 0x70, 0x00, 0x00]
        );
    }

    #[test]
    fn test_scripted_outcomes_in_order() {
        let mock = MockTransport::new(DeviceKey::new(1, 1));
        mock.push_control_error(UsbError::Pipe);

        let timeout = Duration::from_millis(10);
        assert_eq!(
            mock.write_control(0x21, 0x09, 0x0200, 1, &[0; 8], timeout),
            Err(UsbError::Pipe)
        );
        assert_eq!(
            mock.write_control(0x21, 0x09, 0x0200, 1, &[0; 8], timeout),
            Ok(8)
        );

        mock.push_interrupt_error(UsbError::Timeout);
        let mut buf = [0u8; 8];
        assert_eq!(
            mock.read_interrupt(0x82, &mut buf, timeout),
            Err(UsbError::Timeout)
        );
        assert_eq!(mock.read_interrupt(0x82, &mut buf, timeout), Ok(8));
        assert_eq!(mock.control_count(), 2);
        assert_eq!(mock.interrupt_count(), 2);
        assert_eq!(mock.max_concurrent_transfers(), 1);
    }

    #[test]
    fn test_short_buffer_truncates_reply() {
        let mock = MockTransport::new(DeviceKey::new(1, 1));
        let mut buf = [0u8; 4];
        assert_eq!(
            mock.read_interrupt(0x82, &mut buf, Duration::from_millis(10)),
            Ok(4)
        );
    }

    #[test]
    fn test_gate_blocks_until_opened() {
        let mock = std::sync::Arc::new(MockTransport::new(DeviceKey::new(1, 1)));
        mock.close_gate();

        let reader = {
            let mock = mock.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 8];
                mock.read_interrupt(0x82, &mut buf, Duration::from_secs(2))
            })
        };

        assert!(mock.wait_for_blocked_transfer(DEFAULT_TEST_TIMEOUT));
        mock.open_gate();
        assert_eq!(reader.join().unwrap(), Ok(8));
    }
}
