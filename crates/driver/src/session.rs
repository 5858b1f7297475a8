//! Device session
//!
//! A session is the driver's state for one attached key: the transport to the
//! physical device, the interrupt endpoint found at attach time, the two
//! transfer buffers, and the last decoded reading.
//!
//! Lifecycle: `create` (attach) -> `Ready` <-> `Busy` -> `TornDown` (detach).
//! `Busy` is the time a query holds the session lock across a transfer pair;
//! every other query on the same session waits for it. Teardown takes the same
//! lock, so it cannot free the buffers under an in-flight transfer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use common::{DeviceKey, EndpointDescriptor, SessionHandle, UsbTransport};
use protocol::{READ_COMMAND, REPLY_MIN_LEN, Reading};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{self, TransferTimeouts};
use crate::error::{DriverError, Result, TransferError};

/// Observable state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Idle, accepting queries
    Ready,
    /// A transfer pair is in flight
    Busy,
    /// Detached; every query fails with `UnknownHandle`
    TornDown,
}

/// Resources that only exist while the session is live
pub(crate) struct SessionIo {
    /// Retained reference to the physical device, released on teardown
    pub(crate) device: Arc<dyn UsbTransport>,
    /// Measurement command, copied once at creation
    pub(crate) outbound: Box<[u8]>,
    /// Reply scratch space, `max(wMaxPacketSize, 8)` bytes
    pub(crate) inbound: Box<[u8]>,
}

struct SessionInner {
    io: Option<SessionIo>,
    last_reading: Reading,
}

/// Snapshot of a session for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub node: String,
    pub device: DeviceKey,
    pub endpoint_address: u8,
    pub max_packet_size: u16,
    pub state: SessionState,
    /// Cached reading, unknown while a transfer is in flight
    pub last_reading: Option<Reading>,
}

/// Pick the interrupt IN endpoint from a descriptor set
///
/// Endpoints are scanned in descriptor order and the last match wins.
pub fn select_endpoint(endpoints: &[EndpointDescriptor]) -> Option<EndpointDescriptor> {
    let mut selected = None;
    for endpoint in endpoints {
        debug!(
            "EP addr {:#04x} ({:?}, max packet {})",
            endpoint.address,
            endpoint.transfer_type(),
            endpoint.max_packet_size
        );
        if endpoint.is_interrupt_in() {
            selected = Some(*endpoint);
        }
    }
    selected
}

fn alloc_buffer(what: &'static str, size: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| DriverError::ResourceExhausted { what, size })?;
    Ok(buffer)
}

/// State of one attached device
pub struct Session {
    handle: SessionHandle,
    device_key: DeviceKey,
    endpoint: EndpointDescriptor,
    timeouts: TransferTimeouts,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Build a ready session for `device`
    ///
    /// Nothing is kept on failure: `device` and any buffer already allocated
    /// are dropped before the error is returned.
    pub(crate) fn create(
        handle: SessionHandle,
        device: Arc<dyn UsbTransport>,
        endpoints: &[EndpointDescriptor],
        timeouts: TransferTimeouts,
    ) -> Result<Self> {
        let device_key = device.device_key();
        let endpoint = select_endpoint(endpoints).ok_or(DriverError::NoSuitableEndpoint)?;

        let mut outbound = alloc_buffer("command buffer", READ_COMMAND.len())?;
        outbound.extend_from_slice(&READ_COMMAND);

        let inbound_len = usize::from(endpoint.max_packet_size).max(REPLY_MIN_LEN);
        let mut inbound = alloc_buffer("reply buffer", inbound_len)?;
        inbound.resize(inbound_len, 0);

        info!(
            "Session {} for device {}: interrupt endpoint {:#04x}, {} byte reply buffer",
            handle, device_key, endpoint.address, inbound_len
        );

        Ok(Self {
            handle,
            device_key,
            endpoint,
            timeouts,
            inner: Mutex::new(SessionInner {
                io: Some(SessionIo {
                    device,
                    outbound: outbound.into_boxed_slice(),
                    inbound: inbound.into_boxed_slice(),
                }),
                last_reading: Reading::UNAVAILABLE,
            }),
        })
    }

    // A panic can't leave SessionInner half-written: every field update is a
    // single assignment, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn device_key(&self) -> DeviceKey {
        self.device_key
    }

    pub fn endpoint(&self) -> EndpointDescriptor {
        self.endpoint
    }

    /// Current state, without waiting for an in-flight transfer
    pub fn state(&self) -> SessionState {
        match self.inner.try_lock() {
            Ok(inner) => Self::settled_state(&inner),
            Err(TryLockError::Poisoned(e)) => Self::settled_state(&e.into_inner()),
            Err(TryLockError::WouldBlock) => SessionState::Busy,
        }
    }

    fn settled_state(inner: &SessionInner) -> SessionState {
        if inner.io.is_some() {
            SessionState::Ready
        } else {
            SessionState::TornDown
        }
    }

    /// Cached reading; waits for an in-flight transfer to finish
    pub fn last_reading(&self) -> Reading {
        self.lock().last_reading
    }

    /// Acquire and decode a fresh reading
    ///
    /// Blocks while another query on this session is in flight.
    pub fn acquire_reading(&self) -> Result<Reading> {
        let (outcome, _cached) = self.sample()?;
        outcome.map_err(DriverError::from)
    }

    /// Acquire a reading and return it with the cache as left by the attempt
    ///
    /// Both values come from the same locked section, so a concurrent query
    /// can't slip in between the failure and the cached value.
    pub(crate) fn sample(&self) -> Result<(std::result::Result<Reading, TransferError>, Reading)> {
        let mut guard = self.lock();
        let SessionInner { io, last_reading } = &mut *guard;
        let io = io.as_mut().ok_or(DriverError::UnknownHandle(self.handle))?;

        let outcome =
            engine::acquire_reading(io, self.endpoint.address, last_reading, &self.timeouts);
        Ok((outcome, *last_reading))
    }

    /// Release the device and free the buffers
    ///
    /// Waits for an in-flight transfer. Returns false if already torn down.
    pub(crate) fn teardown(&self) -> bool {
        let mut inner = self.lock();
        let Some(io) = inner.io.take() else {
            return false;
        };
        inner.last_reading = Reading::UNAVAILABLE;
        drop(inner);
        drop(io);

        debug!("Session {} torn down", self.handle);
        true
    }

    pub fn info(&self) -> SessionInfo {
        let (state, last_reading) = match self.inner.try_lock() {
            Ok(inner) => (Self::settled_state(&inner), Some(inner.last_reading)),
            Err(TryLockError::Poisoned(e)) => {
                let inner = e.into_inner();
                (Self::settled_state(&inner), Some(inner.last_reading))
            }
            Err(TryLockError::WouldBlock) => (SessionState::Busy, None),
        };

        SessionInfo {
            handle: self.handle,
            node: self.handle.node_name(),
            device: self.device_key,
            endpoint_address: self.endpoint.address,
            max_packet_size: self.endpoint.max_packet_size,
            state,
            last_reading,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("device_key", &self.device_key)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        DEFAULT_TEST_TIMEOUT, MockTransport, endpoints_without_interrupt_in, reply_for_raw,
        temper_endpoints,
    };
    use common::{EndpointTransfer, UsbError};

    fn mock() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(DeviceKey::new(1, 3)))
    }

    fn session_for(mock: &Arc<MockTransport>, endpoints: &[EndpointDescriptor]) -> Result<Session> {
        Session::create(
            SessionHandle(0),
            mock.clone(),
            endpoints,
            TransferTimeouts::default(),
        )
    }

    #[test]
    fn test_select_endpoint_among_others() {
        let mut endpoints = endpoints_without_interrupt_in();
        endpoints.insert(2, EndpointDescriptor::interrupt_in(2, 8));
        assert_eq!(
            select_endpoint(&endpoints),
            Some(EndpointDescriptor::interrupt_in(2, 8))
        );
    }

    #[test]
    fn test_select_endpoint_last_match_wins() {
        let endpoints = vec![
            EndpointDescriptor::interrupt_in(1, 8),
            EndpointDescriptor::new(0x02, EndpointTransfer::Bulk, 64),
            EndpointDescriptor::interrupt_in(3, 16),
        ];
        assert_eq!(select_endpoint(&endpoints).map(|e| e.address), Some(0x83));
    }

    #[test]
    fn test_create_without_endpoint_fails_and_releases() {
        let mock = mock();
        let err = session_for(&mock, &endpoints_without_interrupt_in()).unwrap_err();
        assert_eq!(err, DriverError::NoSuitableEndpoint);
        assert_eq!(Arc::strong_count(&mock), 1);

        assert_eq!(
            session_for(&mock, &[]).unwrap_err(),
            DriverError::NoSuitableEndpoint
        );
    }

    #[test]
    fn test_create_retains_device_until_teardown() {
        let mock = mock();
        let session = session_for(&mock, &temper_endpoints()).unwrap();
        assert_eq!(Arc::strong_count(&mock), 2);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.last_reading().is_unavailable());

        assert!(session.teardown());
        assert_eq!(Arc::strong_count(&mock), 1);
        assert_eq!(session.state(), SessionState::TornDown);
        assert!(!session.teardown());
    }

    #[test]
    fn test_inbound_buffer_minimum_size() {
        let mock = mock();
        let session = session_for(&mock, &[EndpointDescriptor::interrupt_in(2, 4)]).unwrap();
        session.acquire_reading().unwrap();
        assert!(matches!(
            mock.calls()[1],
            common::test_utils::TransportCall::Interrupt { len: 8, .. }
        ));
    }

    #[test]
    fn test_acquire_after_teardown_is_unknown_handle() {
        let mock = mock();
        let session = session_for(&mock, &temper_endpoints()).unwrap();
        session.teardown();
        assert_eq!(
            session.acquire_reading().unwrap_err(),
            DriverError::UnknownHandle(SessionHandle(0))
        );
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_failed_control_keeps_cached_value() {
        let mock = mock();
        let session = session_for(&mock, &temper_endpoints()).unwrap();
        mock.push_reply(reply_for_raw(400, 368));
        assert_eq!(session.acquire_reading().unwrap().as_pair(), (1200, 1104));

        mock.push_control_error(UsbError::Pipe);
        mock.push_control_error(UsbError::Timeout);
        for _ in 0..2 {
            let err = session.acquire_reading().unwrap_err();
            assert!(matches!(err, DriverError::Transfer(TransferError::Control(_))));
            assert_eq!(session.last_reading().as_pair(), (1200, 1104));
        }
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_sample_reports_cache_after_failure() {
        let mock = mock();
        let session = session_for(&mock, &temper_endpoints()).unwrap();
        mock.push_reply(reply_for_raw(400, 368));
        session.acquire_reading().unwrap();

        mock.push_interrupt_error(UsbError::Timeout);
        let (outcome, cached) = session.sample().unwrap();
        assert_eq!(outcome, Err(TransferError::Interrupt(UsbError::Timeout)));
        assert!(cached.is_unavailable());
    }

    #[test]
    fn test_info() {
        let mock = mock();
        let session = session_for(&mock, &temper_endpoints()).unwrap();
        let info = session.info();
        assert_eq!(info.node, "temper0");
        assert_eq!(info.endpoint_address, 0x82);
        assert_eq!(info.state, SessionState::Ready);
        assert_eq!(info.last_reading, Some(Reading::UNAVAILABLE));
    }

    #[test]
    fn test_alloc_failure_is_resource_exhausted() {
        assert_eq!(
            alloc_buffer("reply buffer", usize::MAX).unwrap_err(),
            DriverError::ResourceExhausted {
                what: "reply buffer",
                size: usize::MAX,
            }
        );
        assert!(alloc_buffer("reply buffer", 8).unwrap().capacity() >= 8);
    }

    #[test]
    fn test_busy_while_transfer_in_flight() {
        let mock = mock();
        let session = Arc::new(session_for(&mock, &temper_endpoints()).unwrap());
        mock.close_gate();

        let query = {
            let session = session.clone();
            std::thread::spawn(move || session.acquire_reading())
        };
        assert!(mock.wait_for_blocked_transfer(DEFAULT_TEST_TIMEOUT));

        assert_eq!(session.state(), SessionState::Busy);
        let info = session.info();
        assert_eq!(info.state, SessionState::Busy);
        assert_eq!(info.last_reading, None);

        mock.open_gate();
        assert!(query.join().unwrap().is_ok());
        assert_eq!(session.state(), SessionState::Ready);
    }
}
