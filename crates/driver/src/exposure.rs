//! Exposure layer
//!
//! [`TemperDriver`] is the process-wide driver context. It owns the session
//! registry and offers the two query surfaces of an attached key:
//!
//! - the snapshot query, backing a read-only attribute file showing both
//!   temperatures;
//! - the command query, backing the per-device node's `GET_INNER` /
//!   `GET_OUTER` verbs.
//!
//! Both acquire a fresh reading synchronously on the calling thread.

use std::sync::Arc;

use common::{DeviceKey, EndpointDescriptor, SessionHandle, UsbTransport};
use protocol::{Probe, Reading, probe_for_command, render_snapshot};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result, TransferError};
use crate::registry::SessionRegistry;
use crate::session::SessionInfo;

/// Result of a snapshot query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Fresh reading, or the session's cached value if acquisition failed
    pub reading: Reading,
    /// Why the reading is not fresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TransferError>,
}

impl Snapshot {
    pub fn is_fresh(&self) -> bool {
        self.failure.is_none()
    }

    /// Attribute-file text
    pub fn render(&self) -> String {
        render_snapshot(&self.reading)
    }
}

/// Driver context
pub struct TemperDriver {
    registry: SessionRegistry,
    config: DriverConfig,
}

impl TemperDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Attach a matched device
    pub fn attach(
        &self,
        device: Arc<dyn UsbTransport>,
        endpoints: &[EndpointDescriptor],
    ) -> Result<SessionHandle> {
        self.registry.attach(device, endpoints, &self.config)
    }

    /// Detach by handle; returns once the session is fully torn down
    pub fn detach(&self, handle: SessionHandle) -> Result<DeviceKey> {
        self.registry.detach(handle)
    }

    /// Detach by physical device (hot-unplug)
    pub fn detach_device(&self, key: DeviceKey) -> Option<SessionHandle> {
        self.registry.detach_device(key)
    }

    /// Detach everything (driver unload)
    pub fn shutdown(&self) -> usize {
        self.registry.shutdown()
    }

    /// Snapshot query: acquire both temperatures
    ///
    /// A transfer failure does not fail the query. The snapshot then carries
    /// the cached value left by the attempt (previous good value after a
    /// control failure, the sentinel after an interrupt failure) and the
    /// failure itself.
    pub fn snapshot_query(&self, handle: SessionHandle) -> Result<Snapshot> {
        let session = self.registry.lookup(handle)?;
        let (outcome, cached) = session.sample()?;

        match outcome {
            Ok(reading) => Ok(Snapshot {
                reading,
                failure: None,
            }),
            Err(e) => {
                warn!("{}: snapshot served from cache: {}", handle.node_name(), e);
                Ok(Snapshot {
                    reading: cached,
                    failure: Some(e),
                })
            }
        }
    }

    /// Command query: run a verb of the device node
    ///
    /// Unknown verbs fail with `InvalidRequest` without touching the device;
    /// transfer failures are reported as `Fault`.
    pub fn command_query(&self, handle: SessionHandle, code: u32) -> Result<i32> {
        let session = self.registry.lookup(handle)?;
        let probe = probe_for_command(code).map_err(|_| {
            warn!("{}: unknown command {:#010x}", handle.node_name(), code);
            DriverError::InvalidRequest(code)
        })?;

        let reading = session.acquire_reading().map_err(|e| match e {
            DriverError::Transfer(e) => DriverError::Fault(e),
            other => other,
        })?;

        let value = reading.get(probe);
        debug!("{}: {} = {}", handle.node_name(), probe, value);
        Ok(value)
    }

    /// Command query by probe instead of verb code
    pub fn read_probe(&self, handle: SessionHandle, probe: Probe) -> Result<i32> {
        self.command_query(handle, protocol::command_for_probe(probe))
    }

    /// Cached reading without any I/O
    pub fn last_reading(&self, handle: SessionHandle) -> Result<Reading> {
        Ok(self.registry.lookup(handle)?.last_reading())
    }

    /// Attached sessions ordered by handle
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registry.sessions().iter().map(|s| s.info()).collect()
    }
}

impl Default for TemperDriver {
    fn default() -> Self {
        Self::new(DriverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UsbError;
    use common::test_utils::{MockTransport, reply_for_raw, temper_endpoints};
    use protocol::{GET_INNER, GET_OUTER};

    fn attached(prime: bool) -> (TemperDriver, Arc<MockTransport>, SessionHandle) {
        let driver = TemperDriver::new(DriverConfig {
            prime_on_attach: prime,
            ..DriverConfig::default()
        });
        let mock = Arc::new(MockTransport::new(DeviceKey::new(1, 2)));
        let handle = driver.attach(mock.clone(), &temper_endpoints()).unwrap();
        (driver, mock, handle)
    }

    #[test]
    fn test_snapshot_fresh() {
        let (driver, mock, handle) = attached(false);
        mock.push_reply(reply_for_raw(400, 368));

        let snapshot = driver.snapshot_query(handle).unwrap();
        assert!(snapshot.is_fresh());
        assert_eq!(snapshot.reading.as_pair(), (1200, 1104));
        assert_eq!(
            snapshot.render(),
            "Temperature in:    1.200°C\nTemperature out:   1.104°C\n"
        );
    }

    #[test]
    fn test_snapshot_after_control_failure_keeps_previous() {
        let (driver, mock, handle) = attached(false);
        mock.push_reply(reply_for_raw(400, 368));
        driver.snapshot_query(handle).unwrap();

        mock.push_control_error(UsbError::Timeout);
        let snapshot = driver.snapshot_query(handle).unwrap();
        assert_eq!(
            snapshot.failure,
            Some(TransferError::Control(UsbError::Timeout))
        );
        assert_eq!(snapshot.reading.as_pair(), (1200, 1104));
    }

    #[test]
    fn test_snapshot_after_interrupt_failure_is_sentinel() {
        let (driver, mock, handle) = attached(false);
        mock.push_reply(reply_for_raw(400, 368));
        driver.snapshot_query(handle).unwrap();

        mock.push_interrupt_error(UsbError::Pipe);
        let snapshot = driver.snapshot_query(handle).unwrap();
        assert!(!snapshot.is_fresh());
        assert!(snapshot.reading.is_unavailable());
    }

    #[test]
    fn test_command_query_selects_half() {
        let (driver, mock, handle) = attached(false);
        mock.set_default_reply(reply_for_raw(400, 368));

        assert_eq!(driver.command_query(handle, GET_INNER), Ok(1200));
        assert_eq!(driver.command_query(handle, GET_OUTER), Ok(1104));
        assert_eq!(driver.read_probe(handle, Probe::Outer), Ok(1104));
        assert_eq!(mock.control_count(), 3);
    }

    #[test]
    fn test_command_query_unknown_verb() {
        let (driver, mock, handle) = attached(false);
        assert_eq!(
            driver.command_query(handle, 0x1234),
            Err(DriverError::InvalidRequest(0x1234))
        );
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_command_query_transfer_failure_is_fault() {
        let (driver, mock, handle) = attached(false);
        mock.push_interrupt_error(UsbError::Io);

        let err = driver.command_query(handle, GET_INNER).unwrap_err();
        assert_eq!(err, DriverError::Fault(TransferError::Interrupt(UsbError::Io)));
        assert_eq!(err.errno(), -14);
    }

    #[test]
    fn test_unknown_handle() {
        let driver = TemperDriver::default();
        let handle = SessionHandle(42);
        assert_eq!(
            driver.snapshot_query(handle),
            Err(DriverError::UnknownHandle(handle))
        );
        assert_eq!(
            driver.command_query(handle, GET_INNER),
            Err(DriverError::UnknownHandle(handle))
        );
        // Handle resolution comes before verb validation
        assert_eq!(
            driver.command_query(handle, 0),
            Err(DriverError::UnknownHandle(handle))
        );
    }

    #[test]
    fn test_list_sessions_and_cache() {
        let (driver, mock, handle) = attached(false);
        mock.push_reply(reply_for_raw(10, 20));
        driver.snapshot_query(handle).unwrap();

        let sessions = driver.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].handle, handle);
        assert_eq!(sessions[0].last_reading, Some(Reading::new(30, 60)));
        assert_eq!(driver.last_reading(handle), Ok(Reading::new(30, 60)));
    }
}
