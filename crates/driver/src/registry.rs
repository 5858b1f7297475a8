//! Session registry
//!
//! Maps external handles to the sessions that own each attached key, and each
//! physical device to its single session. The registry is the only long-term
//! owner of sessions; queries hold a clone of the `Arc` just for the duration
//! of one call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::{DeviceKey, EndpointDescriptor, SessionHandle, UsbTransport};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::session::Session;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionHandle, Arc<Session>>,
    by_device: HashMap<DeviceKey, SessionHandle>,
}

/// Registry of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
    /// Next handle to assign
    next_handle: AtomicU32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a session for a newly attached device
    ///
    /// The session is fully built (and primed, if configured) before it
    /// becomes visible to lookups. On error nothing is registered and the
    /// device reference is released.
    pub fn attach(
        &self,
        device: Arc<dyn UsbTransport>,
        endpoints: &[EndpointDescriptor],
        config: &DriverConfig,
    ) -> Result<SessionHandle> {
        let key = device.device_key();
        if self.read().by_device.contains_key(&key) {
            return Err(DriverError::AlreadyAttached(key));
        }

        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = Session::create(handle, device, endpoints, config.timeouts())?;

        if config.prime_on_attach {
            match session.acquire_reading() {
                Ok(reading) => debug!(
                    "Session {} primed: inner={} outer={}",
                    handle, reading.inner_milli_c, reading.outer_milli_c
                ),
                Err(e) => warn!("Session {}: initial reading failed: {}", handle, e),
            }
        }

        let mut tables = self.write();
        if tables.by_device.contains_key(&key) {
            return Err(DriverError::AlreadyAttached(key));
        }
        tables.by_device.insert(key, handle);
        tables.sessions.insert(handle, Arc::new(session));
        drop(tables);

        info!("Attached device {} as {}", key, handle.node_name());
        Ok(handle)
    }

    /// Resolve a handle to its live session
    pub fn lookup(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.read()
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(DriverError::UnknownHandle(handle))
    }

    /// Handle of the session owning a physical device
    pub fn handle_for(&self, key: DeviceKey) -> Option<SessionHandle> {
        self.read().by_device.get(&key).copied()
    }

    /// Remove a session and tear it down
    ///
    /// Returns once any in-flight transfer has finished and the session's
    /// resources are released.
    pub fn detach(&self, handle: SessionHandle) -> Result<DeviceKey> {
        let session = {
            let mut tables = self.write();
            let session = tables
                .sessions
                .remove(&handle)
                .ok_or(DriverError::UnknownHandle(handle))?;
            tables.by_device.remove(&session.device_key());
            session
        };

        let key = session.device_key();
        session.teardown();
        info!("Detached {} (device {})", handle.node_name(), key);
        Ok(key)
    }

    /// Detach the session of a physical device, if it has one
    pub fn detach_device(&self, key: DeviceKey) -> Option<SessionHandle> {
        let handle = self.handle_for(key)?;
        self.detach(handle).ok().map(|_| handle)
    }

    /// Detach every session
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut tables = self.write();
            tables.by_device.clear();
            tables.sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &sessions {
            session.teardown();
            debug!("Detached {} on shutdown", session.handle().node_name());
        }

        if !sessions.is_empty() {
            info!("Detached {} session(s)", sessions.len());
        }
        sessions.len()
    }

    /// Live sessions ordered by handle
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.read().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.handle());
        sessions
    }

    /// Physical devices that currently have a session
    pub fn devices(&self) -> Vec<DeviceKey> {
        self.read().by_device.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
