//! USB device manager
//!
//! Handles enumeration and hot-plug for TEMPer2 keys. Runs on the USB worker
//! thread: matched devices are opened and attached to the driver, vanished
//! ones are detached.

use common::{DeviceKey, DriverEvent};
use protocol::{PRODUCT_ID, VENDOR_ID};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::DriverError;
use crate::exposure::TemperDriver;
use crate::usb::device::UsbDevice;
use crate::usb::transfers::map_rusb_error;

/// Notification from the libusb hot-plug callback
///
/// The callback runs inside `handle_events` where devices must not be opened,
/// so it only queues what happened for the worker loop.
pub enum HotplugEvent {
    Arrived(Device<Context>),
    Left(DeviceKey),
}

/// USB device manager
pub struct DeviceManager {
    context: Context,
    driver: Arc<TemperDriver>,
    /// Hot-plug registration, kept alive for the manager's lifetime
    _hotplug_registration: Option<Registration<Context>>,
    hotplug_tx: async_channel::Sender<HotplugEvent>,
    hotplug_rx: async_channel::Receiver<HotplugEvent>,
    /// Driver events for the front-end
    event_sender: async_channel::Sender<DriverEvent>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        driver: Arc<TemperDriver>,
        event_sender: async_channel::Sender<DriverEvent>,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = async_channel::unbounded();

        Ok(Self {
            context,
            driver,
            _hotplug_registration: None,
            hotplug_tx,
            hotplug_rx,
            event_sender,
        })
    }

    /// Attach keys already present and register hot-plug callbacks
    ///
    /// Returns the number of sessions after enumeration.
    pub fn initialize(&mut self) -> Result<usize, rusb::Error> {
        self.enumerate_devices()?;
        self.register_hotplug()?;

        let sessions = self.driver.registry().len();
        info!("Device manager initialized with {} session(s)", sessions);
        Ok(sessions)
    }

    /// Whether arrivals and departures are reported by libusb
    pub fn has_hotplug(&self) -> bool {
        self._hotplug_registration.is_some()
    }

    fn enumerate_devices(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;
        for device in devices.iter() {
            self.handle_device_arrived(device);
        }
        debug!("Enumerated {} device(s)", devices.len());
        Ok(())
    }

    fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb has no hot-plug support; falling back to rescans");
            return Ok(());
        }

        let callback = HotplugCallback {
            sender: self.hotplug_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .vendor_id(VENDOR_ID)
            .product_id(PRODUCT_ID)
            .enumerate(false) // We already enumerated
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    fn emit(&self, event: DriverEvent) {
        if let Err(e) = self.event_sender.try_send(event) {
            debug!("Dropped driver event: {}", e);
        }
    }

    /// Open and attach a device if it is an unattached TEMPer2 key
    pub fn handle_device_arrived(&mut self, device: Device<Context>) {
        let usb_device = match UsbDevice::new(device) {
            Ok(d) => d,
            Err(e) => {
                debug!("Skipping device without readable descriptor: {}", e);
                return;
            }
        };

        if !usb_device.is_temper() {
            return;
        }

        let key = usb_device.key();
        if self.driver.registry().handle_for(key).is_some() {
            return;
        }

        debug!(
            "Found device {}: vid={:#06x}, pid={:#06x}",
            key,
            usb_device.vendor_id(),
            usb_device.product_id()
        );

        match self.attach(&usb_device) {
            Ok(handle) => {
                let reading = self.driver.last_reading(handle).unwrap_or_default();
                self.emit(DriverEvent::Attached {
                    handle,
                    device: key,
                    reading,
                });
            }
            Err(e) => {
                error!("Failed to attach device {}: {}", key, e);
                self.emit(DriverEvent::AttachFailed {
                    device: key,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn attach(&self, usb_device: &UsbDevice) -> Result<common::SessionHandle, DriverError> {
        let endpoints = usb_device
            .data_endpoints()
            .map_err(|e| DriverError::Usb(map_rusb_error(e)))?;
        let transport = usb_device
            .open()
            .map_err(|e| DriverError::Usb(map_rusb_error(e)))?;

        self.driver.attach(Arc::new(transport), &endpoints)
    }

    /// Detach the session of a device that went away
    pub fn handle_device_left(&mut self, key: DeviceKey) {
        if let Some(handle) = self.driver.detach_device(key) {
            self.emit(DriverEvent::Detached {
                handle,
                device: key,
            });
        }
    }

    /// Re-enumerate: attach new keys, detach vanished ones
    pub fn rescan(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;
        let mut present = HashSet::new();

        for device in devices.iter() {
            present.insert(DeviceKey::new(device.bus_number(), device.address()));
            self.handle_device_arrived(device);
        }

        for key in self.driver.registry().devices() {
            if !present.contains(&key) {
                info!("Device {} disappeared", key);
                self.handle_device_left(key);
            }
        }
        Ok(())
    }

    /// Apply hot-plug notifications queued by the callback
    pub fn process_hotplug_events(&mut self) {
        while let Ok(event) = self.hotplug_rx.try_recv() {
            match event {
                HotplugEvent::Arrived(device) => self.handle_device_arrived(device),
                HotplugEvent::Left(key) => self.handle_device_left(key),
            }
        }
    }

    /// Detach every session, reporting each
    pub fn shutdown(&mut self) -> usize {
        let sessions = self.driver.registry().sessions();
        let mut count = 0;
        for session in sessions {
            if self.driver.detach(session.handle()).is_ok() {
                self.emit(DriverEvent::Detached {
                    handle: session.handle(),
                    device: session.device_key(),
                });
                count += 1;
            }
        }
        count
    }

    /// Get USB context
    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Hot-plug callback handler
struct HotplugCallback {
    sender: async_channel::Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.sender.try_send(HotplugEvent::Arrived(device)) {
            warn!("Failed to queue hot-plug arrival: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let key = DeviceKey::new(device.bus_number(), device.address());
        debug!("Hot-plug callback: device left ({})", key);
        if let Err(e) = self.sender.try_send(HotplugEvent::Left(key)) {
            warn!("Failed to queue hot-plug departure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_creation() {
        let (tx, _rx) = async_channel::bounded(1);
        let driver = Arc::new(TemperDriver::default());

        // Context creation may fail in sandboxes without USB access
        match DeviceManager::new(driver, tx) {
            Ok(manager) => {
                assert!(!manager.has_hotplug());
                assert!(manager.hotplug_rx.is_empty());
            }
            Err(e) => eprintln!("USB context unavailable: {}", e),
        }
    }

    #[test]
    fn test_left_without_session_is_silent() {
        let (tx, rx) = async_channel::bounded(4);
        let driver = Arc::new(TemperDriver::default());

        if let Ok(mut manager) = DeviceManager::new(driver, tx) {
            manager.handle_device_left(DeviceKey::new(1, 2));
            assert!(rx.try_recv().is_err());
        }
    }
}
