//! USB device abstraction
//!
//! This module wraps `rusb::Device` with its cached descriptor, and opens
//! matched keys into a [`RusbTransport`] the driver core can run transfers on.

use common::{DeviceKey, EndpointDescriptor, EndpointTransfer};
use protocol::{DATA_INTERFACE, matches_device};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle};
use tracing::{debug, warn};

/// USB device wrapper with cached information
pub struct UsbDevice {
    device: Device<Context>,
    descriptor: DeviceDescriptor,
}

impl UsbDevice {
    /// Create a new USB device wrapper
    ///
    /// Reads and caches the device descriptor.
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        Ok(Self { device, descriptor })
    }

    /// Bus identity of the device
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.device.bus_number(), self.device.address())
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id()
    }

    /// Whether this is a TEMPer2 key
    pub fn is_temper(&self) -> bool {
        matches_device(self.vendor_id(), self.product_id())
    }

    /// Endpoints of the data interface's default alternate setting
    ///
    /// The driver never issues SET_INTERFACE, so setting 0 is the active one
    /// once the device is configured. Returned in descriptor order.
    pub fn data_endpoints(&self) -> Result<Vec<EndpointDescriptor>, rusb::Error> {
        let config = self.device.active_config_descriptor()?;
        let interface = config
            .interfaces()
            .find(|i| i.number() == DATA_INTERFACE)
            .ok_or(rusb::Error::NotFound)?;
        let setting = default_setting(interface.descriptors(), |d| d.setting_number())
            .ok_or(rusb::Error::NotFound)?;

        Ok(setting
            .endpoint_descriptors()
            .map(|ep| {
                EndpointDescriptor::new(
                    ep.address(),
                    map_transfer_type(ep.transfer_type()),
                    ep.max_packet_size(),
                )
            })
            .collect())
    }

    /// Open the device for transfers
    ///
    /// Detaches kernel drivers from and claims every interface of the active
    /// configuration. If any interface can't be claimed, those already
    /// claimed are given back before the error is returned.
    pub fn open(&self) -> Result<RusbTransport, rusb::Error> {
        let key = self.key();
        let handle = self.device.open().inspect_err(|e| {
            warn!("Failed to open device {}: {}", key, e);
        })?;
        debug!("Opened device {}", key);

        let config = self.device.active_config_descriptor()?;
        let mut transport = RusbTransport {
            key,
            handle,
            claimed: Vec::new(),
        };

        for interface in config.interfaces() {
            let number = interface.number();

            match transport.handle.kernel_driver_active(number) {
                Ok(true) => {
                    debug!(
                        "Detaching kernel driver from interface {} on device {}",
                        number, key
                    );
                    if let Err(e) = transport.handle.detach_kernel_driver(number) {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            number, e
                        );
                    }
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", number);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        number, e
                    );
                }
            }

            // Dropping `transport` on error releases what was claimed so far
            transport.handle.claim_interface(number).inspect_err(|e| {
                warn!("Failed to claim interface {} on device {}: {}", number, key, e);
            })?;

            debug!("Claimed interface {} on device {}", number, key);
            transport.claimed.push(number);
        }

        Ok(transport)
    }
}

/// Opened TEMPer2 key
///
/// Dropping it releases the claimed interfaces and hands them back to the
/// kernel drivers.
pub struct RusbTransport {
    pub(crate) key: DeviceKey,
    pub(crate) handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        for &interface in &self.claimed {
            if let Err(e) = self.handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }

            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                    interface, e
                );
            } else {
                debug!(
                    "Reattached kernel driver to interface {} on device {}",
                    interface, self.key
                );
            }
        }
        debug!("Closed device {}", self.key);
    }
}

/// Alternate setting 0 of an interface, whatever order the settings come in
fn default_setting<T>(
    mut settings: impl Iterator<Item = T>,
    number: impl Fn(&T) -> u8,
) -> Option<T> {
    settings.find(|s| number(s) == 0)
}

/// Map rusb's endpoint transfer type
pub(crate) fn map_transfer_type(transfer: rusb::TransferType) -> EndpointTransfer {
    match transfer {
        rusb::TransferType::Control => EndpointTransfer::Control,
        rusb::TransferType::Isochronous => EndpointTransfer::Isochronous,
        rusb::TransferType::Bulk => EndpointTransfer::Bulk,
        rusb::TransferType::Interrupt => EndpointTransfer::Interrupt,
    }
}
