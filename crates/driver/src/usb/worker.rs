//! USB worker thread
//!
//! Dedicated thread owning the libusb context. It runs the `handle_events`
//! loop, applies hot-plug notifications and serializes every attach and
//! detach. Queries never go through it: they run against [`TemperDriver`]
//! on the caller's thread.

use crate::exposure::TemperDriver;
use crate::usb::manager::DeviceManager;
use common::{DriverEvent, DriverWorker, WorkerCommand};
use rusb::UsbContext;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long one `handle_events` round may block
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bus rescan period when libusb has no hot-plug support
const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

/// USB worker thread
pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: DriverWorker,
    sessions: usize,
}

impl UsbWorkerThread {
    /// Create the device manager and attach keys already plugged in
    pub fn new(worker: DriverWorker, driver: Arc<TemperDriver>) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(driver, worker.event_tx.clone())?;
        let sessions = manager.initialize()?;

        Ok(Self {
            manager,
            worker,
            sessions,
        })
    }

    /// Run the event loop until `Shutdown` (or the front-end goes away)
    ///
    /// Every session is detached before returning.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");
        if let Err(e) = self.worker.send_event(DriverEvent::Ready {
            sessions: self.sessions,
        }) {
            warn!("Front-end gone before ready: {}", e);
        }

        let mut last_rescan = Instant::now();

        loop {
            match self.worker.try_recv_command() {
                Some(WorkerCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(WorkerCommand::Rescan) => {
                    self.rescan();
                    last_rescan = Instant::now();
                }
                None => {}
            }

            match self.manager.context().handle_events(Some(EVENT_POLL_INTERVAL)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_POLL_INTERVAL);
                }
            }

            self.manager.process_hotplug_events();

            if !self.manager.has_hotplug() && last_rescan.elapsed() >= RESCAN_INTERVAL {
                self.rescan();
                last_rescan = Instant::now();
            }
        }

        let detached = self.manager.shutdown();
        debug!("Detached {} session(s) on shutdown", detached);
        let _ = self.worker.send_event(DriverEvent::Stopped);

        info!("USB worker thread stopped");
        Ok(())
    }

    fn rescan(&mut self) {
        if let Err(e) = self.manager.rescan() {
            warn!("Rescan failed: {}", e);
        }
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until a `Shutdown` command is received or initialization
/// fails. In the latter case `Stopped` is reported so the front-end does not
/// wait for `Ready` forever.
pub fn spawn_usb_worker(
    worker: DriverWorker,
    driver: Arc<TemperDriver>,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let events = worker.event_tx.clone();
            match UsbWorkerThread::new(worker, driver) {
                Ok(worker_thread) => worker_thread.run(),
                Err(e) => {
                    error!("USB worker initialization failed: {}", e);
                    let _ = events.try_send(DriverEvent::Stopped);
                    Err(e)
                }
            }
        })
}
