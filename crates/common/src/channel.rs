//! Async channel bridge between the front-end runtime and the USB worker thread
//!
//! Attach and detach are serialized on the worker thread. The front-end only
//! sends it commands and listens to the events it reports; queries bypass the
//! worker and run directly against the driver on the calling thread.

use async_channel::{Receiver, Sender, bounded};
use protocol::Reading;

use crate::usb_types::{DeviceKey, SessionHandle};

/// Commands from the front-end to the USB worker thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Re-enumerate the bus and attach any matching device not yet attached
    ///
    /// Used on platforms where libusb has no hot-plug support.
    Rescan,

    /// Detach every session and stop the worker
    Shutdown,
}

/// Events reported by the USB worker thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Initial enumeration finished
    Ready {
        /// Number of sessions attached during enumeration
        sessions: usize,
    },

    /// A session was created for a physical device
    Attached {
        handle: SessionHandle,
        device: DeviceKey,
        /// Cached reading right after attach (sentinel if priming failed or is off)
        reading: Reading,
    },

    /// A matching device could not be attached
    AttachFailed {
        device: DeviceKey,
        reason: String,
    },

    /// A session was torn down
    Detached {
        handle: SessionHandle,
        device: DeviceKey,
    },

    /// The worker exited its loop
    Stopped,
}

/// Handle for the front-end runtime (async)
#[derive(Clone)]
pub struct DriverBridge {
    cmd_tx: Sender<WorkerCommand>,
    event_rx: Receiver<DriverEvent>,
}

impl DriverBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: WorkerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<DriverEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the end of the initial enumeration
    ///
    /// Attach events seen on the way are returned so the caller can report them.
    pub async fn wait_ready(&self) -> crate::Result<(usize, Vec<DriverEvent>)> {
        let mut seen = Vec::new();
        loop {
            match self.recv_event().await? {
                DriverEvent::Ready { sessions } => return Ok((sessions, seen)),
                DriverEvent::Stopped => {
                    return Err(crate::Error::Channel(
                        "USB worker stopped before becoming ready".to_string(),
                    ));
                }
                other => seen.push(other),
            }
        }
    }
}

/// Handle for the USB thread (blocking)
pub struct DriverWorker {
    cmd_rx: Receiver<WorkerCommand>,
    /// Event sender (public so hot-plug plumbing can report from the worker thread)
    pub event_tx: Sender<DriverEvent>,
}

impl DriverWorker {
    /// Receive a command (blocking)
    pub fn recv_command(&self) -> crate::Result<WorkerCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    ///
    /// A closed channel reads as `Shutdown`: nobody is left to serve.
    pub fn try_recv_command(&self) -> Option<WorkerCommand> {
        match self.cmd_rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(async_channel::TryRecvError::Empty) => None,
            Err(async_channel::TryRecvError::Closed) => Some(WorkerCommand::Shutdown),
        }
    }

    /// Send an event (blocking)
    pub fn send_event(&self, event: DriverEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between the front-end and the USB thread
///
/// Returns (DriverBridge for the front-end, DriverWorker for the USB thread)
pub fn create_driver_bridge() -> (DriverBridge, DriverWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(256);

    (
        DriverBridge { cmd_tx, event_rx },
        DriverWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_driver_bridge();

        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            cmd == WorkerCommand::Shutdown
        });

        bridge.send_command(WorkerCommand::Shutdown).await.unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_closed_command_channel_reads_as_shutdown() {
        let (bridge, worker) = create_driver_bridge();
        assert_eq!(worker.try_recv_command(), None);
        drop(bridge);
        assert_eq!(worker.try_recv_command(), Some(WorkerCommand::Shutdown));
    }

    #[tokio::test]
    async fn test_wait_ready_collects_attach_events() {
        let (bridge, worker) = create_driver_bridge();
        let attached = DriverEvent::Attached {
            handle: SessionHandle(0),
            device: DeviceKey::new(1, 4),
            reading: Reading::new(1200, 1104),
        };

        worker.send_event(attached.clone()).unwrap();
        worker.send_event(DriverEvent::Ready { sessions: 1 }).unwrap();

        let (sessions, seen) = bridge.wait_ready().await.unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(seen, vec![attached]);
    }

    #[tokio::test]
    async fn test_wait_ready_fails_when_stopped() {
        let (bridge, worker) = create_driver_bridge();
        worker.send_event(DriverEvent::Stopped).unwrap();
        assert!(bridge.wait_ready().await.is_err());
    }
}
