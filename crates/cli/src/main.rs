//! temper
//!
//! Reads the inner and outer probes of TEMPer2 USB temperature keys.
//! Matched keys are attached by a USB worker thread; queries then run the
//! key's command/reply exchange directly.

mod config;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::{
    DriverBridge, DriverEvent, SessionHandle, WorkerCommand, create_driver_bridge, setup_logging,
};
use driver::usb::spawn_usb_worker;
use driver::{DriverError, TemperDriver};
use protocol::{Probe, render_probe};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "temper")]
#[command(author, version, about = "Read TEMPer2 USB temperature keys")]
#[command(long_about = "
Reads the inner (on-board) and outer (cable) temperature probes of TEMPer2
USB keys (0c45:7401). Values are printed in degrees Celsius with three
decimals.

EXAMPLES:
    # Both probes of the first key
    temper read

    # Outer probe of session 1
    temper get outer --device 1

    # Report keys as they are plugged and unplugged
    temper watch

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/temper/temper.toml
    3. /etc/temper/temper.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached keys
    List,

    /// Read both probes
    Read {
        /// Session number (defaults to the first attached key)
        #[arg(short, long, value_name = "N")]
        device: Option<u32>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Read one probe
    Get {
        /// Probe to read: i, o, inner or outer
        probe: Probe,

        /// Session number (defaults to the first attached key)
        #[arg(short, long, value_name = "N")]
        device: Option<u32>,
    },

    /// Report attach and detach events until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("temper v{}", env!("CARGO_PKG_VERSION"));

    let driver = Arc::new(TemperDriver::new(config.driver.clone()));
    let (bridge, worker) = create_driver_bridge();
    let worker_handle =
        spawn_usb_worker(worker, driver.clone()).context("Failed to spawn USB worker thread")?;

    let result = match bridge.wait_ready().await {
        Ok((sessions, startup)) => {
            info!("USB subsystem ready with {} key(s)", sessions);
            let command = args.command.unwrap_or(Command::List);
            run_command(command, &driver, &bridge, startup).await
        }
        Err(e) => Err(anyhow!(e).context("USB subsystem failed to start")),
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(&bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    match tokio::task::spawn_blocking(move || worker_handle.join()).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("USB worker exited with error: {}", e),
        Ok(Err(e)) => error!("USB worker thread panicked: {:?}", e),
        Err(e) => error!("Failed to join USB worker: {}", e),
    }

    result
}

async fn run_command(
    command: Command,
    driver: &Arc<TemperDriver>,
    bridge: &DriverBridge,
    startup: Vec<DriverEvent>,
) -> Result<ExitCode> {
    match command {
        Command::List => list_sessions(driver),
        Command::Read { device, json } => read_snapshot(driver, device, json).await,
        Command::Get { probe, device } => read_probe(driver, probe, device).await,
        Command::Watch => watch(bridge, startup).await,
    }
}

fn list_sessions(driver: &TemperDriver) -> Result<ExitCode> {
    let sessions = driver.list_sessions();

    if sessions.is_empty() {
        println!("No TEMPer2 keys attached.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} TEMPer2 key(s):\n", sessions.len());
    for session in sessions {
        println!(
            "  [{}] {}  Bus {:03} Device {:03}",
            session.handle, session.node, session.device.bus, session.device.address
        );
        println!(
            "      Endpoint {:#04x} ({} byte packets), {:?}",
            session.endpoint_address, session.max_packet_size, session.state
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Session to query: the requested one, or the first attached key
fn resolve_handle(driver: &TemperDriver, device: Option<u32>) -> Result<SessionHandle> {
    if let Some(n) = device {
        return Ok(SessionHandle(n));
    }
    driver
        .list_sessions()
        .first()
        .map(|s| s.handle)
        .ok_or_else(|| anyhow!("No TEMPer2 key attached"))
}

async fn read_snapshot(
    driver: &Arc<TemperDriver>,
    device: Option<u32>,
    json: bool,
) -> Result<ExitCode> {
    let handle = resolve_handle(driver, device)?;
    let driver = driver.clone();
    let snapshot = tokio::task::spawn_blocking(move || driver.snapshot_query(handle))
        .await
        .context("Query task failed")?;

    let snapshot = match snapshot {
        Ok(s) => s,
        Err(e) => return Ok(report_failure(handle, &e)),
    };

    if json {
        let text = serde_json::to_string_pretty(&snapshot).context("Failed to encode JSON")?;
        println!("{}", text);
    } else {
        print!("{}", snapshot.render());
    }

    match snapshot.failure {
        None => Ok(ExitCode::SUCCESS),
        Some(e) => {
            warn!("Reading of {} is not fresh: {}", handle.node_name(), e);
            Ok(exit_code(e.code()))
        }
    }
}

async fn read_probe(
    driver: &Arc<TemperDriver>,
    probe: Probe,
    device: Option<u32>,
) -> Result<ExitCode> {
    let handle = resolve_handle(driver, device)?;
    let driver = driver.clone();
    let value = tokio::task::spawn_blocking(move || driver.read_probe(handle, probe))
        .await
        .context("Query task failed")?;

    match value {
        Ok(value) => {
            println!("{}", render_probe(probe, value));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(handle, &e)),
    }
}

/// Print the events of keys attached during startup, then live ones
async fn watch(bridge: &DriverBridge, startup: Vec<DriverEvent>) -> Result<ExitCode> {
    println!("Watching for TEMPer2 keys (Ctrl+C to stop)...");
    for event in &startup {
        if let Some(text) = describe_event(event) {
            print!("{}", text);
        }
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
                return Ok(ExitCode::SUCCESS);
            }
            event = bridge.recv_event() => {
                let event = event.context("USB worker stopped")?;
                if matches!(event, DriverEvent::Stopped) {
                    bail!("USB worker stopped");
                }
                if let Some(text) = describe_event(&event) {
                    print!("{}", text);
                }
            }
        }
    }
}

/// Text printed by `watch` for one worker event
fn describe_event(event: &DriverEvent) -> Option<String> {
    match event {
        DriverEvent::Attached {
            handle,
            device,
            reading,
        } => {
            let mut text = format!("attached {} as {}\n", device, handle.node_name());
            if !reading.is_unavailable() {
                text.push_str(&protocol::render_snapshot(reading));
            }
            Some(text)
        }
        DriverEvent::AttachFailed { device, reason } => {
            Some(format!("failed to attach {}: {}\n", device, reason))
        }
        DriverEvent::Detached { handle, device } => {
            Some(format!("detached {} ({})\n", handle.node_name(), device))
        }
        DriverEvent::Ready { .. } | DriverEvent::Stopped => None,
    }
}

fn report_failure(handle: SessionHandle, err: &DriverError) -> ExitCode {
    eprintln!("{}: {}", handle.node_name(), err);
    exit_code(err.errno())
}

/// Process exit status for a negative errno-style code
fn exit_code(errno: i32) -> ExitCode {
    let status = errno.unsigned_abs().clamp(1, 255);
    ExitCode::from(status as u8)
}

async fn shutdown_usb_worker(bridge: &DriverBridge) -> Result<()> {
    bridge
        .send_command(WorkerCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DeviceKey;
    use protocol::Reading;

    #[test]
    fn test_describe_attached_with_primed_reading() {
        let event = DriverEvent::Attached {
            handle: SessionHandle(0),
            device: DeviceKey::new(1, 4),
            reading: Reading::new(1200, 1104),
        };
        let text = describe_event(&event).unwrap();
        assert!(text.starts_with("attached 001:004 as temper0\n"));
        assert!(text.ends_with(&protocol::render_snapshot(&Reading::new(1200, 1104))));
    }

    #[test]
    fn test_describe_attached_without_reading() {
        let event = DriverEvent::Attached {
            handle: SessionHandle(2),
            device: DeviceKey::new(3, 7),
            reading: Reading::UNAVAILABLE,
        };
        assert_eq!(
            describe_event(&event).unwrap(),
            "attached 003:007 as temper2\n"
        );
    }

    #[test]
    fn test_describe_lifecycle_events() {
        let detached = DriverEvent::Detached {
            handle: SessionHandle(1),
            device: DeviceKey::new(1, 4),
        };
        assert_eq!(
            describe_event(&detached).unwrap(),
            "detached temper1 (001:004)\n"
        );
        assert!(describe_event(&DriverEvent::Ready { sessions: 1 }).is_none());
        assert!(describe_event(&DriverEvent::Stopped).is_none());
    }
}
