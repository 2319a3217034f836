//! unifymon: watch a Logitech receiver and pair new devices from the shell.
//!
//! Architecture:
//! - **Reader thread**: `hidpp::hidraw` reads the node and delivers reports.
//! - **Dispatcher** (tokio blocking pool): device hooks and any receiver
//!   command triggered by a notification.
//! - **Main task**: setup, then waits for Ctrl-C and cancels pairing.
//!
//! Receiver commands block, so the main task only issues them through
//! `spawn_blocking`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use unifymon::config::{self, BoltMode};
use unifymon::hidpp::{
    hidraw, DeviceConnectionEvent, DeviceDisconnectionEvent, DiscoveryEvent, PasskeyEvent,
    Receiver, ReceiverOptions,
};
use unifymon::monitor::{DeviceHooks, PairStatusUpdate, ReceiverMonitor, TaskDispatcher};

#[derive(Parser, Debug)]
#[command(name = "unifymon")]
#[command(about = "Monitor a Logitech receiver and pair new devices", long_about = None)]
struct Cli {
    /// Receiver hidraw node, e.g. /dev/hidraw3
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Read this config file instead of the XDG one
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Treat the receiver as a Bolt receiver
    #[arg(long, conflicts_with = "legacy")]
    bolt: bool,

    /// Treat the receiver as a Unifying/Nano receiver
    #[arg(long)]
    legacy: bool,

    /// Start pairing a new device right away
    #[arg(long)]
    pair: bool,

    /// Count the first report from this device index as a connection
    #[arg(long = "wait", value_name = "IDX", value_parser = clap::value_parser!(u8).range(1..=6))]
    wait: Vec<u8>,
}

/// Hooks that only report what the receiver says.
struct LoggingHooks;

impl DeviceHooks for LoggingHooks {
    fn add_device(&self, receiver: &Receiver, event: DeviceConnectionEvent) -> Result<()> {
        let name = if event.link_established {
            receiver
                .device_name(event.index)
                .wrap_err_with(|| format!("reading name of device {}", event.index))?
        } else {
            String::from("(asleep)")
        };
        info!(
            index = event.index,
            "Device {}: {name} [pid {:04x}, type {}{}{}]",
            event.index,
            event.product_id,
            event.device_type,
            if event.encrypted { ", encrypted" } else { "" },
            if event.from_timeout_check {
                ", seen by traffic"
            } else {
                ""
            },
        );
        Ok(())
    }

    fn remove_device(&self, _receiver: &Receiver, event: DeviceDisconnectionEvent) -> Result<()> {
        info!(index = event.index, "Device {} disconnected", event.index);
        Ok(())
    }

    fn pair_ready(&self, event: &DiscoveryEvent, passkey: PasskeyEvent) {
        println!("Type {passkey} then Enter on {event}");
    }

    fn pair_status(&self, update: PairStatusUpdate) {
        if update.error != 0 {
            warn!("Pairing error 0x{:02x} ({:?})", update.error, update.source);
        }
        debug!("Pairing state: {}", update.state);
    }
}

fn detect_bolt(cli: &Cli, mode: BoltMode) -> bool {
    if cli.bolt {
        return true;
    }
    if cli.legacy {
        return false;
    }
    match mode {
        BoltMode::Yes => true,
        BoltMode::No => false,
        BoltMode::Auto => hidraw::is_bolt(&cli.path).unwrap_or_else(|e| {
            warn!(
                "Cannot read product id of {}: {e}; assuming a legacy receiver",
                cli.path.display()
            );
            false
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Error handling & logging ─────────────────────────────────────────
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr) // passkey prompts own stdout
        .init();

    config::init(cli.config.as_deref())?;
    let cfg = config::get();

    // ── Receiver ────────────────────────────────────────────────────────
    let options = ReceiverOptions {
        bolt: detect_bolt(&cli, cfg.receiver.bolt),
        command_timeout: cfg.receiver.command_timeout,
        bolt_entropy: cfg.pairing.bolt_entropy,
    };
    let dispatcher = TaskDispatcher::current()?;
    let path = cli.path.clone();

    let monitor = tokio::task::spawn_blocking(move || {
        let monitor = ReceiverMonitor::open(&path, hidraw::open, options, LoggingHooks, dispatcher)
            .wrap_err_with(|| format!("opening receiver {}", path.display()))?;
        monitor.ready().wrap_err("enumerating paired devices")?;
        Ok::<_, color_eyre::Report>(monitor)
    })
    .await??;
    let monitor = Arc::new(monitor);

    let mut wait = cfg.monitor.wait_for_devices.clone();
    wait.extend(&cli.wait);
    wait.sort_unstable();
    wait.dedup();
    for index in wait {
        monitor.wait_for_device(index);
    }

    if cli.pair {
        let m = monitor.clone();
        let timeout = cfg.pairing.timeout_secs;
        tokio::task::spawn_blocking(move || m.start_pair(timeout))
            .await?
            .wrap_err("starting pairing")?;
        info!("Pairing for {timeout}s, press Ctrl-C to cancel");
    }

    // ── Wait for Ctrl-C ─────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;

    let m = monitor.clone();
    match tokio::task::spawn_blocking(move || m.stop_pair()).await? {
        Ok(last) => debug!("Stopped while {last}"),
        Err(e) => warn!("Failed to stop pairing: {e}"),
    }

    info!("unifymon exiting");
    Ok(())
}
