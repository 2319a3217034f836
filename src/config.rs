//! Configuration system with embedded defaults and XDG-compliant paths.
//!
//! Boot sequence:
//! 1. Parse the embedded `default_config.toml` (compile-time guarantee it exists).
//! 2. Resolve `~/.config/unifymon/config.toml` via the `directories` crate,
//!    unless an explicit path was given on the command line.
//! 3. If the XDG file doesn't exist, create the directory tree and write the default.
//! 4. Parse the file (falling back to embedded defaults on any error).
//! 5. Store the resolved `Config` in a `OnceLock` for zero-cost global access.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hidpp::DeviceIndex;

/// Embedded default configuration, baked into the binary at compile time.
const DEFAULT_CONFIG_STR: &str = include_str!("../default_config.toml");

/// Application-wide config singleton.
static CONFIG: OnceLock<Config> = OnceLock::new();

// ─── Public API ─────────────────────────────────────────────────────────────

/// Initialise the configuration system. Must be called exactly once at
/// startup, **after** tracing and before any other module calls `get()`.
pub fn init(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    CONFIG
        .set(config)
        .map_err(|_| eyre!("Config already initialised"))?;
    Ok(())
}

/// Return a static reference to the loaded configuration.
/// # Panics
/// Panics if `init()` has not been called yet.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init() was not called")
}

// ─── Loading logic ──────────────────────────────────────────────────────────

fn load(explicit: Option<&Path>) -> Result<Config> {
    // 1. Parse compiled-in defaults, the infallible baseline.
    let defaults: RawConfig = toml::from_str(DEFAULT_CONFIG_STR)
        .wrap_err("BUG: failed to parse embedded default_config.toml")?;

    // 2. Resolve the config path; 3. bootstrap the XDG file on first run.
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = config_path();
            ensure_config_file(&path)?;
            path
        }
    };
    info!("Config path: {}", path.display());

    // 4. Parse the file; fall back to embedded defaults on *any* error.
    Ok(Config::from(read_or_default(&path, defaults)))
}

fn read_or_default(path: &Path, defaults: RawConfig) -> RawConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<RawConfig>(&contents) {
            Ok(parsed) => {
                info!("Loaded config from {}", path.display());
                parsed
            }
            Err(e) => {
                warn!(
                    "Parse error in {}: {e}; falling back to defaults",
                    path.display()
                );
                defaults
            }
        },
        Err(e) => {
            warn!(
                "Cannot read {}: {e}; falling back to defaults",
                path.display()
            );
            defaults
        }
    }
}

/// Resolve the XDG-compliant config file path.
fn config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "unifymon")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".config/unifymon/config.toml"))
}

/// Create the config directory tree and write the default file if absent.
fn ensure_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_STR)
        .wrap_err_with(|| format!("Failed to write default config to {}", path.display()))?;
    info!("Created default config at {}", path.display());
    Ok(())
}

// ─── Raw TOML structures (serde targets) ────────────────────────────────────
//
// Each struct carries `#[serde(default)]` so that missing keys or entire
// sections gracefully fill in from the compiled defaults.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawConfig {
    receiver: RawReceiver,
    pairing: RawPairing,
    monitor: RawMonitor,
}

// ── Receiver ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawReceiver {
    command_timeout_ms: u64,
    bolt: BoltMode,
}

impl Default for RawReceiver {
    fn default() -> Self {
        Self {
            command_timeout_ms: 2000,
            bolt: BoltMode::Auto,
        }
    }
}

/// Which pairing protocol to speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoltMode {
    /// Decide from the receiver's product id.
    #[default]
    Auto,
    Yes,
    No,
}

// ── Pairing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawPairing {
    timeout_secs: u64,
    bolt_entropy: u64,
}

impl Default for RawPairing {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            bolt_entropy: 20,
        }
    }
}

// ── Monitor ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawMonitor {
    wait_for_devices: Vec<u8>,
}

// ─── Resolved runtime config ────────────────────────────────────────────────

/// Fully resolved, runtime-ready configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub pairing: PairingConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub command_timeout: Duration,
    pub bolt: BoltMode,
}

#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub timeout_secs: u8,
    pub bolt_entropy: u8,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Device indices to arm the timeout-connection fallback for.
    pub wait_for_devices: Vec<DeviceIndex>,
}

// ─── Raw → Resolved conversion ─────────────────────────────────────────────

/// Clamp into `lo..=hi`, both of which fit in a `u8`.
fn clamp_u8(value: u64, lo: u8, hi: u8) -> u8 {
    // Lossless: the clamp bounds are u8 values.
    value.clamp(u64::from(lo), u64::from(hi)) as u8
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let mut wait_for_devices = raw.monitor.wait_for_devices;
        wait_for_devices.retain(|&i| (1..=6).contains(&i));
        wait_for_devices.sort_unstable();
        wait_for_devices.dedup();

        Self {
            receiver: ReceiverConfig {
                command_timeout: Duration::from_millis(
                    raw.receiver.command_timeout_ms.clamp(100, 10_000),
                ),
                bolt: raw.receiver.bolt,
            },
            pairing: PairingConfig {
                timeout_secs: clamp_u8(raw.pairing.timeout_secs, 1, 255),
                bolt_entropy: clamp_u8(raw.pairing.bolt_entropy, 1, 255),
            },
            monitor: MonitorConfig { wait_for_devices },
        }
    }
}
