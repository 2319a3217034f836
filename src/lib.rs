//! unifymon: monitor for Logitech HID++ receivers (Unifying, Nano, Bolt).
//!
//! Layers, bottom up:
//! - [`hidpp`]: report framing, the handler registry, the raw hidraw node
//!   and HID++ 1.0 receiver register commands.
//! - [`monitor`]: the device lifecycle and pairing workflow on top of a
//!   receiver, driven entirely by its notifications.

pub mod config;
pub mod error;
pub mod hidpp;
pub mod monitor;

pub use error::{CommandError, DecodeError, Error, Hidpp10Error, MalformedReport};
pub use monitor::{DeviceHooks, PairState, PairStatusUpdate, ReceiverMonitor, TaskDispatcher};
