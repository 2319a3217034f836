//! HID++ receiver plumbing: report decoding, handler registries, the raw
//! transport and the receiver's register commands.

pub mod events;
pub mod hidraw;
pub mod raw;
pub mod receiver;
pub mod registry;
pub mod report;

#[cfg(test)]
pub(crate) mod mock;

pub use events::{
    DeviceConnectionEvent, DeviceDisconnectionEvent, DiscoveryEvent, DiscoveryStatusEvent,
    PairStatusEvent, PasskeyEvent,
};
pub use raw::{RawDevice, RawTransport};
pub use receiver::{NotificationFlags, Receiver, ReceiverOptions};
pub use registry::{EventHandle, EventRegistry};
pub use report::{DeviceIndex, Report, ReportType, RECEIVER_INDEX};
