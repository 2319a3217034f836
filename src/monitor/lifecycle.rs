//! Device connection lifecycle.
//!
//! Connection and disconnection notifications are decoded on the delivery
//! thread but the hooks always run on the dispatcher: they are free to query
//! the receiver, and the receiver may be in the middle of an enumeration
//! whose replies need the delivery thread. A failing hook is logged and
//! otherwise ignored so that one bad device cannot hold up the others.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{DeviceHooks, Shared};
use crate::error::Error;
use crate::hidpp::report::{is_hidpp, offset, sub_id};
use crate::hidpp::{
    DeviceConnectionEvent, DeviceDisconnectionEvent, DeviceIndex, EventHandle, Report,
};

/// Connection or disconnection notification, any device index.
fn is_lifecycle_report(raw: &[u8]) -> bool {
    is_hidpp(raw)
        && matches!(
            raw[offset::SUB_ID],
            sub_id::DEVICE_CONNECTION | sub_id::DEVICE_DISCONNECTION
        )
}

pub(super) fn subscribe<H: DeviceHooks>(shared: &Arc<Shared<H>>) -> EventHandle {
    let s = shared.clone();
    shared
        .receiver
        .raw_device()
        .add_event_handler(is_lifecycle_report, move |raw| on_lifecycle_report(&s, raw))
}

fn on_lifecycle_report<H: DeviceHooks>(shared: &Arc<Shared<H>>, raw: &[u8]) {
    let report = match Report::try_from(raw) {
        Ok(report) => report,
        Err(e) => {
            warn!(path = shared.receiver.path(), "Dropping lifecycle report: {e}");
            return;
        }
    };

    let s = shared.clone();
    shared.dispatcher.run(move || match report.sub_id() {
        sub_id::DEVICE_CONNECTION => {
            let result = DeviceConnectionEvent::try_from(&report)
                .map_err(Error::from)
                .and_then(|event| add_device(&s, event));
            if let Err(e) = result {
                log_add_failure(&s, report.device_index(), &e);
            }
        }
        sub_id::DEVICE_DISCONNECTION => {
            let result = DeviceDisconnectionEvent::try_from(&report)
                .map_err(Error::from)
                .and_then(|event| remove_device(&s, event));
            if let Err(e) = result {
                error!(
                    index = report.device_index(),
                    path = s.receiver.path(),
                    "Failed to remove device {} from receiver on {}: {e}",
                    report.device_index(),
                    s.receiver.path()
                );
            }
        }
        other => debug!("Ignoring lifecycle sub-id 0x{other:02x}"),
    });
}

/// One-shot fallback for a device that talks without announcing itself:
/// the first report from `index` counts as a connection.
pub(super) fn wait_for_device<H: DeviceHooks>(
    shared: &Arc<Shared<H>>,
    index: DeviceIndex,
) -> EventHandle {
    let s = shared.clone();
    shared.receiver.raw_device().add_event_handler_once(
        move |raw| raw.get(offset::DEVICE_INDEX) == Some(&index),
        move |_| {
            let task = s.clone();
            s.dispatcher.run(move || {
                let event = DeviceConnectionEvent::from_timeout(index);
                if let Err(e) = add_device(&task, event) {
                    log_add_failure(&task, index, &e);
                }
            });
        },
    )
}

fn add_device<H: DeviceHooks>(
    shared: &Shared<H>,
    event: DeviceConnectionEvent,
) -> Result<(), Error> {
    debug!(index = event.index, "Adding device");
    shared
        .hooks
        .add_device(&shared.receiver, event)
        .map_err(|cause| Error::DeviceHook {
            index: event.index,
            cause,
        })
}

fn remove_device<H: DeviceHooks>(
    shared: &Shared<H>,
    event: DeviceDisconnectionEvent,
) -> Result<(), Error> {
    debug!(index = event.index, "Removing device");
    shared
        .hooks
        .remove_device(&shared.receiver, event)
        .map_err(|cause| Error::DeviceHook {
            index: event.index,
            cause,
        })
}

fn log_add_failure<H: DeviceHooks>(shared: &Shared<H>, index: DeviceIndex, e: &Error) {
    error!(
        index,
        path = shared.receiver.path(),
        "Failed to add device {index} to receiver on {}: {e}",
        shared.receiver.path()
    );
}
