//! Receiver monitor.
//!
//! Wires a `Receiver` to the device lifecycle hooks and the pairing state
//! machine:
//! - **Lifecycle**: connection/disconnection notifications become
//!   `add_device`/`remove_device` calls on the dispatcher.
//! - **Pairing**: discovery, passkey and status notifications drive
//!   [`PairingMachine`]; receiver commands it triggers run on the dispatcher.
//!
//! Report handlers run on the thread that delivers reports. They only touch
//! the pairing lock or hand work to the [`TaskDispatcher`]; they never wait
//! on the receiver.

pub mod dispatcher;
mod lifecycle;
pub mod pairing;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

pub use dispatcher::TaskDispatcher;
pub use pairing::{PairState, PairStatusUpdate, PairingMachine, StatusSource};

use crate::error::{CommandError, DecodeError};
use crate::hidpp::report::sub_id;
use crate::hidpp::{
    DeviceConnectionEvent, DeviceDisconnectionEvent, DeviceIndex, DiscoveryEvent,
    DiscoveryStatusEvent, EventHandle, NotificationFlags, PairStatusEvent, PasskeyEvent,
    RawDevice, Receiver, ReceiverOptions, Report, ReportType,
};

/// Callbacks supplied by whoever owns the monitor.
pub trait DeviceHooks: Send + Sync + 'static {
    /// A device connected (or was re-announced). Runs on the dispatcher and
    /// may issue receiver commands.
    fn add_device(
        &self,
        receiver: &Receiver,
        event: DeviceConnectionEvent,
    ) -> color_eyre::Result<()>;

    /// A device disconnected. Runs on the dispatcher.
    fn remove_device(
        &self,
        receiver: &Receiver,
        event: DeviceDisconnectionEvent,
    ) -> color_eyre::Result<()>;

    /// The device being paired wants `passkey` typed on it.
    ///
    /// Runs on the report-delivery thread: must return quickly and must not
    /// issue receiver commands.
    fn pair_ready(&self, _event: &DiscoveryEvent, _passkey: PasskeyEvent) {}

    /// A discovery or pairing status notification arrived. Same threading
    /// rules as [`DeviceHooks::pair_ready`].
    fn pair_status(&self, _update: PairStatusUpdate) {}
}

pub(crate) struct Shared<H> {
    receiver: Arc<Receiver>,
    hooks: H,
    pairing: PairingMachine,
    dispatcher: TaskDispatcher,
}

/// The permanent subscriptions installed by `ready()`.
#[derive(Default)]
struct Subscriptions {
    lifecycle: EventHandle,
    discovery: EventHandle,
    passkey: EventHandle,
    status: EventHandle,
}

pub struct ReceiverMonitor<H: DeviceHooks> {
    shared: Arc<Shared<H>>,
    subscriptions: Mutex<Subscriptions>,
    /// Armed timeout fallbacks, one per device index.
    waiting: Mutex<HashMap<DeviceIndex, EventHandle>>,
}

impl<H: DeviceHooks> ReceiverMonitor<H> {
    /// Open the receiver node at `path` with `open_raw` and start monitoring
    /// it.
    pub fn open<F>(
        path: &Path,
        open_raw: F,
        options: ReceiverOptions,
        hooks: H,
        dispatcher: TaskDispatcher,
    ) -> Result<Self, CommandError>
    where
        F: FnOnce(&Path) -> io::Result<Arc<RawDevice>>,
    {
        let raw = open_raw(path)?;
        Self::new(raw, options, hooks, dispatcher)
    }

    /// Build a monitor over an already opened node. Enables every receiver
    /// notification; the node must already be delivering reports.
    pub fn new(
        raw: Arc<RawDevice>,
        options: ReceiverOptions,
        hooks: H,
        dispatcher: TaskDispatcher,
    ) -> Result<Self, CommandError> {
        let receiver = Arc::new(Receiver::new(raw, options));
        receiver.set_notifications(NotificationFlags::all())?;
        info!(
            "Monitoring receiver on {} ({})",
            receiver.path(),
            if receiver.bolt() { "bolt" } else { "legacy" }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                receiver,
                hooks,
                pairing: PairingMachine::new(),
                dispatcher,
            }),
            subscriptions: Mutex::new(Subscriptions::default()),
            waiting: Mutex::new(HashMap::new()),
        })
    }

    /// Install the notification handlers (once) and enumerate the paired
    /// devices.
    pub fn ready(&self) -> Result<(), CommandError> {
        {
            let mut subs = self.subscriptions.lock();
            if subs.lifecycle.is_empty() {
                subs.lifecycle = lifecycle::subscribe(&self.shared);
            }
            if subs.discovery.is_empty() {
                subs.discovery = subscribe_discovery(&self.shared);
            }
            if subs.passkey.is_empty() {
                subs.passkey = subscribe_passkey(&self.shared);
            }
            if subs.status.is_empty() {
                subs.status = subscribe_status(&self.shared);
            }
        }

        self.enumerate()
    }

    pub fn enumerate(&self) -> Result<(), CommandError> {
        self.shared.receiver.enumerate()
    }

    /// Treat the next report from `index` as a connection, for devices that
    /// never send a connection notification. Re-arming an index replaces the
    /// pending fallback.
    pub fn wait_for_device(&self, index: DeviceIndex) {
        debug!(index, "Waiting for device traffic");
        let handle = lifecycle::wait_for_device(&self.shared, index);
        self.waiting.lock().insert(index, handle);
    }

    /// Start pairing a new device, for at most `timeout` seconds.
    pub fn start_pair(&self, timeout: u8) -> Result<(), CommandError> {
        let receiver = &self.shared.receiver;
        let state = self.shared.pairing.start(receiver.bolt());
        debug!("Pairing state: {state}");

        let result = if receiver.bolt() {
            receiver.start_discover(timeout)
        } else {
            receiver.start_pairing(timeout)
        };
        if let Err(e) = &result {
            warn!(path = receiver.path(), "Failed to start pairing: {e}");
        }
        result
    }

    /// Abort pairing. Returns the state that was interrupted.
    pub fn stop_pair(&self) -> Result<PairState, CommandError> {
        let receiver = &self.shared.receiver;
        let last = self.shared.pairing.stop();

        let result = match last {
            PairState::Discovering => receiver.stop_discover(),
            PairState::FindingPasskey | PairState::Pairing => receiver.stop_pairing(),
            PairState::NotPairing => Ok(()),
        };
        if let Err(e) = &result {
            warn!(path = receiver.path(), "Failed to stop pairing: {e}");
        }
        result.map(|()| last)
    }

    pub fn pair_state(&self) -> PairState {
        self.shared.pairing.state()
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.shared.receiver
    }

    pub fn hooks(&self) -> &H {
        &self.shared.hooks
    }
}

// ─── Pairing handlers ───────────────────────────────────────────────────────

fn log_dropped<H>(shared: &Shared<H>, report: &Report, e: &DecodeError) {
    warn!(
        index = report.device_index(),
        path = shared.receiver.path(),
        "Dropping 0x{:02x} report: {e}",
        report.sub_id()
    );
}

fn subscribe_discovery<H: DeviceHooks>(shared: &Arc<Shared<H>>) -> EventHandle {
    let s = shared.clone();
    shared.receiver.add_event_handler(
        |r| r.sub_id() == sub_id::DEVICE_DISCOVERED && r.report_type() == ReportType::Long,
        move |r| match s.pairing.on_discovery(r) {
            Ok(Some(event)) => {
                info!("Discovered {event}");
                let task = s.clone();
                s.dispatcher.run(move || {
                    if let Err(e) = task.receiver.start_bolt_pairing(&event) {
                        error!(
                            path = task.receiver.path(),
                            "Failed to pair with {event}: {e}"
                        );
                    }
                });
            }
            Ok(None) => {}
            Err(e) => log_dropped(&s, r, &e),
        },
    )
}

fn subscribe_passkey<H: DeviceHooks>(shared: &Arc<Shared<H>>) -> EventHandle {
    let s = shared.clone();
    shared.receiver.add_event_handler(
        |r| r.sub_id() == sub_id::PASSKEY_REQUEST && r.report_type() == ReportType::Long,
        move |r| match s.pairing.on_passkey(r) {
            Ok(Some((event, passkey))) => s.hooks.pair_ready(&event, passkey),
            Ok(None) => {}
            Err(e) => log_dropped(&s, r, &e),
        },
    )
}

fn subscribe_status<H: DeviceHooks>(shared: &Arc<Shared<H>>) -> EventHandle {
    let s = shared.clone();
    shared.receiver.add_event_handler(
        |r| {
            matches!(
                r.sub_id(),
                sub_id::DISCOVERY_STATUS | sub_id::PAIR_STATUS | sub_id::BOLT_PAIR_STATUS
            )
        },
        move |r| match apply_status(&s.pairing, r) {
            Ok(update) => {
                debug!("Pair status {update:?}");
                s.hooks.pair_status(update);
            }
            Err(e) => log_dropped(&s, r, &e),
        },
    )
}

fn apply_status(pairing: &PairingMachine, report: &Report) -> Result<PairStatusUpdate, DecodeError> {
    let (source, in_progress, error, state) = match report.sub_id() {
        sub_id::DISCOVERY_STATUS => {
            let event = DiscoveryStatusEvent::try_from(report)?;
            let state = pairing.on_discovery_status(event);
            (StatusSource::Discovery, event.discovering, event.error, state)
        }
        sub_id::PAIR_STATUS => {
            let event = PairStatusEvent::legacy(report)?;
            let state = pairing.on_pair_status(event);
            (StatusSource::Pairing, event.pairing, event.error, state)
        }
        _ => {
            let event = PairStatusEvent::bolt(report)?;
            let state = pairing.on_pair_status(event);
            (StatusSource::BoltPairing, event.pairing, event.error, state)
        }
    };
    Ok(PairStatusUpdate {
        source,
        in_progress,
        error,
        state,
    })
}
