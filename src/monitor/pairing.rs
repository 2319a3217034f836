//! Pairing workflow state.
//!
//! ```text
//! NotPairing ──start (bolt)──▶ Discovering ──device found──▶ FindingPasskey
//!     │                                                          │
//!     └──start (legacy)──▶ Pairing ◀──────────passkey────────────┘
//! ```
//!
//! Status notifications only ever move back to `NotPairing`, and only from
//! the states they concern. Anything arriving in the wrong state is stale and
//! ignored. The state and the discovery event share one lock so they always
//! change together; no I/O happens while it is held.

use std::fmt;

use parking_lot::Mutex;

use crate::error::DecodeError;
use crate::hidpp::{DiscoveryEvent, DiscoveryStatusEvent, PairStatusEvent, PasskeyEvent, Report};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PairState {
    #[default]
    NotPairing,
    Discovering,
    FindingPasskey,
    Pairing,
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotPairing => "not pairing",
            Self::Discovering => "discovering",
            Self::FindingPasskey => "finding passkey",
            Self::Pairing => "pairing",
        })
    }
}

/// Which receiver notification a status update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Discovery,
    Pairing,
    BoltPairing,
}

/// A discovery or pairing status notification, as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairStatusUpdate {
    pub source: StatusSource,
    /// Whether the receiver reports the operation as still running.
    pub in_progress: bool,
    pub error: u8,
    /// Pairing state after the notification was applied.
    pub state: PairState,
}

#[derive(Debug, Default)]
struct PairingState {
    state: PairState,
    discovery: DiscoveryEvent,
}

#[derive(Debug, Default)]
pub struct PairingMachine {
    inner: Mutex<PairingState>,
}

impl PairingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PairState {
        self.inner.lock().state
    }

    /// Enter the first pairing stage and forget any earlier discovery.
    pub fn start(&self, bolt: bool) -> PairState {
        let mut inner = self.inner.lock();
        inner.state = if bolt {
            PairState::Discovering
        } else {
            PairState::Pairing
        };
        inner.discovery = DiscoveryEvent::default();
        inner.state
    }

    /// Return to `NotPairing`, yielding the state that was interrupted.
    pub fn stop(&self) -> PairState {
        std::mem::take(&mut self.inner.lock().state)
    }

    /// Merge a discovery notification. Yields the completed event when this
    /// fragment finished it.
    pub fn on_discovery(&self, report: &Report) -> Result<Option<DiscoveryEvent>, DecodeError> {
        let mut inner = self.inner.lock();
        if inner.state != PairState::Discovering {
            return Ok(None);
        }
        if inner.discovery.fill(report)? {
            inner.state = PairState::FindingPasskey;
            return Ok(Some(inner.discovery.clone()));
        }
        Ok(None)
    }

    /// Accept the passkey for the discovered device.
    pub fn on_passkey(
        &self,
        report: &Report,
    ) -> Result<Option<(DiscoveryEvent, PasskeyEvent)>, DecodeError> {
        let mut inner = self.inner.lock();
        if inner.state != PairState::FindingPasskey {
            return Ok(None);
        }
        let passkey = PasskeyEvent::try_from(report)?;
        inner.state = PairState::Pairing;
        Ok(Some((inner.discovery.clone(), passkey)))
    }

    pub fn on_discovery_status(&self, event: DiscoveryStatusEvent) -> PairState {
        let mut inner = self.inner.lock();
        if inner.state == PairState::Discovering && !event.discovering {
            inner.state = PairState::NotPairing;
        }
        inner.state
    }

    pub fn on_pair_status(&self, event: PairStatusEvent) -> PairState {
        let mut inner = self.inner.lock();
        if matches!(inner.state, PairState::FindingPasskey | PairState::Pairing) && !event.pairing {
            inner.state = PairState::NotPairing;
        }
        inner.state
    }
}
