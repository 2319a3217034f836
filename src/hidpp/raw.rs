//! The raw report channel to a receiver node.

use std::io;

use tracing::trace;

use super::registry::{EventHandle, EventRegistry};

/// Byte-level write access to a receiver. Reading is push-based: whoever
/// owns the read side calls [`RawDevice::deliver`] for every report.
pub trait RawTransport: Send + Sync {
    fn write_report(&self, report: &[u8]) -> io::Result<()>;
}

pub struct RawDevice {
    path: String,
    transport: Box<dyn RawTransport>,
    handlers: EventRegistry<[u8]>,
}

impl RawDevice {
    pub fn new(path: impl Into<String>, transport: Box<dyn RawTransport>) -> Self {
        Self {
            path: path.into(),
            transport,
            handlers: EventRegistry::new(),
        }
    }

    pub fn raw_path(&self) -> &str {
        &self.path
    }

    pub fn send_report(&self, report: &[u8]) -> io::Result<()> {
        trace!(path = %self.path, "-> {:02x?}", report);
        self.transport.write_report(report)
    }

    pub fn add_event_handler<P, C>(&self, predicate: P, callback: C) -> EventHandle
    where
        P: Fn(&[u8]) -> bool + Send + Sync + 'static,
        C: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.handlers.subscribe(predicate, callback)
    }

    pub fn add_event_handler_once<P, C>(&self, predicate: P, callback: C) -> EventHandle
    where
        P: Fn(&[u8]) -> bool + Send + Sync + 'static,
        C: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.handlers.subscribe_once(predicate, callback)
    }

    /// Hand one incoming report to every matching handler, on the calling
    /// thread.
    pub fn deliver(&self, report: &[u8]) {
        trace!(path = %self.path, "<- {:02x?}", report);
        self.handlers.dispatch(report);
    }
}
