//! HID++ 1.0 receiver: register commands plus the decoded notification
//! stream of the receiver's own device index.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::events::DiscoveryEvent;
use super::raw::RawDevice;
use super::registry::{EventHandle, EventRegistry};
use super::report::{
    is_hidpp, offset, sub_id, DeviceIndex, Report, ReportType, RECEIVER_INDEX,
};
use crate::error::{CommandError, Hidpp10Error};

/// Receiver registers.
pub mod register {
    pub const NOTIFICATIONS: u8 = 0x00;
    pub const CONNECTION_STATE: u8 = 0x02;
    pub const DEVICE_PAIRING: u8 = 0xB2;
    pub const RECEIVER_INFO: u8 = 0xB5;
    pub const BOLT_DEVICE_DISCOVERY: u8 = 0xC0;
    pub const BOLT_PAIRING: u8 = 0xC1;
}

const ACTION_START: u8 = 0x01;
const ACTION_STOP: u8 = 0x02;
const ENUMERATE: u8 = 0x02;
const INFO_DEVICE_NAME: u8 = 0x3F;
const INFO_BOLT_DEVICE_NAME: u8 = 0x60;

/// Which notifications the receiver should report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationFlags {
    pub device_battery_status: bool,
    pub receiver_wireless_notifications: bool,
    pub receiver_software_present: bool,
}

impl NotificationFlags {
    pub fn all() -> Self {
        Self {
            device_battery_status: true,
            receiver_wireless_notifications: true,
            receiver_software_present: true,
        }
    }

    fn to_bytes(self) -> [u8; 3] {
        let mut bytes = [0u8; 3];
        if self.device_battery_status {
            bytes[0] |= 1 << 4;
        }
        if self.receiver_wireless_notifications {
            bytes[1] |= 1 << 0;
        }
        if self.receiver_software_present {
            bytes[1] |= 1 << 3;
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiverOptions {
    /// Use the Bolt discovery-based pairing protocol.
    pub bolt: bool,
    /// How long to wait for the reply to a register access.
    pub command_timeout: Duration,
    /// Passkey entropy requested when pairing a Bolt device.
    pub bolt_entropy: u8,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            bolt: false,
            command_timeout: Duration::from_millis(2000),
            bolt_entropy: 20,
        }
    }
}

pub struct Receiver {
    raw: Arc<RawDevice>,
    reports: Arc<EventRegistry<Report>>,
    options: ReceiverOptions,
    /// HID++ 1.0 allows a single outstanding register access.
    command_lock: Mutex<()>,
    _forward: EventHandle,
}

impl Receiver {
    pub fn new(raw: Arc<RawDevice>, options: ReceiverOptions) -> Self {
        let reports = Arc::new(EventRegistry::<Report>::new());

        let sink = reports.clone();
        let path = raw.raw_path().to_owned();
        let forward = raw.add_event_handler(
            |raw| is_hidpp(raw) && raw[offset::DEVICE_INDEX] == RECEIVER_INDEX,
            move |raw| match Report::try_from(raw) {
                Ok(report) => sink.dispatch(&report),
                Err(e) => warn!(
                    index = raw[offset::DEVICE_INDEX],
                    path = %path,
                    "Dropping receiver report: {e}"
                ),
            },
        );

        Self {
            raw,
            reports,
            options,
            command_lock: Mutex::new(()),
            _forward: forward,
        }
    }

    pub fn bolt(&self) -> bool {
        self.options.bolt
    }

    pub fn raw_device(&self) -> &Arc<RawDevice> {
        &self.raw
    }

    pub fn path(&self) -> &str {
        self.raw.raw_path()
    }

    /// Subscribe to notifications the receiver sends about itself.
    pub fn add_event_handler<P, C>(&self, predicate: P, callback: C) -> EventHandle
    where
        P: Fn(&Report) -> bool + Send + Sync + 'static,
        C: Fn(&Report) + Send + Sync + 'static,
    {
        self.reports.subscribe(predicate, callback)
    }

    // ── Commands ────────────────────────────────────────────────────────

    pub fn set_notifications(&self, flags: NotificationFlags) -> Result<(), CommandError> {
        self.set_register(register::NOTIFICATIONS, &flags.to_bytes())
    }

    /// Ask the receiver to announce every paired device again. The answers
    /// arrive as ordinary connection notifications.
    pub fn enumerate(&self) -> Result<(), CommandError> {
        self.set_register(register::CONNECTION_STATE, &[ENUMERATE])
    }

    /// Open the legacy pairing lock for `timeout` seconds.
    pub fn start_pairing(&self, timeout: u8) -> Result<(), CommandError> {
        info!("Opening pairing lock on {} for {timeout}s", self.path());
        self.set_register(register::DEVICE_PAIRING, &[ACTION_START, 0x00, timeout])
    }

    pub fn stop_pairing(&self) -> Result<(), CommandError> {
        if self.bolt() {
            self.set_long_register(register::BOLT_PAIRING, &[ACTION_STOP])
        } else {
            self.set_register(register::DEVICE_PAIRING, &[ACTION_STOP, 0x00, 0x00])
        }
    }

    pub fn start_discover(&self, timeout: u8) -> Result<(), CommandError> {
        info!("Discovering devices on {} for {timeout}s", self.path());
        self.set_register(register::BOLT_DEVICE_DISCOVERY, &[timeout, ACTION_START])
    }

    pub fn stop_discover(&self) -> Result<(), CommandError> {
        self.set_register(register::BOLT_DEVICE_DISCOVERY, &[0x00, ACTION_STOP])
    }

    /// Pair with a device found during discovery.
    pub fn start_bolt_pairing(&self, event: &DiscoveryEvent) -> Result<(), CommandError> {
        info!("Pairing with {event}");
        let mut params = vec![ACTION_START, 0x00];
        params.extend_from_slice(&event.address);
        params.push(event.authentication);
        params.push(self.options.bolt_entropy);
        self.set_long_register(register::BOLT_PAIRING, &params)
    }

    /// Name of the device paired at `index`.
    pub fn device_name(&self, index: DeviceIndex) -> Result<String, CommandError> {
        let (query, name_at) = if self.bolt() {
            (vec![INFO_BOLT_DEVICE_NAME.wrapping_add(index), 0x01], 2)
        } else {
            (vec![INFO_DEVICE_NAME.wrapping_add(index)], 1)
        };
        let reply = self.request(sub_id::GET_REGISTER_LONG, register::RECEIVER_INFO, &query)?;
        let data = reply.params();
        let len = usize::from(data[name_at]);
        let name = data
            .get(name_at + 1..name_at + 1 + len)
            .ok_or(CommandError::InvalidReply("device name length out of range"))?;
        Ok(String::from_utf8_lossy(name).into_owned())
    }

    // ── Register access ─────────────────────────────────────────────────

    fn set_register(&self, register: u8, params: &[u8]) -> Result<(), CommandError> {
        self.request(sub_id::SET_REGISTER_SHORT, register, params)
            .map(|_| ())
    }

    fn set_long_register(&self, register: u8, params: &[u8]) -> Result<(), CommandError> {
        self.request(sub_id::SET_REGISTER_LONG, register, params)
            .map(|_| ())
    }

    /// Send one register access and block until the receiver answers.
    ///
    /// Must not run on the thread that delivers reports: the reply can only
    /// arrive through that thread.
    fn request(&self, sub: u8, register: u8, params: &[u8]) -> Result<Report, CommandError> {
        let kind = if sub == sub_id::SET_REGISTER_LONG {
            ReportType::Long
        } else {
            ReportType::Short
        };
        let request = Report::new(kind, RECEIVER_INDEX, sub, register, params);

        let _serial = self.command_lock.lock();
        let (tx, rx) = mpsc::sync_channel(1);
        let _reply = self.reports.subscribe_once(
            move |r| is_reply(r, sub, register),
            move |r| {
                let _ = tx.try_send(r.clone());
            },
        );

        self.raw.send_report(request.as_bytes())?;

        let timeout = self.options.command_timeout;
        let reply = rx
            .recv_timeout(timeout)
            .map_err(|_| CommandError::Timeout { register, timeout })?;

        if reply.sub_id() == sub_id::ERROR {
            return Err(CommandError::Rejected {
                register,
                code: Hidpp10Error::from(reply.params()[1]),
            });
        }
        Ok(reply)
    }
}

fn is_reply(report: &Report, sub: u8, register: u8) -> bool {
    if report.sub_id() == sub_id::ERROR {
        report.address() == sub && report.params()[0] == register
    } else {
        report.sub_id() == sub && report.address() == register
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hidpp::mock::MockDevice;

    fn receiver(mock: &MockDevice, bolt: bool) -> Receiver {
        Receiver::new(
            mock.device(),
            ReceiverOptions {
                bolt,
                command_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_notification_flags_bytes() {
        assert_eq!(NotificationFlags::all().to_bytes(), [0x10, 0x09, 0x00]);
        assert_eq!(NotificationFlags::default().to_bytes(), [0, 0, 0]);
    }

    #[test]
    fn test_set_notifications_and_enumerate() {
        let mock = MockDevice::new();
        let receiver = receiver(&mock, false);

        receiver.set_notifications(NotificationFlags::all()).unwrap();
        receiver.enumerate().unwrap();

        assert_eq!(
            mock.written(),
            vec![
                vec![0x10, 0xff, 0x80, 0x00, 0x10, 0x09, 0x00],
                vec![0x10, 0xff, 0x80, 0x02, 0x02, 0x00, 0x00],
            ]
        );
    }

    #[test]
    fn test_legacy_pairing_commands() {
        let mock = MockDevice::new();
        let receiver = receiver(&mock, false);

        receiver.start_pairing(30).unwrap();
        receiver.stop_pairing().unwrap();

        let writes = mock.register_writes(register::DEVICE_PAIRING);
        assert_eq!(writes[0][4..7], [0x01, 0x00, 30]);
        assert_eq!(writes[1][4..7], [0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_bolt_pairing_commands() {
        let mock = MockDevice::new();
        let receiver = receiver(&mock, true);

        receiver.start_discover(10).unwrap();
        receiver.stop_discover().unwrap();
        let writes = mock.register_writes(register::BOLT_DEVICE_DISCOVERY);
        assert_eq!(writes[0][4..6], [10, 0x01]);
        assert_eq!(writes[1][4..6], [0x00, 0x02]);

        let mut event = DiscoveryEvent::default();
        event.address = [1, 2, 3, 4, 5, 6];
        event.authentication = 0x01;
        receiver.start_bolt_pairing(&event).unwrap();
        receiver.stop_pairing().unwrap();
        let writes = mock.register_writes(register::BOLT_PAIRING);
        assert_eq!(writes[0].len(), 20);
        assert_eq!(writes[0][2], sub_id::SET_REGISTER_LONG);
        assert_eq!(writes[0][4..14], [0x01, 0x00, 1, 2, 3, 4, 5, 6, 0x01, 20]);
        assert_eq!(writes[1][4], 0x02);
    }

    #[test]
    fn test_rejected_command() {
        let mock = MockDevice::new();
        mock.reject(register::DEVICE_PAIRING, 0x07);
        let receiver = receiver(&mock, false);

        match receiver.start_pairing(30) {
            Err(CommandError::Rejected { register, code }) => {
                assert_eq!(register, register::DEVICE_PAIRING);
                assert_eq!(code, Hidpp10Error::Busy);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_command_timeout() {
        let mock = MockDevice::new();
        mock.ignore(register::CONNECTION_STATE);
        let receiver = receiver(&mock, false);

        assert!(matches!(
            receiver.enumerate(),
            Err(CommandError::Timeout {
                register: register::CONNECTION_STATE,
                ..
            })
        ));
        // The pending reply subscription is gone afterwards.
        receiver.set_notifications(NotificationFlags::all()).unwrap();
    }

    #[test]
    fn test_device_name() {
        let mock = MockDevice::new();
        let mut data = vec![0x41, 7];
        data.extend_from_slice(b"M720 xx");
        mock.long_reply(register::RECEIVER_INFO, 0x41, &data);
        let receiver = receiver(&mock, false);

        assert_eq!(receiver.device_name(2).unwrap(), "M720 xx");
    }

    #[test]
    fn test_bolt_device_name() {
        let mock = MockDevice::new();
        let mut data = vec![0x63, 0x01, 7];
        data.extend_from_slice(b"MX Keys");
        mock.long_reply(register::RECEIVER_INFO, 0x63, &data);
        let receiver = receiver(&mock, true);

        assert_eq!(receiver.device_name(3).unwrap(), "MX Keys");
    }

    #[test]
    fn test_forwards_only_receiver_reports() {
        let mock = MockDevice::new();
        let receiver = receiver(&mock, false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _handle = receiver.add_event_handler(|_| true, move |r| s.lock().push(r.sub_id()));

        mock.inject(&[0x10, 0x01, 0x41, 0x04, 0x00, 0x00, 0x00]);
        mock.inject(&[0x10, 0xff, 0x53, 0x01, 0x00, 0x00, 0x00]);
        mock.inject(&[0x10, 0xff, 0x53]);
        mock.inject(&[0x10, 0xff, 0x54, 0x00, 0x00, 0x00, 0x00]);

        assert_eq!(*seen.lock(), vec![0x53, 0x54]);
    }
}
