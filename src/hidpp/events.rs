//! Typed receiver notifications. All types are plain data, decoded once from
//! a `Report` and then free to cross thread boundaries.

use std::fmt;

use super::report::{sub_id, DeviceIndex, Report, ReportType};
use crate::error::DecodeError;

fn expect_sub_id(report: &Report, expected: u8) -> Result<(), DecodeError> {
    if report.sub_id() == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedSubId {
            expected,
            got: report.sub_id(),
        })
    }
}

fn expect_long(report: &Report) -> Result<(), DecodeError> {
    match report.report_type() {
        ReportType::Long => Ok(()),
        ReportType::Short => Err(DecodeError::NotLong(report.sub_id())),
    }
}

// ─── Connection lifecycle ───────────────────────────────────────────────────

/// A device came into range, or was re-announced by an enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceConnectionEvent {
    pub index: DeviceIndex,
    pub product_id: u16,
    pub device_type: u8,
    pub unifying: bool,
    pub software_present: bool,
    pub encrypted: bool,
    pub link_established: bool,
    pub with_payload: bool,
    /// Synthesized by the monitor when a device talked without ever sending
    /// a connection notification.
    pub from_timeout_check: bool,
}

impl DeviceConnectionEvent {
    /// Connection event for a device that produced traffic but no
    /// notification.
    pub fn from_timeout(index: DeviceIndex) -> Self {
        Self {
            index,
            link_established: true,
            with_payload: false,
            from_timeout_check: true,
            ..Default::default()
        }
    }
}

impl TryFrom<&Report> for DeviceConnectionEvent {
    type Error = DecodeError;

    fn try_from(report: &Report) -> Result<Self, Self::Error> {
        expect_sub_id(report, sub_id::DEVICE_CONNECTION)?;
        let data = report.params();
        Ok(Self {
            index: report.device_index(),
            product_id: u16::from(data[2]) << 8 | u16::from(data[1]),
            device_type: data[0] & 0x0F,
            unifying: report.address() & 0x07 == 0x04,
            software_present: data[0] & (1 << 4) != 0,
            encrypted: data[0] & (1 << 5) != 0,
            link_established: data[0] & (1 << 6) == 0,
            with_payload: data[0] & (1 << 7) != 0,
            from_timeout_check: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDisconnectionEvent {
    pub index: DeviceIndex,
}

impl TryFrom<&Report> for DeviceDisconnectionEvent {
    type Error = DecodeError;

    fn try_from(report: &Report) -> Result<Self, Self::Error> {
        expect_sub_id(report, sub_id::DEVICE_DISCONNECTION)?;
        Ok(Self {
            index: report.device_index(),
        })
    }
}

// ─── Bolt discovery ─────────────────────────────────────────────────────────

const FRAGMENT_DEVICE_INFO: u8 = 0x00;
const FRAGMENT_NAME: u8 = 0x01;

/// A device found during Bolt discovery. Its identity arrives split across
/// two notifications (device info, then name) sharing the same counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub counter: Option<u16>,
    pub device_type: u8,
    pub product_id: u16,
    pub address: [u8; 6],
    pub authentication: u8,
    pub name: String,
    info_filled: bool,
    name_filled: bool,
}

impl DiscoveryEvent {
    pub fn is_complete(&self) -> bool {
        self.info_filled && self.name_filled
    }

    /// Merge one discovery notification into `self`. A fragment carrying a
    /// different counter starts a fresh event. Returns whether the event is
    /// now complete.
    pub fn fill(&mut self, report: &Report) -> Result<bool, DecodeError> {
        expect_sub_id(report, sub_id::DEVICE_DISCOVERED)?;
        expect_long(report)?;
        let data = report.params();
        let counter = u16::from(report.address()) | u16::from(data[0]) << 8;

        enum Fragment<'a> {
            Info {
                device_type: u8,
                product_id: u16,
                address: &'a [u8],
                authentication: u8,
            },
            Name(String),
        }

        // Decode fully before touching `self` so a bad fragment changes nothing.
        let fragment = match data[1] {
            FRAGMENT_DEVICE_INFO => Fragment::Info {
                device_type: data[3],
                product_id: u16::from(data[4]) << 8 | u16::from(data[5]),
                address: &data[6..12],
                authentication: data[14],
            },
            FRAGMENT_NAME => {
                let len = usize::from(data[2]);
                let bytes = data
                    .get(3..3 + len)
                    .ok_or(DecodeError::InvalidPayload("device name length out of range"))?;
                Fragment::Name(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => return Err(DecodeError::InvalidPayload("unknown discovery fragment")),
        };

        if self.counter.is_some_and(|c| c != counter) {
            *self = Self::default();
        }
        match fragment {
            Fragment::Info {
                device_type,
                product_id,
                address,
                authentication,
            } => {
                self.device_type = device_type;
                self.product_id = product_id;
                self.address.copy_from_slice(address);
                self.authentication = authentication;
                self.info_filled = true;
            }
            Fragment::Name(name) => {
                self.name = name;
                self.name_filled = true;
            }
        }
        self.counter = Some(counter);

        Ok(self.is_complete())
    }
}

impl fmt::Display for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{} [{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}]",
            self.name, a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

/// Passkey the user must type on the device being paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasskeyEvent(pub u32);

impl TryFrom<&Report> for PasskeyEvent {
    type Error = DecodeError;

    fn try_from(report: &Report) -> Result<Self, Self::Error> {
        expect_sub_id(report, sub_id::PASSKEY_REQUEST)?;
        expect_long(report)?;
        report.params()[..6]
            .iter()
            .try_fold(0u32, |acc, &b| match b {
                b'0'..=b'9' => Ok(acc * 10 + u32::from(b - b'0')),
                _ => Err(DecodeError::InvalidPayload("passkey is not six digits")),
            })
            .map(Self)
    }
}

impl fmt::Display for PasskeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

// ─── Status notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryStatusEvent {
    pub discovering: bool,
    pub error: u8,
}

impl TryFrom<&Report> for DiscoveryStatusEvent {
    type Error = DecodeError;

    fn try_from(report: &Report) -> Result<Self, Self::Error> {
        expect_sub_id(report, sub_id::DISCOVERY_STATUS)?;
        Ok(Self {
            discovering: report.address() == 0x00,
            error: report.params()[0],
        })
    }
}

/// Pairing lock status, from either the legacy or the Bolt notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairStatusEvent {
    pub pairing: bool,
    pub error: u8,
}

impl PairStatusEvent {
    /// Decode a legacy lock-status notification.
    pub fn legacy(report: &Report) -> Result<Self, DecodeError> {
        expect_sub_id(report, sub_id::PAIR_STATUS)?;
        Ok(Self {
            pairing: report.address() & 0x01 != 0,
            error: report.params()[0],
        })
    }

    /// Decode a Bolt pairing-status notification.
    pub fn bolt(report: &Report) -> Result<Self, DecodeError> {
        expect_sub_id(report, sub_id::BOLT_PAIR_STATUS)?;
        Ok(Self {
            pairing: report.address() == 0x00,
            error: report.params()[0],
        })
    }
}
