//! Decoded view over a raw HID++ report.
//!
//! Layout shared by short and long reports:
//!
//! ```text
//! | type | device index | sub-id | address | parameters ... |
//! ```

use std::fmt;

use crate::error::MalformedReport;

/// Byte offsets inside a report.
pub mod offset {
    pub const TYPE: usize = 0;
    pub const DEVICE_INDEX: usize = 1;
    pub const SUB_ID: usize = 2;
    pub const ADDRESS: usize = 3;
    pub const PARAMETERS: usize = 4;
}

/// Sub-ids of receiver notifications and HID++ 1.0 register access.
pub mod sub_id {
    pub const DEVICE_DISCONNECTION: u8 = 0x40;
    pub const DEVICE_CONNECTION: u8 = 0x41;
    pub const PAIR_STATUS: u8 = 0x4A;
    pub const PASSKEY_REQUEST: u8 = 0x4D;
    pub const DEVICE_DISCOVERED: u8 = 0x4F;
    pub const DISCOVERY_STATUS: u8 = 0x53;
    pub const BOLT_PAIR_STATUS: u8 = 0x54;

    pub const SET_REGISTER_SHORT: u8 = 0x80;
    pub const GET_REGISTER_SHORT: u8 = 0x81;
    pub const SET_REGISTER_LONG: u8 = 0x82;
    pub const GET_REGISTER_LONG: u8 = 0x83;
    pub const ERROR: u8 = 0x8F;
}

/// Index of a paired device relative to its receiver.
pub type DeviceIndex = u8;

/// Device index the receiver itself uses for its own traffic.
pub const RECEIVER_INDEX: DeviceIndex = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Short,
    Long,
}

impl ReportType {
    pub const SHORT_ID: u8 = 0x10;
    pub const LONG_ID: u8 = 0x11;

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            Self::SHORT_ID => Some(Self::Short),
            Self::LONG_ID => Some(Self::Long),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Short => Self::SHORT_ID,
            Self::Long => Self::LONG_ID,
        }
    }

    /// Total length of a report of this type, header included.
    pub fn len(self) -> usize {
        match self {
            Self::Short => 7,
            Self::Long => 20,
        }
    }
}

/// Quick type check on raw bytes, without building a `Report`.
pub fn is_hidpp(raw: &[u8]) -> bool {
    raw.get(offset::TYPE)
        .and_then(|&t| ReportType::from_id(t))
        .is_some_and(|t| raw.len() >= t.len())
}

/// Immutable HID++ report. Trailing bytes beyond the type's length are
/// dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Report {
    kind: ReportType,
    buf: [u8; 20],
}

impl Report {
    /// Build an outgoing report. `params` is truncated or zero-padded to fit.
    pub fn new(
        kind: ReportType,
        device_index: DeviceIndex,
        sub_id: u8,
        address: u8,
        params: &[u8],
    ) -> Self {
        let mut buf = [0u8; 20];
        buf[offset::TYPE] = kind.id();
        buf[offset::DEVICE_INDEX] = device_index;
        buf[offset::SUB_ID] = sub_id;
        buf[offset::ADDRESS] = address;
        let room = kind.len() - offset::PARAMETERS;
        let n = params.len().min(room);
        buf[offset::PARAMETERS..offset::PARAMETERS + n].copy_from_slice(&params[..n]);
        Self { kind, buf }
    }

    pub fn report_type(&self) -> ReportType {
        self.kind
    }

    pub fn device_index(&self) -> DeviceIndex {
        self.buf[offset::DEVICE_INDEX]
    }

    pub fn sub_id(&self) -> u8 {
        self.buf[offset::SUB_ID]
    }

    pub fn address(&self) -> u8 {
        self.buf[offset::ADDRESS]
    }

    /// Parameter bytes following the address.
    pub fn params(&self) -> &[u8] {
        &self.buf[offset::PARAMETERS..self.kind.len()]
    }

    /// The whole report as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.kind.len()]
    }
}

impl TryFrom<&[u8]> for Report {
    type Error = MalformedReport;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let &id = raw.first().ok_or(MalformedReport::Empty)?;
        let kind = ReportType::from_id(id).ok_or(MalformedReport::UnknownType(id))?;
        if raw.len() < kind.len() {
            return Err(MalformedReport::TooShort {
                len: raw.len(),
                expected: kind.len(),
            });
        }
        let mut buf = [0u8; 20];
        buf[..kind.len()].copy_from_slice(&raw[..kind.len()]);
        Ok(Self { kind, buf })
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Report[")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_report() {
        let raw: [u8; 7] = [0x10, 0x02, 0x41, 0x04, 0x61, 0x1a, 0x40];
        let report = Report::try_from(&raw[..]).unwrap();
        assert_eq!(report.report_type(), ReportType::Short);
        assert_eq!(report.device_index(), 2);
        assert_eq!(report.sub_id(), sub_id::DEVICE_CONNECTION);
        assert_eq!(report.address(), 0x04);
        assert_eq!(report.params(), &[0x61, 0x1a, 0x40]);
    }

    #[test]
    fn test_long_report_ignores_trailing_bytes() {
        let mut raw: Vec<u8> = vec![0x11, 0xff, 0x4f, 0x00];
        raw.extend_from_slice(&[0xAA; 20]);
        let report = Report::try_from(&raw[..]).unwrap();
        assert_eq!(report.as_bytes().len(), 20);
        assert_eq!(report.params().len(), 16);
    }

    #[test]
    fn test_malformed_reports() {
        assert_eq!(Report::try_from(&[] as &[u8]), Err(MalformedReport::Empty));
        assert_eq!(
            Report::try_from(&[0x20u8, 0x01, 0x41] as &[u8]),
            Err(MalformedReport::UnknownType(0x20))
        );
        assert_eq!(
            Report::try_from(&[0x11u8, 0x01, 0x41, 0x00] as &[u8]),
            Err(MalformedReport::TooShort {
                len: 4,
                expected: 20
            })
        );
    }

    #[test]
    fn test_new_pads_and_truncates_params() {
        let report = Report::new(ReportType::Short, RECEIVER_INDEX, 0x80, 0x02, &[0x02]);
        assert_eq!(report.as_bytes(), &[0x10, 0xff, 0x80, 0x02, 0x02, 0x00, 0x00]);

        let report = Report::new(ReportType::Short, 1, 0x80, 0x00, &[1, 2, 3, 4, 5]);
        assert_eq!(report.params(), &[1, 2, 3]);
    }

    #[test]
    fn test_is_hidpp() {
        assert!(is_hidpp(&[0x10, 0x01, 0x41, 0, 0, 0, 0]));
        assert!(!is_hidpp(&[0x10, 0x01, 0x41]));
        assert!(!is_hidpp(&[0x21, 0x01, 0x41, 0, 0, 0, 0]));
        assert!(!is_hidpp(&[]));
    }
}
