//! Error taxonomy for the receiver monitor.
//!
//! Every failure that can happen inside a report callback is one of these.
//! Callback boundaries log them and drop the offending report; nothing here
//! ever unwinds through the registry's dispatch loop.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::hidpp::DeviceIndex;

/// A raw buffer that cannot be viewed as a HID++ report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReport {
    #[error("empty report")]
    Empty,

    #[error("unknown report type 0x{0:02x}")]
    UnknownType(u8),

    #[error("report too short: {len} bytes, expected {expected}")]
    TooShort { len: usize, expected: usize },
}

/// A well-formed report that does not carry the expected event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected sub-id 0x{expected:02x}, got 0x{got:02x}")]
    UnexpectedSubId { expected: u8, got: u8 },

    #[error("expected a long report for sub-id 0x{0:02x}")]
    NotLong(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
}

/// Error codes returned by the receiver in a HID++ 1.0 error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hidpp10Error {
    Success,
    InvalidSubId,
    InvalidAddress,
    InvalidValue,
    ConnectFail,
    TooManyDevices,
    AlreadyExists,
    Busy,
    UnknownDevice,
    ResourceError,
    RequestUnavailable,
    InvalidParamValue,
    WrongPinCode,
    Unknown(u8),
}

impl From<u8> for Hidpp10Error {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x01 => Self::InvalidSubId,
            0x02 => Self::InvalidAddress,
            0x03 => Self::InvalidValue,
            0x04 => Self::ConnectFail,
            0x05 => Self::TooManyDevices,
            0x06 => Self::AlreadyExists,
            0x07 => Self::Busy,
            0x08 => Self::UnknownDevice,
            0x09 => Self::ResourceError,
            0x0A => Self::RequestUnavailable,
            0x0B => Self::InvalidParamValue,
            0x0C => Self::WrongPinCode,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for Hidpp10Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::InvalidSubId => "invalid sub-id",
            Self::InvalidAddress => "invalid address",
            Self::InvalidValue => "invalid value",
            Self::ConnectFail => "connection failed",
            Self::TooManyDevices => "too many devices",
            Self::AlreadyExists => "already exists",
            Self::Busy => "busy",
            Self::UnknownDevice => "unknown device",
            Self::ResourceError => "resource error",
            Self::RequestUnavailable => "request unavailable",
            Self::InvalidParamValue => "invalid parameter value",
            Self::WrongPinCode => "wrong PIN code",
            Self::Unknown(code) => return write!(f, "unknown error 0x{code:02x}"),
        };
        f.write_str(name)
    }
}

/// A receiver command that could not be issued or was not acknowledged.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to write report: {0}")]
    Transport(#[from] io::Error),

    #[error("no reply to register 0x{register:02x} within {timeout:?}")]
    Timeout { register: u8, timeout: Duration },

    #[error("register 0x{register:02x} rejected: {code}")]
    Rejected { register: u8, code: Hidpp10Error },

    #[error("invalid reply: {0}")]
    InvalidReply(&'static str),
}

/// Anything that can go wrong while handling one report.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MalformedReport(#[from] MalformedReport),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("device hook failed for device {index}: {cause:#}")]
    DeviceHook {
        index: DeviceIndex,
        cause: color_eyre::Report,
    },
}
