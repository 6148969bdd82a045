//! Error types for razercfg-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic USB communication failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// Device could not be found or opened.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied while opening or claiming the device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A control transfer timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A control transfer moved fewer or more bytes than requested.
    #[error("short transfer on {what}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// The device answered with an unexpected status or response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Checksum mismatch on data read back from the device.
    #[error("checksum mismatch on {what}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Checksum {
        what: &'static str,
        expected: u16,
        actual: u16,
    },

    /// Wire data could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A fixed-size table is full.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// The device is not claimed, or could not be claimed.
    #[error("device busy: {0}")]
    Busy(String),

    /// The device does not have this capability.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// Invalid parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Value out of the device's supported range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A single-slot registration is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Config file loading or parsing failure.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for the "not claimed" state error every setter returns.
    pub(crate) fn not_claimed() -> Self {
        Error::Busy("device is not claimed".into())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
