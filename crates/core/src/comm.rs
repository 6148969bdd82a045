//! Error classification and bounded retry for device communication.
//!
//! Firmware often needs a moment after enumeration or a bus reset before it
//! answers. Poll-until-ready loops classify each failure and retry only the
//! transient ones.

use crate::error::{Error, Result};
use crate::timing::Clock;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that may succeed on retry (timeout, short transfer).
    Transient,
    /// Device is gone, stop retrying.
    Disconnected,
    /// The OS refused access, usually missing udev rules.
    PermissionDenied,
    /// The device answered with an error status or bad checksum.
    Protocol,
    /// Corrupted or unexpected data.
    InvalidResponse,
    /// Caller misuse: not claimed, unsupported, bad argument.
    State,
}

impl ErrorClass {
    /// Classify an error for retry decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout(_) | Error::ShortTransfer { .. } => Self::Transient,
            Error::DeviceNotFound(_) => Self::Disconnected,
            Error::PermissionDenied(_) => Self::PermissionDenied,
            Error::Protocol(_) | Error::Checksum { .. } => Self::Protocol,
            Error::Decode(_) | Error::Config(_) => Self::InvalidResponse,
            Error::Usb(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("no device") || lower.contains("not found") {
                    Self::Disconnected
                } else if lower.contains("access") || lower.contains("permission") {
                    Self::PermissionDenied
                } else if lower.contains("timeout") || lower.contains("timed out") {
                    Self::Transient
                } else {
                    Self::InvalidResponse
                }
            }
            Error::Busy(_)
            | Error::Capacity(_)
            | Error::NotSupported(_)
            | Error::InvalidArgument(_)
            | Error::OutOfRange { .. }
            | Error::AlreadyExists(_) => Self::State,
        }
    }

    /// Whether this error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Bounds for a poll-until-ready loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
    /// Retry every error, not only transient ones.
    pub any_error: bool,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            delay: Duration::from_millis(delay_ms),
            any_error: false,
        }
    }

    /// For polls right after enumeration, where any I/O error may clear up.
    pub const fn on_any_error(self) -> Self {
        Self {
            any_error: true,
            ..self
        }
    }
}

/// Run `op` until it yields `Some`, sleeping `policy.delay` between attempts.
///
/// `Ok(None)` means the device answered but is not ready yet. Transient
/// errors are retried as well, every error if `policy.any_error` is set;
/// any other error aborts immediately. Returns `Ok(None)` when every attempt
/// came back not-ready, or the last error if the final attempt failed.
pub fn retry<T, F>(clock: &dyn Clock, policy: RetryPolicy, what: &str, mut op: F) -> Result<Option<T>>
where
    F: FnMut(u32) -> Result<Option<T>>,
{
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            clock.sleep(policy.delay);
        }
        match op(attempt) {
            Ok(Some(v)) => {
                if attempt > 0 {
                    debug!(what, attempt = attempt + 1, "ready after retry");
                }
                return Ok(Some(v));
            }
            Ok(None) => {
                debug!(what, attempt = attempt + 1, max = policy.attempts, "not ready yet");
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);
                let retryable = policy.any_error || class.is_retryable();
                if !retryable || attempt + 1 == policy.attempts {
                    warn!(
                        what,
                        ?class,
                        attempt = attempt + 1,
                        max = policy.attempts,
                        "giving up: {}",
                        e
                    );
                    return Err(e);
                }
                debug!(what, attempt = attempt + 1, ?class, "error: {}, retrying", e);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::mock::FakeClock;

    #[test]
    fn classify_timeout_as_transient() {
        let err = Error::Timeout("3000 ms elapsed".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Transient);
        assert!(ErrorClass::classify(&err).is_retryable());
    }

    #[test]
    fn classify_short_transfer_as_transient() {
        let err = Error::ShortTransfer {
            what: "read".into(),
            expected: 90,
            actual: 12,
        };
        assert!(ErrorClass::classify(&err).is_retryable());
    }

    #[test]
    fn classify_disconnect() {
        let err = Error::DeviceNotFound("001-004".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Disconnected);
        assert!(!ErrorClass::classify(&err).is_retryable());
    }

    #[test]
    fn classify_usb_messages() {
        assert_eq!(
            ErrorClass::classify(&Error::Usb("No device (it may have been disconnected)".into())),
            ErrorClass::Disconnected
        );
        assert_eq!(
            ErrorClass::classify(&Error::Usb("Access denied (insufficient permissions)".into())),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            ErrorClass::classify(&Error::Usb("Operation timed out".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn classify_state_errors() {
        assert_eq!(ErrorClass::classify(&Error::not_claimed()), ErrorClass::State);
        assert_eq!(
            ErrorClass::classify(&Error::NotSupported("flash")),
            ErrorClass::State
        );
    }

    #[test]
    fn retry_polls_until_ready() {
        let clock = FakeClock::new();
        let got = retry(clock.as_ref(), RetryPolicy::new(5, 250), "firmware", |attempt| {
            Ok(if attempt == 2 { Some(0x0104) } else { None })
        })
        .unwrap();
        assert_eq!(got, Some(0x0104));
        assert_eq!(clock.now(), Duration::from_millis(500));
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let clock = FakeClock::new();
        let got: Option<u16> =
            retry(clock.as_ref(), RetryPolicy::new(5, 250), "firmware", |_| Ok(None)).unwrap();
        assert_eq!(got, None);
        assert_eq!(clock.sleeps().len(), 4);
    }

    #[test]
    fn retry_aborts_on_non_retryable_error() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let res: Result<Option<u8>> = retry(clock.as_ref(), RetryPolicy::new(5, 100), "x", |_| {
            calls += 1;
            Err(Error::DeviceNotFound("gone".into()))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_returns_last_transient_error() {
        let clock = FakeClock::new();
        let res: Result<Option<u8>> = retry(clock.as_ref(), RetryPolicy::new(3, 100), "x", |_| {
            Err(Error::Timeout("t".into()))
        });
        assert!(matches!(res, Err(Error::Timeout(_))));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn any_error_policy_retries_io_errors() {
        let clock = FakeClock::new();
        let policy = RetryPolicy::new(5, 250).on_any_error();
        let got = retry(clock.as_ref(), policy, "firmware", |attempt| {
            if attempt < 2 {
                Err(Error::Usb("Input/Output Error".into()))
            } else {
                Ok(Some(0x0105))
            }
        })
        .unwrap();
        assert_eq!(got, Some(0x0105));
        assert_eq!(clock.sleeps().len(), 2);
    }
}
