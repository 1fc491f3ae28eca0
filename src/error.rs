//! Unified error type for the connector-control firmware.
//!
//! Every fallible core operation funnels into this single `Error` enum
//! instead of the negated-errno returns of the original C firmware.
//! All variants are `Copy` so they can be threaded through the FSM and
//! safety supervisor without allocation.

use core::fmt;

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Preconditions violated: a null/absent reference or an out-of-range parameter.
    Invalid,
    /// A lookup (by id, by name, by handle) found nothing.
    NotFound,
    /// A duplicate add was attempted where identity must be unique.
    AlreadyPresent,
    /// A fixed-capacity collection is already at capacity.
    NoSpace,
    /// A hardware transfer failed, or a sub-component refused to initialize.
    Io,
    /// The operation is not acceptable in the current state.
    Busy,
    /// A dwell or transfer deadline elapsed before the expected condition.
    Timeout,
    /// The concrete object does not implement this optional capability.
    Unsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid argument"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyPresent => write!(f, "already present"),
            Self::NoSpace => write!(f, "no space"),
            Self::Io => write!(f, "I/O failure"),
            Self::Busy => write!(f, "busy"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

impl From<postcard::Error> for Error {
    fn from(_: postcard::Error) -> Self {
        Self::Io
    }
}
