use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis of the rotator a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Azimuth,
    Elevation,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Azimuth => write!(f, "azimuth"),
            Axis::Elevation => write!(f, "elevation"),
        }
    }
}

/// Reasons a status frame can be refused by the decoder
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("frame has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("bad start marker 0x{0:02X}")]
    BadStartMarker(u8),

    #[error("bad end marker 0x{0:02X}")]
    BadEndMarker(u8),

    #[error("byte {index} holds 0x{value:02X}, not a decimal digit")]
    InvalidDigit { index: usize, value: u8 },

    #[error("{0} resolution byte is zero")]
    ZeroResolution(Axis),

    #[error("decoded {axis} {value:.2}° is out of range")]
    OutOfRange { axis: Axis, value: f64 },

    #[error("unknown command byte 0x{0:02X}")]
    UnknownCommand(u8),
}

/// Why the safety guard vetoed a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    /// Emergency stop is engaged
    EmergencyStop,
    /// Value outside the configured mechanical range of an axis
    OutsideLimits { axis: Axis, value: f64, min: f64, max: f64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EmergencyStop => write!(f, "emergency stop is engaged"),
            Rejection::OutsideLimits { axis, value, min, max } => {
                write!(f, "{} {:.2}° outside limits [{:.2}°, {:.2}°]", axis, value, min, max)
            }
        }
    }
}

/// Custom error types for the mount engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Timeout: {operation} gave no result within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Position rejected: {0}")]
    RejectedPosition(Rejection),

    #[error("Unresolved target: {0}")]
    UnresolvedTarget(String),

    #[error("Motion timeout: target not reached within {after:?}")]
    MotionTimeout { after: Duration },

    #[error("Mount is in error state: {0}")]
    Faulted(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error discriminant for callers mapping errors onto their own status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Connect,
    AlreadyConnected,
    NotConnected,
    Decode,
    Encode,
    InvalidPosition,
    Timeout,
    RejectedPosition,
    UnresolvedTarget,
    MotionTimeout,
    Faulted,
    Cancelled,
    Config,
    Transport,
}

/// Cloneable record of an error, kept in the mount state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Error {
    /// Creates a new connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Error::Connect(msg.into())
    }

    /// Creates a new encode error
    pub fn encode(msg: impl Into<String>) -> Self {
        Error::Encode(msg.into())
    }

    /// Creates a new invalid position error
    pub fn invalid_position(msg: impl Into<String>) -> Self {
        Error::InvalidPosition(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout { operation: operation.into(), after }
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new unresolved target error
    pub fn unresolved(name: impl Into<String>) -> Self {
        Error::UnresolvedTarget(name.into())
    }

    /// Creates a new faulted-state error
    pub fn faulted(msg: impl Into<String>) -> Self {
        Error::Faulted(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns the stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Transport(_) => ErrorKind::Transport,
            Error::Connect(_) => ErrorKind::Connect,
            Error::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::InvalidPosition(_) => ErrorKind::InvalidPosition,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::RejectedPosition(_) => ErrorKind::RejectedPosition,
            Error::UnresolvedTarget(_) => ErrorKind::UnresolvedTarget,
            Error::MotionTimeout { .. } => ErrorKind::MotionTimeout,
            Error::Faulted(_) => ErrorKind::Faulted,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    /// Whether a single retry of the failed I/O may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Transport(_) | Error::Timeout { .. } | Error::Decode(_)
        )
    }

    /// Snapshot of this error for the mount state
    pub fn record(&self, at: DateTime<Utc>) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            detail: self.to_string(),
            at,
        }
    }
}
