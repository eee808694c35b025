//! Core types for the mount engine
//!
//! This module contains the data model, configuration and error types used
//! throughout the library.

pub mod config;
pub mod error;
pub mod serde;
pub mod types;

pub use self::config::{EngineConfig, MountLimits, Resolution, SimulatorConfig, TrackingConfig};
pub use self::error::{Axis, DecodeError, Error, ErrorKind, ErrorRecord, Rejection, Result};
pub use self::types::{ConnectionConfig, ObserverLocation, Position, StarRef, TrackingTarget};

/// Default line speed of the rotator controller
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default pulses per degree (0.1° steps)
pub const DEFAULT_PULSES_PER_DEGREE: u8 = 10;

/// Largest count a four-digit wire field can hold
pub const MAX_WIRE_COUNT: u32 = 9_999;

/// Serial device used when auto-detection finds nothing
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
