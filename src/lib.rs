//! SPID Mount: antenna control engine for SPID azimuth/elevation rotators
//!
//! This library drives a Rot2Prog-compatible rotator over a serial line (or
//! an in-memory simulator), tracks the Sun, the Moon, the classical planets
//! and catalog stars from a configurable observing site, and guards every
//! commanded position with mechanical limits and an emergency stop.
//!
//! ```no_run
//! use spid_mount::{ConnectionConfig, EngineConfig, MountEngine, TrackingTarget};
//!
//! # async fn run() -> spid_mount::Result<()> {
//! let engine = MountEngine::new(EngineConfig::default())?;
//! engine.connect(ConnectionConfig::simulator()).await?;
//! engine.start_tracking(TrackingTarget::Sun).await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod ephemeris;
pub mod mount;
pub mod protocol;
pub mod transport;
pub mod util;

// Re-export commonly used items
pub use crate::core::{
    ConnectionConfig, EngineConfig, Error, ErrorKind, MountLimits, ObserverLocation, Position, Result,
    TrackingTarget,
};
pub use crate::ephemeris::{EphemerisEngine, Observation};
pub use crate::mount::{MountEngine, MountPhase, MountSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
