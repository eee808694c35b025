use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Axis, Error, Result};
use super::types::{ObserverLocation, Position};

/// Angular resolution of the wire protocol, in pulses per degree per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub azimuth: u8,
    pub elevation: u8,
}

impl Resolution {
    /// Same resolution on both axes
    pub fn uniform(pulses_per_degree: u8) -> Self {
        Resolution {
            azimuth: pulses_per_degree,
            elevation: pulses_per_degree,
        }
    }

    /// Pulses per degree for one axis
    pub fn pulses(&self, axis: Axis) -> u8 {
        match axis {
            Axis::Azimuth => self.azimuth,
            Axis::Elevation => self.elevation,
        }
    }

    /// Size of one quantization step on the coarser axis, in degrees
    pub fn step(&self) -> f64 {
        1.0 / f64::from(self.azimuth.min(self.elevation).max(1))
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::uniform(super::DEFAULT_PULSES_PER_DEGREE)
    }
}

/// Mechanical travel limits of the mount, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MountLimits {
    pub min_azimuth: f64,
    pub max_azimuth: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

impl MountLimits {
    /// Whether a position lies within every limit
    pub fn contains(&self, position: &Position) -> bool {
        (self.min_azimuth..=self.max_azimuth).contains(&position.azimuth())
            && (self.min_elevation..=self.max_elevation).contains(&position.elevation())
    }
}

impl Default for MountLimits {
    fn default() -> Self {
        MountLimits {
            min_azimuth: 0.0,
            max_azimuth: 360.0,
            min_elevation: 0.0,
            max_elevation: 90.0,
        }
    }
}

/// Tracking loop tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Time between two tracking ticks
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub tick_interval: Duration,
    /// Smallest single-axis change worth sending to the rotator
    pub min_movement_deg: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            tick_interval: Duration::from_secs(5),
            min_movement_deg: 0.2,
        }
    }
}

/// Behaviour of the in-memory rotator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Slew rate; `None` moves instantly
    pub slew_rate_deg_per_s: Option<f64>,
    /// Position reported right after connecting
    pub initial_position: Position,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            slew_rate_deg_per_s: Some(6.0),
            initial_position: Position::HOME,
        }
    }
}

/// Configuration for the mount engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wire protocol resolution
    pub resolution: Resolution,
    /// Mechanical limits enforced by the safety guard
    pub limits: MountLimits,
    /// Observer used until replaced through the engine
    pub observer: ObserverLocation,
    /// Bound on a single read or write
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub io_timeout: Duration,
    /// Extra attempts for a failed exchange before giving up
    pub io_retries: u32,
    /// How long a commanded move may take to be confirmed
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub settle_timeout: Duration,
    /// Interval between status queries while a move settles
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub status_poll_interval: Duration,
    /// Tracking loop settings
    pub tracking: TrackingConfig,
    /// Simulator settings
    pub simulator: SimulatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            resolution: Resolution::default(),
            limits: MountLimits::default(),
            observer: ObserverLocation::default(),
            io_timeout: Duration::from_secs(1),
            io_retries: 1,
            settle_timeout: Duration::from_secs(120),
            status_poll_interval: Duration::from_millis(500),
            tracking: TrackingConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks that the configuration is valid and consistent
    ///
    /// - Resolution fits the four-digit wire fields
    /// - Limits are ordered and inside the protocol's angle domain
    /// - Timeouts and intervals are non-zero
    pub fn validate(&self) -> Result<()> {
        for axis in [Axis::Azimuth, Axis::Elevation] {
            let ppd = self.resolution.pulses(axis);
            if ppd == 0 {
                return Err(Error::config(format!("{} resolution must be non-zero", axis)));
            }
            if u32::from(ppd) * 720 > super::MAX_WIRE_COUNT {
                return Err(Error::config(format!(
                    "{} resolution {} pulses/° overflows the wire format",
                    axis, ppd
                )));
            }
        }

        let l = &self.limits;
        if !(0.0..=360.0).contains(&l.min_azimuth)
            || !(0.0..=360.0).contains(&l.max_azimuth)
            || l.min_azimuth >= l.max_azimuth
        {
            return Err(Error::config("azimuth limits must satisfy 0 <= min < max <= 360"));
        }
        if !(-90.0..=90.0).contains(&l.min_elevation)
            || !(-90.0..=90.0).contains(&l.max_elevation)
            || l.min_elevation >= l.max_elevation
        {
            return Err(Error::config("elevation limits must satisfy -90 <= min < max <= 90"));
        }

        self.observer.validate()?;

        if self.io_timeout.is_zero() || self.settle_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }
        if self.status_poll_interval.is_zero() || self.tracking.tick_interval.is_zero() {
            return Err(Error::config("poll and tick intervals must be non-zero"));
        }
        if !self.tracking.min_movement_deg.is_finite() || self.tracking.min_movement_deg < 0.0 {
            return Err(Error::config("minimum movement must be a non-negative angle"));
        }
        if let Some(rate) = self.simulator.slew_rate_deg_per_s {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(Error::config("simulator slew rate must be positive"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig {
            resolution: Resolution::uniform(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // 720 * 14 does not fit four decimal digits
        let config = EngineConfig {
            resolution: Resolution::uniform(14),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            limits: MountLimits {
                min_elevation: 10.0,
                max_elevation: 5.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            tracking: TrackingConfig {
                tick_interval: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limits_contain() {
        let limits = MountLimits::default();
        assert!(limits.contains(&Position::new(180.0, 45.0).unwrap()));
        assert!(!limits.contains(&Position::new(180.0, -5.0).unwrap()));
    }

    #[test]
    fn test_resolution_step() {
        assert!((Resolution::uniform(10).step() - 0.1).abs() < 1e-12);
        let mixed = Resolution { azimuth: 10, elevation: 2 };
        assert!((mixed.step() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.io_timeout, config.io_timeout);
        assert_eq!(back.tracking.tick_interval, config.tracking.tick_interval);
        assert_eq!(back.observer, config.observer);
    }
}
