use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Pointing of the mount in horizontal coordinates, in degrees
///
/// Azimuth lies in [0, 360) measured from north through east, elevation in
/// [-90, 90]. Values are checked on construction so a `Position` held
/// anywhere in the crate is always well formed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    azimuth: f64,
    elevation: f64,
}

#[derive(Deserialize)]
struct RawPosition {
    azimuth: f64,
    elevation: f64,
}

impl TryFrom<RawPosition> for Position {
    type Error = Error;

    fn try_from(raw: RawPosition) -> Result<Self> {
        Position::new(raw.azimuth, raw.elevation)
    }
}

impl Position {
    /// Azimuth 0°, elevation 0°
    pub const HOME: Position = Position {
        azimuth: 0.0,
        elevation: 0.0,
    };

    /// Creates a position, rejecting out-of-domain values
    pub fn new(azimuth: f64, elevation: f64) -> Result<Self> {
        if !azimuth.is_finite() || !(0.0..360.0).contains(&azimuth) {
            return Err(Error::invalid_position(format!(
                "azimuth {} not in [0, 360)",
                azimuth
            )));
        }
        Self::check_elevation(elevation)?;
        Ok(Position { azimuth, elevation })
    }

    /// Creates a position, wrapping any finite azimuth into [0, 360)
    pub fn wrapped(azimuth: f64, elevation: f64) -> Result<Self> {
        if !azimuth.is_finite() {
            return Err(Error::invalid_position("azimuth is not finite"));
        }
        Self::check_elevation(elevation)?;
        Ok(Position {
            azimuth: crate::util::normalize_degrees(azimuth),
            elevation,
        })
    }

    fn check_elevation(elevation: f64) -> Result<()> {
        if !elevation.is_finite() || !(-90.0..=90.0).contains(&elevation) {
            return Err(Error::invalid_position(format!(
                "elevation {} not in [-90, 90]",
                elevation
            )));
        }
        Ok(())
    }

    /// Azimuth in degrees
    pub fn azimuth(&self) -> f64 {
        self.azimuth
    }

    /// Elevation in degrees
    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    /// Largest single-axis travel needed to get from `self` to `other`
    ///
    /// Azimuth difference takes the short way around the circle.
    pub fn max_axis_delta(&self, other: &Position) -> f64 {
        let az = crate::util::azimuth_difference(self.azimuth, other.azimuth).abs();
        let el = (self.elevation - other.elevation).abs();
        az.max(el)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "az {:.2}° el {:.2}°", self.azimuth, self.elevation)
    }
}

/// Geodetic location of the observing site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    /// Latitude in degrees, north positive
    pub latitude: f64,
    /// Longitude in degrees, east positive
    pub longitude: f64,
    /// Height above sea level in meters
    pub elevation: f64,
    /// Human readable site name
    pub name: String,
}

impl ObserverLocation {
    /// Creates a validated observer location
    pub fn new(latitude: f64, longitude: f64, elevation: f64, name: impl Into<String>) -> Result<Self> {
        let location = ObserverLocation {
            latitude,
            longitude,
            elevation,
            name: name.into(),
        };
        location.validate()?;
        Ok(location)
    }

    /// Checks coordinate ranges
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::config(format!("latitude {} not in [-90, 90]", self.latitude)));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::config(format!(
                "longitude {} not in [-180, 180]",
                self.longitude
            )));
        }
        if !self.elevation.is_finite() {
            return Err(Error::config("observer elevation is not finite"));
        }
        Ok(())
    }
}

impl Default for ObserverLocation {
    fn default() -> Self {
        ObserverLocation {
            latitude: 50.0614,
            longitude: 19.9372,
            elevation: 220.0,
            name: "Kraków".to_string(),
        }
    }
}

/// How to reach the rotator; consumed once at connect time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial device; `None` auto-detects
    pub port: Option<String>,
    /// Line speed
    pub baud_rate: u32,
    /// Use the in-memory rotator instead of hardware
    pub use_simulator: bool,
}

impl ConnectionConfig {
    /// Connection to the built-in simulator
    pub fn simulator() -> Self {
        ConnectionConfig {
            use_simulator: true,
            ..Default::default()
        }
    }

    /// Connection to a named serial device
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        ConnectionConfig {
            port: Some(port.into()),
            baud_rate,
            use_simulator: false,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            port: None,
            baud_rate: super::DEFAULT_BAUD_RATE,
            use_simulator: false,
        }
    }
}

/// A fixed point on the celestial sphere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StarRef {
    /// Name looked up in the built-in catalog
    Catalog(String),
    /// Explicit J2000 coordinates in degrees
    Coordinates { ra: f64, dec: f64 },
}

/// Celestial object the mount can follow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackingTarget {
    Sun,
    Moon,
    Planet(String),
    Star(StarRef),
}

impl TrackingTarget {
    /// Maps a free-text object name onto a target
    ///
    /// "sun" and "moon" are matched case-insensitively, the classical planets
    /// become [`TrackingTarget::Planet`], anything else is looked up as a star.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "sun" => TrackingTarget::Sun,
            "moon" => TrackingTarget::Moon,
            "mercury" | "venus" | "mars" | "jupiter" | "saturn" | "uranus" | "neptune"
            | "pluto" => TrackingTarget::Planet(trimmed.to_string()),
            _ => TrackingTarget::Star(StarRef::Catalog(trimmed.to_string())),
        }
    }

    /// Star at explicit J2000 coordinates
    pub fn coordinates(ra: f64, dec: f64) -> Self {
        TrackingTarget::Star(StarRef::Coordinates { ra, dec })
    }
}

impl fmt::Display for TrackingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingTarget::Sun => write!(f, "Sun"),
            TrackingTarget::Moon => write!(f, "Moon"),
            TrackingTarget::Planet(name) => write!(f, "{}", name),
            TrackingTarget::Star(StarRef::Catalog(name)) => write!(f, "{}", name),
            TrackingTarget::Star(StarRef::Coordinates { ra, dec }) => {
                write!(f, "RA {:.3}° Dec {:.3}°", ra, dec)
            }
        }
    }
}
