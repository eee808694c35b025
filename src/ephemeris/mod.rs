//! Ephemeris module
//!
//! Pure, deterministic computation of where a celestial target stands in the
//! observer's sky. Everything here is a function of (target, observer,
//! instant); no state is kept between calls.
//!
//! Simplifications:
//! - UT is used in place of TT
//! - Nutation and aberration are ignored, precession is first order
//! - Atmospheric refraction is not modelled
//! - Observer height above sea level is ignored; only the Moon's parallax
//!   uses the observer's position, on a spherical Earth

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::{Error, ObserverLocation, Position, Result, StarRef, TrackingTarget};
use crate::util::normalize_degrees;

pub mod catalog;
pub mod planets;
pub mod solar;
pub mod time;

pub use self::time::Epoch;

/// Equatorial coordinates of date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equatorial {
    /// Right ascension, degrees in [0, 360)
    pub ra: f64,
    /// Declination, degrees
    pub dec: f64,
    /// Distance from the reference point, when known
    pub distance_au: Option<f64>,
}

/// Full answer for a target at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub target: TrackingTarget,
    pub at: DateTime<Utc>,
    /// Topocentric azimuth and elevation
    pub position: Position,
    /// Apparent right ascension of date, degrees
    pub ra: f64,
    /// Apparent declination of date, degrees
    pub dec: f64,
    /// Distance from the observer in AU; `None` for stars
    pub distance_au: Option<f64>,
    /// Whether the target is above the horizon
    pub visible: bool,
}

/// Resolves tracking targets to horizontal coordinates
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemerisEngine;

impl EphemerisEngine {
    /// Creates an engine
    pub fn new() -> Self {
        EphemerisEngine
    }

    /// Topocentric azimuth/elevation of `target`
    pub fn resolve(
        &self,
        target: &TrackingTarget,
        observer: &ObserverLocation,
        at: DateTime<Utc>,
    ) -> Result<Position> {
        Ok(self.observe(target, observer, at)?.position)
    }

    /// Position, sky coordinates and distance of `target`
    pub fn observe(
        &self,
        target: &TrackingTarget,
        observer: &ObserverLocation,
        at: DateTime<Utc>,
    ) -> Result<Observation> {
        let epoch = Epoch::from_utc(at);
        let lst = epoch.local_sidereal(observer.longitude);
        let place = self.equatorial(target, observer, &epoch)?;
        let position = to_horizontal(place.ra, place.dec, observer.latitude, lst)?;

        Ok(Observation {
            target: target.clone(),
            at,
            position,
            ra: place.ra,
            dec: place.dec,
            distance_au: place.distance_au,
            visible: position.elevation() >= 0.0,
        })
    }

    /// Equatorial place of `target` as seen by `observer`
    pub fn equatorial(
        &self,
        target: &TrackingTarget,
        observer: &ObserverLocation,
        epoch: &Epoch,
    ) -> Result<Equatorial> {
        match target {
            TrackingTarget::Sun => Ok(solar::sun(epoch)),
            TrackingTarget::Moon => {
                let lst = epoch.local_sidereal(observer.longitude);
                Ok(topocentric(solar::moon(epoch), observer.latitude, lst))
            }
            TrackingTarget::Planet(name) => planets::find(name)
                .map(|planet| planet.geocentric(epoch))
                .ok_or_else(|| Error::unresolved(format!("no ephemeris for planet {}", name))),
            TrackingTarget::Star(StarRef::Catalog(name)) => {
                let star = catalog::lookup(name)
                    .ok_or_else(|| Error::unresolved(format!("{} is not in the catalog", name)))?;
                Ok(fixed(star.ra, star.dec, epoch))
            }
            TrackingTarget::Star(StarRef::Coordinates { ra, dec }) => {
                if !ra.is_finite() || !dec.is_finite() || !(-90.0..=90.0).contains(dec) {
                    return Err(Error::unresolved(format!(
                        "RA {} Dec {} is not a sky position",
                        ra, dec
                    )));
                }
                Ok(fixed(normalize_degrees(*ra), *dec, epoch))
            }
        }
    }
}

fn fixed(ra: f64, dec: f64, epoch: &Epoch) -> Equatorial {
    let (ra, dec) = catalog::precess(ra, dec, epoch.years());
    Equatorial {
        ra,
        dec,
        distance_au: None,
    }
}

/// Converts ecliptic longitude/latitude to right ascension/declination
pub(crate) fn ecliptic_to_equatorial(longitude: f64, latitude: f64, obliquity: f64) -> (f64, f64) {
    let (sin_l, cos_l) = longitude.to_radians().sin_cos();
    let (sin_b, cos_b) = latitude.to_radians().sin_cos();
    let (sin_e, cos_e) = obliquity.to_radians().sin_cos();

    let ra = (sin_l * cos_e - sin_b / cos_b * sin_e).atan2(cos_l);
    let dec = (sin_b * cos_e + cos_b * sin_e * sin_l).clamp(-1.0, 1.0).asin();
    (normalize_degrees(ra.to_degrees()), dec.to_degrees())
}

fn unit_vector(ra: f64, dec: f64) -> Vector3<f64> {
    let (sin_a, cos_a) = ra.to_radians().sin_cos();
    let (sin_d, cos_d) = dec.to_radians().sin_cos();
    Vector3::new(cos_d * cos_a, cos_d * sin_a, sin_d)
}

/// Shifts a geocentric place to the observer's position on the Earth's surface
fn topocentric(geocentric: Equatorial, latitude: f64, lst: f64) -> Equatorial {
    let Some(distance_au) = geocentric.distance_au else {
        return geocentric;
    };
    let radii = distance_au * solar::AU_KM / solar::EARTH_RADIUS_KM;
    let relative = unit_vector(geocentric.ra, geocentric.dec) * radii - unit_vector(lst, latitude);
    let distance = relative.norm();

    Equatorial {
        ra: normalize_degrees(relative.y.atan2(relative.x).to_degrees()),
        dec: (relative.z / distance).asin().to_degrees(),
        distance_au: Some(distance * solar::EARTH_RADIUS_KM / solar::AU_KM),
    }
}

/// Horizontal coordinates for an equatorial place
///
/// Azimuth is measured from north through east.
pub fn to_horizontal(ra: f64, dec: f64, latitude: f64, lst: f64) -> Result<Position> {
    let hour_angle = normalize_degrees(lst - ra).to_radians();
    let (sin_h, cos_h) = hour_angle.sin_cos();
    let (sin_d, cos_d) = dec.to_radians().sin_cos();
    let (sin_p, cos_p) = latitude.to_radians().sin_cos();

    let altitude = (sin_p * sin_d + cos_p * cos_d * cos_h).clamp(-1.0, 1.0).asin();
    let azimuth = (-cos_d * sin_h).atan2(sin_d * cos_p - cos_d * cos_h * sin_p);

    Position::wrapped(azimuth.to_degrees(), altitude.to_degrees())
}
