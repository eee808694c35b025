//! Low-precision Sun and Moon series
//!
//! The Sun follows the Astronomical Almanac's short series (about 0.01°
//! between 1950 and 2050). The Moon uses the principal periodic terms of the
//! lunar theory, good to roughly 0.3° in longitude, which is well inside the
//! beamwidth of the dishes this crate drives.

use super::time::Epoch;
use super::{ecliptic_to_equatorial, Equatorial};
use crate::util::normalize_degrees;

/// Equatorial radius of the Earth in kilometres
pub const EARTH_RADIUS_KM: f64 = 6_378.14;

/// Astronomical unit in kilometres
pub const AU_KM: f64 = 149_597_870.7;

/// Geocentric apparent place of the Sun
pub fn sun(epoch: &Epoch) -> Equatorial {
    let d = epoch.days;
    let mean_longitude = normalize_degrees(280.460 + 0.985_647_4 * d);
    let g = normalize_degrees(357.528 + 0.985_600_3 * d).to_radians();

    let longitude = mean_longitude + 1.915 * g.sin() + 0.020 * (2.0 * g).sin();
    let obliquity = 23.439 - 0.000_000_4 * d;
    let distance = 1.000_14 - 0.016_71 * g.cos() - 0.000_14 * (2.0 * g).cos();

    let (ra, dec) = ecliptic_to_equatorial(longitude, 0.0, obliquity);
    Equatorial {
        ra,
        dec,
        distance_au: Some(distance),
    }
}

/// Geocentric ecliptic place of the Moon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LunarPosition {
    /// Ecliptic longitude of date, degrees
    pub longitude: f64,
    /// Ecliptic latitude, degrees
    pub latitude: f64,
    /// Distance from the Earth's centre, kilometres
    pub distance_km: f64,
}

/// Ecliptic longitude, latitude and distance of the Moon
pub fn moon_ecliptic(epoch: &Epoch) -> LunarPosition {
    let t = epoch.centuries;
    let s = |deg: f64| deg.to_radians().sin();
    let c = |deg: f64| deg.to_radians().cos();

    let longitude = 218.32 + 481_267.881 * t
        + 6.29 * s(135.0 + 477_198.87 * t)
        - 1.27 * s(259.3 - 413_335.36 * t)
        + 0.66 * s(235.7 + 890_534.22 * t)
        + 0.21 * s(269.9 + 954_397.74 * t)
        - 0.19 * s(357.5 + 35_999.05 * t)
        - 0.11 * s(186.5 + 966_404.03 * t);

    let latitude = 5.13 * s(93.3 + 483_202.02 * t)
        + 0.28 * s(228.2 + 960_400.89 * t)
        - 0.28 * s(318.3 + 6_003.15 * t)
        - 0.17 * s(217.6 - 407_332.21 * t);

    // Horizontal parallax; distance follows as 1 / sin(parallax) Earth radii
    let parallax = 0.9508
        + 0.0518 * c(134.9 + 477_198.85 * t)
        + 0.0095 * c(259.2 - 413_335.38 * t)
        + 0.0078 * c(235.7 + 890_534.23 * t)
        + 0.0028 * c(269.9 + 954_397.70 * t);

    LunarPosition {
        longitude: normalize_degrees(longitude),
        latitude,
        distance_km: EARTH_RADIUS_KM / parallax.to_radians().sin(),
    }
}

/// Geocentric equatorial place of the Moon
pub fn moon(epoch: &Epoch) -> Equatorial {
    let lunar = moon_ecliptic(epoch);
    let (ra, dec) = ecliptic_to_equatorial(lunar.longitude, lunar.latitude, epoch.obliquity());
    Equatorial {
        ra,
        dec,
        distance_au: Some(lunar.distance_km / AU_KM),
    }
}
