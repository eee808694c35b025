use chrono::{DateTime, Utc};

use crate::util::normalize_degrees;

/// Julian day of the J2000.0 epoch (2000-01-01 12:00 TT)
pub const J2000: f64 = 2_451_545.0;

/// Julian day of the Unix epoch
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Days in a Julian century
pub const DAYS_PER_CENTURY: f64 = 36_525.0;

/// An instant expressed in the time scales the ephemeris series use
///
/// UT stands in for TT; the difference (about a minute) moves the Moon by
/// well under the pointing resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Julian day number
    pub julian_day: f64,
    /// Days since J2000.0
    pub days: f64,
    /// Julian centuries since J2000.0
    pub centuries: f64,
}

impl Epoch {
    /// Epoch for a UTC instant
    pub fn from_utc(at: DateTime<Utc>) -> Self {
        let seconds = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) * 1e-9;
        Self::from_julian_day(seconds / SECONDS_PER_DAY + UNIX_EPOCH_JD)
    }

    /// Epoch for a Julian day number
    pub fn from_julian_day(julian_day: f64) -> Self {
        let days = julian_day - J2000;
        Epoch {
            julian_day,
            days,
            centuries: days / DAYS_PER_CENTURY,
        }
    }

    /// Julian years since J2000.0
    pub fn years(&self) -> f64 {
        self.centuries * 100.0
    }

    /// Greenwich mean sidereal time in degrees (IAU 1982)
    pub fn gmst(&self) -> f64 {
        let t = self.centuries;
        normalize_degrees(
            280.460_618_37 + 360.985_647_366_29 * self.days + 0.000_387_933 * t * t
                - t * t * t / 38_710_000.0,
        )
    }

    /// Local mean sidereal time in degrees for an east-positive longitude
    pub fn local_sidereal(&self, longitude: f64) -> f64 {
        normalize_degrees(self.gmst() + longitude)
    }

    /// Mean obliquity of the ecliptic in degrees
    pub fn obliquity(&self) -> f64 {
        23.439_291 - 0.013_004_2 * self.centuries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_julian_day() {
        let noon = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        let epoch = Epoch::from_utc(noon);
        assert_eq!(epoch.julian_day, J2000);
        assert_eq!(epoch.days, 0.0);

        let sputnik = Utc.with_ymd_and_hms(1957, 10, 4, 19, 26, 24).unwrap();
        assert!((Epoch::from_utc(sputnik).julian_day - 2_436_116.31).abs() < 1e-6);
    }

    #[test]
    fn test_gmst_meeus_12a() {
        // 1987 April 10, 0h UT
        let epoch = Epoch::from_julian_day(2_446_895.5);
        assert!((epoch.gmst() - 197.693_195).abs() < 1e-4);
    }

    #[test]
    fn test_local_sidereal_wraps() {
        let epoch = Epoch::from_julian_day(2_446_895.5);
        let lst = epoch.local_sidereal(170.0);
        assert!((lst - 7.693_195).abs() < 1e-4);
    }
}
