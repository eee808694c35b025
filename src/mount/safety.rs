use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::core::{Axis, Error, MountLimits, Position, Rejection, Result};

/// Screens every commanded position and owns the emergency-stop flag
///
/// The flag is an atomic so it can be raised without waiting on any lock the
/// rest of the engine may be holding.
#[derive(Debug)]
pub struct SafetyGuard {
    limits: MountLimits,
    emergency_stop: AtomicBool,
}

impl SafetyGuard {
    pub fn new(limits: MountLimits) -> Self {
        SafetyGuard {
            limits,
            emergency_stop: AtomicBool::new(false),
        }
    }

    /// Checks a position against the emergency stop and the limits
    pub fn validate(&self, position: &Position) -> std::result::Result<(), Rejection> {
        if self.is_engaged() {
            return Err(Rejection::EmergencyStop);
        }
        if self.limits.contains(position) {
            return Ok(());
        }

        let l = &self.limits;
        let azimuth = position.azimuth();
        let (axis, value, min, max) = if !(l.min_azimuth..=l.max_azimuth).contains(&azimuth) {
            (Axis::Azimuth, azimuth, l.min_azimuth, l.max_azimuth)
        } else {
            (Axis::Elevation, position.elevation(), l.min_elevation, l.max_elevation)
        };
        Err(Rejection::OutsideLimits { axis, value, min, max })
    }

    /// [`validate`](Self::validate) lifted into the crate error type
    pub fn check(&self, position: &Position) -> Result<()> {
        self.validate(position).map_err(Error::RejectedPosition)
    }

    /// Raises the emergency stop; returns false if it was already raised
    pub fn engage(&self) -> bool {
        let newly = !self.emergency_stop.swap(true, Ordering::SeqCst);
        if newly {
            warn!("Emergency stop engaged");
        }
        newly
    }

    /// Clears the emergency stop; returns false if it was not raised
    pub fn release(&self) -> bool {
        self.emergency_stop.swap(false, Ordering::SeqCst)
    }

    pub fn is_engaged(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    /// Pulls an elevation into the configured range
    pub fn clamp_elevation(&self, elevation: f64) -> f64 {
        elevation.clamp(self.limits.min_elevation, self.limits.max_elevation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(az: f64, el: f64) -> Position {
        Position::new(az, el).unwrap()
    }

    #[test]
    fn test_validate_limits() {
        let guard = SafetyGuard::new(MountLimits::default());
        assert!(guard.validate(&pos(180.0, 45.0)).is_ok());
        assert!(guard.validate(&pos(0.0, 0.0)).is_ok());
        assert!(guard.validate(&pos(0.0, 90.0)).is_ok());
        assert!(matches!(
            guard.validate(&pos(10.0, -5.0)),
            Err(Rejection::OutsideLimits { axis: Axis::Elevation, .. })
        ));
    }

    #[test]
    fn test_narrow_azimuth_range() {
        let guard = SafetyGuard::new(MountLimits {
            min_azimuth: 90.0,
            max_azimuth: 270.0,
            ..Default::default()
        });
        assert!(guard.validate(&pos(180.0, 10.0)).is_ok());
        let err = guard.check(&pos(45.0, 10.0)).unwrap_err();
        assert!(matches!(
            err,
            Error::RejectedPosition(Rejection::OutsideLimits { axis: Axis::Azimuth, .. })
        ));
    }

    #[test]
    fn test_emergency_stop_latches() {
        let guard = SafetyGuard::new(MountLimits::default());
        assert!(guard.engage());
        assert!(!guard.engage());
        assert_eq!(guard.validate(&pos(180.0, 45.0)), Err(Rejection::EmergencyStop));
        assert_eq!(guard.validate(&pos(181.0, 45.0)), Err(Rejection::EmergencyStop));

        assert!(guard.release());
        assert!(!guard.release());
        assert!(guard.validate(&pos(180.0, 45.0)).is_ok());
    }

    #[test]
    fn test_clamp_elevation() {
        let guard = SafetyGuard::new(MountLimits::default());
        assert_eq!(guard.clamp_elevation(120.0), 90.0);
        assert_eq!(guard.clamp_elevation(-3.0), 0.0);
        assert_eq!(guard.clamp_elevation(33.0), 33.0);
    }
}
