use nalgebra::{Rotation3, Vector3};

use super::time::Epoch;
use super::{ecliptic_to_equatorial, Equatorial};
use crate::util::normalize_degrees;

/// Keplerian elements with linear rates per Julian century
///
/// Values are JPL's approximate elements valid 1800-2050, referred to the
/// J2000 ecliptic and equinox. Each pair is (value at J2000, rate).
#[derive(Debug, Clone, Copy)]
pub struct OrbitalElements {
    pub name: &'static str,
    /// Semi-major axis, AU
    pub semi_major_axis: [f64; 2],
    pub eccentricity: [f64; 2],
    /// Inclination, degrees
    pub inclination: [f64; 2],
    /// Mean longitude, degrees
    pub mean_longitude: [f64; 2],
    /// Longitude of perihelion, degrees
    pub perihelion: [f64; 2],
    /// Longitude of the ascending node, degrees
    pub node: [f64; 2],
}

/// Planets the engine can point at
pub const PLANETS: [OrbitalElements; 5] = [
    OrbitalElements {
        name: "Mercury",
        semi_major_axis: [0.387_099_27, 0.000_000_37],
        eccentricity: [0.205_635_93, 0.000_019_06],
        inclination: [7.004_979_02, -0.005_947_49],
        mean_longitude: [252.250_323_50, 149_472.674_111_75],
        perihelion: [77.457_796_28, 0.160_476_89],
        node: [48.330_765_93, -0.125_340_81],
    },
    OrbitalElements {
        name: "Venus",
        semi_major_axis: [0.723_335_66, 0.000_003_90],
        eccentricity: [0.006_776_72, -0.000_041_07],
        inclination: [3.394_676_05, -0.000_788_90],
        mean_longitude: [181.979_099_50, 58_517.815_387_29],
        perihelion: [131.602_467_18, 0.002_683_29],
        node: [76.679_842_55, -0.277_694_18],
    },
    OrbitalElements {
        name: "Mars",
        semi_major_axis: [1.523_710_34, 0.000_018_47],
        eccentricity: [0.093_394_10, 0.000_078_82],
        inclination: [1.849_691_42, -0.008_131_31],
        mean_longitude: [-4.553_432_05, 19_140.302_684_99],
        perihelion: [-23.943_629_59, 0.444_410_88],
        node: [49.559_538_91, -0.292_573_43],
    },
    OrbitalElements {
        name: "Jupiter",
        semi_major_axis: [5.202_887_00, -0.000_116_07],
        eccentricity: [0.048_386_24, -0.000_132_53],
        inclination: [1.304_396_95, -0.001_837_14],
        mean_longitude: [34.396_440_51, 3_034.746_127_75],
        perihelion: [14.728_479_83, 0.212_526_68],
        node: [100.473_909_09, 0.204_691_06],
    },
    OrbitalElements {
        name: "Saturn",
        semi_major_axis: [9.536_675_94, -0.001_250_60],
        eccentricity: [0.053_861_79, -0.000_509_91],
        inclination: [2.485_991_87, 0.001_936_09],
        mean_longitude: [49.954_244_23, 1_222.493_622_01],
        perihelion: [92.598_878_31, -0.418_972_16],
        node: [113.662_424_48, -0.288_677_94],
    },
];

/// Earth-Moon barycentre, standing in for the Earth
const EARTH: OrbitalElements = OrbitalElements {
    name: "Earth",
    semi_major_axis: [1.000_002_61, 0.000_005_62],
    eccentricity: [0.016_711_23, -0.000_043_92],
    inclination: [-0.000_015_31, -0.012_946_68],
    mean_longitude: [100.464_571_66, 35_999.372_449_81],
    perihelion: [102.937_681_93, 0.323_273_64],
    node: [0.0, 0.0],
};

/// General precession in longitude, degrees per Julian century
const PRECESSION_PER_CENTURY: f64 = 1.396_971_3;

/// Looks a planet up by name, ignoring case
pub fn find(name: &str) -> Option<&'static OrbitalElements> {
    let name = name.trim();
    PLANETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

fn at(pair: [f64; 2], centuries: f64) -> f64 {
    pair[0] + pair[1] * centuries
}

impl OrbitalElements {
    /// Heliocentric position in the J2000 ecliptic frame, AU
    pub fn heliocentric(&self, centuries: f64) -> Vector3<f64> {
        let a = at(self.semi_major_axis, centuries);
        let e = at(self.eccentricity, centuries);
        let inclination = at(self.inclination, centuries).to_radians();
        let perihelion = at(self.perihelion, centuries);
        let node = at(self.node, centuries);
        let argument = (perihelion - node).to_radians();

        let mut mean_anomaly = normalize_degrees(at(self.mean_longitude, centuries) - perihelion);
        if mean_anomaly > 180.0 {
            mean_anomaly -= 360.0;
        }
        let anomaly = solve_kepler(mean_anomaly.to_radians(), e);

        let in_plane = Vector3::new(
            a * (anomaly.cos() - e),
            a * (1.0 - e * e).sqrt() * anomaly.sin(),
            0.0,
        );

        let orientation = Rotation3::from_axis_angle(&Vector3::z_axis(), node.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), inclination)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), argument);
        orientation * in_plane
    }

    /// Geocentric place of date
    pub fn geocentric(&self, epoch: &Epoch) -> Equatorial {
        let t = epoch.centuries;
        let offset = self.heliocentric(t) - EARTH.heliocentric(t);
        let distance = offset.norm();

        let longitude = offset.y.atan2(offset.x).to_degrees() + PRECESSION_PER_CENTURY * t;
        let latitude = (offset.z / distance).asin().to_degrees();
        let (ra, dec) = ecliptic_to_equatorial(longitude, latitude, epoch.obliquity());

        Equatorial {
            ra,
            dec,
            distance_au: Some(distance),
        }
    }
}

/// Eccentric anomaly for a mean anomaly, both in radians
fn solve_kepler(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut anomaly = mean_anomaly + eccentricity * mean_anomaly.sin();
    for _ in 0..30 {
        let delta = (anomaly - eccentricity * anomaly.sin() - mean_anomaly)
            / (1.0 - eccentricity * anomaly.cos());
        anomaly -= delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    anomaly
}
