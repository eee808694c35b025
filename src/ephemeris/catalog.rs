/// A fixed source with J2000 coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogStar {
    pub name: &'static str,
    /// Other names the source is known by
    pub aliases: &'static [&'static str],
    /// Right ascension at J2000, degrees
    pub ra: f64,
    /// Declination at J2000, degrees
    pub dec: f64,
}

const fn star(name: &'static str, aliases: &'static [&'static str], ra: f64, dec: f64) -> CatalogStar {
    CatalogStar { name, aliases, ra, dec }
}

/// Bright stars and the usual radio calibrators
pub const CATALOG: &[CatalogStar] = &[
    star("Polaris", &["Alpha UMi"], 37.954_56, 89.264_11),
    star("Sirius", &["Alpha CMa"], 101.287_16, -16.716_12),
    star("Vega", &["Alpha Lyr"], 279.234_73, 38.783_69),
    star("Arcturus", &["Alpha Boo"], 213.915_30, 19.182_41),
    star("Capella", &["Alpha Aur"], 79.172_33, 45.997_99),
    star("Rigel", &["Beta Ori"], 78.634_47, -8.201_64),
    star("Betelgeuse", &["Alpha Ori"], 88.792_94, 7.407_06),
    star("Deneb", &["Alpha Cyg"], 310.357_98, 45.280_34),
    star("Altair", &["Alpha Aql"], 297.695_83, 8.868_32),
    star("Aldebaran", &["Alpha Tau"], 68.980_16, 16.509_30),
    star("Antares", &["Alpha Sco"], 247.351_92, -26.432_00),
    star("Spica", &["Alpha Vir"], 201.298_25, -11.161_32),
    star("Pollux", &["Beta Gem"], 116.328_96, 28.026_20),
    star("Procyon", &["Alpha CMi"], 114.825_49, 5.224_99),
    star("Regulus", &["Alpha Leo"], 152.092_96, 11.967_21),
    star("Cas A", &["Cassiopeia A", "3C 461"], 350.850_0, 58.815_0),
    star("Cyg A", &["Cygnus A", "3C 405"], 299.868_2, 40.733_9),
    star("Tau A", &["Taurus A", "Crab", "M1", "3C 144"], 83.633_1, 22.014_5),
    star("Vir A", &["Virgo A", "M87", "3C 274"], 187.705_9, 12.391_1),
    star("Sgr A*", &["Sgr A", "Galactic Center", "Galactic Centre"], 266.416_8, -29.007_8),
];

/// Annual general precession in right ascension, degrees
const PRECESSION_M: f64 = 46.124_4 / 3_600.0;

/// Annual general precession in declination, degrees
const PRECESSION_N: f64 = 20.043_1 / 3_600.0;

fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Finds a source by name or alias
///
/// Matching ignores case, whitespace, dashes and underscores, so "cas a",
/// "CasA" and "Cas-A" all name Cassiopeia A.
pub fn lookup(name: &str) -> Option<&'static CatalogStar> {
    let wanted = canonical(name);
    if wanted.is_empty() {
        return None;
    }
    CATALOG.iter().find(|star| {
        canonical(star.name) == wanted || star.aliases.iter().any(|alias| canonical(alias) == wanted)
    })
}

/// Primary names of every catalog entry
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|star| star.name)
}

/// Precesses J2000 coordinates by `years` with the first-order formula
///
/// Good to a few arcseconds over decades away from the poles; the RA term
/// degrades as declination approaches ±90°.
pub fn precess(ra: f64, dec: f64, years: f64) -> (f64, f64) {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let tan_dec = dec.to_radians().tan();

    let ra = ra + (PRECESSION_M + PRECESSION_N * sin_ra * tan_dec) * years;
    let dec = (dec + PRECESSION_N * cos_ra * years).clamp(-90.0, 90.0);
    (crate::util::normalize_degrees(ra), dec)
}
