use std::{fmt::Display, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
  #[error("Unsupported coordinate reference system: {code}")]
  UnsupportedCrs { code: String },
  #[error("Invalid coordinate: {input}")]
  InvalidCoordinate { input: String },
}

/// Matches the usual ways an EPSG code is written in service configurations.
static EPSG_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"^(?i:epsg:|urn:ogc:def:crs:epsg:[0-9.]*:|https?://www\.opengis\.net/def/crs/epsg/0/)(\d+)$",
  )
  .expect("re did not compile")
});

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1. / 298.257_223_563;
const GRS80_F: f64 = 1. / 298.257_222_101;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Latitude bound of the square Web Mercator world.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// The geodetic datum a UTM zone is defined on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datum {
  Wgs84,
  /// Treated as coincident with WGS84, only the ellipsoid flattening differs.
  Nad83,
}

impl Datum {
  fn flattening(self) -> f64 {
    match self {
      Datum::Wgs84 => WGS84_F,
      Datum::Nad83 => GRS80_F,
    }
  }
}

/// The coordinate reference systems the query pipeline can reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
  /// Geographic longitude/latitude in degrees (EPSG:4326).
  Wgs84,
  /// Spherical Web Mercator in meters (EPSG:3857).
  WebMercator,
  /// Universal Transverse Mercator in meters.
  Utm { zone: u8, north: bool, datum: Datum },
}

impl Crs {
  /// The EPSG code of this system.
  #[must_use]
  pub fn epsg(&self) -> u32 {
    match *self {
      Crs::Wgs84 => 4326,
      Crs::WebMercator => 3857,
      Crs::Utm {
        zone,
        north: true,
        datum: Datum::Wgs84,
      } => 32600 + u32::from(zone),
      Crs::Utm {
        zone,
        north: false,
        datum: Datum::Wgs84,
      } => 32700 + u32::from(zone),
      Crs::Utm {
        zone,
        datum: Datum::Nad83,
        ..
      } => 26900 + u32::from(zone),
    }
  }

  /// The code as sent to services, e.g. `EPSG:4326`.
  #[must_use]
  pub fn code(&self) -> String {
    format!("EPSG:{}", self.epsg())
  }

  #[must_use]
  pub fn is_geographic(&self) -> bool {
    matches!(self, Crs::Wgs84)
  }

  fn from_epsg(epsg: u32, code: &str) -> Result<Self, CoordinateError> {
    let unsupported = || CoordinateError::UnsupportedCrs {
      code: code.to_string(),
    };
    #[allow(clippy::cast_possible_truncation)]
    let utm = |base: u32, north: bool, datum: Datum| {
      let zone = epsg - base;
      if (1..=60).contains(&zone) {
        Ok(Crs::Utm {
          zone: zone as u8,
          north,
          datum,
        })
      } else {
        Err(unsupported())
      }
    };
    match epsg {
      4326 | 4269 => Ok(Crs::Wgs84),
      3857 | 900_913 | 102_100 | 102_113 => Ok(Crs::WebMercator),
      32601..=32660 => utm(32600, true, Datum::Wgs84),
      32701..=32760 => utm(32700, false, Datum::Wgs84),
      26901..=26923 => utm(26900, true, Datum::Nad83),
      _ => Err(unsupported()),
    }
  }

  /// Resolves an optional CRS declaration. Only an absent value falls back to `default`,
  /// anything present has to parse.
  pub fn parse_or_default(code: Option<&str>, default: Crs) -> Result<Crs, CoordinateError> {
    match code {
      None => Ok(default),
      Some(code) => code.parse(),
    }
  }

  /// Converts a single position between two systems.
  #[must_use]
  pub fn transform_xy(self, to: Crs, x: f64, y: f64) -> (f64, f64) {
    if self == to {
      return (x, y);
    }
    let (lon, lat) = self.unproject(x, y);
    to.project(lon, lat)
  }

  fn unproject(self, x: f64, y: f64) -> (f64, f64) {
    match self {
      Crs::Wgs84 => (x, y),
      Crs::WebMercator => (
        (x / WGS84_A).to_degrees(),
        (2. * (y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
      ),
      Crs::Utm { zone, north, datum } => {
        TransverseMercator::utm(zone, datum).inverse(x, y - false_northing(north))
      }
    }
  }

  fn project(self, lon: f64, lat: f64) -> (f64, f64) {
    match self {
      Crs::Wgs84 => (lon, lat),
      Crs::WebMercator => {
        let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
        (
          WGS84_A * lon.to_radians(),
          WGS84_A * (std::f64::consts::FRAC_PI_4 + lat / 2.).tan().ln(),
        )
      }
      Crs::Utm { zone, north, datum } => {
        let (e, n) = TransverseMercator::utm(zone, datum).forward(lon, lat);
        (e, n + false_northing(north))
      }
    }
  }
}

fn false_northing(north: bool) -> f64 {
  if north { 0. } else { UTM_FALSE_NORTHING_SOUTH }
}

impl FromStr for Crs {
  type Err = CoordinateError;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let code = input.trim();
    if code.eq_ignore_ascii_case("CRS:84") {
      return Ok(Crs::Wgs84);
    }
    let epsg = EPSG_RE
      .captures(code)
      .and_then(|caps| caps.get(1))
      .and_then(|m| m.as_str().parse::<u32>().ok())
      .ok_or_else(|| CoordinateError::UnsupportedCrs {
        code: code.to_string(),
      })?;
    Crs::from_epsg(epsg, code)
  }
}

impl TryFrom<String> for Crs {
  type Error = CoordinateError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Crs> for String {
  fn from(crs: Crs) -> Self {
    crs.code()
  }
}

impl Display for Crs {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "EPSG:{}", self.epsg())
  }
}

/// Transverse Mercator on an ellipsoid using Krüger's series to third order in n.
/// Accurate to well below a millimeter inside a UTM zone.
struct TransverseMercator {
  central_meridian: f64,
  /// k0 times the rectifying radius.
  scale: f64,
  eccentricity: f64,
  alpha: [f64; 3],
  beta: [f64; 3],
  delta: [f64; 3],
}

impl TransverseMercator {
  fn utm(zone: u8, datum: Datum) -> Self {
    let n = datum.flattening() / (2. - datum.flattening());
    let (n2, n3) = (n * n, n * n * n);
    let rectifying_radius = WGS84_A / (1. + n) * (1. + n2 / 4. + n2 * n2 / 64.);
    Self {
      central_meridian: (f64::from(zone) * 6. - 183.).to_radians(),
      scale: UTM_K0 * rectifying_radius,
      eccentricity: 2. * n.sqrt() / (1. + n),
      alpha: [
        n / 2. - 2. / 3. * n2 + 5. / 16. * n3,
        13. / 48. * n2 - 3. / 5. * n3,
        61. / 240. * n3,
      ],
      beta: [
        n / 2. - 2. / 3. * n2 + 37. / 96. * n3,
        1. / 48. * n2 + 1. / 15. * n3,
        17. / 480. * n3,
      ],
      delta: [
        2. * n - 2. / 3. * n2 - 2. * n3,
        7. / 3. * n2 - 8. / 5. * n3,
        56. / 15. * n3,
      ],
    }
  }

  /// Degrees to (easting, northing) without the hemisphere false northing.
  fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
    let phi = lat.to_radians();
    let lambda = lon.to_radians() - self.central_meridian;
    let e = self.eccentricity;
    let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
    let xi = t.atan2(lambda.cos());
    let eta = (lambda.sin() / (1. + t * t).sqrt()).atanh();

    let (mut easting, mut northing) = (eta, xi);
    for (j, alpha) in (1_i32..).zip(self.alpha) {
      let k = 2. * f64::from(j);
      easting += alpha * (k * xi).cos() * (k * eta).sinh();
      northing += alpha * (k * xi).sin() * (k * eta).cosh();
    }
    (
      UTM_FALSE_EASTING + self.scale * easting,
      self.scale * northing,
    )
  }

  /// (easting, northing) without false northing to degrees.
  fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
    let xi = northing / self.scale;
    let eta = (easting - UTM_FALSE_EASTING) / self.scale;

    let (mut xi_p, mut eta_p) = (xi, eta);
    for (j, beta) in (1_i32..).zip(self.beta) {
      let k = 2. * f64::from(j);
      xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
      eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in (1_i32..).zip(self.delta) {
      phi += delta * (2. * f64::from(j) * chi).sin();
    }
    let lambda = self.central_meridian + eta_p.sinh().atan2(xi_p.cos());
    (lambda.to_degrees(), phi.to_degrees())
  }
}
