use serde::{Deserialize, Serialize};

use super::{CoordinateError, Crs, Reproject};

/// Decimal places used whenever a coordinate is shown to a human or put into a URL.
pub const DISPLAY_PRECISION: usize = 6;

/// A position tagged with the reference system its values are expressed in.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
  pub x: f64,
  pub y: f64,
  pub crs: Crs,
}

impl GeoPoint {
  #[must_use]
  pub fn new(x: f64, y: f64, crs: Crs) -> Self {
    Self { x, y, crs }
  }

  /// A geographic position in degrees.
  #[must_use]
  pub fn lon_lat(lon: f64, lat: f64) -> Self {
    Self::new(lon, lat, Crs::Wgs84)
  }

  #[must_use]
  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite()
  }

  /// `x,y` with six decimals, the form deep links carry.
  #[must_use]
  pub fn to_display_string(&self) -> String {
    format!(
      "{:.prec$},{:.prec$}",
      self.x,
      self.y,
      prec = DISPLAY_PRECISION
    )
  }

  /// Parses `x,y` or `x,y,crs` as produced by [`GeoPoint::to_display_string`] or an
  /// application URL. A missing crs means `default_crs`.
  pub fn parse_url_param(input: &str, default_crs: Crs) -> Result<Self, CoordinateError> {
    let invalid = || CoordinateError::InvalidCoordinate {
      input: input.to_string(),
    };
    let mut parts = input.splitn(3, ',').map(str::trim);
    let x = parts
      .next()
      .and_then(|p| p.parse::<f64>().ok())
      .ok_or_else(invalid)?;
    let y = parts
      .next()
      .and_then(|p| p.parse::<f64>().ok())
      .ok_or_else(invalid)?;
    let crs = Crs::parse_or_default(parts.next(), default_crs)?;
    let point = Self::new(x, y, crs);
    if point.is_finite() {
      Ok(point)
    } else {
      Err(invalid())
    }
  }
}

impl Reproject for GeoPoint {
  fn crs(&self) -> Crs {
    self.crs
  }

  fn reproject(&self, to: Crs) -> Self {
    let (x, y) = self.crs.transform_xy(to, self.x, self.y);
    Self { x, y, crs: to }
  }
}

/// An actual pixel in the map widget, origin top left, y growing downwards.
#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct ScreenPosition {
  pub x: f64,
  pub y: f64,
}

impl ScreenPosition {
  #[must_use]
  pub fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use assert_approx_eq::assert_approx_eq;

  #[test]
  fn display_string_rounds_to_six_decimals() {
    let p = GeoPoint::lon_lat(-111.890_000_4, 40.760_000_04);
    assert_eq!(p.to_display_string(), "-111.890000,40.760000");
  }

  #[test]
  fn parse_url_param_with_and_without_crs() {
    let p = GeoPoint::parse_url_param("-111.89,40.76", Crs::Wgs84).unwrap();
    assert_eq!(p, GeoPoint::lon_lat(-111.89, 40.76));

    let p = GeoPoint::parse_url_param("-12455537.8, 4977005.9, EPSG:3857", Crs::Wgs84).unwrap();
    assert_eq!(p.crs, Crs::WebMercator);
    assert_approx_eq!(p.x, -12_455_537.8);
  }

  #[test]
  fn parse_url_param_rejects_garbage() {
    assert!(matches!(
      GeoPoint::parse_url_param("abc,1", Crs::Wgs84),
      Err(CoordinateError::InvalidCoordinate { .. })
    ));
    assert!(matches!(
      GeoPoint::parse_url_param("1", Crs::Wgs84),
      Err(CoordinateError::InvalidCoordinate { .. })
    ));
    assert!(matches!(
      GeoPoint::parse_url_param("1,2,EPSG:1", Crs::Wgs84),
      Err(CoordinateError::UnsupportedCrs { .. })
    ));
  }

  #[test]
  fn display_string_round_trip() {
    let p = GeoPoint::lon_lat(13.409_496, 52.520_754);
    let parsed = GeoPoint::parse_url_param(&p.to_display_string(), Crs::Wgs84).unwrap();
    assert_approx_eq!(parsed.x, p.x, 1e-9);
    assert_approx_eq!(parsed.y, p.y, 1e-9);
  }
}
