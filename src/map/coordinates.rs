mod boxes;
mod coords;
mod crs;
mod transform;

/// Query boxes.
pub use boxes::*;
/// Positions.
pub use coords::*;
/// Reference systems.
pub use crs::{CoordinateError, Crs, Datum};
/// Pixels to positions.
pub use transform::MapView;

/// Values that carry their reference system and can be expressed in another one.
pub trait Reproject: Sized {
  fn crs(&self) -> Crs;
  #[must_use]
  fn reproject(&self, to: Crs) -> Self;
}

/// Expresses a point or box in the system named by `to`. Fails for unknown or malformed codes.
pub fn transform<T: Reproject>(value: &T, to: &str) -> Result<T, CoordinateError> {
  Ok(value.reproject(to.parse()?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use assert_approx_eq::assert_approx_eq;

  #[test]
  fn transform_by_code() {
    let p = transform(&GeoPoint::lon_lat(-111.89, 40.76), "EPSG:26912").unwrap();
    assert_approx_eq!(p.x, 424_878.3, 0.1);
    let back = transform(&p, "EPSG:4326").unwrap();
    assert_approx_eq!(back.x, -111.89, 1e-6);
    assert_approx_eq!(back.y, 40.76, 1e-6);
  }

  #[test]
  fn transform_rejects_unknown_code() {
    assert_eq!(
      transform(&GeoPoint::lon_lat(0., 0.), "EPSG:12345"),
      Err(CoordinateError::UnsupportedCrs {
        code: "EPSG:12345".to_string()
      })
    );
  }
}
