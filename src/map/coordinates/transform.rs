use serde::{Deserialize, Serialize};

use super::{GeoPoint, Reproject, ScreenPosition};

/// The part of the live map state needed to turn pixels into positions: what is in the
/// middle of the widget, how many map units a pixel covers, and how large the widget is.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct MapView {
  /// Center of the widget, in the display projection.
  pub center: GeoPoint,
  /// Display projection units per screen pixel.
  pub resolution: f64,
  pub width: f64,
  pub height: f64,
}

impl MapView {
  #[must_use]
  pub fn new(center: GeoPoint, resolution: f64, width: f64, height: f64) -> Self {
    Self {
      center,
      resolution,
      width,
      height,
    }
  }

  /// Checks if the view can map pixels at all.
  #[must_use]
  pub fn is_invalid(&self) -> bool {
    !self.center.is_finite() || !self.resolution.is_finite() || self.resolution <= 0.
  }

  /// The position under a pixel, in the display projection.
  #[must_use]
  pub fn screen_to_geo(&self, pos: ScreenPosition) -> GeoPoint {
    GeoPoint::new(
      self.center.x + (pos.x - self.width / 2.) * self.resolution,
      self.center.y - (pos.y - self.height / 2.) * self.resolution,
      self.center.crs,
    )
  }

  /// The pixel showing `point`, which may be given in any system.
  #[must_use]
  pub fn geo_to_screen(&self, point: &GeoPoint) -> ScreenPosition {
    let point = point.reproject(self.center.crs);
    ScreenPosition {
      x: (point.x - self.center.x) / self.resolution + self.width / 2.,
      y: (self.center.y - point.y) / self.resolution + self.height / 2.,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::coordinates::Crs;
  use assert_approx_eq::assert_approx_eq;

  fn view() -> MapView {
    MapView::new(GeoPoint::new(1000., 2000., Crs::WebMercator), 2., 800., 600.)
  }

  #[test]
  fn center_pixel_is_center() {
    let p = view().screen_to_geo(ScreenPosition::new(400., 300.));
    assert_approx_eq!(p.x, 1000.);
    assert_approx_eq!(p.y, 2000.);
  }

  #[test]
  fn screen_y_points_down() {
    let p = view().screen_to_geo(ScreenPosition::new(0., 0.));
    assert_approx_eq!(p.x, 200.);
    assert_approx_eq!(p.y, 2600.);
  }

  #[test]
  fn screen_geo_inverse() {
    let v = MapView::new(GeoPoint::new(-1030., 2014., Crs::WebMercator), 0.75, 1024., 768.);
    let pos = ScreenPosition::new(123., 456.);
    let back = v.geo_to_screen(&v.screen_to_geo(pos));
    assert_approx_eq!(back.x, pos.x, 1e-9);
    assert_approx_eq!(back.y, pos.y, 1e-9);
  }

  #[test]
  fn invalid_view() {
    assert!(!view().is_invalid());
    assert!(MapView { resolution: 0., ..view() }.is_invalid());
    assert!(MapView { resolution: f64::NAN, ..view() }.is_invalid());
    let nowhere = GeoPoint::new(f64::INFINITY, 0., Crs::WebMercator);
    assert!(MapView { center: nowhere, ..view() }.is_invalid());
  }
}
