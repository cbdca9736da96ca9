use serde::{Deserialize, Serialize};

use super::{Crs, GeoPoint, Reproject};

/// Corner samples per edge used when reprojecting a box. Corners alone miss the bulge of
/// edges under transverse mercator.
const EDGE_SAMPLES: u32 = 8;

/// An axis aligned box in a given reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub min_x: f64,
  pub min_y: f64,
  pub max_x: f64,
  pub max_y: f64,
  pub crs: Crs,
}

impl BoundingBox {
  #[must_use]
  pub fn get_invalid(crs: Crs) -> Self {
    Self {
      min_x: f64::MAX,
      min_y: f64::MAX,
      max_x: f64::MIN,
      max_y: f64::MIN,
      crs,
    }
  }

  /// The box of `buffer_pixels` screen pixels around `point`. `resolution` is in units of
  /// the point's reference system per pixel.
  #[must_use]
  pub fn around(point: GeoPoint, resolution: f64, buffer_pixels: f64) -> Self {
    let mut bb = Self::get_invalid(point.crs);
    bb.add_point(point.x, point.y);
    bb.frame(resolution.abs() * buffer_pixels.abs());
    bb
  }

  /// The extent of a ring of positions given in `crs`.
  pub fn from_iterator<I: IntoIterator<Item = (f64, f64)>>(positions: I, crs: Crs) -> Self {
    let mut bb = Self::get_invalid(crs);
    positions
      .into_iter()
      .for_each(|(x, y)| bb.add_point(x, y));
    bb
  }

  #[must_use]
  pub fn is_valid(&self) -> bool {
    self.min_x <= self.max_x
      && self.min_y <= self.max_y
      && self.min_x.is_finite()
      && self.min_y.is_finite()
      && self.max_x.is_finite()
      && self.max_y.is_finite()
  }

  pub fn frame(&mut self, frame: f64) {
    self.min_x -= frame;
    self.min_y -= frame;
    self.max_x += frame;
    self.max_y += frame;
  }

  pub fn add_point(&mut self, x: f64, y: f64) {
    self.min_x = self.min_x.min(x);
    self.min_y = self.min_y.min(y);
    self.max_x = self.max_x.max(x);
    self.max_y = self.max_y.max(y);
  }

  #[must_use]
  pub fn center(&self) -> GeoPoint {
    GeoPoint::new(
      f64::midpoint(self.min_x, self.max_x),
      f64::midpoint(self.min_y, self.max_y),
      self.crs,
    )
  }

  #[must_use]
  pub fn width(&self) -> f64 {
    self.max_x - self.min_x
  }

  #[must_use]
  pub fn height(&self) -> f64 {
    self.max_y - self.min_y
  }

  #[must_use]
  pub fn contains(&self, point: &GeoPoint) -> bool {
    let point = point.reproject(self.crs);
    (self.min_x..=self.max_x).contains(&point.x) && (self.min_y..=self.max_y).contains(&point.y)
  }

  /// `minX,minY,maxX,maxY,crs` as WFS expects it.
  #[must_use]
  pub fn to_query_param(&self) -> String {
    format!(
      "{},{},{},{},{}",
      self.min_x,
      self.min_y,
      self.max_x,
      self.max_y,
      self.crs.code()
    )
  }

  /// The WMS 1.3.0 `BBOX` value, which uses lat,lon axis order for geographic systems.
  #[must_use]
  pub fn to_wms_param(&self) -> String {
    if self.crs.is_geographic() {
      format!("{},{},{},{}", self.min_y, self.min_x, self.max_y, self.max_x)
    } else {
      format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
  }

  fn edge_positions(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
    (0..=EDGE_SAMPLES).flat_map(move |i| {
      let t = f64::from(i) / f64::from(EDGE_SAMPLES);
      let x = self.min_x + t * self.width();
      let y = self.min_y + t * self.height();
      [
        (x, self.min_y),
        (x, self.max_y),
        (self.min_x, y),
        (self.max_x, y),
      ]
    })
  }
}

impl Reproject for BoundingBox {
  fn crs(&self) -> Crs {
    self.crs
  }

  fn reproject(&self, to: Crs) -> Self {
    if self.crs == to || !self.is_valid() {
      return Self { crs: to, ..*self };
    }
    Self::from_iterator(
      self
        .edge_positions()
        .map(|(x, y)| self.crs.transform_xy(to, x, y)),
      to,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::coordinates::Datum;
  use assert_approx_eq::assert_approx_eq;

  #[test]
  fn around_uses_resolution_and_buffer() {
    let p = GeoPoint::new(100., 200., Crs::WebMercator);
    let bb = BoundingBox::around(p, 2.5, 4.);
    assert_approx_eq!(bb.min_x, 90.);
    assert_approx_eq!(bb.max_x, 110.);
    assert_approx_eq!(bb.min_y, 190.);
    assert_approx_eq!(bb.max_y, 210.);
    assert_eq!(bb.center(), p);
  }

  #[test]
  fn extent_of_ring() {
    let bb = BoundingBox::from_iterator(
      [(-112.0, 40.5), (-111.5, 40.9), (-111.8, 40.6)],
      Crs::Wgs84,
    );
    assert!(bb.is_valid());
    assert_approx_eq!(bb.width(), 0.5);
    assert_approx_eq!(bb.height(), 0.4);
  }

  #[test]
  fn empty_box_is_invalid() {
    assert!(!BoundingBox::from_iterator([], Crs::Wgs84).is_valid());
  }

  #[test]
  fn reprojected_box_contains_original_center() {
    let bb = BoundingBox::around(GeoPoint::lon_lat(-111.89, 40.76), 0.001, 5.);
    let utm = Crs::Utm {
      zone: 12,
      north: true,
      datum: Datum::Nad83,
    };
    let projected = bb.reproject(utm);
    assert_eq!(projected.crs, utm);
    assert!(projected.contains(&GeoPoint::lon_lat(-111.89, 40.76)));
    // 0.01 degrees is a bit less than a kilometer here.
    assert!(projected.width() > 800. && projected.width() < 900.);
  }

  #[test]
  fn reprojected_box_covers_curved_edges() {
    let bb = BoundingBox::from_iterator([(-114., 40.), (-108., 41.)], Crs::Wgs84);
    let utm = Crs::Utm {
      zone: 12,
      north: true,
      datum: Datum::Wgs84,
    };
    // The 40th parallel dips below its end points at the central meridian.
    let bottom_middle = GeoPoint::lon_lat(-111., 40.);
    assert!(bb.reproject(utm).contains(&bottom_middle));
  }

  #[test]
  fn wms_param_swaps_axes_for_geographic() {
    let bb = BoundingBox::from_iterator([(-112., 40.), (-111., 41.)], Crs::Wgs84);
    assert_eq!(bb.to_wms_param(), "40,-112,41,-111");
    assert_eq!(bb.to_query_param(), "-112,40,-111,41,EPSG:4326");
  }
}
