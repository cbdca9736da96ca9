use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{OptionFuture, join, join_all};
use geo_types::Coord;
use log::{debug, warn};
use tracing::Instrument;

use super::{
  QueryError,
  feature::{RawServiceFeature, feature_from_raw_value, features_from_geojson},
  guard::Generation,
  in_flight::{InFlight, RequestKind},
  service::{FeatureRequest, FeatureService, ImageValue, ImageValueRequest},
};
use crate::config::Config;
use crate::map::coordinates::{BoundingBox, CoordinateError, Crs, GeoPoint, Reproject};
use crate::map::layers::{LayerQueryDescriptor, QueryKind};

/// The knobs of the engine, usually taken from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
  pub buffer_pixels: f64,
  pub display_crs: Crs,
  pub query_crs: Crs,
  pub max_features: u32,
  pub layer_timeout: Duration,
  pub raster_pixel_size: u32,
  pub geometry_field: String,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self::from(&Config::default())
  }
}

impl From<&Config> for EngineSettings {
  fn from(config: &Config) -> Self {
    Self {
      buffer_pixels: config.buffer_pixels,
      display_crs: config.display_crs,
      query_crs: config.query_crs,
      max_features: config.max_features,
      layer_timeout: Duration::from_secs(config.layer_timeout_secs),
      raster_pixel_size: config.raster_pixel_size.max(1),
      geometry_field: config.geometry_field.clone(),
    }
  }
}

/// What one layer returned, tagged with the position of its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLayerResult {
  pub index: usize,
  pub descriptor: LayerQueryDescriptor,
  pub features: Vec<RawServiceFeature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerFailure {
  pub layer: String,
  pub error: QueryError,
}

/// A settled interaction. Layers that failed entirely only show up in `failures`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
  pub generation: Generation,
  pub point_query: bool,
  pub layers: Vec<RawLayerResult>,
  pub failures: Vec<LayerFailure>,
}

impl QueryOutcome {
  #[must_use]
  pub fn feature_count(&self) -> usize {
    self.layers.iter().map(|l| l.features.len()).sum()
  }
}

#[derive(Debug, Clone, Copy)]
enum Spatial {
  /// A clicked position in the display projection and the size of a pixel there.
  Point { at: GeoPoint, resolution: f64 },
  /// The extent of a drawn shape.
  Polygon { extent: BoundingBox },
}

#[derive(Debug, Default)]
struct LayerReport {
  features: Option<Vec<RawServiceFeature>>,
  failures: Vec<LayerFailure>,
}

impl LayerReport {
  fn record(&mut self, layer: &str, result: Result<Vec<RawServiceFeature>, QueryError>) {
    match result {
      Ok(features) => self.features.get_or_insert_with(Vec::new).extend(features),
      Err(error) => {
        warn!("{error}");
        self.failures.push(LayerFailure {
          layer: layer.to_string(),
          error,
        });
      }
    }
  }
}

/// Queries every layer of an interaction at once and collects what settles.
pub struct FeatureQueryEngine {
  service: Arc<dyn FeatureService>,
  settings: EngineSettings,
  in_flight: Arc<InFlight>,
}

impl FeatureQueryEngine {
  #[must_use]
  pub fn new(service: Arc<dyn FeatureService>, settings: EngineSettings) -> Self {
    Self {
      service,
      settings,
      in_flight: InFlight::new(),
    }
  }

  #[must_use]
  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  /// Layer queries that did not settle yet.
  #[must_use]
  pub fn in_flight(&self) -> &Arc<InFlight> {
    &self.in_flight
  }

  /// Queries all layers around a point. `resolution` is the size of a screen pixel in units
  /// of the display projection.
  pub async fn query_point(
    &self,
    generation: Generation,
    point: GeoPoint,
    resolution: f64,
    descriptors: &[LayerQueryDescriptor],
  ) -> Result<QueryOutcome, QueryError> {
    let invalid = || CoordinateError::InvalidCoordinate {
      input: point.to_display_string(),
    };
    if !point.is_finite() || !resolution.is_finite() || resolution <= 0. {
      return Err(invalid().into());
    }
    if descriptors.is_empty() {
      return Err(QueryError::NoLayersQueryable);
    }
    let at = point.reproject(self.settings.display_crs);
    if !at.is_finite() {
      return Err(invalid().into());
    }

    Ok(
      self
        .run(generation, Spatial::Point { at, resolution }, descriptors)
        .await,
    )
  }

  /// Queries all layers within the extent of a drawn ring.
  pub async fn query_polygon(
    &self,
    generation: Generation,
    ring: &[GeoPoint],
    descriptors: &[LayerQueryDescriptor],
  ) -> Result<QueryOutcome, QueryError> {
    if ring.len() < 3 {
      return Err(QueryError::InvalidGeometry {
        positions: ring.len(),
      });
    }
    if descriptors.is_empty() {
      return Err(QueryError::NoLayersQueryable);
    }
    let query_crs = self.settings.query_crs;
    let extent = BoundingBox::from_iterator(
      ring.iter().map(|p| {
        let p = p.reproject(query_crs);
        (p.x, p.y)
      }),
      query_crs,
    );
    if !extent.is_valid() {
      return Err(
        CoordinateError::InvalidCoordinate {
          input: ring
            .iter()
            .map(GeoPoint::to_display_string)
            .collect::<Vec<_>>()
            .join(" "),
        }
        .into(),
      );
    }

    Ok(
      self
        .run(generation, Spatial::Polygon { extent }, descriptors)
        .await,
    )
  }

  async fn run(
    &self,
    generation: Generation,
    spatial: Spatial,
    descriptors: &[LayerQueryDescriptor],
  ) -> QueryOutcome {
    debug!(
      "Interaction {generation} queries {} layers.",
      descriptors.len()
    );
    let reports = join_all(descriptors.iter().enumerate().map(|(index, descriptor)| {
      let span = tracing::info_span!(
        "layer_query",
        layer = %descriptor.key,
        generation = generation.0
      );
      async move { (index, self.query_layer(generation, descriptor, spatial).await) }
        .instrument(span)
    }))
    .await;

    let mut outcome = QueryOutcome {
      generation,
      point_query: matches!(spatial, Spatial::Point { .. }),
      layers: Vec::new(),
      failures: Vec::new(),
    };
    for (index, report) in reports {
      outcome.failures.extend(report.failures);
      if let Some(features) = report.features {
        outcome.layers.push(RawLayerResult {
          index,
          descriptor: descriptors[index].clone(),
          features,
        });
      }
    }
    debug!(
      "Interaction {generation} settled with {} features, {} failures.",
      outcome.feature_count(),
      outcome.failures.len()
    );
    outcome
  }

  async fn query_layer(
    &self,
    generation: Generation,
    descriptor: &LayerQueryDescriptor,
    spatial: Spatial,
  ) -> LayerReport {
    let started = Instant::now();
    let mut report = LayerReport::default();
    match &descriptor.kind {
      QueryKind::Feature {
        type_name,
        geometry_field,
      } => {
        let vector = self.limited(
          &descriptor.key,
          self.fetch_features(
            generation,
            descriptor,
            type_name,
            geometry_field.as_deref(),
            spatial,
          ),
        );
        let raster: OptionFuture<_> = descriptor
          .raster
          .as_ref()
          .filter(|_| matches!(spatial, Spatial::Point { .. }))
          .map(|raster| {
            self.limited(
              &descriptor.key,
              self.sample_image(
                generation,
                &descriptor.key,
                &raster.service_url,
                &raster.layer_name,
                raster.crs,
                format!("{}:{}", descriptor.namespace(), raster.layer_name),
                spatial,
              ),
            )
          })
          .into();
        let (vector, raster) = join(vector, raster).await;
        report.record(&descriptor.key, vector);
        if let Some(raster) = raster {
          report.record(&descriptor.key, raster);
        }
      }
      QueryKind::Image { layer_name } => {
        let image = self
          .limited(
            &descriptor.key,
            self.sample_image(
              generation,
              &descriptor.key,
              &descriptor.service_url,
              layer_name,
              descriptor.crs,
              descriptor.namespace(),
              spatial,
            ),
          )
          .await;
        report.record(&descriptor.key, image);
      }
    }
    debug!(
      "Layer {} settled after {:?}.",
      descriptor.key,
      started.elapsed()
    );
    report
  }

  /// Bounds a single request of a layer by the layer timeout.
  async fn limited(
    &self,
    layer_key: &str,
    request: impl Future<Output = Result<Vec<RawServiceFeature>, QueryError>>,
  ) -> Result<Vec<RawServiceFeature>, QueryError> {
    let timeout = self.settings.layer_timeout;
    tokio::time::timeout(timeout, request)
      .await
      .unwrap_or_else(|_| {
        Err(QueryError::layer_failed(
          layer_key,
          format!("no answer within {timeout:?}"),
        ))
      })
  }

  fn feature_box(&self, spatial: Spatial, crs: Crs) -> BoundingBox {
    match spatial {
      Spatial::Point { at, resolution } => {
        BoundingBox::around(at, resolution, self.settings.buffer_pixels).reproject(crs)
      }
      Spatial::Polygon { extent } => extent.reproject(crs),
    }
  }

  async fn fetch_features(
    &self,
    generation: Generation,
    descriptor: &LayerQueryDescriptor,
    type_name: &str,
    geometry_field: Option<&str>,
    spatial: Spatial,
  ) -> Result<Vec<RawServiceFeature>, QueryError> {
    let request = FeatureRequest {
      service_url: descriptor.service_url.clone(),
      type_name: descriptor
        .qualified_type_name()
        .unwrap_or_else(|| type_name.to_string()),
      crs: descriptor.crs,
      bbox: self.feature_box(spatial, descriptor.crs),
      filter: descriptor.filter.clone(),
      geometry_field: geometry_field
        .unwrap_or(&self.settings.geometry_field)
        .to_string(),
      max_features: self.settings.max_features,
    };

    let _guard = self
      .in_flight
      .register(generation, &descriptor.key, RequestKind::Feature);
    let value = self
      .service
      .get_features(&request)
      .await
      .map_err(|e| QueryError::layer_failed(&descriptor.key, e))?;
    features_from_geojson(&value, &descriptor.key, &descriptor.namespace())
      .map_err(|e| QueryError::layer_failed(&descriptor.key, e))
  }

  /// Samples the pixel under the interaction. Drawn shapes are sampled at their center.
  #[allow(clippy::too_many_arguments)]
  async fn sample_image(
    &self,
    generation: Generation,
    layer_key: &str,
    service_url: &str,
    layer_name: &str,
    crs: Crs,
    namespace: String,
    spatial: Spatial,
  ) -> Result<Vec<RawServiceFeature>, QueryError> {
    let size = self.settings.raster_pixel_size;
    let (at, resolution) = match spatial {
      Spatial::Point { at, resolution } => (at, resolution),
      Spatial::Polygon { extent } => (
        extent.center(),
        extent.width().max(extent.height()) / f64::from(size),
      ),
    };
    let half = size / 2;
    let request = ImageValueRequest {
      service_url: service_url.to_string(),
      layer_name: layer_name.to_string(),
      bbox: BoundingBox::around(at, resolution, f64::from(half)).reproject(crs),
      width: size,
      height: size,
      i: half,
      j: half,
      feature_count: self.settings.max_features,
    };

    let _guard = self
      .in_flight
      .register(generation, layer_key, RequestKind::Image);
    let value = self
      .service
      .get_feature_info(&request)
      .await
      .map_err(|e| QueryError::layer_failed(layer_key, e))?;
    match value {
      ImageValue::Json(value) => features_from_geojson(&value, layer_key, &namespace)
        .map_err(|e| QueryError::layer_failed(layer_key, e)),
      ImageValue::Raw(body) => {
        let at = at.reproject(crs);
        Ok(
          feature_from_raw_value(&body, Coord { x: at.x, y: at.y }, layer_key, &namespace)
            .into_iter()
            .collect(),
        )
      }
    }
  }
}
