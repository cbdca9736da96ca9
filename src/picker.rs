//! Entry point for map interactions: turns clicks and drawn shapes into a selection.

use std::sync::Arc;

use log::{debug, info};

use crate::config::Config;
use crate::map::coordinates::{CoordinateError, Crs, GeoPoint, MapView, ScreenPosition};
use crate::map::layers::{LayerState, LayerTree, resolve_queryable_layers};
use crate::query::{
  DispatchGuard, EngineSettings, FeatureQueryEngine, FeatureService, Generation, LayerFailure,
  LayerOrder, QueryError, QueryOutcome, aggregate,
};
use crate::selection::{Applied, ApplyOptions, DrawerIntent, Selection, SelectionMode};

/// How an interaction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PickOutcome {
  /// The result is now the selection.
  Applied {
    generation: Generation,
    drawer: DrawerIntent,
    layers: usize,
    failures: Vec<LayerFailure>,
  },
  /// The click was swallowed by an active or just finished sketch.
  Suppressed,
  /// A newer interaction started before this one settled.
  Stale(Generation),
}

/// Per click flags set by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickOptions {
  /// Keep the drawer as it is, e.g. when a modifier key is held.
  pub suppress_popup: bool,
}

/// Wires the dispatch guard, the query engine and the selection of one map view.
pub struct FeaturePicker {
  guard: DispatchGuard,
  engine: FeatureQueryEngine,
  selection: Selection,
  layer_order: Vec<LayerOrder>,
  query_crs: Crs,
}

impl FeaturePicker {
  #[must_use]
  pub fn new(service: Arc<dyn FeatureService>, config: &Config) -> Self {
    Self {
      guard: DispatchGuard::new(),
      engine: FeatureQueryEngine::new(service, EngineSettings::from(config)),
      selection: Selection::new(config.highlight_policy),
      layer_order: config.layer_order.clone(),
      query_crs: config.query_crs,
    }
  }

  #[must_use]
  pub fn guard(&self) -> &DispatchGuard {
    &self.guard
  }

  #[must_use]
  pub fn engine(&self) -> &FeatureQueryEngine {
    &self.engine
  }

  #[must_use]
  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  /// A click on the map widget. A view that cannot map pixels yet, e.g. before its first
  /// layout, is an error.
  pub async fn handle_click(
    &self,
    view: &MapView,
    position: ScreenPosition,
    tree: &LayerTree,
    live: &LayerState,
    options: ClickOptions,
  ) -> Result<PickOutcome, QueryError> {
    if self.guard.consume_suppression() {
      debug!("Click at {position:?} belongs to a sketch.");
      return Ok(PickOutcome::Suppressed);
    }
    if view.is_invalid() {
      return Err(
        CoordinateError::InvalidCoordinate {
          input: format!("{position:?} in {view:?}"),
        }
        .into(),
      );
    }
    let point = view.screen_to_geo(position);
    self
      .query_point(point, view.resolution, tree, live, options)
      .await
  }

  /// Queries all visible layers at `point`. `resolution` is the pixel size in units of the
  /// display projection.
  pub async fn query_point(
    &self,
    point: GeoPoint,
    resolution: f64,
    tree: &LayerTree,
    live: &LayerState,
    options: ClickOptions,
  ) -> Result<PickOutcome, QueryError> {
    let generation = self.begin();
    let layers = resolve_queryable_layers(tree, live, self.query_crs).layers;
    let outcome = self
      .engine
      .query_point(generation, point, resolution, &layers)
      .await;
    self.settle(
      generation,
      outcome,
      ApplyOptions {
        suppress_popup: options.suppress_popup,
        point_query: true,
      },
    )
  }

  /// Runs the click pipeline for a point handed over by the application, e.g. `x,y[,crs]`
  /// from a deep link. Without a crs the point is geographic.
  pub async fn query_initial_point(
    &self,
    param: &str,
    resolution: f64,
    tree: &LayerTree,
    live: &LayerState,
  ) -> Result<PickOutcome, QueryError> {
    let point = GeoPoint::parse_url_param(param, self.query_crs)?;
    info!("Querying initial point {}.", point.to_display_string());
    self
      .query_point(point, resolution, tree, live, ClickOptions::default())
      .await
  }

  /// Queries all visible layers within a drawn ring.
  pub async fn query_polygon(
    &self,
    ring: &[GeoPoint],
    tree: &LayerTree,
    live: &LayerState,
  ) -> Result<PickOutcome, QueryError> {
    let generation = self.begin();
    let layers = resolve_queryable_layers(tree, live, self.query_crs).layers;
    let outcome = self
      .engine
      .query_polygon(generation, ring, &layers)
      .await;
    self.settle(generation, outcome, ApplyOptions::default())
  }

  /// Ends the sketch with its shape and queries it. The click completing the shape is
  /// swallowed.
  pub async fn complete_sketch(
    &self,
    ring: &[GeoPoint],
    tree: &LayerTree,
    live: &LayerState,
  ) -> Result<PickOutcome, QueryError> {
    self.guard.finish_sketch();
    self.query_polygon(ring, tree, live).await
  }

  pub fn set_additive(&self, additive: bool) {
    self.selection.toggle_additive_mode(additive);
  }

  /// Empties the selection. Interactions still in flight will not bring it back.
  pub fn clear(&self) {
    let generation = self.guard.begin_interaction();
    self.selection.begin_interaction(generation);
    self.selection.clear();
  }

  fn begin(&self) -> Generation {
    let generation = self.guard.begin_interaction();
    self.selection.begin_interaction(generation);
    generation
  }

  fn settle(
    &self,
    generation: Generation,
    outcome: Result<QueryOutcome, QueryError>,
    options: ApplyOptions,
  ) -> Result<PickOutcome, QueryError> {
    let outcome = match outcome {
      Ok(outcome) => outcome,
      Err(QueryError::NoLayersQueryable) => {
        debug!("No queryable layers for {generation}.");
        QueryOutcome {
          generation,
          point_query: options.point_query,
          layers: Vec::new(),
          failures: Vec::new(),
        }
      }
      Err(e) => {
        self.selection.abandon(generation);
        return Err(e);
      }
    };

    if self.guard.is_stale(generation) {
      debug!("Discarding stale result of {generation}.");
      return Ok(PickOutcome::Stale(generation));
    }
    let results = aggregate(&outcome.layers, &self.layer_order);
    let layers = results.len();
    let applied = match self.selection.mode() {
      SelectionMode::Replace => self.selection.apply_replace(generation, results, options),
      SelectionMode::Additive => self.selection.apply_additive(generation, results, options),
    };
    Ok(match applied {
      Applied::Yes(drawer) => PickOutcome::Applied {
        generation,
        drawer,
        layers,
        failures: outcome.failures,
      },
      Applied::Stale => PickOutcome::Stale(generation),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::coordinates::Reproject;
  use crate::query::service::{FeatureRequest, ImageValue, ImageValueRequest};
  use anyhow::Result;
  use serde_json::{Value, json};
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct Counting {
    calls: AtomicUsize,
  }

  #[async_trait::async_trait]
  impl FeatureService for Counting {
    async fn get_features(&self, _: &FeatureRequest) -> Result<Value> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(json!({"type": "FeatureCollection", "features": [
        {"type": "Feature", "id": 1, "geometry": null, "properties": {}}
      ]}))
    }

    async fn get_feature_info(&self, _: &ImageValueRequest) -> Result<ImageValue> {
      Ok(ImageValue::Raw(String::new()))
    }
  }

  fn tree() -> LayerTree {
    serde_json::from_value(json!({"layers": [{
      "kind": "vector",
      "key": "wells",
      "title": "Wells",
      "queryable": true,
      "service_url": "https://geo.example.org/wfs"
    }]}))
    .unwrap()
  }

  fn picker() -> (Arc<Counting>, FeaturePicker) {
    let service = Arc::new(Counting::default());
    (service.clone(), FeaturePicker::new(service, &Config::default()))
  }

  fn view() -> MapView {
    let center = GeoPoint::lon_lat(-111.89, 40.76).reproject(Crs::WebMercator);
    MapView::new(center, 10., 800., 600.)
  }

  #[tokio::test]
  async fn sketch_clicks_do_not_query() {
    let (service, picker) = picker();
    let center = ScreenPosition::new(400., 300.);
    let live = LayerState::default();

    picker.guard().start_sketch();
    let outcome = picker
      .handle_click(&view(), center, &tree(), &live, ClickOptions::default())
      .await
      .unwrap();
    assert_eq!(outcome, PickOutcome::Suppressed);

    let ring = [
      GeoPoint::lon_lat(-112., 40.),
      GeoPoint::lon_lat(-111., 40.),
      GeoPoint::lon_lat(-111., 41.),
    ];
    picker.complete_sketch(&ring, &tree(), &live).await.unwrap();
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);

    let swallowed = picker
      .handle_click(&view(), center, &tree(), &live, ClickOptions::default())
      .await
      .unwrap();
    assert_eq!(swallowed, PickOutcome::Suppressed);
    let next = picker
      .handle_click(&view(), center, &tree(), &live, ClickOptions::default())
      .await
      .unwrap();
    assert!(matches!(next, PickOutcome::Applied { layers: 1, .. }));
    assert_eq!(service.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn no_queryable_layers_empties_the_selection() {
    let (service, picker) = picker();
    let live = LayerState::default();
    picker
      .query_initial_point("-111.89,40.76", 10., &tree(), &live)
      .await
      .unwrap();
    assert_eq!(picker.selection().snapshot().feature_count(), 1);

    let mut hidden = LayerState::default();
    hidden.set_visible("wells", false);
    let outcome = picker
      .query_initial_point("-111.89,40.76", 10., &tree(), &hidden)
      .await
      .unwrap();
    assert!(matches!(
      outcome,
      PickOutcome::Applied {
        drawer: DrawerIntent::Close,
        layers: 0,
        ..
      }
    ));
    assert!(picker.selection().snapshot().is_empty());
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn clicks_on_an_unsized_view_fail() {
    let (service, picker) = picker();
    let unsized_view = MapView {
      resolution: 0.,
      ..view()
    };
    let result = picker
      .handle_click(
        &unsized_view,
        ScreenPosition::new(1., 1.),
        &tree(),
        &LayerState::default(),
        ClickOptions::default(),
      )
      .await;
    assert!(matches!(result, Err(QueryError::Coordinate(_))));
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    assert_eq!(picker.guard().current(), Generation(0));
    assert!(!picker.selection().snapshot().loading);
  }

  #[tokio::test]
  async fn failed_interactions_stop_loading() {
    let (_, picker) = picker();
    let result = picker
      .query_point(
        GeoPoint::lon_lat(0., 0.),
        f64::NAN,
        &tree(),
        &LayerState::default(),
        ClickOptions::default(),
      )
      .await;
    assert!(matches!(result, Err(QueryError::Coordinate(_))));
    assert!(!picker.selection().snapshot().loading);
    assert!(
      picker
        .query_initial_point("north,south", 1., &tree(), &LayerState::default())
        .await
        .is_err()
    );
  }
}
