use thiserror::Error;

use crate::map::coordinates::CoordinateError;

/// Ordering of layers in a result.
pub mod aggregate;
/// Fan out of one interaction over all layers.
pub mod engine;
/// Normalized service features.
pub mod feature;
/// Interaction ordering and click suppression.
pub mod guard;
/// Pending layer queries.
pub mod in_flight;
/// Remote services.
pub mod service;

pub use aggregate::{AggregatedLayerResult, LayerOrder, OrderPosition, aggregate};
pub use engine::{EngineSettings, FeatureQueryEngine, LayerFailure, QueryOutcome, RawLayerResult};
pub use feature::RawServiceFeature;
pub use guard::{DispatchGuard, Generation};
pub use service::{FeatureService, HttpFeatureService};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
  #[error(transparent)]
  Coordinate(#[from] CoordinateError),
  #[error("Query of layer {layer} failed: {reason}")]
  LayerQueryFailed { layer: String, reason: String },
  #[error("No visible layer can be queried.")]
  NoLayersQueryable,
  #[error("A polygon needs at least three positions, got {positions}.")]
  InvalidGeometry { positions: usize },
}

impl QueryError {
  pub(crate) fn layer_failed(layer: &str, reason: impl std::fmt::Display) -> Self {
    Self::LayerQueryFailed {
      layer: layer.to_string(),
      reason: reason.to_string(),
    }
  }
}
