use std::path::{Path, PathBuf};

use dirs::home_dir;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::map::coordinates::Crs;
use crate::query::LayerOrder;
use crate::selection::HighlightPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(skip)]
  pub config_path: Option<PathBuf>,
  /// Screen pixels around a click that still hit a feature.
  pub buffer_pixels: f64,
  /// Projection the map is displayed in.
  pub display_crs: Crs,
  /// System query boxes of drawn shapes are computed in.
  pub query_crs: Crs,
  /// Per layer cap on returned features.
  pub max_features: u32,
  pub layer_timeout_secs: u64,
  pub requests_per_second: u32,
  /// Width and height of the image sampled by image services.
  pub raster_pixel_size: u32,
  /// Geometry column used in filter expressions, unless a layer names its own.
  pub geometry_field: String,
  pub layer_order: Vec<LayerOrder>,
  pub highlight_policy: HighlightPolicy,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      config_path: home_dir().map(|p| p.join(".config").join("mapquery")),
      buffer_pixels: 5.,
      display_crs: Crs::WebMercator,
      query_crs: Crs::Wgs84,
      max_features: 100,
      layer_timeout_secs: 15,
      requests_per_second: 20,
      raster_pixel_size: 101,
      geometry_field: "shape".to_string(),
      layer_order: Vec::new(),
      highlight_policy: HighlightPolicy::default(),
    }
  }
}

impl Config {
  /// Defaults, overridden by the config file, overridden by the environment.
  #[must_use]
  pub fn new() -> Self {
    let config_path = Self::config_dir();
    let mut config = config_path
      .as_ref()
      .and_then(|p| Self::from_file(&p.join("config.json")))
      .unwrap_or_default();
    config.config_path = config_path.or(config.config_path);
    config.with_overrides(|key| std::env::var(key).ok())
  }

  fn config_dir() -> Option<PathBuf> {
    std::env::var("MAPQUERY_CONFIG")
      .ok()
      .map(PathBuf::from)
      .or_else(|| home_dir().map(|p| p.join(".config").join("mapquery")))
  }

  fn from_file(path: &Path) -> Option<Self> {
    let content = std::fs::read_to_string(path).ok()?;
    debug!("Reading config from {}.", path.display());
    serde_json::from_str(&content)
      .inspect_err(|e| error!("Failed to read config file: {e}"))
      .ok()
  }

  /// Applies `MAPQUERY_*` variables as returned by `lookup`. Unparsable values are ignored.
  #[must_use]
  pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(v) = parsed(&lookup, "MAPQUERY_BUFFER_PIXELS") {
      self.buffer_pixels = v;
    }
    if let Some(v) = parsed(&lookup, "MAPQUERY_MAX_FEATURES") {
      self.max_features = v;
    }
    if let Some(v) = parsed(&lookup, "MAPQUERY_LAYER_TIMEOUT_SECS") {
      self.layer_timeout_secs = v;
    }
    self
  }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
  let value = lookup(key)?;
  value
    .trim()
    .parse()
    .inspect_err(|_| error!("Ignoring {key}={value}, not a valid value."))
    .ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::OrderPosition;
  use assert_approx_eq::assert_approx_eq;
  use std::collections::HashMap;

  #[test]
  fn partial_file_keeps_defaults() {
    let config: Config = serde_json::from_str(
      r#"{
        "buffer_pixels": 8.0,
        "display_crs": "EPSG:4326",
        "layer_order": [{"layer_name": "Faults", "position": "start"}],
        "highlight_policy": "all_features"
      }"#,
    )
    .unwrap();
    assert_approx_eq!(config.buffer_pixels, 8.);
    assert_eq!(config.display_crs, Crs::Wgs84);
    assert_eq!(config.query_crs, Crs::Wgs84);
    assert_eq!(config.max_features, 100);
    assert_eq!(config.layer_order[0].position, OrderPosition::Start);
    assert_eq!(config.highlight_policy, HighlightPolicy::AllFeatures);
  }

  #[test]
  fn unknown_crs_is_rejected() {
    assert!(serde_json::from_str::<Config>(r#"{"display_crs": "EPSG:1"}"#).is_err());
  }

  #[test]
  fn environment_overrides() {
    let env: HashMap<&str, &str> = [
      ("MAPQUERY_BUFFER_PIXELS", "2.5"),
      ("MAPQUERY_MAX_FEATURES", "many"),
      ("MAPQUERY_LAYER_TIMEOUT_SECS", " 3 "),
    ]
    .into_iter()
    .collect();
    let config = Config::default().with_overrides(|k| env.get(k).map(ToString::to_string));
    assert_approx_eq!(config.buffer_pixels, 2.5);
    assert_eq!(config.max_features, 100);
    assert_eq!(config.layer_timeout_secs, 3);
  }
}
