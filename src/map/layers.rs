use std::{collections::HashMap, path::Path};

use anyhow::Result;
use itertools::Itertools;
use log::{error, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::coordinates::{CoordinateError, Crs};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerConfigError {
  #[error("Layer {layer} declares an unusable crs: {source}")]
  InvalidCrs {
    layer: String,
    source: CoordinateError,
  },
}

fn default_true() -> bool {
  true
}

/// A field the results drawer shows for a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupField {
  pub name: String,
  pub label: String,
}

/// A table joined to a layer's features by the results drawer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTable {
  pub title: String,
  pub service_url: String,
  pub table_name: String,
  /// Field on the feature.
  pub match_field: String,
  /// Field on the related table.
  pub target_field: String,
}

/// An image service that can be sampled at the clicked pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterSource {
  pub service_url: String,
  pub layer_name: String,
  #[serde(default)]
  pub crs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLayer {
  pub title: String,
  #[serde(default)]
  pub key: Option<String>,
  #[serde(default = "default_true")]
  pub visible: bool,
  #[serde(default)]
  pub children: Vec<LayerNode>,
}

impl GroupLayer {
  #[must_use]
  pub fn id(&self) -> &str {
    self.key.as_deref().unwrap_or(&self.title)
  }
}

/// A layer backed by a feature service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorLayer {
  pub key: String,
  pub title: String,
  #[serde(default)]
  pub queryable: bool,
  #[serde(default = "default_true")]
  pub visible: bool,
  pub service_url: String,
  /// Feature type on the service, the key if absent.
  #[serde(default)]
  pub type_name: Option<String>,
  #[serde(default)]
  pub schema: Option<String>,
  #[serde(default)]
  pub crs: Option<String>,
  #[serde(default)]
  pub filter: Option<String>,
  #[serde(default)]
  pub geometry_field: Option<String>,
  #[serde(default)]
  pub popup_fields: Vec<PopupField>,
  #[serde(default)]
  pub related_tables: Vec<RelatedTable>,
  #[serde(default)]
  pub raster: Option<RasterSource>,
}

/// A layer only available as rendered imagery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterLayer {
  pub key: String,
  pub title: String,
  #[serde(default)]
  pub queryable: bool,
  #[serde(default = "default_true")]
  pub visible: bool,
  pub service_url: String,
  pub layer_name: String,
  #[serde(default)]
  pub schema: Option<String>,
  #[serde(default)]
  pub crs: Option<String>,
  #[serde(default)]
  pub popup_fields: Vec<PopupField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerNode {
  Group(GroupLayer),
  Vector(VectorLayer),
  Raster(RasterLayer),
}

/// The static layer catalog of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerTree {
  pub layers: Vec<LayerNode>,
}

impl LayerTree {
  pub fn from_file(path: &Path) -> Result<Self> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
  }
}

/// What the map engine currently reports, layered over the catalog defaults.
#[derive(Debug, Clone, Default)]
pub struct LayerState {
  visibility: HashMap<String, bool>,
  filters: HashMap<String, String>,
}

impl LayerState {
  pub fn set_visible(&mut self, key: impl Into<String>, visible: bool) {
    self.visibility.insert(key.into(), visible);
  }

  /// Sets the user defined filter of a layer, replacing a previous one.
  pub fn set_filter(&mut self, key: impl Into<String>, filter: impl Into<String>) {
    self.filters.insert(key.into(), filter.into());
  }

  pub fn clear_filter(&mut self, key: &str) {
    self.filters.remove(key);
  }

  #[must_use]
  pub fn is_visible(&self, key: &str, default: bool) -> bool {
    self.visibility.get(key).copied().unwrap_or(default)
  }

  #[must_use]
  pub fn filter(&self, key: &str) -> Option<&str> {
    self.filters.get(key).map(String::as_str)
  }
}

/// The image sample to take for a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterQuery {
  pub service_url: String,
  pub layer_name: String,
  pub crs: Crs,
}

/// How a layer is asked for features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
  Feature {
    type_name: String,
    geometry_field: Option<String>,
  },
  Image {
    layer_name: String,
  },
}

/// Everything needed to query one layer for one interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerQueryDescriptor {
  pub key: String,
  pub display_title: String,
  pub group_title: Option<String>,
  pub queryable: bool,
  pub crs: Crs,
  pub service_url: String,
  pub filter: Option<String>,
  pub schema: Option<String>,
  pub kind: QueryKind,
  pub popup_fields: Vec<PopupField>,
  pub related_tables: Vec<RelatedTable>,
  pub raster: Option<RasterQuery>,
}

impl LayerQueryDescriptor {
  /// Qualifies feature ids of this layer so they cannot clash with ids of other services.
  #[must_use]
  pub fn namespace(&self) -> String {
    let qualifier = self
      .schema
      .clone()
      .or_else(|| {
        surf::Url::parse(&self.service_url)
          .ok()
          .and_then(|url| url.host_str().map(str::to_string))
      })
      .unwrap_or_else(|| self.service_url.clone());
    format!("{qualifier}:{}", self.key)
  }

  /// The type name as the feature service knows it, prefixed with the schema.
  #[must_use]
  pub fn qualified_type_name(&self) -> Option<String> {
    let QueryKind::Feature { type_name, .. } = &self.kind else {
      return None;
    };
    Some(match &self.schema {
      Some(schema) if !type_name.contains(':') => format!("{schema}:{type_name}"),
      _ => type_name.clone(),
    })
  }
}

/// The outcome of resolving a catalog against the live state.
#[derive(Debug, Clone, Default)]
pub struct ResolvedLayers {
  pub layers: Vec<LayerQueryDescriptor>,
  pub rejected: Vec<LayerConfigError>,
}

/// `(static) AND (dynamic)`, dropping blank parts.
#[must_use]
pub fn combine_filters(
  static_filter: Option<&str>,
  dynamic_filter: Option<&str>,
) -> Option<String> {
  let parts: Vec<&str> = [static_filter, dynamic_filter]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .collect();
  match parts.as_slice() {
    [] => None,
    [single] => Some((*single).to_string()),
    _ => Some(parts.iter().map(|p| format!("({p})")).join(" AND ")),
  }
}

/// Builds a fresh descriptor for every visible, queryable leaf, depth first.
/// `default_crs` is used for leaves declaring no crs.
#[must_use]
pub fn resolve_queryable_layers(
  tree: &LayerTree,
  live: &LayerState,
  default_crs: Crs,
) -> ResolvedLayers {
  let mut resolved = ResolvedLayers::default();
  for node in &tree.layers {
    walk(node, true, None, live, default_crs, &mut resolved);
  }
  trace!(
    "Resolved {} queryable layers, {} rejected.",
    resolved.layers.len(),
    resolved.rejected.len()
  );
  resolved
}

fn walk(
  node: &LayerNode,
  parent_visible: bool,
  group_title: Option<&str>,
  live: &LayerState,
  default_crs: Crs,
  resolved: &mut ResolvedLayers,
) {
  let leaf = match node {
    LayerNode::Group(group) => {
      let visible = parent_visible && live.is_visible(group.id(), group.visible);
      for child in &group.children {
        walk(
          child,
          visible,
          Some(group.title.as_str()),
          live,
          default_crs,
          resolved,
        );
      }
      return;
    }
    LayerNode::Vector(layer) => {
      if !(layer.queryable && parent_visible && live.is_visible(&layer.key, layer.visible)) {
        return;
      }
      vector_descriptor(layer, group_title, live, default_crs)
    }
    LayerNode::Raster(layer) => {
      if !(layer.queryable && parent_visible && live.is_visible(&layer.key, layer.visible)) {
        return;
      }
      raster_descriptor(layer, group_title, default_crs)
    }
  };

  match leaf {
    Ok(descriptor) => resolved.layers.push(descriptor),
    Err(e) => {
      error!("{e}");
      resolved.rejected.push(e);
    }
  }
}

fn layer_crs(key: &str, crs: Option<&str>, default_crs: Crs) -> Result<Crs, LayerConfigError> {
  Crs::parse_or_default(crs, default_crs).map_err(|source| LayerConfigError::InvalidCrs {
    layer: key.to_string(),
    source,
  })
}

fn vector_descriptor(
  layer: &VectorLayer,
  group_title: Option<&str>,
  live: &LayerState,
  default_crs: Crs,
) -> Result<LayerQueryDescriptor, LayerConfigError> {
  let crs = layer_crs(&layer.key, layer.crs.as_deref(), default_crs)?;
  let raster = layer
    .raster
    .as_ref()
    .map(|r| {
      Ok::<_, LayerConfigError>(RasterQuery {
        service_url: r.service_url.clone(),
        layer_name: r.layer_name.clone(),
        crs: layer_crs(&layer.key, r.crs.as_deref(), crs)?,
      })
    })
    .transpose()?;

  Ok(LayerQueryDescriptor {
    key: layer.key.clone(),
    display_title: layer.title.clone(),
    group_title: group_title.map(str::to_string),
    queryable: layer.queryable,
    crs,
    service_url: layer.service_url.clone(),
    filter: combine_filters(layer.filter.as_deref(), live.filter(&layer.key)),
    schema: layer.schema.clone(),
    kind: QueryKind::Feature {
      type_name: layer.type_name.clone().unwrap_or_else(|| layer.key.clone()),
      geometry_field: layer.geometry_field.clone(),
    },
    popup_fields: layer.popup_fields.clone(),
    related_tables: layer.related_tables.clone(),
    raster,
  })
}

fn raster_descriptor(
  layer: &RasterLayer,
  group_title: Option<&str>,
  default_crs: Crs,
) -> Result<LayerQueryDescriptor, LayerConfigError> {
  Ok(LayerQueryDescriptor {
    key: layer.key.clone(),
    display_title: layer.title.clone(),
    group_title: group_title.map(str::to_string),
    queryable: layer.queryable,
    crs: layer_crs(&layer.key, layer.crs.as_deref(), default_crs)?,
    service_url: layer.service_url.clone(),
    filter: None,
    schema: layer.schema.clone(),
    kind: QueryKind::Image {
      layer_name: layer.layer_name.clone(),
    },
    popup_fields: layer.popup_fields.clone(),
    related_tables: Vec::new(),
    raster: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::coordinates::Datum;

  const CATALOG: &str = r#"{
    "layers": [
      {
        "kind": "group",
        "title": "Hazards",
        "children": [
          {
            "kind": "vector",
            "key": "faults",
            "title": "Faults",
            "queryable": true,
            "service_url": "https://geo.example.org/wfs",
            "schema": "hazards",
            "crs": "EPSG:26912",
            "filter": "age < 15000"
          },
          {
            "kind": "vector",
            "key": "labels",
            "title": "Labels",
            "queryable": false,
            "service_url": "https://geo.example.org/wfs"
          }
        ]
      },
      {
        "kind": "group",
        "title": "Water",
        "visible": false,
        "children": [
          {
            "kind": "vector",
            "key": "wells",
            "title": "Wells",
            "queryable": true,
            "service_url": "https://water.example.org/ows"
          }
        ]
      },
      {
        "kind": "raster",
        "key": "elevation",
        "title": "Elevation",
        "queryable": true,
        "service_url": "https://img.example.org/wms",
        "layer_name": "dem"
      }
    ]
  }"#;

  fn tree() -> LayerTree {
    serde_json::from_str(CATALOG).unwrap()
  }

  fn keys(resolved: &ResolvedLayers) -> Vec<&str> {
    resolved.layers.iter().map(|l| l.key.as_str()).collect()
  }

  #[test]
  fn only_visible_queryable_leaves() {
    let resolved = resolve_queryable_layers(&tree(), &LayerState::default(), Crs::Wgs84);
    assert_eq!(keys(&resolved), vec!["faults", "elevation"]);
    assert!(resolved.rejected.is_empty());
  }

  #[test]
  fn live_visibility_overrides_defaults() {
    let mut live = LayerState::default();
    live.set_visible("Water", true);
    live.set_visible("elevation", false);
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(keys(&resolved), vec!["faults", "wells"]);
  }

  #[test]
  fn hidden_group_gates_visible_children() {
    let mut live = LayerState::default();
    live.set_visible("Hazards", false);
    live.set_visible("faults", true);
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(keys(&resolved), vec!["elevation"]);
  }

  #[test]
  fn each_layer_gets_its_own_crs() {
    let mut live = LayerState::default();
    live.set_visible("Water", true);
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(
      resolved.layers[0].crs,
      Crs::Utm {
        zone: 12,
        north: true,
        datum: Datum::Nad83
      }
    );
    assert_eq!(resolved.layers[1].crs, Crs::Wgs84);
    assert_eq!(resolved.layers[0].group_title.as_deref(), Some("Hazards"));
  }

  #[test]
  fn static_and_dynamic_filters_are_anded() {
    let mut live = LayerState::default();
    live.set_filter("faults", "name LIKE 'Wasatch%'");
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(
      resolved.layers[0].filter.as_deref(),
      Some("(age < 15000) AND (name LIKE 'Wasatch%')")
    );

    live.clear_filter("faults");
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(resolved.layers[0].filter.as_deref(), Some("age < 15000"));
  }

  #[test]
  fn malformed_crs_only_rejects_that_layer() {
    let mut tree = tree();
    if let LayerNode::Raster(r) = &mut tree.layers[2] {
      r.crs = Some("EPSG:nope".to_string());
    }
    let resolved = resolve_queryable_layers(&tree, &LayerState::default(), Crs::Wgs84);
    assert_eq!(keys(&resolved), vec!["faults"]);
    assert!(matches!(
      &resolved.rejected[..],
      [LayerConfigError::InvalidCrs { layer, .. }] if layer == "elevation"
    ));
  }

  #[test]
  fn namespaces_and_type_names() {
    let mut live = LayerState::default();
    live.set_visible("Water", true);
    let resolved = resolve_queryable_layers(&tree(), &live, Crs::Wgs84);
    assert_eq!(resolved.layers[0].namespace(), "hazards:faults");
    assert_eq!(
      resolved.layers[0].qualified_type_name().as_deref(),
      Some("hazards:faults")
    );
    assert_eq!(resolved.layers[1].namespace(), "water.example.org:wells");
    assert_eq!(resolved.layers[2].qualified_type_name(), None);
  }

  #[test]
  fn blank_filters_are_ignored() {
    assert_eq!(combine_filters(Some("  "), None), None);
    assert_eq!(combine_filters(None, Some("a = 1")), Some("a = 1".to_string()));
  }
}
