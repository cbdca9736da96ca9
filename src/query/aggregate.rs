use serde::{Deserialize, Serialize};

use super::{engine::RawLayerResult, feature::RawServiceFeature};
use crate::map::coordinates::Crs;
use crate::map::layers::{PopupField, RelatedTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPosition {
  Start,
  End,
}

/// Pins a layer, named by title or key, to one end of the result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOrder {
  pub layer_name: String,
  pub position: OrderPosition,
}

impl LayerOrder {
  #[must_use]
  pub fn new(layer_name: impl Into<String>, position: OrderPosition) -> Self {
    Self {
      layer_name: layer_name.into(),
      position,
    }
  }
}

/// The features one layer found, with what the drawer needs to show them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedLayerResult {
  pub layer_key: String,
  pub group_layer_title: Option<String>,
  pub layer_title: String,
  pub source_crs: Crs,
  pub namespace: String,
  pub features: Vec<RawServiceFeature>,
  pub popup_fields: Vec<PopupField>,
  pub related_tables: Vec<RelatedTable>,
}

impl From<&RawLayerResult> for AggregatedLayerResult {
  fn from(raw: &RawLayerResult) -> Self {
    let d = &raw.descriptor;
    Self {
      layer_key: d.key.clone(),
      group_layer_title: d.group_title.clone(),
      layer_title: d.display_title.clone(),
      source_crs: d.crs,
      namespace: d.namespace(),
      features: raw.features.clone(),
      popup_fields: d.popup_fields.clone(),
      related_tables: d.related_tables.clone(),
    }
  }
}

/// Drops empty layers and orders the rest: layers pinned to the start in the order the
/// configuration lists them, then unlisted layers in descriptor order, then layers pinned
/// to the end. The order in which results arrived never matters.
#[must_use]
pub fn aggregate(results: &[RawLayerResult], order: &[LayerOrder]) -> Vec<AggregatedLayerResult> {
  let rank = |raw: &RawLayerResult| {
    let pinned = order.iter().enumerate().find(|(_, o)| {
      o.layer_name == raw.descriptor.display_title || o.layer_name == raw.descriptor.key
    });
    match pinned {
      Some((i, LayerOrder { position: OrderPosition::Start, .. })) => (0, i),
      None => (1, 0),
      Some((i, LayerOrder { position: OrderPosition::End, .. })) => (2, i),
    }
  };

  let mut layers: Vec<&RawLayerResult> =
    results.iter().filter(|r| !r.features.is_empty()).collect();
  layers.sort_by_cached_key(|r| (rank(*r), r.index, r.descriptor.display_title.clone()));
  layers.into_iter().map(AggregatedLayerResult::from).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::map::layers::{LayerQueryDescriptor, QueryKind};
  use serde_json::Map;

  fn raw(index: usize, title: &str, features: usize) -> RawLayerResult {
    let key = title.to_lowercase();
    RawLayerResult {
      index,
      descriptor: LayerQueryDescriptor {
        key: key.clone(),
        display_title: title.to_string(),
        group_title: Some("Group".to_string()),
        queryable: true,
        crs: Crs::Wgs84,
        service_url: "https://geo.example.org/wfs".to_string(),
        filter: None,
        schema: Some("s".to_string()),
        kind: QueryKind::Feature {
          type_name: key.clone(),
          geometry_field: None,
        },
        popup_fields: Vec::new(),
        related_tables: Vec::new(),
        raster: None,
      },
      features: (0..features)
        .map(|i| RawServiceFeature {
          id: i.to_string(),
          namespace: format!("s:{key}"),
          layer_key: key.clone(),
          geometry: None,
          properties: Map::new(),
        })
        .collect(),
    }
  }

  fn titles(results: &[AggregatedLayerResult]) -> Vec<&str> {
    results.iter().map(|r| r.layer_title.as_str()).collect()
  }

  #[test]
  fn empty_layers_are_dropped() {
    let results = [raw(0, "Faults", 0), raw(1, "Wells", 1)];
    let aggregated = aggregate(&results, &[]);
    assert_eq!(titles(&aggregated), vec!["Wells"]);
    assert_eq!(aggregated[0].namespace, "s:wells");
    assert_eq!(aggregated[0].group_layer_title.as_deref(), Some("Group"));
  }

  #[test]
  fn pinned_layers_go_first_and_last_regardless_of_arrival() {
    let order = [
      LayerOrder::new("Faults", OrderPosition::Start),
      LayerOrder::new("Wells", OrderPosition::End),
    ];
    let a = [
      raw(0, "Wells", 2),
      raw(1, "Soils", 1),
      raw(2, "Faults", 1),
      raw(3, "Geology", 3),
    ];
    let mut b = a.clone();
    b.reverse();
    b.swap(0, 2);

    let expected = vec!["Faults", "Soils", "Geology", "Wells"];
    assert_eq!(titles(&aggregate(&a, &order)), expected);
    assert_eq!(titles(&aggregate(&b, &order)), expected);
  }

  #[test]
  fn pinned_layers_keep_configured_order() {
    let order = [
      LayerOrder::new("geology", OrderPosition::Start),
      LayerOrder::new("Faults", OrderPosition::Start),
      LayerOrder::new("Soils", OrderPosition::End),
      LayerOrder::new("Wells", OrderPosition::End),
    ];
    let results = [
      raw(0, "Faults", 1),
      raw(1, "Wells", 1),
      raw(2, "Soils", 1),
      raw(3, "Geology", 1),
      raw(4, "Roads", 1),
    ];
    assert_eq!(
      titles(&aggregate(&results, &order)),
      vec!["Geology", "Faults", "Roads", "Soils", "Wells"]
    );
  }

  #[test]
  fn ties_break_on_title() {
    let results = [raw(0, "Zeta", 1), raw(0, "Alpha", 1)];
    assert_eq!(titles(&aggregate(&results, &[])), vec!["Alpha", "Zeta"]);
  }
}
