use std::hash::{DefaultHasher, Hash, Hasher};

use geo_types::{
  Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
  Polygon,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property a raw image sample is stored under.
pub const RAW_VALUE_PROPERTY: &str = "value";

/// A feature as a service returned it, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawServiceFeature {
  pub id: String,
  pub namespace: String,
  pub layer_key: String,
  pub geometry: Option<Geometry<f64>>,
  pub properties: Map<String, Value>,
}

impl RawServiceFeature {
  /// Unique across services.
  #[must_use]
  pub fn qualified_id(&self) -> String {
    format!("{}/{}", self.namespace, self.id)
  }

  fn with_fallback_id(mut self) -> Self {
    if self.id.is_empty() {
      let mut hasher = DefaultHasher::new();
      self.layer_key.hash(&mut hasher);
      format!("{:?}", self.geometry).hash(&mut hasher);
      Value::Object(self.properties.clone()).to_string().hash(&mut hasher);
      self.id = format!("{:016x}", hasher.finish());
    }
    self
  }
}

/// Normalizes a `GeoJSON` response. Features without usable ids get one derived from
/// their content so that the same feature always gets the same id.
pub fn features_from_geojson(
  value: &Value,
  layer_key: &str,
  namespace: &str,
) -> Result<Vec<RawServiceFeature>, String> {
  let obj = value.as_object().ok_or("GeoJSON must be an object")?;
  match obj.get("type").and_then(Value::as_str) {
    Some("FeatureCollection") => Ok(
      obj
        .get("features")
        .and_then(Value::as_array)
        .map(|features| {
          features
            .iter()
            .filter_map(|f| {
              parse_feature(f, layer_key, namespace)
                .inspect_err(|e| log::warn!("Skipping feature of {layer_key}: {e}"))
                .ok()
            })
            .collect()
        })
        .unwrap_or_default(),
    ),
    Some("Feature") => Ok(vec![parse_feature(value, layer_key, namespace)?]),
    Some(other) => Err(format!("Unexpected GeoJSON type: {other}")),
    None => Err("Missing 'type' field for GeoJSON".to_string()),
  }
}

fn parse_feature(
  feature: &Value,
  layer_key: &str,
  namespace: &str,
) -> Result<RawServiceFeature, String> {
  let obj = feature.as_object().ok_or("Feature must be an object")?;
  let properties = obj
    .get("properties")
    .and_then(Value::as_object)
    .cloned()
    .unwrap_or_default();
  let id = obj
    .get("id")
    .and_then(id_string)
    .or_else(|| {
      ["OBJECTID", "objectid", "id"]
        .iter()
        .find_map(|k| properties.get(*k).and_then(id_string))
    })
    .unwrap_or_default();
  let geometry = obj.get("geometry").and_then(parse_geometry);

  Ok(
    RawServiceFeature {
      id,
      namespace: namespace.to_string(),
      layer_key: layer_key.to_string(),
      geometry,
      properties,
    }
    .with_fallback_id(),
  )
}

fn id_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Parses a `GeoJSON` geometry object.
#[must_use]
pub fn parse_geometry(geometry: &Value) -> Option<Geometry<f64>> {
  let obj = geometry.as_object()?;
  let geom_type = obj.get("type")?.as_str()?;
  if geom_type == "GeometryCollection" {
    let geometries = obj
      .get("geometries")?
      .as_array()?
      .iter()
      .filter_map(parse_geometry)
      .collect::<Vec<_>>();
    return Some(Geometry::GeometryCollection(GeometryCollection(geometries)));
  }

  let coordinates = obj.get("coordinates")?;
  match geom_type {
    "Point" => Some(Geometry::Point(Point(parse_position(coordinates)?))),
    "LineString" => Some(Geometry::LineString(parse_line(coordinates)?)),
    "Polygon" => Some(Geometry::Polygon(parse_polygon(coordinates)?)),
    "MultiPoint" => Some(Geometry::MultiPoint(MultiPoint(
      coordinates
        .as_array()?
        .iter()
        .map(|p| parse_position(p).map(Point))
        .collect::<Option<_>>()?,
    ))),
    "MultiLineString" => Some(Geometry::MultiLineString(MultiLineString(
      coordinates
        .as_array()?
        .iter()
        .map(parse_line)
        .collect::<Option<_>>()?,
    ))),
    "MultiPolygon" => Some(Geometry::MultiPolygon(MultiPolygon(
      coordinates
        .as_array()?
        .iter()
        .map(parse_polygon)
        .collect::<Option<_>>()?,
    ))),
    _ => None,
  }
}

fn parse_position(value: &Value) -> Option<Coord<f64>> {
  let arr = value.as_array()?;
  Some(Coord {
    x: arr.first()?.as_f64()?,
    y: arr.get(1)?.as_f64()?,
  })
}

fn parse_line(value: &Value) -> Option<LineString<f64>> {
  value
    .as_array()?
    .iter()
    .map(parse_position)
    .collect::<Option<Vec<_>>>()
    .map(LineString)
}

fn parse_polygon(value: &Value) -> Option<Polygon<f64>> {
  let mut rings = value.as_array()?.iter().map(parse_line);
  let exterior = rings.next()??;
  let interiors = rings.collect::<Option<Vec<_>>>()?;
  Some(Polygon::new(exterior, interiors))
}

/// Normalizes a non `GeoJSON` image sample: either `key = value` lines as map servers write
/// them for `text/plain`, or a bare number. The feature is placed at `at`.
#[must_use]
pub fn feature_from_raw_value(
  body: &str,
  at: Coord<f64>,
  layer_key: &str,
  namespace: &str,
) -> Option<RawServiceFeature> {
  let body = body.trim();
  let mut properties = Map::new();
  if let Ok(number) = body.parse::<f64>() {
    properties.insert(RAW_VALUE_PROPERTY.to_string(), Value::from(number));
  } else {
    for (key, value) in body.lines().filter_map(|l| l.split_once(" = ")) {
      let value = value.trim();
      let value = value
        .parse::<f64>()
        .map_or_else(|_| Value::from(value), Value::from);
      properties.insert(key.trim().to_string(), value);
    }
    let first = properties.values().next().cloned()?;
    properties
      .entry(RAW_VALUE_PROPERTY.to_string())
      .or_insert(first);
  }

  Some(
    RawServiceFeature {
      id: String::new(),
      namespace: namespace.to_string(),
      layer_key: layer_key.to_string(),
      geometry: Some(Geometry::Point(Point(at))),
      properties,
    }
    .with_fallback_id(),
  )
}
