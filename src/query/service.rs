use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, error, trace};
use serde_json::Value;
use surf::{Config, Url};
use surf_governor::GovernorMiddleware;

use crate::map::coordinates::{BoundingBox, Crs};

/// A `GetFeature` request against a WFS endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
  pub service_url: String,
  pub type_name: String,
  pub crs: Crs,
  /// Spatial constraint, expressed in `crs`.
  pub bbox: BoundingBox,
  pub filter: Option<String>,
  pub geometry_field: String,
  pub max_features: u32,
}

impl FeatureRequest {
  /// The request URL. A `bbox` parameter and a `cql_filter` cannot be combined, so with an
  /// attribute filter the box moves into the filter expression.
  pub fn to_url(&self) -> Result<Url> {
    let mut url = Url::parse(&self.service_url)?;
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("service", "WFS")
        .append_pair("version", "2.0.0")
        .append_pair("request", "GetFeature")
        .append_pair("typeNames", &self.type_name)
        .append_pair("outputFormat", "application/json")
        .append_pair("srsName", &self.crs.code())
        .append_pair("count", &self.max_features.to_string());
      match &self.filter {
        Some(filter) => {
          query.append_pair("cql_filter", &self.cql_with_bbox(filter));
        }
        None => {
          query.append_pair("bbox", &self.bbox.to_query_param());
        }
      }
    }
    Ok(url)
  }

  fn cql_with_bbox(&self, filter: &str) -> String {
    format!(
      "BBOX({},{},{},{},{},'{}') AND ({filter})",
      self.geometry_field,
      self.bbox.min_x,
      self.bbox.min_y,
      self.bbox.max_x,
      self.bbox.max_y,
      self.bbox.crs.code()
    )
  }
}

/// A WMS `GetFeatureInfo` request sampling one pixel of a rendered box.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageValueRequest {
  pub service_url: String,
  pub layer_name: String,
  /// The rendered box, expressed in its own crs.
  pub bbox: BoundingBox,
  pub width: u32,
  pub height: u32,
  pub i: u32,
  pub j: u32,
  pub feature_count: u32,
}

impl ImageValueRequest {
  pub fn to_url(&self) -> Result<Url> {
    let mut url = Url::parse(&self.service_url)?;
    url
      .query_pairs_mut()
      .append_pair("service", "WMS")
      .append_pair("version", "1.3.0")
      .append_pair("request", "GetFeatureInfo")
      .append_pair("layers", &self.layer_name)
      .append_pair("query_layers", &self.layer_name)
      .append_pair("styles", "")
      .append_pair("crs", &self.bbox.crs.code())
      .append_pair("bbox", &self.bbox.to_wms_param())
      .append_pair("width", &self.width.to_string())
      .append_pair("height", &self.height.to_string())
      .append_pair("i", &self.i.to_string())
      .append_pair("j", &self.j.to_string())
      .append_pair("info_format", "application/json")
      .append_pair("feature_count", &self.feature_count.to_string());
    Ok(url)
  }
}

/// What an image service answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageValue {
  /// A `GeoJSON` feature collection.
  Json(Value),
  /// Anything else, e.g. `key = value` text or a bare number.
  Raw(String),
}

/// The remote side of the query engine.
#[async_trait::async_trait]
pub trait FeatureService: Send + Sync {
  /// Runs a feature query and returns the `GeoJSON` answer.
  async fn get_features(&self, request: &FeatureRequest) -> Result<Value>;

  /// Samples an image service.
  async fn get_feature_info(&self, request: &ImageValueRequest) -> Result<ImageValue>;
}

/// Talks to real services over HTTP.
#[derive(Debug)]
pub struct HttpFeatureService {
  client: surf::Client,
}

impl HttpFeatureService {
  pub fn new(timeout: Duration, requests_per_second: u32) -> Result<Self> {
    let client: surf::Client = Config::new()
      .set_timeout(Some(timeout))
      .try_into()
      .map_err(|e| anyhow!("Could not create http client: {e}"))?;
    let governor = GovernorMiddleware::per_second(requests_per_second)
      .map_err(|e| anyhow!("Invalid request rate {requests_per_second}: {e}"))?;
    Ok(Self {
      client: client.with(governor),
    })
  }

  async fn fetch(&self, url: &Url) -> Result<String> {
    trace!("GET {url}");
    let mut response = self
      .client
      .get(url)
      .await
      .map_err(|e| anyhow!("Request to {} failed: {e}", url.host_str().unwrap_or("?")))?;
    let body = response
      .body_string()
      .await
      .map_err(|e| anyhow!("Could not read response: {e}"))?;
    if !response.status().is_success() {
      error!("Service answered {}: {body}", response.status());
      return Err(anyhow!("Service answered {}", response.status()));
    }
    debug!("Received {} bytes from {}.", body.len(), url.path());
    Ok(body)
  }
}

#[async_trait::async_trait]
impl FeatureService for HttpFeatureService {
  async fn get_features(&self, request: &FeatureRequest) -> Result<Value> {
    let body = self.fetch(&request.to_url()?).await?;
    serde_json::from_str(&body).map_err(|e| anyhow!("Feature service sent no JSON: {e}"))
  }

  async fn get_feature_info(&self, request: &ImageValueRequest) -> Result<ImageValue> {
    let body = self.fetch(&request.to_url()?).await?;
    Ok(classify_image_body(body))
  }
}

/// Servers answer with JSON, plain text or a bare number regardless of the requested format.
#[must_use]
pub fn classify_image_body(body: String) -> ImageValue {
  match serde_json::from_str::<Value>(&body) {
    Ok(value @ Value::Object(_)) => ImageValue::Json(value),
    _ => ImageValue::Raw(body),
  }
}
