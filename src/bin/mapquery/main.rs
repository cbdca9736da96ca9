use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser as CliParser;
use log::warn;
use mapquery::map::coordinates::{Crs, GeoPoint};
use mapquery::map::layers::{LayerState, LayerTree};
use mapquery::query::HttpFeatureService;
use mapquery::{ClickOptions, Config, FeaturePicker, PickOutcome};
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// The layer catalog, a JSON file.
  #[arg(short, long)]
  layers: PathBuf,

  /// Queries a clicked point, given as `x,y` or `x,y,crs`.
  #[arg(short, long, required_unless_present = "polygon", conflicts_with = "polygon")]
  point: Option<String>,

  /// Size of a screen pixel in units of the display projection.
  #[arg(short, long, default_value_t = 10.)]
  resolution: f64,

  /// Queries a drawn shape, given as `x y, x y, x y, ...`.
  #[arg(long)]
  polygon: Option<String>,

  /// Reference system of the given coordinates. Geographic if absent.
  #[arg(short, long)]
  crs: Option<String>,

  /// Hides a layer or group by key, as if toggled off in the map.
  #[arg(long)]
  hide: Vec<String>,

  /// Adds a user filter to a layer, as `key=expression`.
  #[arg(long)]
  filter: Vec<String>,
}

fn parse_ring(input: &str, crs: Crs) -> Result<Vec<GeoPoint>> {
  input
    .split(',')
    .map(|position| {
      let mut values = position.split_whitespace().map(str::parse::<f64>);
      match (values.next(), values.next(), values.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Ok(GeoPoint::new(x, y, crs)),
        _ => Err(anyhow!("Invalid position in polygon: '{}'", position.trim())),
      }
    })
    .collect()
}

fn live_state(args: &Args) -> Result<LayerState> {
  let mut live = LayerState::default();
  for key in &args.hide {
    live.set_visible(key.as_str(), false);
  }
  for filter in &args.filter {
    let (key, expression) = filter
      .split_once('=')
      .ok_or_else(|| anyhow!("Filters look like key=expression, got '{filter}'"))?;
    live.set_filter(key.trim(), expression.trim());
  }
  Ok(live)
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_target(false)
    .with_env_filter(EnvFilter::from_default_env())
    .compact()
    .init();

  let args = Args::parse();
  let config = Config::new();
  let tree = LayerTree::from_file(&args.layers)?;
  let live = live_state(&args)?;
  let crs = Crs::parse_or_default(args.crs.as_deref(), config.query_crs)?;

  let service = HttpFeatureService::new(
    Duration::from_secs(config.layer_timeout_secs),
    config.requests_per_second,
  )?;
  let picker = FeaturePicker::new(Arc::new(service), &config);

  let outcome = match (&args.point, &args.polygon) {
    (Some(point), _) => {
      let point = GeoPoint::parse_url_param(point, crs)?;
      picker
        .query_point(point, args.resolution, &tree, &live, ClickOptions::default())
        .await?
    }
    (None, Some(polygon)) => {
      picker
        .query_polygon(&parse_ring(polygon, crs)?, &tree, &live)
        .await?
    }
    (None, None) => return Err(anyhow!("Either --point or --polygon is needed.")),
  };

  if let PickOutcome::Applied { failures, .. } = &outcome {
    for failure in failures {
      warn!("{}", failure.error);
    }
  }
  println!(
    "{}",
    serde_json::to_string_pretty(&picker.selection().snapshot())?
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rings() {
    let ring = parse_ring("-112 40, -111 40,-111 41", Crs::Wgs84).unwrap();
    assert_eq!(ring.len(), 3);
    assert_eq!(ring[2], GeoPoint::lon_lat(-111., 41.));
    assert!(parse_ring("-112 40 3, -111 40", Crs::Wgs84).is_err());
    assert!(parse_ring("a b", Crs::Wgs84).is_err());
  }
}
