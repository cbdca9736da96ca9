/// Settings of the query pipeline.
pub mod config;
pub mod map;
/// Turning clicks and drawn shapes into a selection.
pub mod picker;
/// Querying layers and ordering their results.
pub mod query;
/// What is selected and highlighted.
pub mod selection;

pub use config::Config;
pub use picker::{ClickOptions, FeaturePicker, PickOutcome};
