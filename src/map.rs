/// Contains everything needed to handle coordinates.
pub mod coordinates;
/// The layer catalog and which of its layers can be queried.
pub mod layers;
