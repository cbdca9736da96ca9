//! Ordering of user interactions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one click or completed draw. Later interactions have larger ids.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl std::fmt::Display for Generation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Stamps interactions and decides which clicks may query at all.
///
/// Shared between concurrently running interactions, hence atomics instead of `&mut self`.
#[derive(Debug, Default)]
pub struct DispatchGuard {
  current: AtomicU64,
  ignore_next_click: AtomicBool,
  sketch_active: AtomicBool,
}

impl DispatchGuard {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts a new interaction. Every result of an older interaction is stale from now on.
  pub fn begin_interaction(&self) -> Generation {
    Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
  }

  /// The most recently started interaction.
  #[must_use]
  pub fn current(&self) -> Generation {
    Generation(self.current.load(Ordering::SeqCst))
  }

  #[must_use]
  pub fn is_stale(&self, generation: Generation) -> bool {
    generation != self.current()
  }

  /// Enters draw mode. Clicks are sketch vertices until the sketch ends.
  pub fn start_sketch(&self) {
    self.sketch_active.store(true, Ordering::SeqCst);
  }

  /// Leaves draw mode after a completed shape. The click completing it is swallowed.
  pub fn finish_sketch(&self) {
    self.sketch_active.store(false, Ordering::SeqCst);
    self.ignore_next_click.store(true, Ordering::SeqCst);
  }

  /// Leaves draw mode without a shape.
  pub fn cancel_sketch(&self) {
    self.sketch_active.store(false, Ordering::SeqCst);
  }

  #[must_use]
  pub fn is_sketch_active(&self) -> bool {
    self.sketch_active.load(Ordering::SeqCst)
  }

  /// Asks whether the click at hand must not query. Resets the "just finished drawing" flag,
  /// so it swallows exactly one click.
  pub fn consume_suppression(&self) -> bool {
    let just_drawn = self.ignore_next_click.swap(false, Ordering::SeqCst);
    just_drawn || self.is_sketch_active()
  }
}
