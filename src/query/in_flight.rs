//! Tracking of layer queries that have not settled yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::guard::Generation;

/// Which protocol a pending query speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
  Feature,
  Image,
}

/// A pending layer query.
#[derive(Clone, Debug)]
pub struct InFlightQuery {
  pub generation: Generation,
  pub layer_key: String,
  pub kind: RequestKind,
  pub started_at: Instant,
}

impl InFlightQuery {
  #[must_use]
  pub fn elapsed(&self) -> Duration {
    self.started_at.elapsed()
  }
}

/// Registry of pending layer queries, including those of stale interactions which keep
/// running until their response arrives.
#[derive(Debug, Default)]
pub struct InFlight {
  queries: Mutex<HashMap<u64, InFlightQuery>>,
  next_id: Mutex<u64>,
}

impl InFlight {
  #[must_use]
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Registers a query. It stays registered as long as the guard lives.
  #[must_use]
  pub fn register(
    self: &Arc<Self>,
    generation: Generation,
    layer_key: &str,
    kind: RequestKind,
  ) -> InFlightGuard {
    let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
    let id = *next_id;
    *next_id += 1;
    drop(next_id);

    let query = InFlightQuery {
      generation,
      layer_key: layer_key.to_string(),
      kind,
      started_at: Instant::now(),
    };
    self
      .queries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, query);

    InFlightGuard {
      id,
      registry: Arc::clone(self),
    }
  }

  fn unregister(&self, id: u64) {
    self
      .queries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);
  }

  /// All pending queries, oldest first.
  #[must_use]
  pub fn snapshot(&self) -> Vec<InFlightQuery> {
    let mut queries: Vec<_> = self
      .queries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(id, query)| (*id, query.clone()))
      .collect();
    queries.sort_by_key(|(id, _)| *id);
    queries.into_iter().map(|(_, query)| query).collect()
  }

  #[must_use]
  pub fn count_for_generation(&self, generation: Generation) -> usize {
    self
      .queries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .filter(|query| query.generation == generation)
      .count()
  }
}

/// Unregisters its query when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
  id: u64,
  registry: Arc<InFlight>,
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.registry.unregister(self.id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guards_unregister_on_drop() {
    let registry = InFlight::new();
    let a = registry.register(Generation(1), "faults", RequestKind::Feature);
    let b = registry.register(Generation(1), "dem", RequestKind::Image);
    let c = registry.register(Generation(2), "faults", RequestKind::Feature);
    assert_eq!(registry.count_for_generation(Generation(1)), 2);
    assert_eq!(registry.count_for_generation(Generation(2)), 1);

    drop(a);
    assert_eq!(registry.count_for_generation(Generation(1)), 1);
    drop(b);
    drop(c);
    assert!(registry.snapshot().is_empty());
  }

  #[test]
  fn snapshot_is_in_registration_order() {
    let registry = InFlight::new();
    let _a = registry.register(Generation(3), "a", RequestKind::Feature);
    let _b = registry.register(Generation(3), "b", RequestKind::Image);
    let keys: Vec<_> = registry
      .snapshot()
      .into_iter()
      .map(|q| (q.layer_key, q.kind))
      .collect();
    assert_eq!(
      keys,
      vec![
        ("a".to_string(), RequestKind::Feature),
        ("b".to_string(), RequestKind::Image)
      ]
    );
  }
}
