//! The single source of truth for what is selected and highlighted on the map.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use geo_types::Geometry;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::map::coordinates::Crs;
use crate::query::{AggregatedLayerResult, Generation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
  /// Every result replaces the selection.
  #[default]
  Replace,
  /// Results accumulate until the selection is cleared.
  Additive,
}

/// Which features of a point query get highlighted. Drawn shapes and additive selections
/// always highlight everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightPolicy {
  #[default]
  FirstFeature,
  AllFeatures,
}

/// A selected feature as the highlight layer draws it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightFeature {
  pub layer_key: String,
  pub namespace: String,
  pub feature_id: String,
  pub geometry: Option<Geometry<f64>>,
  pub crs: Crs,
}

/// What the results drawer should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawerIntent {
  Open,
  Close,
  Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
  /// Keeps the drawer as it is, e.g. for modifier clicks.
  pub suppress_popup: bool,
  /// The results stem from a click rather than a drawn shape.
  pub point_query: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionState {
  pub generation: Generation,
  pub mode: SelectionMode,
  pub selected: Vec<AggregatedLayerResult>,
  pub highlighted: Vec<HighlightFeature>,
  pub drawer_open: bool,
  pub loading: bool,
}

impl SelectionState {
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.selected.iter().all(|l| l.features.is_empty())
  }

  #[must_use]
  pub fn feature_count(&self) -> usize {
    self.selected.iter().map(|l| l.features.len()).sum()
  }
}

/// Delivered to listeners after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
  pub state: SelectionState,
  pub drawer: DrawerIntent,
}

/// Whether a result made it into the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
  Yes(DrawerIntent),
  Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SelectionEvent) + Send + Sync>;

/// Owns the selection state. Results are applied only while their generation is the current
/// one, checked under the same lock that guards the mutation.
pub struct Selection {
  state: Mutex<SelectionState>,
  policy: HighlightPolicy,
  listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
  next_subscription: Mutex<u64>,
}

impl Default for Selection {
  fn default() -> Self {
    Self::new(HighlightPolicy::default())
  }
}

impl std::fmt::Debug for Selection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Selection")
      .field("state", &self.snapshot())
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}

impl Selection {
  #[must_use]
  pub fn new(policy: HighlightPolicy) -> Self {
    Self {
      state: Mutex::new(SelectionState::default()),
      policy,
      listeners: Mutex::new(Vec::new()),
      next_subscription: Mutex::new(0),
    }
  }

  #[must_use]
  pub fn snapshot(&self) -> SelectionState {
    self.lock_state().clone()
  }

  #[must_use]
  pub fn mode(&self) -> SelectionMode {
    self.lock_state().mode
  }

  /// Makes `generation` the only one whose results are accepted and marks the selection as
  /// loading. Older generations never replace newer ones.
  pub fn begin_interaction(&self, generation: Generation) {
    let event = {
      let mut state = self.lock_state();
      if generation <= state.generation {
        return;
      }
      state.generation = generation;
      state.loading = true;
      SelectionEvent {
        state: state.clone(),
        drawer: DrawerIntent::Unchanged,
      }
    };
    self.notify(&event);
  }

  /// Ends the loading state of an interaction that produced no result at all.
  pub fn abandon(&self, generation: Generation) {
    let event = {
      let mut state = self.lock_state();
      if state.generation != generation || !state.loading {
        return;
      }
      state.loading = false;
      SelectionEvent {
        state: state.clone(),
        drawer: DrawerIntent::Unchanged,
      }
    };
    self.notify(&event);
  }

  /// Replaces the selection with `results`. An empty result empties the selection.
  pub fn apply_replace(
    &self,
    generation: Generation,
    results: Vec<AggregatedLayerResult>,
    options: ApplyOptions,
  ) -> Applied {
    self.transition(generation, options, |state| {
      state.selected = results.into_iter().filter(|l| !l.features.is_empty()).collect();
      false
    })
  }

  /// Merges `results` into the selection. Features already selected are not added again.
  pub fn apply_additive(
    &self,
    generation: Generation,
    results: Vec<AggregatedLayerResult>,
    options: ApplyOptions,
  ) -> Applied {
    self.transition(generation, options, |state| {
      merge(&mut state.selected, results);
      true
    })
  }

  /// Empties the selection and closes the drawer. Only the user does this.
  pub fn clear(&self) {
    let event = {
      let mut state = self.lock_state();
      let drawer = if state.drawer_open {
        DrawerIntent::Close
      } else {
        DrawerIntent::Unchanged
      };
      state.selected.clear();
      state.highlighted.clear();
      state.drawer_open = false;
      state.loading = false;
      SelectionEvent {
        state: state.clone(),
        drawer,
      }
    };
    self.notify(&event);
  }

  /// Switches between replacing and accumulating. The current selection is kept.
  pub fn toggle_additive_mode(&self, additive: bool) {
    let event = {
      let mut state = self.lock_state();
      state.mode = if additive {
        SelectionMode::Additive
      } else {
        SelectionMode::Replace
      };
      SelectionEvent {
        state: state.clone(),
        drawer: DrawerIntent::Unchanged,
      }
    };
    self.notify(&event);
  }

  /// Registers a listener called after every transition. Listeners run on the thread that
  /// caused the transition, after the state lock has been released.
  pub fn subscribe(
    &self,
    listener: impl Fn(&SelectionEvent) + Send + Sync + 'static,
  ) -> SubscriptionId {
    let mut next = self
      .next_subscription
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let id = SubscriptionId(*next);
    *next += 1;
    drop(next);

    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push((id, Arc::new(listener)));
    id
  }

  /// Returns whether the listener was registered.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut listeners = self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let before = listeners.len();
    listeners.retain(|(other, _)| *other != id);
    listeners.len() != before
  }

  fn lock_state(&self) -> std::sync::MutexGuard<'_, SelectionState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// `update` writes `selected` and tells whether it accumulated.
  fn transition(
    &self,
    generation: Generation,
    options: ApplyOptions,
    update: impl FnOnce(&mut SelectionState) -> bool,
  ) -> Applied {
    let event = {
      let mut state = self.lock_state();
      if state.generation != generation {
        debug!(
          "Dropping result of {generation}, current interaction is {}.",
          state.generation
        );
        return Applied::Stale;
      }
      let was_empty = state.is_empty();
      let accumulated = update(&mut *state);
      let highlight_all = accumulated
        || !options.point_query
        || self.policy == HighlightPolicy::AllFeatures;
      state.highlighted = highlights(&state.selected, highlight_all);
      state.loading = false;

      let drawer = drawer_intent(
        was_empty,
        state.is_empty(),
        accumulated && state.drawer_open,
        options.suppress_popup,
      );
      match drawer {
        DrawerIntent::Open => state.drawer_open = true,
        DrawerIntent::Close => state.drawer_open = false,
        DrawerIntent::Unchanged => (),
      }
      SelectionEvent {
        state: state.clone(),
        drawer,
      }
    };
    let drawer = event.drawer;
    self.notify(&event);
    Applied::Yes(drawer)
  }

  fn notify(&self, event: &SelectionEvent) {
    let listeners: Vec<Listener> = self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(_, l)| Arc::clone(l))
      .collect();
    for listener in listeners {
      listener(event);
    }
  }
}

fn merge(selected: &mut Vec<AggregatedLayerResult>, results: Vec<AggregatedLayerResult>) {
  for mut incoming in results {
    let features = std::mem::take(&mut incoming.features);
    let index = match selected.iter().position(|l| l.layer_key == incoming.layer_key) {
      Some(index) => index,
      None => {
        selected.push(incoming);
        selected.len() - 1
      }
    };
    let layer = &mut selected[index];
    let mut known: HashSet<String> = layer.features.iter().map(|f| f.id.clone()).collect();
    layer
      .features
      .extend(features.into_iter().filter(|f| known.insert(f.id.clone())));
  }
  selected.retain(|l| !l.features.is_empty());
}

fn highlights(selected: &[AggregatedLayerResult], all: bool) -> Vec<HighlightFeature> {
  let features = selected.iter().flat_map(|layer| {
    layer.features.iter().map(|f| HighlightFeature {
      layer_key: layer.layer_key.clone(),
      namespace: f.namespace.clone(),
      feature_id: f.id.clone(),
      geometry: f.geometry.clone(),
      crs: layer.source_crs,
    })
  });
  if all {
    features.collect()
  } else {
    features.take(1).collect()
  }
}

/// `grown_while_open` is set when results accumulated into a selection already on display.
fn drawer_intent(
  was_empty: bool,
  is_empty: bool,
  grown_while_open: bool,
  suppress: bool,
) -> DrawerIntent {
  match (suppress, was_empty, is_empty) {
    (true, _, _) | (false, true, true) => DrawerIntent::Unchanged,
    (false, false, true) => DrawerIntent::Close,
    (false, false, false) if grown_while_open => DrawerIntent::Unchanged,
    (false, _, false) => DrawerIntent::Open,
  }
}
