//! Capture coordination.
//!
//! The store keeps the last observed snapshot (the baseline) and, while an
//! interaction is in progress, an open accumulation of eventual-policy
//! changes. Each scheduled action turns the difference between what the
//! store last observed and the live state into a delta and decides, by
//! policy, whether it is committed, accumulated or only broadcast.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use inkboard_core::{ApplyOptions, Delta, ElementId, Snapshot};
use serde::{Deserialize, Serialize};

use crate::context::{CapturePolicy, Origin};

/// Which channel an increment is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncrementKind {
    /// Committed; goes to history and to every listener
    Durable,
    /// Broadcast only
    Ephemeral,
}

/// What caused an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncrementSource {
    Local,
    Remote,
    Programmatic,
    Undo,
    Redo,
}

impl IncrementSource {
    /// Undo and redo replay history instead of extending it
    pub fn is_history(self) -> bool {
        matches!(self, IncrementSource::Undo | IncrementSource::Redo)
    }
}

impl From<Origin> for IncrementSource {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Local => IncrementSource::Local,
            Origin::Remote => IncrementSource::Remote,
            Origin::Programmatic => IncrementSource::Programmatic,
        }
    }
}

/// A published change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreIncrement {
    pub kind: IncrementKind,
    pub source: IncrementSource,
    pub delta: Arc<Delta>,
    /// Ids of the elements the delta touches
    pub changed: BTreeSet<ElementId>,
}

impl StoreIncrement {
    fn new(kind: IncrementKind, source: IncrementSource, delta: Delta) -> Self {
        let changed = delta.element_ids().copied().collect();
        Self {
            kind,
            source,
            delta: Arc::new(delta),
            changed,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.kind == IncrementKind::Durable
    }
}

/// Whether an accumulation is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Idle,
    Accumulating,
}

#[derive(Debug, Clone)]
struct Pending {
    delta: Delta,
    /// Live state at the last eventual or never action
    head: Snapshot,
    source: IncrementSource,
}

/// The capture coordinator
#[derive(Debug, Clone, Default)]
pub struct Store {
    baseline: Snapshot,
    pending: Option<Pending>,
}

impl Store {
    pub fn new(baseline: Snapshot) -> Self {
        Self {
            baseline,
            pending: None,
        }
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    pub fn state(&self) -> StoreState {
        match self.pending {
            Some(_) => StoreState::Accumulating,
            None => StoreState::Idle,
        }
    }

    /// The open accumulation, if any
    pub fn pending(&self) -> Option<&Delta> {
        self.pending.as_ref().map(|p| &p.delta)
    }

    /// What the store last saw of the live state
    fn observed(&self) -> &Snapshot {
        self.pending.as_ref().map_or(&self.baseline, |p| &p.head)
    }

    /// Record the live state according to `policy`.
    ///
    /// Returns the increment to publish, if any. Never fails; empty deltas
    /// are not published.
    pub fn schedule_action(
        &mut self,
        policy: CapturePolicy,
        source: IncrementSource,
        live: Snapshot,
    ) -> Option<StoreIncrement> {
        let delta = Delta::capture(self.observed(), &live);
        match policy {
            CapturePolicy::Never => {
                self.baseline = match &mut self.pending {
                    Some(pending) => {
                        pending.head = live.clone();
                        Self::without_pending(&pending.delta, &live)
                    }
                    None => live,
                };
                if delta.is_empty() {
                    return None;
                }
                tracing::debug!(elements = delta.elements.len(), ?source, "ephemeral increment");
                Some(StoreIncrement::new(IncrementKind::Ephemeral, source, delta))
            }
            CapturePolicy::Eventual => {
                match &mut self.pending {
                    Some(pending) => {
                        pending.delta = pending.delta.squash_with(&delta);
                        pending.head = live;
                    }
                    None => {
                        self.pending = Some(Pending {
                            delta,
                            head: live,
                            source,
                        });
                    }
                }
                None
            }
            CapturePolicy::Immediate => {
                let delta = match self.pending.take() {
                    Some(pending) => pending.delta.squash_with(&delta),
                    None => delta,
                };
                self.baseline = live;
                self.durable(source, delta)
            }
        }
    }

    /// Commit the open accumulation
    pub fn flush(&mut self) -> Option<StoreIncrement> {
        let pending = self.pending.take()?;
        self.baseline = pending.head;
        self.durable(pending.source, pending.delta)
    }

    /// Drop the open accumulation without publishing it.
    ///
    /// The baseline is left as is; the returned delta describes what the
    /// caller has to roll back.
    pub fn abandon(&mut self) -> Option<Delta> {
        let pending = self.pending.take()?;
        tracing::debug!(elements = pending.delta.elements.len(), "abandoned accumulation");
        Some(pending.delta)
    }

    /// Whether the open accumulation refers to `id`
    pub fn references(&self, id: &ElementId) -> bool {
        self.pending.as_ref().is_some_and(|p| p.delta.references(id))
    }

    /// Drop physically removed elements from the observed snapshots
    pub fn forget(&mut self, ids: &HashSet<ElementId>) {
        self.baseline.elements.retain(|id, _| !ids.contains(id));
        if let Some(pending) = &mut self.pending {
            pending.head.elements.retain(|id, _| !ids.contains(id));
        }
    }

    /// `live` with the uncommitted local edits rolled back.
    ///
    /// Fields a later update overwrote keep the live value.
    fn without_pending(pending: &Delta, live: &Snapshot) -> Snapshot {
        let applied = pending
            .invert()
            .apply_to(&live.elements, &live.app_state, &ApplyOptions::default());
        Snapshot::new(applied.elements, applied.app_state)
    }

    fn durable(&self, source: IncrementSource, delta: Delta) -> Option<StoreIncrement> {
        if delta.is_empty() {
            return None;
        }
        tracing::debug!(elements = delta.elements.len(), ?source, "durable increment");
        Some(StoreIncrement::new(IncrementKind::Durable, source, delta))
    }
}
