//! Invertible, composable differences between two snapshots.
//!
//! A [`Delta`] records field-level `(before, after)` pairs per element and
//! for the observed app state. Elements are never recorded as removed:
//! disappearing from a snapshot is captured as a transition of `isDeleted`
//! to `true`, and each element change keeps a full image of the element so
//! a later apply can resurrect it even if it was physically purged.
//!
//! Applying a delta is conservative. A field is only written when the live
//! value still equals the recorded `before`; otherwise the live value wins
//! and the field is skipped. This lets undo step around edits made by other
//! actors since the delta was captured.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::{AppStateField, AppStateValue, ObservedAppState};
use crate::element::{Element, ElementField, ElementId, ElementMap, FieldValue, Stamp};
use crate::snapshot::Snapshot;

/// Unique delta identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeltaId(pub Uuid);

impl DeltaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeltaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeltaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(before, after)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub before: T,
    pub after: T,
}

impl<T: PartialEq> Change<T> {
    pub fn new(before: T, after: T) -> Self {
        Self { before, after }
    }

    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }

    pub fn inverted(self) -> Self {
        Self {
            before: self.after,
            after: self.before,
        }
    }
}

/// Field-level changes to one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementChange {
    pub stamp: Change<Stamp>,
    pub fields: BTreeMap<ElementField, Change<FieldValue>>,
    /// Latest full image of the element, used when it is absent on apply
    pub image: Arc<Element>,
}

impl ElementChange {
    fn diff(before: &Element, after: &Element, image: Arc<Element>) -> Option<Self> {
        let names: BTreeSet<ElementField> = before.fields().chain(after.fields()).collect();
        let fields: BTreeMap<_, _> = names
            .into_iter()
            .filter_map(|field| {
                let change = Change::new(before.field(&field), after.field(&field));
                (!change.is_noop()).then_some((field, change))
            })
            .collect();
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            stamp: Change::new(before.stamp(), after.stamp()),
            fields,
            image,
        })
    }

    fn deletion_flag(image: Arc<Element>, before: bool, after: bool) -> Option<Self> {
        if before == after {
            return None;
        }
        let stamp = image.stamp();
        Some(Self {
            stamp: Change::new(stamp, stamp),
            fields: BTreeMap::from([(
                ElementField::IsDeleted,
                Change::new(FieldValue::Flag(before), FieldValue::Flag(after)),
            )]),
            image,
        })
    }
}

/// Options for [`Delta::apply_to`]
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Fields never written by the apply
    pub excluded_fields: HashSet<ElementField>,
}

/// Result of [`Delta::apply_to`]
#[derive(Debug, Clone)]
pub struct Applied {
    pub elements: ElementMap,
    pub app_state: ObservedAppState,
    /// `false` when nothing could be applied
    pub success: bool,
    /// Elements that were written
    pub changed: BTreeSet<ElementId>,
}

/// Immutable difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub id: DeltaId,
    pub elements: BTreeMap<ElementId, ElementChange>,
    pub app_state: BTreeMap<AppStateField, Change<AppStateValue>>,
}

impl Default for Delta {
    fn default() -> Self {
        Self::empty()
    }
}

impl Delta {
    pub fn empty() -> Self {
        Self {
            id: DeltaId::new(),
            elements: BTreeMap::new(),
            app_state: BTreeMap::new(),
        }
    }

    /// Diff two snapshots.
    ///
    /// Elements missing from `after` are recorded as deleted. Elements that
    /// are the same allocation in both snapshots are skipped without a field
    /// comparison.
    pub fn capture(before: &Snapshot, after: &Snapshot) -> Self {
        let mut elements = BTreeMap::new();

        for (id, next) in &after.elements {
            let change = match before.elements.get(id) {
                Some(prev) if Arc::ptr_eq(prev, next) => None,
                Some(prev) => ElementChange::diff(prev, next, Arc::clone(next)),
                None => ElementChange::deletion_flag(Arc::clone(next), true, next.is_deleted),
            };
            if let Some(change) = change {
                elements.insert(*id, change);
            }
        }

        for (id, prev) in &before.elements {
            if after.elements.contains_key(id) {
                continue;
            }
            if let Some(change) = ElementChange::deletion_flag(Arc::clone(prev), prev.is_deleted, true) {
                elements.insert(*id, change);
            }
        }

        let app_state = AppStateField::ALL
            .into_iter()
            .filter_map(|field| {
                let change = Change::new(before.app_state.get(field), after.app_state.get(field));
                (!change.is_noop()).then_some((field, change))
            })
            .collect();

        Self {
            id: DeltaId::new(),
            elements,
            app_state,
        }
    }

    /// Fold an ordered sequence of deltas into one
    pub fn squash<'a>(deltas: impl IntoIterator<Item = &'a Delta>) -> Self {
        deltas
            .into_iter()
            .fold(Self::empty(), |acc, delta| acc.squash_with(delta))
    }

    /// Compose `self` followed by `later`.
    ///
    /// Per field the earliest `before` and the latest `after` survive; fields
    /// that end up unchanged are dropped.
    pub fn squash_with(&self, later: &Delta) -> Self {
        let mut elements = self.elements.clone();
        for (id, next) in &later.elements {
            match elements.remove(id) {
                None => {
                    elements.insert(*id, next.clone());
                }
                Some(mut merged) => {
                    merged.stamp.after = next.stamp.after;
                    merged.image = Arc::clone(&next.image);
                    for (field, change) in &next.fields {
                        merged
                            .fields
                            .entry(field.clone())
                            .and_modify(|existing| existing.after = change.after.clone())
                            .or_insert_with(|| change.clone());
                    }
                    merged.fields.retain(|_, change| !change.is_noop());
                    if !merged.fields.is_empty() {
                        elements.insert(*id, merged);
                    }
                }
            }
        }

        let mut app_state = self.app_state.clone();
        for (field, change) in &later.app_state {
            app_state
                .entry(*field)
                .and_modify(|existing| existing.after = change.after.clone())
                .or_insert_with(|| change.clone());
        }
        app_state.retain(|_, change| !change.is_noop());

        Self {
            id: DeltaId::new(),
            elements,
            app_state,
        }
    }

    /// Swap every `(before, after)` pair
    pub fn invert(&self) -> Self {
        let elements = self
            .elements
            .iter()
            .map(|(id, change)| {
                let inverted = ElementChange {
                    stamp: change.stamp.clone().inverted(),
                    fields: change
                        .fields
                        .iter()
                        .map(|(field, c)| (field.clone(), c.clone().inverted()))
                        .collect(),
                    image: Arc::clone(&change.image),
                };
                (*id, inverted)
            })
            .collect();
        let app_state = self
            .app_state
            .iter()
            .map(|(field, c)| (*field, c.clone().inverted()))
            .collect();
        Self {
            id: DeltaId::new(),
            elements,
            app_state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.app_state.is_empty()
    }

    /// Whether applying this delta could touch or resurrect `id`
    pub fn references(&self, id: &ElementId) -> bool {
        if self.elements.contains_key(id) {
            return true;
        }
        self.app_state.values().any(|change| {
            [&change.before, &change.after].into_iter().any(|value| match value {
                AppStateValue::Elements(ids) => ids.contains(id),
                AppStateValue::Element(el) => el.as_ref() == Some(id),
                _ => false,
            })
        })
    }

    pub fn element_ids(&self) -> impl Iterator<Item = &ElementId> {
        self.elements.keys()
    }

    /// Apply the `after` values to a live state.
    ///
    /// A field is skipped when its live value differs from the recorded
    /// `before` and does not already equal `after`. Written elements get
    /// `version + 1` and a fresh nonce. Selections are filtered against the
    /// resulting elements.
    pub fn apply_to(
        &self,
        elements: &ElementMap,
        app_state: &ObservedAppState,
        options: &ApplyOptions,
    ) -> Applied {
        let mut next_elements = elements.clone();
        let mut changed = BTreeSet::new();

        for (id, change) in &self.elements {
            let mut element = match elements.get(id) {
                Some(live) => Element::clone(live),
                None => {
                    let mut restored = Element::clone(&change.image);
                    restored.is_deleted = true;
                    restored
                }
            };
            let live_stamp = element.stamp();
            let mut written = false;

            for (field, field_change) in &change.fields {
                if options.excluded_fields.contains(field) {
                    continue;
                }
                let live = element.field(field);
                if live == field_change.after {
                    continue;
                }
                if live != field_change.before {
                    if live_stamp != change.stamp.before {
                        tracing::trace!(element = %id, %field, "skipping field changed by a concurrent edit");
                    } else {
                        tracing::trace!(element = %id, %field, "skipping stale field despite stamp collision");
                    }
                    continue;
                }
                element.set_field(field, field_change.after.clone());
                written = true;
            }

            if written {
                element.version = live_stamp.version + 1;
                element.version_nonce = crate::element::fresh_nonce();
                next_elements.insert(*id, Arc::new(element));
                changed.insert(*id);
            }
        }

        let mut next_app_state = app_state.clone();
        let mut app_state_written = false;
        for (field, change) in &self.app_state {
            let live = next_app_state.get(*field);
            if live == change.after {
                continue;
            }
            if live != change.before {
                tracing::trace!(?field, "skipping app state field changed since capture");
                continue;
            }
            next_app_state.set(*field, change.after.clone());
            app_state_written = true;
        }
        next_app_state.filter_invisible(&next_elements);
        let app_state_written = app_state_written && next_app_state != *app_state;

        Applied {
            elements: next_elements,
            app_state: next_app_state,
            success: !changed.is_empty() || app_state_written,
            changed,
        }
    }
}
