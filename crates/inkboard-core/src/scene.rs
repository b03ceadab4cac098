//! Canonical element collection.
//!
//! The scene maps ids to shared elements and owns the z-order: iterating
//! elements by `(orderKey, id)` is the paint order. Every mutation bumps the
//! scene nonce so renderers can cheaply tell whether anything changed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use inkboard_order::{self as order, OrderKey};
use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementId, ElementMap, ElementUpdate};
use crate::error::SceneError;

/// Target position for inserts and z-order moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", content = "id", rename_all = "camelCase")]
pub enum Position {
    /// Painted above everything
    Front,
    /// Painted below everything
    Back,
    Before(ElementId),
    After(ElementId),
}

/// Elements sorted by order key. Can be iterated any number of times.
#[derive(Debug, Clone, Default)]
pub struct OrderedView {
    elements: Vec<Arc<Element>>,
}

impl OrderedView {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Element>> + '_ {
        self.elements.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.elements.iter().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn position(&self, id: &ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.id == *id)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Element>> {
        self.elements.get(index)
    }
}

impl<'a> IntoIterator for &'a OrderedView {
    type Item = &'a Arc<Element>;
    type IntoIter = std::slice::Iter<'a, Arc<Element>>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// The element store
#[derive(Debug, Clone, Default)]
pub struct Scene {
    elements: ElementMap,
    nonce: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an element by id, including soft-deleted ones
    pub fn get(&self, id: &ElementId) -> Option<&Arc<Element>> {
        self.elements.get(id)
    }

    /// Check if an element exists
    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    pub fn elements(&self) -> &ElementMap {
        &self.elements
    }

    /// Number of elements, deleted ones included
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Change counter for observers; bumped on every mutation
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    fn touch(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
    }

    /// Insert or overwrite elements by id, as given.
    ///
    /// Neither order keys nor versions are touched.
    pub fn upsert(&mut self, elements: impl IntoIterator<Item = Element>) -> usize {
        self.upsert_shared(elements.into_iter().map(Arc::new))
    }

    pub fn upsert_shared(&mut self, elements: impl IntoIterator<Item = Arc<Element>>) -> usize {
        let mut count = 0;
        for element in elements {
            self.elements.insert(element.id, element);
            count += 1;
        }
        if count > 0 {
            self.touch();
        }
        count
    }

    /// Apply a partial update to one element.
    ///
    /// The version is bumped and the nonce regenerated only when a field
    /// actually changes.
    pub fn mutate(&mut self, id: &ElementId, update: &ElementUpdate) -> Result<Arc<Element>, SceneError> {
        let current = self.elements.get(id).ok_or(SceneError::NotFound(*id))?;
        let mut next = Element::clone(current);
        if !next.apply_update(update) {
            return Ok(Arc::clone(current));
        }
        next.bump();
        let next = Arc::new(next);
        self.elements.insert(*id, Arc::clone(&next));
        self.touch();
        Ok(next)
    }

    /// Elements in paint order, ties broken by id
    pub fn ordered_view(&self, include_deleted: bool) -> OrderedView {
        let mut elements: Vec<Arc<Element>> = self
            .elements
            .values()
            .filter(|e| include_deleted || !e.is_deleted)
            .cloned()
            .collect();
        elements.sort_by(|a, b| a.order_key.cmp(&b.order_key).then_with(|| a.id.cmp(&b.id)));
        OrderedView { elements }
    }

    /// Swap the whole collection for `elements`, taken in their intended
    /// paint order.
    ///
    /// Order keys are repaired against that order first; re-keyed elements
    /// get a version bump. Later duplicates of an id replace the earlier
    /// element but keep its position. Nothing changes on error.
    pub fn replace_all(&mut self, elements: impl IntoIterator<Item = Element>) -> Result<usize, SceneError> {
        let mut sequence: Vec<Element> = Vec::new();
        let mut slots: HashMap<ElementId, usize> = HashMap::new();
        for element in elements {
            match slots.get(&element.id) {
                Some(&slot) => sequence[slot] = element,
                None => {
                    slots.insert(element.id, sequence.len());
                    sequence.push(element);
                }
            }
        }

        let repaired = order::repair(sequence.iter().enumerate().map(|(i, e)| (i, &e.order_key)))?;
        for (i, key) in &repaired {
            let element = &mut sequence[*i];
            element.order_key = key.clone();
            element.bump();
        }
        if !repaired.is_empty() {
            tracing::warn!(count = repaired.len(), "repaired order keys of replaced scene");
        }

        self.elements = sequence.into_iter().map(|e| (e.id, Arc::new(e))).collect();
        self.touch();
        Ok(repaired.len())
    }

    /// Swap the whole collection without repair.
    ///
    /// Used to install the result of applying a delta.
    pub fn install(&mut self, elements: ElementMap) {
        self.elements = elements;
        self.touch();
    }

    /// Re-key duplicate, out-of-order and malformed keys in the current
    /// order, deleted elements included. Returns the number of re-keyed
    /// elements.
    pub fn repair_order(&mut self) -> Result<usize, SceneError> {
        let view = self.ordered_view(true);
        let repaired = order::repair(view.iter().map(|e| (e.id, &e.order_key)))?;
        for (id, key) in &repaired {
            self.mutate(id, &ElementUpdate::order_key(key.clone()))?;
        }
        if !repaired.is_empty() {
            tracing::warn!(count = repaired.len(), "repaired scene order keys");
        }
        Ok(repaired.len())
    }

    /// Neighbour keys around `position`, ignoring `moving`
    fn bounds(&self, position: Position, moving: Option<&ElementId>) -> Result<(Option<OrderKey>, Option<OrderKey>), SceneError> {
        let view = self.ordered_view(true);
        let others: Vec<&Arc<Element>> = view.iter().filter(|e| Some(&e.id) != moving).collect();
        let key_at = |i: usize| others.get(i).map(|e| e.order_key.clone());
        let index_of = |id: &ElementId| {
            others
                .iter()
                .position(|e| e.id == *id)
                .ok_or(SceneError::NotFound(*id))
        };

        Ok(match position {
            Position::Front => (others.last().map(|e| e.order_key.clone()), None),
            Position::Back => (None, others.first().map(|e| e.order_key.clone())),
            Position::Before(target) => {
                let i = index_of(&target)?;
                (i.checked_sub(1).and_then(key_at), key_at(i))
            }
            Position::After(target) => {
                let i = index_of(&target)?;
                (key_at(i), key_at(i + 1))
            }
        })
    }

    /// Insert a new element at `position`, allocating its order key
    pub fn insert_at(&mut self, element: Element, position: Position) -> Result<Arc<Element>, SceneError> {
        let (prev, next) = self.bounds(position, Some(&element.id))?;
        let key = order::key_between(prev.as_ref(), next.as_ref())?;
        let element = Arc::new(element.with_order_key(key));
        self.upsert_shared([Arc::clone(&element)]);
        Ok(element)
    }

    /// Move an element in the z-order. Only the moved element is re-keyed,
    /// and only if it is not already in place.
    pub fn move_to(&mut self, id: &ElementId, position: Position) -> Result<Arc<Element>, SceneError> {
        let current = self.get(id).cloned().ok_or(SceneError::NotFound(*id))?;
        if let Position::Before(target) | Position::After(target) = position {
            if target == *id {
                return Ok(current);
            }
        }
        let (prev, next) = self.bounds(position, Some(id))?;
        let key = &current.order_key;
        let in_place = key.is_valid()
            && prev.as_ref().is_none_or(|p| p < key)
            && next.as_ref().is_none_or(|n| key < n);
        if in_place {
            return Ok(current);
        }
        let key = order::key_between(prev.as_ref(), next.as_ref())?;
        self.mutate(id, &ElementUpdate::order_key(key))
    }

    pub fn move_before(&mut self, id: &ElementId, target: &ElementId) -> Result<Arc<Element>, SceneError> {
        self.move_to(id, Position::Before(*target))
    }

    pub fn move_after(&mut self, id: &ElementId, target: &ElementId) -> Result<Arc<Element>, SceneError> {
        self.move_to(id, Position::After(*target))
    }

    pub fn move_to_front(&mut self, id: &ElementId) -> Result<Arc<Element>, SceneError> {
        self.move_to(id, Position::Front)
    }

    pub fn move_to_back(&mut self, id: &ElementId) -> Result<Arc<Element>, SceneError> {
        self.move_to(id, Position::Back)
    }

    /// Physically remove elements. Returns how many were present.
    pub fn purge(&mut self, ids: &HashSet<ElementId>) -> usize {
        let before = self.elements.len();
        self.elements.retain(|id, _| !ids.contains(id));
        let removed = before - self.elements.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }
}
