//! The mutation entry point.
//!
//! A [`Session`] owns the scene, the observed app state, the capture
//! coordinator and the history, and publishes increments to listeners.
//! Durable increments reach history first, then durable listeners, then
//! ephemeral listeners, so undo-ability is recorded before anyone reacts.
//!
//! A session is not internally synchronized. Hosts that receive remote
//! updates on another thread wrap it in a single mutex and route every
//! batch through [`Session::update`].

use std::collections::HashSet;
use std::sync::Arc;

use inkboard_core::{
    ApplyOptions, Applied, Element, ElementField, ElementId, ElementUpdate, ObservedAppState,
    OrderedView, Position, Scene, SceneError, Snapshot,
};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::context::{CapturePolicy, InteractionContext, Origin};
use crate::emitter::{Emitter, Subscription};
use crate::history::History;
use crate::store::{IncrementSource, Store, StoreIncrement};

/// Insert a new element at a z-order position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insertion {
    pub element: Element,
    pub position: Position,
}

/// Partial update of one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementPatch {
    pub id: ElementId,
    #[serde(flatten)]
    pub changes: ElementUpdate,
}

/// Move an element in the z-order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub id: ElementId,
    pub position: Position,
}

/// One mutation batch.
///
/// Parts are applied in field order: upserts, inserts, updates, moves,
/// deletes, then the app state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneUpdate {
    pub upsert: Vec<Element>,
    pub insert: Vec<Insertion>,
    pub update: Vec<ElementPatch>,
    pub moves: Vec<Move>,
    pub delete: Vec<ElementId>,
    pub app_state: Option<ObservedAppState>,
}

impl SceneUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, element: Element) -> Self {
        self.upsert.push(element);
        self
    }

    pub fn insert(mut self, element: Element, position: Position) -> Self {
        self.insert.push(Insertion { element, position });
        self
    }

    pub fn update(mut self, id: ElementId, changes: ElementUpdate) -> Self {
        self.update.push(ElementPatch { id, changes });
        self
    }

    pub fn move_to(mut self, id: ElementId, position: Position) -> Self {
        self.moves.push(Move { id, position });
        self
    }

    pub fn delete(mut self, id: ElementId) -> Self {
        self.delete.push(id);
        self
    }

    pub fn app_state(mut self, state: ObservedAppState) -> Self {
        self.app_state = Some(state);
        self
    }
}

/// A versioned scene with undo/redo
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    scene: Scene,
    app_state: ObservedAppState,
    store: Store,
    history: History,
    apply_options: ApplyOptions,
    durable: Emitter<StoreIncrement>,
    ephemeral: Emitter<StoreIncrement>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            history: History::new(config.history_depth),
            config,
            scene: Scene::new(),
            app_state: ObservedAppState::default(),
            store: Store::default(),
            apply_options: ApplyOptions::default(),
            durable: Emitter::new(),
            ephemeral: Emitter::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only scene access
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Direct scene access; follow up with [`Session::schedule_action`]
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn app_state(&self) -> &ObservedAppState {
        &self.app_state
    }

    /// Direct app state access; follow up with [`Session::schedule_action`]
    pub fn app_state_mut(&mut self) -> &mut ObservedAppState {
        &mut self.app_state
    }

    /// Look up an element, deleted or not
    pub fn get(&self, id: &ElementId) -> Option<&Arc<Element>> {
        self.scene.get(id)
    }

    pub fn ordered_view(&self, include_deleted: bool) -> OrderedView {
        self.scene.ordered_view(include_deleted)
    }

    /// Undo/redo stacks
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Keep undo and redo from ever writing `field`
    pub fn exclude_field(&mut self, field: ElementField) {
        self.apply_options.excluded_fields.insert(field);
    }

    /// Apply a mutation batch and record it under `ctx`.
    ///
    /// The batch is all-or-nothing: on error the scene is left as it was and
    /// nothing is recorded.
    pub fn update(&mut self, update: SceneUpdate, ctx: InteractionContext) -> Result<(), SceneError> {
        let mut scene = self.scene.clone();
        let upserted = !update.upsert.is_empty();

        scene.upsert(update.upsert);
        for Insertion { element, position } in update.insert {
            scene.insert_at(element, position)?;
        }
        for patch in &update.update {
            scene.mutate(&patch.id, &patch.changes)?;
        }
        for Move { id, position } in &update.moves {
            scene.move_to(id, *position)?;
        }
        for id in &update.delete {
            scene.mutate(id, &ElementUpdate::deleted(true))?;
        }
        if upserted && self.config.repair_on_upsert {
            scene.repair_order()?;
        }

        self.scene = scene;
        if let Some(state) = update.app_state {
            self.app_state = state;
        }
        self.app_state.filter_invisible(self.scene.elements());
        self.schedule_action(ctx);
        Ok(())
    }

    /// Record whatever changed since the last action, according to `ctx`
    pub fn schedule_action(&mut self, ctx: InteractionContext) {
        self.capture(ctx.policy, ctx.origin.into());
    }

    fn capture(&mut self, policy: CapturePolicy, source: IncrementSource) {
        let live = Snapshot::of(&self.scene, &self.app_state);
        if let Some(increment) = self.store.schedule_action(policy, source, live) {
            self.dispatch(increment);
        }
    }

    fn dispatch(&mut self, increment: StoreIncrement) {
        if increment.is_durable() {
            if !increment.source.is_history() {
                self.history.record(Arc::clone(&increment.delta));
            }
            self.durable.emit(&increment);
        }
        self.ephemeral.emit(&increment);
    }

    /// Commit the open accumulation. Returns whether anything was emitted.
    pub fn flush(&mut self) -> bool {
        match self.store.flush() {
            Some(increment) => {
                self.dispatch(increment);
                true
            }
            None => false,
        }
    }

    /// Cancel the open accumulation and roll the live state back to the
    /// baseline for the fields it touched. Nothing is emitted.
    pub fn abandon(&mut self) -> bool {
        let Some(delta) = self.store.abandon() else {
            return false;
        };
        let applied = delta
            .invert()
            .apply_to(self.scene.elements(), &self.app_state, &self.apply_options);
        if applied.success {
            self.install(applied);
        }
        true
    }

    /// Replace the scene wholesale, bypassing history.
    ///
    /// Any open accumulation is committed first. Order keys are repaired
    /// against the given order and both history stacks are cleared. Returns
    /// the number of re-keyed elements.
    pub fn load(
        &mut self,
        elements: impl IntoIterator<Item = Element>,
        app_state: ObservedAppState,
    ) -> Result<usize, SceneError> {
        self.flush();
        let repaired = self.scene.replace_all(elements)?;
        self.app_state = app_state;
        self.app_state.filter_invisible(self.scene.elements());
        self.history.clear();
        self.capture(CapturePolicy::Never, Origin::Programmatic.into());
        Ok(repaired)
    }

    fn install(&mut self, applied: Applied) {
        self.scene.install(applied.elements);
        self.app_state = applied.app_state;
    }

    /// Returns false when there was nothing left to undo
    pub fn undo(&mut self) -> bool {
        self.flush();
        let Some(applied) =
            self.history
                .undo(self.scene.elements(), &self.app_state, &self.apply_options)
        else {
            return false;
        };
        self.install(applied);
        self.capture(CapturePolicy::Immediate, IncrementSource::Undo);
        true
    }

    /// Returns false when there was nothing left to redo
    pub fn redo(&mut self) -> bool {
        self.flush();
        let Some(applied) =
            self.history
                .redo(self.scene.elements(), &self.app_state, &self.apply_options)
        else {
            return false;
        };
        self.install(applied);
        self.capture(CapturePolicy::Immediate, IncrementSource::Redo);
        true
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Listen for committed increments
    pub fn subscribe_durable(
        &mut self,
        listener: impl FnMut(&StoreIncrement) + Send + 'static,
    ) -> Subscription {
        self.durable.subscribe(listener)
    }

    /// Listen for every published increment
    pub fn subscribe_ephemeral(
        &mut self,
        listener: impl FnMut(&StoreIncrement) + Send + 'static,
    ) -> Subscription {
        self.ephemeral.subscribe(listener)
    }

    pub fn unsubscribe_durable(&mut self, token: Subscription) -> bool {
        self.durable.unsubscribe(token)
    }

    pub fn unsubscribe_ephemeral(&mut self, token: Subscription) -> bool {
        self.ephemeral.unsubscribe(token)
    }

    /// Physically remove deleted elements that nothing can resurrect any
    /// more. Returns the number removed.
    pub fn collect_garbage(&mut self) -> usize {
        let ids: HashSet<ElementId> = self
            .scene
            .elements()
            .values()
            .filter(|e| e.is_deleted)
            .map(|e| e.id)
            .filter(|id| {
                !self.history.references(id)
                    && !self.store.references(id)
                    && !self.app_state.references(id)
            })
            .collect();
        if ids.is_empty() {
            return 0;
        }
        let removed = self.scene.purge(&ids);
        self.store.forget(&ids);
        tracing::debug!(removed, "collected deleted elements");
        removed
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IncrementKind;
    use inkboard_core::{FieldValue, OrderKey};
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::{Mutex, mpsc};
    use std::thread;

    type Log = Arc<Mutex<Vec<StoreIncrement>>>;

    fn record(session: &mut Session) -> (Log, Log) {
        let durable: Log = Arc::default();
        let ephemeral: Log = Arc::default();
        let sink = Arc::clone(&durable);
        session.subscribe_durable(move |inc| sink.lock().unwrap().push(inc.clone()));
        let sink = Arc::clone(&ephemeral);
        session.subscribe_ephemeral(move |inc| sink.lock().unwrap().push(inc.clone()));
        (durable, ephemeral)
    }

    fn with_element(props: &[(&str, Value)]) -> (Session, ElementId) {
        let mut session = Session::default();
        let element = props
            .iter()
            .fold(Element::new().with_order_key(OrderKey::new("a0")), |e, (k, v)| {
                e.with_prop(*k, v.clone())
            });
        let id = element.id;
        session.load([element], ObservedAppState::default()).unwrap();
        (session, id)
    }

    fn prop(session: &Session, id: &ElementId, name: &str) -> Option<Value> {
        session.get(id).and_then(|e| e.prop(name).cloned())
    }

    fn set(id: ElementId, name: &str, value: Value) -> SceneUpdate {
        SceneUpdate::new().update(id, ElementUpdate::new().set(name, value))
    }

    type Contents = BTreeMap<ElementId, (bool, OrderKey, BTreeMap<String, Value>)>;

    fn contents(session: &Session) -> Contents {
        session
            .scene()
            .elements()
            .values()
            .map(|e| (e.id, (e.is_deleted, e.order_key.clone(), e.props.clone())))
            .collect()
    }

    #[test]
    fn eventual_edits_commit_as_one_increment() {
        let (mut session, id) = with_element(&[("color", json!("red"))]);
        let (durable, _) = record(&mut session);

        for value in ["green", "blue", "black"] {
            session
                .update(set(id, "color", json!(value)), InteractionContext::eventual())
                .unwrap();
        }
        assert!(durable.lock().unwrap().is_empty());
        assert!(!session.can_undo());

        assert!(session.flush());
        let durable = durable.lock().unwrap();
        assert_eq!(durable.len(), 1);
        let change = &durable[0].delta.elements[&id].fields[&ElementField::Prop("color".into())];
        assert_eq!(change.before, FieldValue::Prop(Some(json!("red"))));
        assert_eq!(session.history().undo_len(), 1);
    }

    #[test]
    fn undo_skips_remote_overwrite() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        session
            .update(set(id, "x", json!(10)), InteractionContext::immediate())
            .unwrap();
        session
            .update(set(id, "x", json!(50)), InteractionContext::remote())
            .unwrap();
        let version = session.get(&id).unwrap().version;

        assert!(!session.undo());
        assert_eq!(prop(&session, &id, "x"), Some(json!(50)));
        assert_eq!(session.get(&id).unwrap().version, version);
        assert!(!session.can_undo());
    }

    #[test]
    fn undo_resurrects_deleted_element() {
        let (mut session, id) = with_element(&[("x", json!(3)), ("label", json!("box"))]);
        let before = Element::clone(session.get(&id).unwrap());

        session
            .update(SceneUpdate::new().delete(id), InteractionContext::immediate())
            .unwrap();
        assert!(session.get(&id).unwrap().is_deleted);
        assert!(session.ordered_view(false).is_empty());

        assert!(session.undo());
        let restored = session.get(&id).unwrap();
        assert_eq!(restored.id, before.id);
        assert!(!restored.is_deleted);
        assert_eq!(restored.props, before.props);
        assert_eq!(restored.order_key, before.order_key);
    }

    #[test]
    fn undo_then_redo_restores_state() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        session
            .update(
                set(id, "x", json!(1)).insert(Element::new().with_prop("y", 1), Position::Front),
                InteractionContext::immediate(),
            )
            .unwrap();
        session
            .update(set(id, "x", json!(2)), InteractionContext::immediate())
            .unwrap();

        let before_undo = contents(&session);
        assert!(session.undo());
        assert_eq!(prop(&session, &id, "x"), Some(json!(1)));
        assert!(session.redo());
        assert_eq!(contents(&session), before_undo);
        assert!(!session.can_redo());
    }

    #[test]
    fn new_edit_after_undo_clears_redo() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        session
            .update(set(id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        assert!(session.undo());
        assert!(session.can_redo());
        session
            .update(set(id, "x", json!(7)), InteractionContext::immediate())
            .unwrap();
        assert!(!session.can_redo());
    }

    #[test]
    fn history_increments_are_published_but_not_recorded() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let (durable, ephemeral) = record(&mut session);
        session
            .update(set(id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        assert!(session.undo());

        let durable = durable.lock().unwrap();
        let sources: Vec<_> = durable.iter().map(|inc| inc.source).collect();
        assert_eq!(sources, vec![IncrementSource::Local, IncrementSource::Undo]);
        assert_eq!(ephemeral.lock().unwrap().len(), 2);
        assert_eq!(session.history().undo_len(), 0);
        assert_eq!(session.history().redo_len(), 1);
    }

    #[test]
    fn durable_listeners_run_before_ephemeral() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        session.subscribe_ephemeral(move |_| sink.lock().unwrap().push("ephemeral"));
        let sink = Arc::clone(&order);
        session.subscribe_durable(move |_| sink.lock().unwrap().push("durable"));

        session
            .update(set(id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        session
            .update(set(id, "x", json!(2)), InteractionContext::remote())
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["durable", "ephemeral", "ephemeral"]);
    }

    #[test]
    fn unsubscribed_listeners_are_silent() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let (durable, _) = record(&mut session);
        let extra: Log = Arc::default();
        let sink = Arc::clone(&extra);
        let token = session.subscribe_durable(move |inc| sink.lock().unwrap().push(inc.clone()));
        assert!(session.unsubscribe_durable(token));

        session
            .update(set(id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        assert_eq!(durable.lock().unwrap().len(), 1);
        assert!(extra.lock().unwrap().is_empty());
    }

    #[test]
    fn remote_updates_are_ephemeral_only() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let (durable, ephemeral) = record(&mut session);
        session
            .update(set(id, "x", json!(9)), InteractionContext::remote())
            .unwrap();
        assert!(durable.lock().unwrap().is_empty());
        let ephemeral = ephemeral.lock().unwrap();
        assert_eq!(ephemeral.len(), 1);
        assert_eq!(ephemeral[0].kind, IncrementKind::Ephemeral);
        assert_eq!(ephemeral[0].source, IncrementSource::Remote);
        assert!(!session.can_undo());
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let missing = ElementId::new();
        let nonce = session.scene().nonce();
        let err = session
            .update(
                set(id, "x", json!(1)).delete(missing),
                InteractionContext::immediate(),
            )
            .unwrap_err();
        assert_eq!(err, SceneError::NotFound(missing));
        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
        assert_eq!(session.scene().nonce(), nonce);
        assert!(!session.can_undo());
    }

    #[test]
    fn load_repairs_keys_and_clears_history() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        session
            .update(set(id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        let (durable, ephemeral) = record(&mut session);

        let a = Element::new().with_order_key(OrderKey::new("a0"));
        let b = Element::new().with_order_key(OrderKey::new("a0"));
        let selected = ObservedAppState {
            selected_element_ids: [a.id, ElementId::new()].into(),
            ..ObservedAppState::default()
        };
        assert_eq!(session.load([a.clone(), b.clone()], selected).unwrap(), 1);

        let ids: Vec<_> = session.ordered_view(true).ids().collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(session.app_state().selected_element_ids, [a.id].into());
        assert!(!session.can_undo());
        assert!(durable.lock().unwrap().is_empty());
        assert_eq!(ephemeral.lock().unwrap().len(), 1);
    }

    #[test]
    fn abandon_rolls_back_without_emitting() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let (durable, ephemeral) = record(&mut session);
        let baseline = session.store().baseline().clone();

        session
            .update(set(id, "x", json!(5)), InteractionContext::eventual())
            .unwrap();
        assert!(session.abandon());
        assert!(!session.abandon());

        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
        assert_eq!(session.store().baseline(), &baseline);
        assert!(!session.flush());
        assert!(durable.lock().unwrap().is_empty());
        assert!(ephemeral.lock().unwrap().is_empty());

        // The rollback itself is not a change worth recording.
        session.schedule_action(InteractionContext::immediate());
        assert!(!session.can_undo());
    }

    #[test]
    fn abandoned_edit_stays_gone_after_remote_update() {
        let (mut session, id) = with_element(&[("x", json!(0)), ("y", json!(0))]);
        session
            .update(set(id, "x", json!(5)), InteractionContext::eventual())
            .unwrap();
        session
            .update(set(id, "y", json!(9)), InteractionContext::remote())
            .unwrap();
        assert!(session.abandon());
        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
        assert_eq!(prop(&session, &id, "y"), Some(json!(9)));

        session.schedule_action(InteractionContext::immediate());
        assert!(!session.can_undo());
        assert!(!session.undo());
        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
    }

    #[test]
    fn remote_update_during_interaction_is_not_committed() {
        let (mut session, id) = with_element(&[("x", json!(0)), ("y", json!(0))]);
        session
            .update(set(id, "x", json!(5)), InteractionContext::eventual())
            .unwrap();
        session
            .update(set(id, "y", json!(9)), InteractionContext::remote())
            .unwrap();
        assert!(session.flush());

        assert!(session.undo());
        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
        assert_eq!(prop(&session, &id, "y"), Some(json!(9)));
    }

    #[test]
    fn garbage_collection_spares_referenced_elements() {
        let mut session = Session::new(SessionConfig {
            history_depth: 1,
            ..SessionConfig::default()
        });
        let doomed = Element::new().with_order_key(OrderKey::new("a0"));
        let other = Element::new().with_order_key(OrderKey::new("a1")).with_prop("x", 0);
        session
            .load([doomed.clone(), other.clone()], ObservedAppState::default())
            .unwrap();

        session
            .update(SceneUpdate::new().delete(doomed.id), InteractionContext::immediate())
            .unwrap();
        assert_eq!(session.collect_garbage(), 0);

        // Pushes the deletion out of the one-entry history.
        session
            .update(set(other.id, "x", json!(1)), InteractionContext::immediate())
            .unwrap();
        assert_eq!(session.collect_garbage(), 1);
        assert!(session.get(&doomed.id).is_none());

        // Nothing spurious is captured for the purge.
        session.schedule_action(InteractionContext::immediate());
        assert_eq!(session.history().undo_len(), 1);
        assert!(session.undo());
        assert_eq!(prop(&session, &other.id, "x"), Some(json!(0)));
    }

    #[test]
    fn moves_are_undoable() {
        let mut session = Session::default();
        let e1 = Element::new().with_order_key(OrderKey::new("a0"));
        let e2 = Element::new().with_order_key(OrderKey::new("a1"));
        session
            .load([e1.clone(), e2.clone()], ObservedAppState::default())
            .unwrap();

        session
            .update(
                SceneUpdate::new().move_to(e2.id, Position::Before(e1.id)),
                InteractionContext::immediate(),
            )
            .unwrap();
        let ids: Vec<_> = session.ordered_view(false).ids().collect();
        assert_eq!(ids, vec![e2.id, e1.id]);

        assert!(session.undo());
        let ids: Vec<_> = session.ordered_view(false).ids().collect();
        assert_eq!(ids, vec![e1.id, e2.id]);
    }

    #[test]
    fn remote_updates_from_another_thread() {
        let (session, id) = with_element(&[("x", json!(0)), ("y", json!(0))]);
        let session = Arc::new(Mutex::new(session));
        let (tx, rx) = mpsc::channel();

        let remote = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for value in 1..=20 {
                    let mut session = session.lock().unwrap();
                    session
                        .update(set(id, "y", json!(value)), InteractionContext::remote())
                        .unwrap();
                    tx.send(value).unwrap();
                }
            })
        };

        for value in 1..=20 {
            let mut session = session.lock().unwrap();
            session
                .update(set(id, "x", json!(value)), InteractionContext::immediate())
                .unwrap();
        }
        remote.join().unwrap();
        assert_eq!(rx.iter().count(), 20);

        let mut session = session.lock().unwrap();
        assert_eq!(session.history().undo_len(), 20);
        while session.undo() {}
        assert_eq!(prop(&session, &id, "x"), Some(json!(0)));
        assert_eq!(prop(&session, &id, "y"), Some(json!(20)));
    }

    #[test]
    fn json_batches_deserialize() {
        let (mut session, id) = with_element(&[("x", json!(0))]);
        let raw = json!({
            "update": [{ "id": id, "props": { "x": 4 } }],
            "insert": [{
                "element": { "id": ElementId::new(), "version": 1, "versionNonce": 0 },
                "position": { "at": "back" }
            }]
        });
        let batch: SceneUpdate = serde_json::from_value(raw).unwrap();
        session.update(batch, InteractionContext::immediate()).unwrap();
        assert_eq!(prop(&session, &id, "x"), Some(json!(4)));
        let ids: Vec<_> = session.ordered_view(false).ids().collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], id);
    }

    fn edit() -> impl Strategy<Value = (usize, usize, Option<i64>)> {
        (0..3usize, 0..3usize, prop::option::of(0i64..4))
    }

    proptest! {
        #[test]
        fn undo_restores_pre_state(edits in prop::collection::vec(edit(), 1..12)) {
            let mut session = Session::default();
            let elements: Vec<Element> = ["a0", "a1", "a2"]
                .into_iter()
                .map(|key| Element::new().with_order_key(OrderKey::new(key)).with_prop("p0", 0))
                .collect();
            let ids: Vec<ElementId> = elements.iter().map(|e| e.id).collect();
            session.load(elements, ObservedAppState::default()).unwrap();
            let before = contents(&session);

            for (target, prop_index, value) in edits {
                let name = format!("p{prop_index}");
                let changes = match value {
                    Some(v) => ElementUpdate::new().set(name, v),
                    None => ElementUpdate::new().unset(name),
                };
                session.scene_mut().mutate(&ids[target], &changes).unwrap();
            }
            session.schedule_action(InteractionContext::immediate());

            if session.can_undo() {
                prop_assert!(session.undo());
            }
            prop_assert_eq!(contents(&session), before);
        }
    }
}
