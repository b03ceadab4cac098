//! Replay scripts: a JSON list of steps driven through a session.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use inkboard_core::{Element, ObservedAppState};
use inkboard_session::{
    CapturePolicy, IncrementKind, IncrementSource, InteractionContext, Origin, SceneUpdate, Session,
};
use serde::{Deserialize, Serialize};

/// One replayed operation
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    Load {
        #[serde(default)]
        elements: Vec<Element>,
        #[serde(default, rename = "appState")]
        app_state: ObservedAppState,
    },
    Update {
        policy: String,
        #[serde(default)]
        origin: Origin,
        #[serde(default)]
        batch: SceneUpdate,
    },
    Undo,
    Redo,
    Flush,
    Abandon,
    Gc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse script {}", path.display()))
    }
}

/// A published increment, summarized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncrementSummary {
    pub kind: IncrementKind,
    pub source: IncrementSource,
    pub elements: usize,
}

/// Final state after a replay
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub elements: Vec<Arc<Element>>,
    pub app_state: ObservedAppState,
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub scene_nonce: u64,
    pub increments: Vec<IncrementSummary>,
}

/// Run every step against `session`, stopping at the first failure
pub fn run(script: &Script, session: &mut Session, include_deleted: bool) -> Result<Report> {
    let increments = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&increments);
    let token = session.subscribe_ephemeral(move |increment| {
        if let Ok(mut log) = sink.lock() {
            log.push(IncrementSummary {
                kind: increment.kind,
                source: increment.source,
                elements: increment.changed.len(),
            });
        }
    });

    for (index, step) in script.steps.iter().enumerate() {
        apply_step(session, step).with_context(|| format!("Step {index} failed"))?;
    }
    session.unsubscribe_ephemeral(token);

    let increments = increments
        .lock()
        .map(|log| log.clone())
        .unwrap_or_default();
    Ok(Report {
        elements: session.ordered_view(include_deleted).iter().cloned().collect(),
        app_state: session.app_state().clone(),
        undo_depth: session.history().undo_len(),
        redo_depth: session.history().redo_len(),
        scene_nonce: session.scene().nonce(),
        increments,
    })
}

fn apply_step(session: &mut Session, step: &Step) -> Result<()> {
    match step {
        Step::Load { elements, app_state } => {
            let repaired = session.load(elements.iter().cloned(), app_state.clone())?;
            tracing::info!(elements = elements.len(), repaired, "loaded scene");
        }
        Step::Update { policy, origin, batch } => {
            let policy = CapturePolicy::parse_lenient(policy);
            session.update(batch.clone(), InteractionContext::new(policy, *origin))?;
            tracing::info!(%policy, ?origin, "applied update");
        }
        Step::Undo => {
            if !session.undo() {
                tracing::info!("nothing to undo");
            }
        }
        Step::Redo => {
            if !session.redo() {
                tracing::info!("nothing to redo");
            }
        }
        Step::Flush => {
            session.flush();
        }
        Step::Abandon => {
            session.abandon();
        }
        Step::Gc => {
            let removed = session.collect_garbage();
            tracing::info!(removed, "collected garbage");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const E1: &str = "00000000-0000-4000-8000-000000000001";
    const E2: &str = "00000000-0000-4000-8000-000000000002";

    fn script(steps: serde_json::Value) -> Script {
        serde_json::from_value(json!({ "steps": steps })).unwrap()
    }

    fn load_step() -> serde_json::Value {
        json!({
            "op": "load",
            "elements": [
                { "id": E1, "orderKey": "a0", "props": { "x": 0 } },
                { "id": E2, "orderKey": "a0", "props": { "x": 0 } }
            ]
        })
    }

    #[test]
    fn replays_updates_and_history() {
        let script = script(json!([
            load_step(),
            { "op": "update", "policy": "immediate", "batch": { "update": [{ "id": E1, "props": { "x": 10 } }] } },
            { "op": "update", "policy": "never", "origin": "remote", "batch": { "update": [{ "id": E2, "props": { "x": 3 } }] } },
            { "op": "undo" },
            { "op": "redo" },
            { "op": "undo" }
        ]));
        let mut session = Session::default();
        let report = run(&script, &mut session, false).unwrap();

        assert_eq!(report.elements.len(), 2);
        assert_eq!(report.elements[0].id.to_string(), E1);
        assert_eq!(report.elements[0].prop("x"), Some(&json!(0)));
        assert_eq!(report.elements[1].prop("x"), Some(&json!(3)));
        assert_eq!(report.undo_depth, 0);
        assert_eq!(report.redo_depth, 1);

        let sources: Vec<_> = report.increments.iter().map(|i| i.source).collect();
        assert_eq!(
            sources,
            vec![
                IncrementSource::Programmatic,
                IncrementSource::Local,
                IncrementSource::Remote,
                IncrementSource::Undo,
                IncrementSource::Redo,
                IncrementSource::Undo,
            ]
        );
    }

    #[test]
    fn eventual_steps_need_a_flush() {
        let script = script(json!([
            load_step(),
            { "op": "update", "policy": "eventual", "batch": { "update": [{ "id": E1, "props": { "x": 1 } }] } },
            { "op": "update", "policy": "eventual", "batch": { "update": [{ "id": E1, "props": { "x": 2 } }] } },
            { "op": "flush" }
        ]));
        let mut session = Session::default();
        let report = run(&script, &mut session, false).unwrap();
        assert_eq!(report.undo_depth, 1);
        let durable = report
            .increments
            .iter()
            .filter(|i| i.kind == IncrementKind::Durable)
            .count();
        assert_eq!(durable, 1);
    }

    #[test]
    fn deleted_elements_are_reported_on_request() {
        let script = script(json!([
            load_step(),
            { "op": "update", "policy": "immediate", "batch": { "delete": [E2] } }
        ]));
        let mut session = Session::default();
        assert_eq!(run(&script, &mut session, false).unwrap().elements.len(), 1);
        let mut session = Session::default();
        assert_eq!(run(&script, &mut session, true).unwrap().elements.len(), 2);
    }

    #[test]
    fn bad_steps_fail_with_context() {
        let script = script(json!([
            load_step(),
            { "op": "update", "policy": "immediate", "batch": { "delete": [E1] } },
            { "op": "update", "policy": "immediate", "batch": { "delete": [E1, "00000000-0000-4000-8000-000000000009"] } }
        ]));
        let err = run(&script, &mut Session::default(), false).unwrap_err();
        assert!(format!("{err:#}").contains("Step 2 failed"));

        let missing = self::script(json!([
            { "op": "update", "policy": "immediate", "batch": { "delete": [E1] } }
        ]));
        assert!(run(&missing, &mut Session::default(), false).is_err());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "unknown capture policy"))]
    fn unknown_policy_is_not_recorded() {
        let script = script(json!([
            load_step(),
            { "op": "update", "policy": "sometimes", "batch": { "update": [{ "id": E1, "props": { "x": 1 } }] } }
        ]));
        let report = run(&script, &mut Session::default(), false).unwrap();
        assert_eq!(report.undo_depth, 0);
        assert_eq!(report.elements[0].prop("x"), Some(&json!(1)));
        let last = report.increments.last().unwrap();
        assert_eq!(last.kind, IncrementKind::Ephemeral);
    }

    #[test]
    fn scripts_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        fs::write(&path, json!({ "steps": [load_step(), { "op": "gc" }] }).to_string()).unwrap();
        let script = Script::load(&path).unwrap();
        assert_eq!(script.steps.len(), 2);
        assert!(Script::load(&dir.path().join("missing.json")).is_err());
    }
}
