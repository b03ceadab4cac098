//! Point-in-time view of the scene and observed app state.

use serde::{Deserialize, Serialize};

use crate::app_state::ObservedAppState;
use crate::element::{ElementId, ElementMap};
use crate::scene::Scene;

/// Baseline used to compute the next delta.
///
/// Cloning is cheap: elements are shared, only the map itself is copied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub elements: ElementMap,
    pub app_state: ObservedAppState,
}

impl Snapshot {
    pub fn new(elements: ElementMap, app_state: ObservedAppState) -> Self {
        Self { elements, app_state }
    }

    /// Capture the live scene together with the app state slice
    pub fn of(scene: &Scene, app_state: &ObservedAppState) -> Self {
        Self {
            elements: scene.elements().clone(),
            app_state: app_state.clone(),
        }
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }
}
