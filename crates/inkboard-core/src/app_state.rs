//! The slice of editor state that participates in history.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::element::{ElementId, ElementMap};

pub const DEFAULT_BACKGROUND: &str = "#ffffff";

/// Editor state fields tracked alongside elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservedAppState {
    pub name: Option<String>,
    pub view_background_color: String,
    pub selected_element_ids: BTreeSet<ElementId>,
    pub selected_group_ids: BTreeSet<String>,
    pub editing_group_id: Option<String>,
    pub editing_linear_element_id: Option<ElementId>,
    pub cropping_element_id: Option<ElementId>,
}

impl Default for ObservedAppState {
    fn default() -> Self {
        Self {
            name: None,
            view_background_color: DEFAULT_BACKGROUND.to_string(),
            selected_element_ids: BTreeSet::new(),
            selected_group_ids: BTreeSet::new(),
            editing_group_id: None,
            editing_linear_element_id: None,
            cropping_element_id: None,
        }
    }
}

/// Name of an observed app state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppStateField {
    Name,
    ViewBackgroundColor,
    SelectedElementIds,
    SelectedGroupIds,
    EditingGroupId,
    EditingLinearElementId,
    CroppingElementId,
}

impl AppStateField {
    pub const ALL: [AppStateField; 7] = [
        AppStateField::Name,
        AppStateField::ViewBackgroundColor,
        AppStateField::SelectedElementIds,
        AppStateField::SelectedGroupIds,
        AppStateField::EditingGroupId,
        AppStateField::EditingLinearElementId,
        AppStateField::CroppingElementId,
    ];
}

/// Value held by an [`AppStateField`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppStateValue {
    Text(Option<String>),
    Color(String),
    Elements(BTreeSet<ElementId>),
    Groups(BTreeSet<String>),
    Element(Option<ElementId>),
}

impl ObservedAppState {
    pub fn get(&self, field: AppStateField) -> AppStateValue {
        match field {
            AppStateField::Name => AppStateValue::Text(self.name.clone()),
            AppStateField::ViewBackgroundColor => {
                AppStateValue::Color(self.view_background_color.clone())
            }
            AppStateField::SelectedElementIds => {
                AppStateValue::Elements(self.selected_element_ids.clone())
            }
            AppStateField::SelectedGroupIds => AppStateValue::Groups(self.selected_group_ids.clone()),
            AppStateField::EditingGroupId => AppStateValue::Text(self.editing_group_id.clone()),
            AppStateField::EditingLinearElementId => {
                AppStateValue::Element(self.editing_linear_element_id)
            }
            AppStateField::CroppingElementId => AppStateValue::Element(self.cropping_element_id),
        }
    }

    /// Write a field. A value of the wrong kind is ignored.
    pub fn set(&mut self, field: AppStateField, value: AppStateValue) {
        match (field, value) {
            (AppStateField::Name, AppStateValue::Text(v)) => self.name = v,
            (AppStateField::ViewBackgroundColor, AppStateValue::Color(v)) => {
                self.view_background_color = v
            }
            (AppStateField::SelectedElementIds, AppStateValue::Elements(v)) => {
                self.selected_element_ids = v
            }
            (AppStateField::SelectedGroupIds, AppStateValue::Groups(v)) => {
                self.selected_group_ids = v
            }
            (AppStateField::EditingGroupId, AppStateValue::Text(v)) => self.editing_group_id = v,
            (AppStateField::EditingLinearElementId, AppStateValue::Element(v)) => {
                self.editing_linear_element_id = v
            }
            (AppStateField::CroppingElementId, AppStateValue::Element(v)) => {
                self.cropping_element_id = v
            }
            (field, value) => {
                debug_assert!(false, "value {value:?} does not fit app state field {field:?}");
                tracing::error!(?field, ?value, "ignoring mismatched app state write");
            }
        }
    }

    /// Drop references to elements that are absent or deleted.
    ///
    /// Returns whether anything was removed.
    pub fn filter_invisible(&mut self, elements: &ElementMap) -> bool {
        let visible = |id: &ElementId| elements.get(id).is_some_and(|e| !e.is_deleted);
        let before = self.selected_element_ids.len();
        self.selected_element_ids.retain(|id| visible(id));
        let mut changed = before != self.selected_element_ids.len();

        for slot in [
            &mut self.editing_linear_element_id,
            &mut self.cropping_element_id,
        ] {
            if slot.is_some_and(|id| !visible(&id)) {
                *slot = None;
                changed = true;
            }
        }
        changed
    }

    /// Whether any field points at `id`
    pub fn references(&self, id: &ElementId) -> bool {
        self.selected_element_ids.contains(id)
            || self.editing_linear_element_id.as_ref() == Some(id)
            || self.cropping_element_id.as_ref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use std::sync::Arc;

    #[test]
    fn get_and_set_cover_every_field() {
        let mut state = ObservedAppState::default();
        let other = ObservedAppState {
            name: Some("plan".into()),
            view_background_color: "#000000".into(),
            selected_element_ids: [ElementId::new()].into(),
            selected_group_ids: ["g1".to_string()].into(),
            editing_group_id: Some("g1".into()),
            editing_linear_element_id: Some(ElementId::new()),
            cropping_element_id: Some(ElementId::new()),
        };
        for field in AppStateField::ALL {
            assert_ne!(state.get(field), other.get(field), "{field:?}");
            state.set(field, other.get(field));
        }
        assert_eq!(state, other);
    }

    #[test]
    fn selections_of_deleted_elements_are_dropped() {
        let live = Element::new();
        let mut gone = Element::new();
        gone.is_deleted = true;
        let missing = ElementId::new();

        let elements: ElementMap = [
            (live.id, Arc::new(live.clone())),
            (gone.id, Arc::new(gone.clone())),
        ]
        .into_iter()
        .collect();

        let mut state = ObservedAppState {
            selected_element_ids: [live.id, gone.id, missing].into(),
            cropping_element_id: Some(gone.id),
            editing_linear_element_id: Some(live.id),
            ..ObservedAppState::default()
        };

        assert!(state.filter_invisible(&elements));
        assert_eq!(state.selected_element_ids, [live.id].into());
        assert_eq!(state.cropping_element_id, None);
        assert_eq!(state.editing_linear_element_id, Some(live.id));
        assert!(!state.filter_invisible(&elements));
    }
}
