//! Scene elements and field-level access.
//!
//! The store treats element payloads as opaque property maps. The only
//! fields it understands are the identity, the version stamp, the order key
//! and the soft-delete flag.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use inkboard_order::OrderKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Element identifier - UUID so ids stay unique across peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical element collection; unchanged elements are shared between snapshots
pub type ElementMap = HashMap<ElementId, Arc<Element>>;

/// Random value regenerated on every mutation
pub fn fresh_nonce() -> u32 {
    rand::random()
}

/// Version counter plus nonce; identifies which edit produced an element state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub version: u64,
    pub version_nonce: u32,
}

/// A drawable element as far as the store is concerned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    #[serde(default = "first_version")]
    pub version: u64,
    #[serde(default)]
    pub version_nonce: u32,
    #[serde(default)]
    pub order_key: OrderKey,
    #[serde(default)]
    pub is_deleted: bool,
    /// Shape payload (coordinates, colors, text, ...)
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
}

fn first_version() -> u64 {
    1
}

impl Element {
    /// Create a new, unpositioned element with a fresh id
    pub fn new() -> Self {
        Self::with_id(ElementId::new())
    }

    pub fn with_id(id: ElementId) -> Self {
        Self {
            id,
            version: first_version(),
            version_nonce: fresh_nonce(),
            order_key: OrderKey::unassigned(),
            is_deleted: false,
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn with_order_key(mut self, key: OrderKey) -> Self {
        self.order_key = key;
        self
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            version: self.version,
            version_nonce: self.version_nonce,
        }
    }

    /// Bump version and regenerate the nonce
    pub fn bump(&mut self) {
        self.version += 1;
        self.version_nonce = fresh_nonce();
    }

    /// Every field this element currently carries
    pub fn fields(&self) -> impl Iterator<Item = ElementField> + '_ {
        [ElementField::IsDeleted, ElementField::OrderKey]
            .into_iter()
            .chain(self.props.keys().cloned().map(ElementField::Prop))
    }

    pub fn field(&self, field: &ElementField) -> FieldValue {
        match field {
            ElementField::IsDeleted => FieldValue::Flag(self.is_deleted),
            ElementField::OrderKey => FieldValue::Key(self.order_key.clone()),
            ElementField::Prop(name) => FieldValue::Prop(self.props.get(name).cloned()),
        }
    }

    /// Write a field value. A value of the wrong kind for the field is ignored.
    pub fn set_field(&mut self, field: &ElementField, value: FieldValue) {
        match (field, value) {
            (ElementField::IsDeleted, FieldValue::Flag(flag)) => self.is_deleted = flag,
            (ElementField::OrderKey, FieldValue::Key(key)) => self.order_key = key,
            (ElementField::Prop(name), FieldValue::Prop(Some(value))) => {
                self.props.insert(name.clone(), value);
            }
            (ElementField::Prop(name), FieldValue::Prop(None)) => {
                self.props.remove(name);
            }
            (field, value) => {
                debug_assert!(false, "value {value:?} does not fit field {field}");
                tracing::error!(%field, ?value, "ignoring mismatched field write");
            }
        }
    }

    /// Apply a partial update without touching the version stamp.
    ///
    /// Returns whether any field actually changed.
    pub fn apply_update(&mut self, update: &ElementUpdate) -> bool {
        let mut changed = false;
        if let Some(flag) = update.is_deleted {
            if self.is_deleted != flag {
                self.is_deleted = flag;
                changed = true;
            }
        }
        if let Some(key) = &update.order_key {
            if &self.order_key != key {
                self.order_key = key.clone();
                changed = true;
            }
        }
        for (name, value) in &update.props {
            match value {
                Some(value) => {
                    if self.props.get(name) != Some(value) {
                        self.props.insert(name.clone(), value.clone());
                        changed = true;
                    }
                }
                None => {
                    if self.props.remove(name).is_some() {
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}

impl Default for Element {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial element update; absent entries are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementUpdate {
    pub is_deleted: Option<bool>,
    pub order_key: Option<OrderKey>,
    /// `None` removes the property
    pub props: BTreeMap<String, Option<Value>>,
}

impl ElementUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(flag: bool) -> Self {
        Self {
            is_deleted: Some(flag),
            ..Self::default()
        }
    }

    pub fn order_key(key: OrderKey) -> Self {
        Self {
            order_key: Some(key),
            ..Self::default()
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), Some(value.into()));
        self
    }

    pub fn unset(mut self, name: impl Into<String>) -> Self {
        self.props.insert(name.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.is_deleted.is_none() && self.order_key.is_none() && self.props.is_empty()
    }
}

/// Addressable field of an element.
///
/// Serialized as a plain string (`isDeleted`, `orderKey`, `prop:<name>`) so
/// field maps stay valid JSON objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ElementField {
    IsDeleted,
    OrderKey,
    Prop(String),
}

const PROP_PREFIX: &str = "prop:";

impl fmt::Display for ElementField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementField::IsDeleted => f.write_str("isDeleted"),
            ElementField::OrderKey => f.write_str("orderKey"),
            ElementField::Prop(name) => write!(f, "{PROP_PREFIX}{name}"),
        }
    }
}

impl FromStr for ElementField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isDeleted" => Ok(ElementField::IsDeleted),
            "orderKey" => Ok(ElementField::OrderKey),
            other => other
                .strip_prefix(PROP_PREFIX)
                .map(|name| ElementField::Prop(name.to_string()))
                .ok_or_else(|| format!("unknown element field {other:?}")),
        }
    }
}

impl From<ElementField> for String {
    fn from(field: ElementField) -> Self {
        field.to_string()
    }
}

impl TryFrom<String> for ElementField {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Value of a single element field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    Flag(bool),
    Key(OrderKey),
    /// `None` when the property is absent
    Prop(Option<Value>),
}
