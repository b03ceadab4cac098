//! Element model and versioned scene primitives for inkboard.
//!
//! - [`Scene`] is the canonical element store and owns the z-order.
//! - [`Snapshot`] is a cheap point-in-time copy of a scene plus the observed
//!   app state.
//! - [`Delta`] describes the difference between two snapshots and can be
//!   squashed, inverted and applied conservatively to a live state.

pub mod app_state;
pub mod delta;
pub mod element;
pub mod error;
pub mod scene;
pub mod snapshot;

pub use app_state::{AppStateField, AppStateValue, ObservedAppState};
pub use delta::{Applied, ApplyOptions, Change, Delta, DeltaId, ElementChange};
pub use element::{Element, ElementField, ElementId, ElementMap, ElementUpdate, FieldValue, Stamp};
pub use error::SceneError;
pub use inkboard_order::{OrderKey, OrderKeyError};
pub use scene::{OrderedView, Position, Scene};
pub use snapshot::Snapshot;
