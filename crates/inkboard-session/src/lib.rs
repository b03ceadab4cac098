//! Capture coordination and undo history for inkboard scenes.
//!
//! [`Session`] is the entry point: it applies mutation batches to a scene,
//! lets the [`Store`] decide per [`CapturePolicy`] how each batch is
//! recorded, keeps committed deltas in a bounded [`History`], and publishes
//! increments to durable and ephemeral listeners.

pub mod config;
pub mod context;
pub mod emitter;
pub mod history;
pub mod session;
pub mod store;

pub use config::{ConfigError, SessionConfig};
pub use context::{CapturePolicy, InteractionContext, Origin};
pub use emitter::{Emitter, Subscription};
pub use history::{DEFAULT_HISTORY_DEPTH, History};
pub use session::{ElementPatch, Insertion, Move, SceneUpdate, Session};
pub use store::{IncrementKind, IncrementSource, Store, StoreIncrement, StoreState};
