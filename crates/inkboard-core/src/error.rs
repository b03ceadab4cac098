use inkboard_order::OrderKeyError;
use thiserror::Error;

use crate::element::ElementId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("element {0} not found")]
    NotFound(ElementId),

    #[error(transparent)]
    MalformedOrderKey(#[from] OrderKeyError),
}
