//! Headless scene graph that answers the backend's `editor_action` frames
//!
//! It stands in for a host editor: nodes live in memory, every mutation is
//! undoable, and applied actions are kept in a bounded change log.

pub mod actions;
pub mod graph;
pub mod history;

pub use actions::HeadlessScene;
pub use graph::{SceneGraph, SceneNode, ROOT_PATH};
pub use history::{ChangeRecord, PendingChanges, SceneCommand};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Invalid node path: {0}")]
    InvalidPath(String),

    #[error("Invalid node name: '{0}'")]
    InvalidName(String),

    #[error("The root node cannot be {0}")]
    RootImmutable(&'static str),

    #[error("Cannot move {0} under itself")]
    Cycle(String),

    #[error("Property '{property}' not found on {path}")]
    PropertyNotFound { path: String, property: String },

    #[error("Missing or invalid parameter '{0}'")]
    InvalidParameter(&'static str),

    #[error("Nothing to undo")]
    NothingToUndo,
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;
