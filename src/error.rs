//! Error types
//!
//! One error enum for the whole crate. Pack misses are not errors
//! (they resolve to an empty tree), everything else surfaces here.
//!
//! Author: Moroya Sakamoto

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while loading, diffing, or storing revision data.
#[derive(Error, Debug)]
pub enum VcsError {
    /// File I/O error from a file-backed pack or history file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// History file could not be parsed or written as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pack file exists but its contents do not decode.
    #[error("corrupt pack file: {}", path.display())]
    CorruptPack { path: PathBuf },

    /// Persisted diff logic tag has no registered strategy.
    #[error("unknown diff logic type: {tag:?}")]
    UnknownDiffLogic { tag: String },

    /// A tracked item exposed no diff logic to copy.
    #[error("tracked item {item} has no diff logic")]
    MissingDiffLogic { item: Uuid },

    /// A persisted node lacks a required property.
    #[error("<{node}> is missing property {property:?}")]
    MissingProperty { node: String, property: String },

    /// A persisted node has the wrong name.
    #[error("expected <{expected}>, found <{found}>")]
    UnexpectedNode { expected: String, found: String },

    /// A persisted id is not a valid uuid.
    #[error("invalid uuid: {value:?}")]
    InvalidUuid { value: String },

    /// Delta index beyond the item's delta list.
    #[error("delta index {index} out of range ({len} deltas)")]
    DeltaIndexOutOfRange { index: usize, len: usize },

    /// No revision with this id in the graph.
    #[error("unknown revision: {id}")]
    UnknownRevision { id: Uuid },

    /// Operation not allowed on the current graph state.
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },
}

/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, VcsError>;
