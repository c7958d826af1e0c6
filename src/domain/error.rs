// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Two families of typed errors:
//
//   ParamError — raised while binding a processor's configuration.
//                Always fatal: a processor is never partially built.
//
//   StoreError — raised by the checkpoint store. KeyNotFound is
//                handed back to the caller, which picks a fallback.
//                KeyAlreadyExists is turned into a logged skip by
//                CheckpointView::write_policy.
//
// Numeric failures are NOT part of this taxonomy: they travel as
// anyhow::Error and are never reinterpreted.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::param::ParamType;

/// Errors raised while declaring or binding parameter slots.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A mandatory slot was read or left unbound
    #[error("missing mandatory parameter '{name}'")]
    Missing { name: String },

    /// A value's runtime type is not among the slot's allowed types
    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name:     String,
        expected: String,
        found:    ParamType,
    },

    /// A named argument does not match any slot
    #[error("unknown parameter '{name}'")]
    Unknown { name: String },

    /// The same slot was bound twice (by position and by name, or twice by name)
    #[error("parameter '{name}' bound more than once")]
    Duplicate { name: String },

    /// More positional arguments than positional slots
    #[error("{given} positional arguments given, only {accepted} accepted")]
    TooManyPositional { given: usize, accepted: usize },
}

/// Errors raised by the hierarchical checkpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: '{0}'")]
    KeyNotFound(String),

    #[error("key already exists and overwrite is disabled: '{0}'")]
    KeyAlreadyExists(String),

    #[error("'{0}' is a dataset, not a group")]
    NotAGroup(String),

    #[error("invalid key: '{0}'")]
    InvalidKey(String),

    #[error("store '{}' is opened read-only", .0.display())]
    ReadOnly(PathBuf),

    #[error("cannot access store '{}'", .path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("'{}' is not a readable store: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("cannot convert stored value: {0}")]
    Conversion(String),
}

impl StoreError {
    /// True for a read of an absent key, the one store error callers
    /// routinely recover from.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }
}
