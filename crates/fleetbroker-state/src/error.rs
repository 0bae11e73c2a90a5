//! Error types for state operations.
//!
//! Business-rule violations (invalid task messages) are not errors: the
//! store operations report them as `Ok(None)`. [`StateError`] is reserved
//! for caller contract violations and genuine storage faults.

use crate::state::backend::StorageError;

/// Errors surfaced by [`State`](crate::state::State) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// `limit` was given but is not a positive integer.
    #[error("`limit` must be >= 1 (got {limit})")]
    InvalidLimit {
        /// The rejected limit.
        limit: usize,
    },

    /// A node id of 0 was given where a registered node is required.
    #[error("`node_id` must not be 0; use `None` for the anonymous consumer")]
    InvalidNodeId,

    /// The backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No free identifier could be drawn.
    #[error("could not allocate a unique {kind} id after {attempts} attempts")]
    IdExhausted {
        /// `"node"` or `"run"`.
        kind: &'static str,
        /// How many candidates were tried.
        attempts: usize,
    },

    /// The database string names a backend this build does not support.
    #[error("unsupported database: {0}")]
    UnsupportedDatabase(String),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience alias for state results.
pub type Result<T> = std::result::Result<T, StateError>;
