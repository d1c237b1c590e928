//! Crate-wide error taxonomy.
//!
//! Each subsystem (store, queue, lock, context, interest, event, audit) keeps
//! its own narrow error enum; [`CoreError`] aggregates them at the boundary
//! the same way the teacher codebase's `DevKitError` aggregates
//! `AgentError`/`ContextError`/`ShellError`. Store-level errors
//! (`NotFound`/`AlreadyExists`/`Conflict`) flow up unchanged per spec §7 —
//! they are never retried inside the store itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("resource version conflict on {name}: expected {expected}, got {actual}")]
    Conflict {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("store is closed")]
    StoreClosed,

    #[error("reconcile error: {0}")]
    ReconcileTransient(String),

    #[error("reconcile panicked: {0}")]
    ReconcilePanic(String),

    #[error("malformed glob pattern {pattern:?}: {reason}")]
    PatternError { pattern: String, reason: String },

    #[error("publish failed on topic {topic:?}: {reason}")]
    PublishError { topic: String, reason: String },

    #[error("embedding failed: {0}")]
    EmbeddingError(String),

    #[error("already subscribed to topic {0:?} on this node")]
    SubscribeAlreadyActive(String),

    #[error("indexer {0:?} already registered")]
    IndexerAlreadyExists(String),

    #[error("index {0:?} not registered")]
    IndexNotFound(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
