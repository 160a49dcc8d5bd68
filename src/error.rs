//! Error taxonomy for the reconciliation engine.
//!
//! Public entry points never return these directly: the orchestrator folds
//! them into an [`Outcome`](crate::reconciliation::Outcome). They exist so
//! internals and tests can match on what went wrong.

use thiserror::Error;

/// A record that could not be turned into a typed record at all.
///
/// Only identity problems are fatal for a record; every other field degrades
/// to absent with a [`FieldWarning`](crate::normalize::FieldWarning).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// Identity field missing, null or empty
    #[error("missing identity field {field}")]
    MissingIdentity { field: &'static str },

    /// Identity field present but not coercible to the key type
    #[error("invalid identity field {field}: {value:?}")]
    InvalidIdentity { field: &'static str, value: String },
}

/// Failure of a whole reconciliation batch.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// No persistent store configured; nothing was attempted
    #[error("Database manager not initialized.")]
    StoreUnavailable,

    /// Lookup, bulk write or commit failed; the batch was rolled back
    #[error("{0:#}")]
    Write(#[from] anyhow::Error),
}

/// Result alias for engine internals.
pub type Result<T> = std::result::Result<T, ReconcileError>;
