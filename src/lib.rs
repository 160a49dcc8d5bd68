// Xtrack Reconcile - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;         // Environment configuration
pub mod db;             // Store traits + SQLite implementation
pub mod diff;           // Diff Engine - insert / update / unchanged
pub mod entities;       // Entity Models - Location, Object
pub mod error;          // Error taxonomy
pub mod movement;       // Movement Deriver - location change audit trail
pub mod normalize;      // Record Normalizer - raw provider maps → typed records
pub mod reconciliation; // Reconciliation Orchestrator
pub mod temporal;       // Temporal Comparator + timestamp parsing

#[cfg(feature = "server")]
pub mod api;            // HTTP routes
#[cfg(feature = "server")]
pub mod source;         // Provider client
#[cfg(feature = "server")]
pub mod sync;           // Periodic / on-demand fetch-and-reconcile

// Re-export commonly used types
pub use config::Config;
pub use db::{setup_database, LocationCount, SqliteStore, Store, StoreSession, StoreSummary};
pub use diff::{diff, ComparisonPolicy, DiffResult, Update};
pub use entities::{Entity, EntityKind, LocationRecord, LocationSnapshot, ObjectRecord, ObjectSnapshot};
pub use error::{NormalizationError, ReconcileError};
pub use movement::{derive_movement, derive_movements, Movement, StoredMovement};
pub use normalize::{load_batch, normalize_batch, FieldWarning, Normalized, NormalizedBatch, RawRecord};
pub use reconciliation::{Outcome, Reconciler};
pub use temporal::{parse_timestamp, timestamps_equal, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
