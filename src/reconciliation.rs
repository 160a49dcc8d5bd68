// ⚖️ Reconciliation Engine - converge the store onto a freshly fetched batch
//
// Pipeline for one batch:
//   normalize → one existing lookup → diff → derive movements
//   → bulk insert → bulk update → bulk insert movements → commit
//
// Any failure after the session opens rolls the whole batch back. Public
// entry points never return errors: callers get an Outcome to log or expose.

use crate::config::Config;
use crate::db::{SqliteStore, Store, StoreSession};
use crate::diff::{diff, ComparisonPolicy};
use crate::entities::{Entity, EntityKind, LocationRecord, ObjectRecord};
use crate::error::ReconcileError;
use crate::normalize::{normalize_batch, RawRecord};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub ok: bool,
    pub message: String,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records dropped for a missing or invalid identity
    pub skipped: usize,
    /// Records with at least one field normalized to null
    pub partial: usize,
    /// Movements appended (objects only)
    pub movements: usize,
}

impl Outcome {
    fn success(message: impl Into<String>) -> Self {
        Outcome {
            ok: true,
            message: message.into(),
            inserted: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            partial: 0,
            movements: 0,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Outcome {
            ok: false,
            ..Outcome::success(message)
        }
    }
}

/// Counts of a committed batch
#[derive(Debug, Clone, Copy, Default)]
struct Applied {
    inserted: usize,
    updated: usize,
    unchanged: usize,
    movements: usize,
}

// ============================================================================
// RECONCILER
// ============================================================================

/// The engine service. Built once at startup and shared by handle.
pub struct Reconciler {
    store: Option<Arc<dyn Store>>,
    policy: ComparisonPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Reconciler {
            store: Some(store),
            policy: ComparisonPolicy::default(),
        }
    }

    /// A reconciler with no store: every non-empty batch fails fast.
    pub fn unavailable() -> Self {
        Reconciler {
            store: None,
            policy: ComparisonPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ComparisonPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Open the configured SQLite store. A missing or broken store is logged
    /// and leaves the reconciler unavailable rather than aborting startup.
    pub fn from_config(config: &Config) -> Self {
        let reconciler = match &config.database_path {
            None => {
                warn!("DATABASE_URL not set, skipping database integration");
                Reconciler::unavailable()
            }
            Some(path) => match SqliteStore::open(path) {
                Ok(store) => {
                    info!(path = %path.display(), "database integration ready");
                    Reconciler::new(Arc::new(store))
                }
                Err(e) => {
                    error!(path = %path.display(), error = %format!("{e:#}"), "failed to set up database integration");
                    Reconciler::unavailable()
                }
            },
        };
        reconciler.with_policy(config.comparison_policy)
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn policy(&self) -> ComparisonPolicy {
        self.policy
    }

    pub fn reconcile_locations(&self, raw: &[RawRecord]) -> Outcome {
        self.reconcile::<LocationRecord>(raw)
    }

    pub fn reconcile_objects(&self, raw: &[RawRecord]) -> Outcome {
        self.reconcile::<ObjectRecord>(raw)
    }

    pub fn reconcile_kind(&self, kind: EntityKind, raw: &[RawRecord]) -> Outcome {
        match kind {
            EntityKind::Location => self.reconcile_locations(raw),
            EntityKind::Object => self.reconcile_objects(raw),
        }
    }

    pub fn reconcile<E: Entity>(&self, raw: &[RawRecord]) -> Outcome {
        if raw.is_empty() {
            return Outcome::success(format!("No {} to process.", E::KIND.plural()));
        }

        let Some(store) = &self.store else {
            return Outcome::failure(ReconcileError::StoreUnavailable.to_string());
        };

        let batch = normalize_batch::<E>(raw);
        let skipped = batch.skipped;
        let duplicates = batch.duplicates;
        let partial = batch.partial_count();
        let records = batch.into_records();

        let result = if records.is_empty() {
            Ok(Applied::default())
        } else {
            apply::<E>(store.as_ref(), records, self.policy)
        };

        match result {
            Ok(applied) => {
                info!(
                    kind = %E::KIND,
                    inserted = applied.inserted,
                    updated = applied.updated,
                    unchanged = applied.unchanged,
                    movements = applied.movements,
                    skipped,
                    duplicates,
                    partial,
                    "{} saved",
                    E::KIND.plural()
                );
                Outcome {
                    inserted: applied.inserted,
                    updated: applied.updated,
                    unchanged: applied.unchanged,
                    movements: applied.movements,
                    skipped,
                    partial,
                    ..Outcome::success(format!("{} inserted, {} updated", applied.inserted, applied.updated))
                }
            }
            Err(e) => {
                error!(kind = %E::KIND, error = %e, "error saving {}", E::KIND.plural());
                Outcome {
                    skipped,
                    partial,
                    ..Outcome::failure(e.to_string())
                }
            }
        }
    }
}

/// Run one batch inside one session; commit on success, roll back otherwise.
fn apply<E: Entity>(
    store: &dyn Store,
    records: Vec<E>,
    policy: ComparisonPolicy,
) -> crate::error::Result<Applied> {
    let mut session = store.session()?;

    match stage::<E>(session.as_mut(), records, policy) {
        Ok(applied) => {
            session.commit()?;
            Ok(applied)
        }
        Err(e) => {
            if let Err(rb) = session.rollback() {
                warn!(error = %format!("{rb:#}"), "rollback failed");
            }
            Err(ReconcileError::Write(e))
        }
    }
}

fn stage<E: Entity>(
    session: &mut (dyn StoreSession + '_),
    records: Vec<E>,
    policy: ComparisonPolicy,
) -> anyhow::Result<Applied> {
    let keys: Vec<E::Key> = records.iter().map(|r| r.key().clone()).collect();
    let existing = E::fetch_existing(session, &keys)
        .with_context(|| format!("Failed to look up existing {}", E::KIND.plural()))?;

    let diff = diff(records, &existing, policy);
    let movements = E::derive_movements(&diff.updates, Utc::now());

    E::write(session, &diff)?;
    if !movements.is_empty() {
        session.insert_movements(&movements)?;
    }

    Ok(Applied {
        inserted: diff.inserts.len(),
        updated: diff.updates.len(),
        unchanged: diff.unchanged,
        movements: movements.len(),
    })
}
