// Entity Models - Locations and Objects tracked by the provider
//
// Each entity kind has:
// - A stable, externally assigned identity (Key)
// - A typed record produced by the normalizer
// - A snapshot of the stored fields the diff engine compares against
// - Store glue for the one-shot existing lookup and the bulk writes

pub mod location;
pub mod object;

pub use location::{LocationRecord, LocationSnapshot};
pub use object::{ObjectRecord, ObjectSnapshot};

use crate::db::StoreSession;
use crate::diff::{ComparisonPolicy, DiffResult, Update};
use crate::error::NormalizationError;
use crate::movement::Movement;
use crate::normalize::{Normalized, RawRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Location,
    Object,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Location, EntityKind::Object];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Location => "location",
            EntityKind::Object => "object",
        }
    }

    /// Collection name, as used in log lines, messages and provider paths
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Location => "locations",
            EntityKind::Object => "objects",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "location" | "locations" => Ok(EntityKind::Location),
            "object" | "objects" => Ok(EntityKind::Object),
            other => Err(anyhow::anyhow!("unknown entity kind: {other}")),
        }
    }
}

// ============================================================================
// ENTITY TRAIT
// ============================================================================

/// Everything the orchestrator needs to reconcile one entity kind.
pub trait Entity: fmt::Debug + Clone + Send + Sized + 'static {
    type Key: fmt::Debug + fmt::Display + Clone + Eq + Hash + Send;
    type Snapshot: fmt::Debug + Clone;

    const KIND: EntityKind;

    fn key(&self) -> &Self::Key;

    fn normalize(raw: &RawRecord) -> Result<Normalized<Self>, NormalizationError>;

    /// First business field that differs from the stored snapshot, if any.
    fn changed_field(&self, existing: &Self::Snapshot, policy: ComparisonPolicy) -> Option<&'static str>;

    /// Snapshots for exactly `keys`, in one lookup.
    fn fetch_existing(
        session: &mut (dyn StoreSession + '_),
        keys: &[Self::Key],
    ) -> Result<HashMap<Self::Key, Self::Snapshot>>;

    /// Bulk insert, then bulk update.
    fn write(session: &mut (dyn StoreSession + '_), diff: &DiffResult<Self>) -> Result<()>;

    /// History records emitted as a side effect of updates.
    fn derive_movements(_updates: &[Update<Self>], _at: DateTime<Utc>) -> Vec<Movement> {
        Vec::new()
    }
}
