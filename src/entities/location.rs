// 📍 Location Entity - provider-assigned integer id + optional name

use super::{Entity, EntityKind};
use crate::db::StoreSession;
use crate::diff::{ComparisonPolicy, DiffResult};
use crate::error::NormalizationError;
use crate::normalize::{normalize_location, Normalized, RawRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Stable identity, assigned by the provider
    pub id: i64,

    /// Display name, stored exactly as received
    pub name: Option<String>,
}

/// Stored fields compared during diffing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSnapshot {
    pub name: Option<String>,
}

/// Absent and empty names compare equal.
fn name_key(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("")
}

impl Entity for LocationRecord {
    type Key = i64;
    type Snapshot = LocationSnapshot;

    const KIND: EntityKind = EntityKind::Location;

    fn key(&self) -> &i64 {
        &self.id
    }

    fn normalize(raw: &RawRecord) -> Result<Normalized<Self>, NormalizationError> {
        normalize_location(raw)
    }

    fn changed_field(&self, existing: &LocationSnapshot, _policy: ComparisonPolicy) -> Option<&'static str> {
        (name_key(&self.name) != name_key(&existing.name)).then_some("name")
    }

    fn fetch_existing(
        session: &mut (dyn StoreSession + '_),
        keys: &[i64],
    ) -> Result<HashMap<i64, LocationSnapshot>> {
        session.existing_locations(keys)
    }

    fn write(session: &mut (dyn StoreSession + '_), diff: &DiffResult<Self>) -> Result<()> {
        if !diff.inserts.is_empty() {
            session.insert_locations(&diff.inserts)?;
        }
        if !diff.updates.is_empty() {
            let rows: Vec<&LocationRecord> = diff.updates.iter().map(|u| &u.record).collect();
            session.update_locations(&rows)?;
        }
        Ok(())
    }
}
