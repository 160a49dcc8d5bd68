// 📦 Object Entity - tracked asset identified by its RFID idcode

use super::{Entity, EntityKind};
use crate::db::StoreSession;
use crate::diff::{ComparisonPolicy, DiffResult, Update};
use crate::error::NormalizationError;
use crate::movement::{derive_movements, Movement};
use crate::normalize::{normalize_object, Normalized, RawRecord};
use crate::temporal::{timestamps_equal, Timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Stable identity (RFID idcode)
    pub idcode: String,
    pub active: bool,
    /// Current location, if the provider knows it
    pub location_id: Option<i64>,
    pub description: Option<String>,
    pub last_seen: Option<Timestamp>,
    pub home_location_id: Option<i64>,
    pub last_modified: Option<Timestamp>,
    pub last_location: Option<Timestamp>,
}

/// Stored business fields of an object, as read back for diffing
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    pub active: bool,
    pub location_id: Option<i64>,
    pub description: Option<String>,
    pub last_seen: Option<Timestamp>,
    pub home_location_id: Option<i64>,
    pub last_modified: Option<Timestamp>,
    pub last_location: Option<Timestamp>,
}

impl From<&ObjectRecord> for ObjectSnapshot {
    fn from(r: &ObjectRecord) -> Self {
        ObjectSnapshot {
            active: r.active,
            location_id: r.location_id,
            description: r.description.clone(),
            last_seen: r.last_seen,
            home_location_id: r.home_location_id,
            last_modified: r.last_modified,
            last_location: r.last_location,
        }
    }
}

impl ObjectRecord {
    /// Timestamp fields that drive change detection, in comparison order.
    fn timestamp_change(&self, existing: &ObjectSnapshot) -> Option<&'static str> {
        let pairs = [
            ("last_modified", &self.last_modified, &existing.last_modified),
            ("last_location", &self.last_location, &existing.last_location),
            ("last_seen", &self.last_seen, &existing.last_seen),
        ];

        pairs
            .into_iter()
            .find(|(_, new, old)| !timestamps_equal(new.as_ref(), old.as_ref()))
            .map(|(field, _, _)| field)
    }

    fn attribute_change(&self, existing: &ObjectSnapshot) -> Option<&'static str> {
        if self.active != existing.active {
            Some("active")
        } else if self.location_id != existing.location_id {
            Some("location_id")
        } else if self.description != existing.description {
            Some("description")
        } else if self.home_location_id != existing.home_location_id {
            Some("home_location_id")
        } else {
            None
        }
    }
}

impl Entity for ObjectRecord {
    type Key = String;
    type Snapshot = ObjectSnapshot;

    const KIND: EntityKind = EntityKind::Object;

    fn key(&self) -> &String {
        &self.idcode
    }

    fn normalize(raw: &RawRecord) -> Result<Normalized<Self>, NormalizationError> {
        normalize_object(raw)
    }

    fn changed_field(&self, existing: &ObjectSnapshot, policy: ComparisonPolicy) -> Option<&'static str> {
        let changed = self.timestamp_change(existing);
        match policy {
            ComparisonPolicy::TimestampsOnly => changed,
            ComparisonPolicy::AllFields => changed.or_else(|| self.attribute_change(existing)),
        }
    }

    fn fetch_existing(
        session: &mut (dyn StoreSession + '_),
        keys: &[String],
    ) -> Result<HashMap<String, ObjectSnapshot>> {
        session.existing_objects(keys)
    }

    fn write(session: &mut (dyn StoreSession + '_), diff: &DiffResult<Self>) -> Result<()> {
        if !diff.inserts.is_empty() {
            session.insert_objects(&diff.inserts)?;
        }
        if !diff.updates.is_empty() {
            let rows: Vec<&ObjectRecord> = diff.updates.iter().map(|u| &u.record).collect();
            session.update_objects(&rows)?;
        }
        Ok(())
    }

    fn derive_movements(updates: &[Update<Self>], at: DateTime<Utc>) -> Vec<Movement> {
        derive_movements(updates, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::parse_timestamp;

    fn object() -> ObjectRecord {
        ObjectRecord {
            idcode: "X1".to_string(),
            active: true,
            location_id: Some(5),
            description: Some("Forklift".to_string()),
            last_seen: parse_timestamp("2024-01-01T10:00:00"),
            home_location_id: Some(1),
            last_modified: parse_timestamp("2024-01-01T00:00:00"),
            last_location: parse_timestamp("2024-01-01T09:00:00"),
        }
    }

    #[test]
    fn test_unchanged_object() {
        let o = object();
        let snap = ObjectSnapshot::from(&o);
        assert_eq!(o.changed_field(&snap, ComparisonPolicy::TimestampsOnly), None);
        assert_eq!(o.changed_field(&snap, ComparisonPolicy::AllFields), None);
    }

    #[test]
    fn test_timestamp_fields_checked_in_order() {
        let stored = object();
        let mut incoming = stored.clone();
        incoming.last_seen = parse_timestamp("2024-01-05T00:00:00");
        incoming.last_modified = parse_timestamp("2024-01-05T00:00:00");

        let snap = ObjectSnapshot::from(&stored);
        assert_eq!(
            incoming.changed_field(&snap, ComparisonPolicy::TimestampsOnly),
            Some("last_modified")
        );

        incoming.last_modified = stored.last_modified;
        assert_eq!(incoming.changed_field(&snap, ComparisonPolicy::TimestampsOnly), Some("last_seen"));
    }

    #[test]
    fn test_timestamp_cleared_counts_as_change() {
        let stored = object();
        let mut incoming = stored.clone();
        incoming.last_location = None;
        assert_eq!(
            incoming.changed_field(&ObjectSnapshot::from(&stored), ComparisonPolicy::TimestampsOnly),
            Some("last_location")
        );
    }

    #[test]
    fn test_location_only_change_ignored_by_default_policy() {
        let stored = object();
        let mut incoming = stored.clone();
        incoming.location_id = Some(9);
        incoming.active = false;

        let snap = ObjectSnapshot::from(&stored);
        assert_eq!(incoming.changed_field(&snap, ComparisonPolicy::TimestampsOnly), None);
        assert_eq!(incoming.changed_field(&snap, ComparisonPolicy::AllFields), Some("active"));

        incoming.active = true;
        assert_eq!(incoming.changed_field(&snap, ComparisonPolicy::AllFields), Some("location_id"));
    }
}
