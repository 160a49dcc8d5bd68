// ⚖️ Diff Engine - partition a normalized batch into insert / update / unchanged
//
// Pure: the caller supplies the existing snapshots from one bulk lookup, so
// classification never issues per-record queries.

use crate::entities::Entity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// COMPARISON POLICY
// ============================================================================

/// Which Object fields decide that a stored object needs an update.
///
/// Locations always compare `name` and ignore this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Only `last_modified`, `last_location`, `last_seen`. A `location_id`
    /// change with identical timestamps is not written.
    #[default]
    TimestampsOnly,

    /// Timestamps first, then `active`, `location_id`, `description`,
    /// `home_location_id`
    AllFields,
}

impl ComparisonPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonPolicy::TimestampsOnly => "timestamps",
            ComparisonPolicy::AllFields => "all_fields",
        }
    }
}

impl std::str::FromStr for ComparisonPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamps" | "timestamps_only" => Ok(ComparisonPolicy::TimestampsOnly),
            "all_fields" | "all" => Ok(ComparisonPolicy::AllFields),
            other => Err(anyhow::anyhow!(
                "unknown comparison policy {other:?} (expected \"timestamps\" or \"all_fields\")"
            )),
        }
    }
}

// ============================================================================
// DIFF RESULT
// ============================================================================

/// An incoming record that replaces a stored one.
#[derive(Debug, Clone)]
pub struct Update<E: Entity> {
    /// Incoming record; every field replaces the stored value
    pub record: E,
    /// Stored snapshot it was compared against
    pub previous: E::Snapshot,
    /// First field found to differ
    pub changed_field: &'static str,
}

#[derive(Debug, Clone)]
pub struct DiffResult<E: Entity> {
    pub inserts: Vec<E>,
    pub updates: Vec<Update<E>>,
    pub unchanged: usize,
}

impl<E: Entity> DiffResult<E> {
    pub fn total(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.unchanged
    }

    pub fn has_writes(&self) -> bool {
        !self.inserts.is_empty() || !self.updates.is_empty()
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Classify each incoming record against the stored snapshots.
///
/// Keys of `incoming` must be unique (see
/// [`normalize_batch`](crate::normalize::normalize_batch)). Output order
/// follows input order.
pub fn diff<E: Entity>(
    incoming: Vec<E>,
    existing: &HashMap<E::Key, E::Snapshot>,
    policy: ComparisonPolicy,
) -> DiffResult<E> {
    let mut result = DiffResult {
        inserts: Vec::new(),
        updates: Vec::new(),
        unchanged: 0,
    };

    for record in incoming {
        let Some(previous) = existing.get(record.key()) else {
            result.inserts.push(record);
            continue;
        };

        match record.changed_field(previous, policy) {
            Some(field) => {
                debug!(kind = %E::KIND, key = %record.key(), field, "update");
                result.updates.push(Update {
                    previous: previous.clone(),
                    record,
                    changed_field: field,
                });
            }
            None => result.unchanged += 1,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{LocationRecord, LocationSnapshot, ObjectRecord, ObjectSnapshot};
    use crate::temporal::parse_timestamp;

    fn loc(id: i64, name: &str) -> LocationRecord {
        LocationRecord {
            id,
            name: Some(name.to_string()),
        }
    }

    fn stored(entries: &[(i64, &str)]) -> HashMap<i64, LocationSnapshot> {
        entries
            .iter()
            .map(|(id, name)| {
                (
                    *id,
                    LocationSnapshot {
                        name: Some(name.to_string()),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_partition_locations() {
        let incoming = vec![loc(1, "Dock A"), loc(2, "Dock B renamed"), loc(3, "Yard"), loc(4, "Gate")];
        let existing = stored(&[(1, "Dock A"), (2, "Dock B")]);

        let result = diff(incoming, &existing, ComparisonPolicy::default());

        let inserted: Vec<i64> = result.inserts.iter().map(|r| r.id).collect();
        assert_eq!(inserted, vec![3, 4]);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].record.id, 2);
        assert_eq!(result.updates[0].previous.name.as_deref(), Some("Dock B"));
        assert_eq!(result.updates[0].changed_field, "name");
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.total(), 4);
        assert!(result.has_writes());
    }

    #[test]
    fn test_empty_store_inserts_everything_in_order() {
        let incoming = vec![loc(9, "c"), loc(3, "a"), loc(5, "b")];
        let result = diff(incoming, &HashMap::new(), ComparisonPolicy::default());
        let order: Vec<i64> = result.inserts.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![9, 3, 5]);
        assert!(result.updates.is_empty());
    }

    #[test]
    fn test_all_unchanged_has_no_writes() {
        let incoming = vec![loc(1, "Dock A")];
        let result = diff(incoming, &stored(&[(1, "Dock A")]), ComparisonPolicy::default());
        assert_eq!(result.unchanged, 1);
        assert!(!result.has_writes());
    }

    #[test]
    fn test_object_policy_switch() {
        let stored_obj = ObjectRecord {
            idcode: "X1".to_string(),
            active: true,
            location_id: Some(5),
            description: None,
            last_seen: None,
            home_location_id: None,
            last_modified: parse_timestamp("2024-01-01T00:00:00"),
            last_location: None,
        };
        let existing: HashMap<String, ObjectSnapshot> =
            [("X1".to_string(), ObjectSnapshot::from(&stored_obj))].into_iter().collect();

        let mut moved = stored_obj.clone();
        moved.location_id = Some(7);

        let default = diff(vec![moved.clone()], &existing, ComparisonPolicy::TimestampsOnly);
        assert_eq!(default.unchanged, 1);

        let strict = diff(vec![moved], &existing, ComparisonPolicy::AllFields);
        assert_eq!(strict.updates.len(), 1);
        assert_eq!(strict.updates[0].changed_field, "location_id");
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("timestamps".parse::<ComparisonPolicy>().unwrap(), ComparisonPolicy::TimestampsOnly);
        assert_eq!("ALL_FIELDS".parse::<ComparisonPolicy>().unwrap(), ComparisonPolicy::AllFields);
        assert!("sometimes".parse::<ComparisonPolicy>().is_err());
        assert_eq!(ComparisonPolicy::default().as_str(), "timestamps");
    }
}
