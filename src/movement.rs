// 🚚 Movement Deriver - audit trail of object location changes
//
// "Every change is an event": when an object update moves it between
// locations, an immutable Movement is appended. Movements are never updated
// or deleted.

use crate::diff::Update;
use crate::entities::ObjectRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A location change waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub object_idcode: String,
    pub from_location_id: Option<i64>,
    pub to_location_id: Option<i64>,
    /// Reconciliation wall-clock time, not a provider field
    pub timestamp: DateTime<Utc>,
}

/// A movement as persisted, with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMovement {
    pub id: i64,
    pub object_idcode: String,
    pub from_location_id: Option<i64>,
    pub to_location_id: Option<i64>,
    pub created_at: String,
}

/// Movement for one object, if its location changed.
///
/// Absent is a location of its own: absent → 3 and 3 → absent both count.
pub fn derive_movement(
    idcode: &str,
    previous: Option<i64>,
    current: Option<i64>,
    at: DateTime<Utc>,
) -> Option<Movement> {
    (previous != current).then(|| Movement {
        object_idcode: idcode.to_string(),
        from_location_id: previous,
        to_location_id: current,
        timestamp: at,
    })
}

/// One movement per updated object whose location changed, in update order.
pub fn derive_movements(updates: &[Update<ObjectRecord>], at: DateTime<Utc>) -> Vec<Movement> {
    updates
        .iter()
        .filter_map(|u| {
            derive_movement(
                &u.record.idcode,
                u.previous.location_id,
                u.record.location_id,
                at,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ObjectSnapshot;
    use crate::temporal::parse_timestamp;

    fn update(idcode: &str, from: Option<i64>, to: Option<i64>) -> Update<ObjectRecord> {
        let record = ObjectRecord {
            idcode: idcode.to_string(),
            active: true,
            location_id: to,
            description: None,
            last_seen: None,
            home_location_id: None,
            last_modified: parse_timestamp("2024-01-02T00:00:00"),
            last_location: None,
        };
        let mut previous = ObjectSnapshot::from(&record);
        previous.location_id = from;
        previous.last_modified = parse_timestamp("2024-01-01T00:00:00");

        Update {
            record,
            previous,
            changed_field: "last_modified",
        }
    }

    #[test]
    fn test_location_change_emits_movement() {
        let now = Utc::now();
        let movements = derive_movements(&[update("X1", Some(1), Some(2))], now);

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].object_idcode, "X1");
        assert_eq!(movements[0].from_location_id, Some(1));
        assert_eq!(movements[0].to_location_id, Some(2));
        assert_eq!(movements[0].timestamp, now);
    }

    #[test]
    fn test_same_location_emits_nothing() {
        assert!(derive_movements(&[update("X1", Some(4), Some(4))], Utc::now()).is_empty());
        assert!(derive_movements(&[update("X1", None, None)], Utc::now()).is_empty());
    }

    #[test]
    fn test_absent_location_is_distinct() {
        let now = Utc::now();
        let movements = derive_movements(
            &[update("A", None, Some(3)), update("B", Some(3), None), update("C", Some(1), Some(1))],
            now,
        );
        let ids: Vec<&str> = movements.iter().map(|m| m.object_idcode.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(movements[1].to_location_id, None);
    }
}
