// 🧹 Record Normalizer - raw provider payloads → typed records
//
// The provider sends loosely typed string-keyed maps. Everything untyped
// stops here: downstream code only sees LocationRecord / ObjectRecord.

use crate::entities::{Entity, LocationRecord, ObjectRecord};
use crate::error::NormalizationError;
use crate::temporal::{parse_timestamp, Timestamp};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// A record exactly as the provider sent it.
pub type RawRecord = Map<String, Value>;

/// Provider field names
pub mod fields {
    pub const ID: &str = "ID";
    pub const NAME: &str = "NAME";
    pub const IDCODE: &str = "IDCODE";
    pub const ACTIVE: &str = "ACTIVE";
    pub const LOCATION_ID: &str = "LOCATION_ID";
    pub const DESCRIPTION: &str = "DESCRIPTION";
    pub const LAST_SEEN: &str = "LAST_SEEN";
    pub const HOME_LOCATION_ID: &str = "HOME_LOCATION_ID";
    pub const LAST_MODIFIED: &str = "LAST_MODIFIED";
    pub const LAST_LOCATION: &str = "LAST_LOCATION";
}

/// Marker the provider uses for a true `ACTIVE` flag.
const ACTIVE_MARKER: &str = "1";

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

/// A field that was present but could not be coerced, and was normalized to
/// absent instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWarning {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Typed record plus the fields that were dropped on the way.
#[derive(Debug, Clone)]
pub struct Normalized<R> {
    pub record: R,
    pub warnings: Vec<FieldWarning>,
}

impl<R> Normalized<R> {
    pub fn clean(record: R) -> Self {
        Normalized {
            record,
            warnings: Vec::new(),
        }
    }

    /// True when at least one field was silently nulled.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Result of normalizing a whole batch.
#[derive(Debug, Clone)]
pub struct NormalizedBatch<R> {
    /// One entry per identity, in first-seen order
    pub records: Vec<Normalized<R>>,
    /// Records dropped for a missing or invalid identity
    pub skipped: usize,
    /// Records collapsed into an earlier record with the same identity
    pub duplicates: usize,
}

impl<R> NormalizedBatch<R> {
    pub fn partial_count(&self) -> usize {
        self.records.iter().filter(|n| n.is_partial()).count()
    }

    pub fn into_records(self) -> Vec<R> {
        self.records.into_iter().map(|n| n.record).collect()
    }
}

/// Normalize every raw record of a batch.
///
/// Records with a bad identity are logged and skipped. When the same identity
/// appears more than once, the last occurrence's data wins and keeps the
/// position of the first occurrence, so the batch never carries a key twice.
pub fn normalize_batch<E: Entity>(raw: &[RawRecord]) -> NormalizedBatch<E> {
    let mut records: Vec<Normalized<E>> = Vec::with_capacity(raw.len());
    let mut positions: HashMap<E::Key, usize> = HashMap::with_capacity(raw.len());
    let mut skipped = 0;
    let mut duplicates = 0;

    for (index, item) in raw.iter().enumerate() {
        let normalized = match E::normalize(item) {
            Ok(n) => n,
            Err(e) => {
                warn!(kind = %E::KIND, index, error = %e, "skipping record");
                skipped += 1;
                continue;
            }
        };

        for w in &normalized.warnings {
            warn!(
                kind = %E::KIND,
                key = %normalized.record.key(),
                field = w.field,
                value = %w.value,
                reason = w.reason,
                "field normalized to null"
            );
        }

        match positions.get(normalized.record.key()) {
            Some(&pos) => {
                warn!(kind = %E::KIND, key = %normalized.record.key(), "duplicate identity in batch, keeping last");
                records[pos] = normalized;
                duplicates += 1;
            }
            None => {
                positions.insert(normalized.record.key().clone(), records.len());
                records.push(normalized);
            }
        }
    }

    NormalizedBatch {
        records,
        skipped,
        duplicates,
    }
}

// ============================================================================
// PER-KIND NORMALIZATION
// ============================================================================

/// `{"ID": "10", "NAME": "Dock A"}` → `LocationRecord { id: 10, name: Some("Dock A") }`
pub fn normalize_location(raw: &RawRecord) -> Result<Normalized<LocationRecord>, NormalizationError> {
    let id_text = identity_text(raw, fields::ID)?;
    let id = id_text
        .trim()
        .parse::<i64>()
        .map_err(|_| NormalizationError::InvalidIdentity {
            field: fields::ID,
            value: id_text.clone(),
        })?;

    // Stored as given: an empty NAME stays an empty string
    let name = field_text(raw, fields::NAME);

    Ok(Normalized::clean(LocationRecord { id, name }))
}

pub fn normalize_object(raw: &RawRecord) -> Result<Normalized<ObjectRecord>, NormalizationError> {
    let idcode = identity_text(raw, fields::IDCODE)?;
    let mut warnings = Vec::new();

    let active = field_text(raw, fields::ACTIVE).as_deref() == Some(ACTIVE_MARKER);
    let location_id = optional_int(raw, fields::LOCATION_ID, &mut warnings);
    let home_location_id = optional_int(raw, fields::HOME_LOCATION_ID, &mut warnings);
    let description = field_text(raw, fields::DESCRIPTION);
    let last_seen = optional_timestamp(raw, fields::LAST_SEEN, &mut warnings);
    let last_modified = optional_timestamp(raw, fields::LAST_MODIFIED, &mut warnings);
    let last_location = optional_timestamp(raw, fields::LAST_LOCATION, &mut warnings);

    Ok(Normalized {
        record: ObjectRecord {
            idcode,
            active,
            location_id,
            description,
            last_seen,
            home_location_id,
            last_modified,
            last_location,
        },
        warnings,
    })
}

// ============================================================================
// FIELD COERCION
// ============================================================================

/// Render a JSON value as provider text. Null reads as absent.
fn field_text(raw: &RawRecord, field: &'static str) -> Option<String> {
    match raw.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Same as [`field_text`] but empty text reads as absent too.
fn non_empty_text(raw: &RawRecord, field: &'static str) -> Option<String> {
    field_text(raw, field).filter(|s| !s.trim().is_empty())
}

fn identity_text(raw: &RawRecord, field: &'static str) -> Result<String, NormalizationError> {
    non_empty_text(raw, field).ok_or(NormalizationError::MissingIdentity { field })
}

fn optional_int(raw: &RawRecord, field: &'static str, warnings: &mut Vec<FieldWarning>) -> Option<i64> {
    let text = non_empty_text(raw, field)?;
    match text.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(FieldWarning {
                field,
                value: text,
                reason: "not an integer",
            });
            None
        }
    }
}

fn optional_timestamp(
    raw: &RawRecord,
    field: &'static str,
    warnings: &mut Vec<FieldWarning>,
) -> Option<Timestamp> {
    let text = non_empty_text(raw, field)?;
    let parsed = parse_timestamp(&text);
    if parsed.is_none() {
        warnings.push(FieldWarning {
            field,
            value: text,
            reason: "malformed timestamp",
        });
    }
    parsed
}

// ============================================================================
// BATCH FILES
// ============================================================================

/// Load a batch of raw records from a `.json` array or a `.csv` file.
pub fn load_batch(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open batch file {}", path.display()))?;

    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    if is_csv {
        read_csv_batch(file)
    } else {
        read_json_batch(file)
    }
}

/// JSON array of objects, as returned by the provider API.
pub fn read_json_batch<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    serde_json::from_reader(reader).context("Failed to parse JSON batch (expected an array of objects)")
}

/// CSV with provider field names as headers. Empty cells read as absent.
pub fn read_csv_batch<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result.context("Failed to read CSV row")?;
        let record: RawRecord = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(h, cell)| (h.to_string(), Value::String(cell.to_string())))
            .collect();
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_location_basic() {
        let n = normalize_location(&raw(json!({"ID": "10", "NAME": "Dock A"}))).unwrap();
        assert_eq!(n.record.id, 10);
        assert_eq!(n.record.name.as_deref(), Some("Dock A"));
        assert!(!n.is_partial());
    }

    #[test]
    fn test_location_numeric_id_and_missing_name() {
        let n = normalize_location(&raw(json!({"ID": 7}))).unwrap();
        assert_eq!(n.record.id, 7);
        assert_eq!(n.record.name, None);
    }

    #[test]
    fn test_location_empty_name_kept_as_given() {
        let n = normalize_location(&raw(json!({"ID": "3", "NAME": ""}))).unwrap();
        assert_eq!(n.record.name.as_deref(), Some(""));
    }

    #[test]
    fn test_location_bad_identity() {
        assert_eq!(
            normalize_location(&raw(json!({"NAME": "x"}))).unwrap_err(),
            NormalizationError::MissingIdentity { field: "ID" }
        );
        assert_eq!(
            normalize_location(&raw(json!({"ID": "abc"}))).unwrap_err(),
            NormalizationError::InvalidIdentity {
                field: "ID",
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_object_full_record() {
        let n = normalize_object(&raw(json!({
            "IDCODE": "X1",
            "ACTIVE": "1",
            "LOCATION_ID": "7",
            "DESCRIPTION": "Pallet jack",
            "LAST_SEEN": "2024-01-02T10:00:00",
            "HOME_LOCATION_ID": "3",
            "LAST_MODIFIED": "2024-01-02T00:00:00",
            "LAST_LOCATION": "2024-01-02T09:00:00-03:00",
        })))
        .unwrap();

        let r = &n.record;
        assert_eq!(r.idcode, "X1");
        assert!(r.active);
        assert_eq!(r.location_id, Some(7));
        assert_eq!(r.home_location_id, Some(3));
        assert_eq!(r.description.as_deref(), Some("Pallet jack"));
        assert!(r.last_seen.is_some());
        assert!(r.last_modified.is_some());
        assert!(r.last_location.is_some());
        assert!(!n.is_partial());
    }

    #[test]
    fn test_object_active_is_exact_marker() {
        for (value, expected) in [
            (json!("1"), true),
            (json!(1), true),
            (json!("0"), false),
            (json!("true"), false),
            (json!(true), false),
            (json!(" 1"), false),
        ] {
            let n = normalize_object(&raw(json!({"IDCODE": "A", "ACTIVE": value}))).unwrap();
            assert_eq!(n.record.active, expected, "ACTIVE={value}");
        }
        let n = normalize_object(&raw(json!({"IDCODE": "A"}))).unwrap();
        assert!(!n.record.active);
    }

    #[test]
    fn test_object_empty_ints_are_absent_without_warning() {
        let n = normalize_object(&raw(json!({"IDCODE": "A", "LOCATION_ID": "", "HOME_LOCATION_ID": null}))).unwrap();
        assert_eq!(n.record.location_id, None);
        assert_eq!(n.record.home_location_id, None);
        assert!(!n.is_partial());
    }

    #[test]
    fn test_object_malformed_fields_flagged_partial() {
        let n = normalize_object(&raw(json!({
            "IDCODE": "A",
            "LOCATION_ID": "dock",
            "LAST_SEEN": "yesterday",
            "LAST_MODIFIED": "2024-01-01T00:00:00",
        })))
        .unwrap();

        assert_eq!(n.record.location_id, None);
        assert_eq!(n.record.last_seen, None);
        assert!(n.record.last_modified.is_some());
        assert!(n.is_partial());

        let flagged: Vec<&str> = n.warnings.iter().map(|w| w.field).collect();
        assert_eq!(flagged, vec!["LOCATION_ID", "LAST_SEEN"]);
    }

    #[test]
    fn test_object_missing_idcode() {
        assert_eq!(
            normalize_object(&raw(json!({"IDCODE": ""}))).unwrap_err(),
            NormalizationError::MissingIdentity { field: "IDCODE" }
        );
    }

    #[test]
    fn test_batch_skips_bad_identity_and_collapses_duplicates() {
        let batch = vec![
            raw(json!({"ID": "1", "NAME": "first"})),
            raw(json!({"ID": "oops"})),
            raw(json!({"ID": "2", "NAME": "two"})),
            raw(json!({"ID": "1", "NAME": "second"})),
        ];

        let normalized = normalize_batch::<LocationRecord>(&batch);
        assert_eq!(normalized.skipped, 1);
        assert_eq!(normalized.duplicates, 1);

        let records = normalized.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].name.as_deref(), Some("second"));
        assert_eq!(records[1].id, 2);
    }

    #[test]
    fn test_batch_counts_partial_records() {
        let batch = vec![
            raw(json!({"IDCODE": "A", "LAST_SEEN": "garbage"})),
            raw(json!({"IDCODE": "B", "LAST_SEEN": "2024-01-01T00:00:00"})),
        ];
        let normalized = normalize_batch::<ObjectRecord>(&batch);
        assert_eq!(normalized.partial_count(), 1);
    }

    #[test]
    fn test_read_json_batch() {
        let data = br#"[{"ID":"10","NAME":"Dock A"},{"ID":11}]"#;
        let records = read_json_batch(&data[..]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["ID"], json!(11));
    }

    #[test]
    fn test_read_csv_batch_drops_empty_cells() {
        let data = "IDCODE,ACTIVE,LOCATION_ID,LAST_MODIFIED\nX1,1,5,2024-01-01T00:00:00\nX2,0,,\n";
        let records = read_csv_batch(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["LOCATION_ID"], json!("5"));
        assert!(!records[1].contains_key("LOCATION_ID"));

        let n = normalize_object(&records[1]).unwrap();
        assert_eq!(n.record.location_id, None);
        assert!(!n.record.active);
    }
}
