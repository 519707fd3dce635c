//! Core data types for the migration pipeline
//! Pure data structures with no I/O

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::migration::utils::{parse_date_or_null, parse_int_lenient};

/// One record as returned by the source API: an opaque stable id, a
/// creation timestamp, and a loosely-typed bag of fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Schema-less field map. Values are whatever the source sends back:
/// strings, numbers, single-select labels (strings), or lists of
/// linked-record ids. Every accessor is total - a missing field or a
/// value of the wrong shape yields `None` / empty, never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMap(pub Map<String, Value>);

impl FieldMap {
    /// String or single-select value, trimmed; empty strings count as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }
            _ => None,
        }
    }

    /// First of several candidate field names that carries text.
    pub fn any_text(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.text(n))
    }

    /// Integer, accepting numeric values or strings with junk characters
    /// ("12 yrs" -> 12). Unparseable values are absent, never zero.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => parse_int_lenient(s),
            _ => None,
        }
    }

    /// Date from a string field; total, `None` on any parse failure.
    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.text(name).and_then(parse_date_or_null)
    }

    /// Tri-state from a single-select label: `Some(true)` when the value
    /// matches `label` case-insensitively, `Some(false)` when the field
    /// carries some other label, `None` when the field is absent.
    pub fn bool_from_label(&self, name: &str, label: &str) -> Option<bool> {
        self.text(name).map(|v| v.eq_ignore_ascii_case(label))
    }

    /// Linked-record ids (a list of strings in the source payload).
    pub fn linked_ids(&self, name: &str) -> Vec<&str> {
        match self.0.get(name) {
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Single-parent rule: only the first linked id is followed.
    pub fn first_linked_id(&self, name: &str) -> Option<&str> {
        self.linked_ids(name).into_iter().next()
    }
}

/// Durable copy of a source record in the staging table, keyed by
/// (base_id, table_name, record_id).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StagedRecord {
    pub base_id: String,
    pub table_name: String,
    pub record_id: String,
    pub table_id: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub fields: sqlx::types::Json<FieldMap>,
}

impl StagedRecord {
    pub fn fields(&self) -> &FieldMap {
        &self.fields.0
    }
}

/// Normalized homeowner candidate produced by the transform stage.
/// Natural key: the composed address (when present); otherwise the
/// identity map is the only handle on the row across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeownerCandidate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_initial: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_owner: Option<bool>,
    pub move_in_year: Option<i64>,
    pub notes: Option<String>,
}

impl HomeownerCandidate {
    pub fn has_name(&self) -> bool {
        self.first_name.is_some() || self.last_name.is_some()
    }

    /// Display handle for logs.
    pub fn label(&self) -> String {
        self.address.clone().unwrap_or_else(|| {
            let first = self.first_name.as_deref().unwrap_or("");
            let last = self.last_name.as_deref().unwrap_or("");
            format!("{} {}", first, last).trim().to_string()
        })
    }
}

/// Normalized household-member candidate. Natural key:
/// (resolved homeowner id, full name).
#[derive(Debug, Clone, PartialEq)]
pub struct MemberCandidate {
    /// Source record id of the linked homeowner, when the link exists.
    pub parent_record_id: Option<String>,
    pub full_name: String,
    pub relationship: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

/// Normalized vehicle + sticker candidate. The vehicle is keyed by plate
/// number; the sticker (when the source row carries a code) by that code.
#[derive(Debug, Clone, PartialEq)]
pub struct StickerCandidate {
    pub parent_record_id: Option<String>,
    pub plate_number: String,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_color: Option<String>,
    pub sticker_code: Option<String>,
    pub issued_date: Option<NaiveDate>,
    pub status: Option<String>,
}

/// Per-stage counters, reported in the final JSON summary.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub missing_parent: usize,
    pub errors: usize,
}

impl MigrateStats {
    /// Fold another stage's counters into this one (used by `all`).
    pub fn absorb(&mut self, other: &MigrateStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.missing_parent += other.missing_parent;
        self.errors += other.errors;
    }
}

impl std::fmt::Display for MigrateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, skipped: {}, missing parent: {}, errors: {}",
            self.inserted, self.updated, self.skipped, self.missing_parent, self.errors
        )
    }
}

/// Per-table outcome of a staging run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedTable {
    pub table: String,
    pub fetched: usize,
    pub staged: usize,
    /// Present only when --verify ran: source count == staged count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// The one JSON object every invocation prints on exit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub command: String,
    pub base_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<StagedTable>>,
    #[serde(flatten)]
    pub stats: MigrateStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> FieldMap {
        match v {
            Value::Object(map) => FieldMap(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_text_accessor_total() {
        let f = fields(json!({
            "Name": "  Juan Dela Cruz  ",
            "Empty": "   ",
            "Count": 3,
        }));

        assert_eq!(f.text("Name"), Some("Juan Dela Cruz"));
        assert_eq!(f.text("Empty"), None); // whitespace counts as absent
        assert_eq!(f.text("Count"), None); // wrong shape, not an error
        assert_eq!(f.text("Missing"), None);
    }

    #[test]
    fn test_int_accessor() {
        let f = fields(json!({
            "Years": "12 yrs",
            "Count": 7,
            "Fraction": 3.9,
            "Junk": "none",
        }));

        assert_eq!(f.int("Years"), Some(12));
        assert_eq!(f.int("Count"), Some(7));
        assert_eq!(f.int("Fraction"), Some(3));
        assert_eq!(f.int("Junk"), None); // absent, never zero
    }

    #[test]
    fn test_bool_from_label_tri_state() {
        let f = fields(json!({
            "Status": "OWNER",
            "Other": "Tenant",
        }));

        assert_eq!(f.bool_from_label("Status", "owner"), Some(true));
        assert_eq!(f.bool_from_label("Other", "owner"), Some(false));
        assert_eq!(f.bool_from_label("Missing", "owner"), None);
    }

    #[test]
    fn test_linked_ids_first_only() {
        let f = fields(json!({
            "Homeowner": ["recAAA", "recBBB"],
            "NotAList": "recCCC",
        }));

        assert_eq!(f.linked_ids("Homeowner"), vec!["recAAA", "recBBB"]);
        assert_eq!(f.first_linked_id("Homeowner"), Some("recAAA"));
        assert_eq!(f.first_linked_id("NotAList"), None);
        assert_eq!(f.first_linked_id("Missing"), None);
    }

    #[test]
    fn test_source_record_deserialization() {
        let rec: SourceRecord = serde_json::from_value(json!({
            "id": "rec123",
            "createdTime": "2024-01-15T08:30:00.000Z",
            "fields": {"Name": "Juan"}
        }))
        .unwrap();

        assert_eq!(rec.id, "rec123");
        assert!(rec.created_time.is_some());
        assert_eq!(rec.fields.text("Name"), Some("Juan"));
    }

    #[test]
    fn test_stats_display_and_absorb() {
        let mut a = MigrateStats {
            inserted: 2,
            updated: 1,
            ..Default::default()
        };
        let b = MigrateStats {
            skipped: 3,
            missing_parent: 1,
            errors: 1,
            ..Default::default()
        };
        a.absorb(&b);

        assert_eq!(
            a.to_string(),
            "inserted: 2, updated: 1, skipped: 3, missing parent: 1, errors: 1"
        );
    }

    #[test]
    fn test_summary_json_keys() {
        let summary = RunSummary {
            command: "members".to_string(),
            base_id: "appXYZ".to_string(),
            table: None,
            dry_run: false,
            tables: None,
            stats: MigrateStats {
                missing_parent: 2,
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["missingParent"], 2);
        assert_eq!(json["baseId"], "appXYZ");
        assert!(json.get("table").is_none());
    }
}
