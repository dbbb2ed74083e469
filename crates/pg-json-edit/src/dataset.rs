//! Flat and nested dataset representations.
//!
//! A [`FlatDataset`] is the canonical row-set form: one ordered row sequence
//! per table, each row an ordered map of column name to scalar JSON value
//! (bytes are base64 strings, timestamps ISO-8601 UTC strings). A
//! [`NestedDataset`] presents the same rows as a tree keyed by the ownership
//! tree, with `$ref` and `$partial` sentinel objects standing in for
//! collapsed subtrees and truncated sequences.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::schema::{Schema, Table};

/// Tag field marking a collapsed composition: `{"$ref": true, ...pk}`.
pub const REF_TAG: &str = "$ref";

/// Tag field marking a truncated sequence: `{"$partial": true, "skipped": n}`.
pub const PARTIAL_TAG: &str = "$partial";

/// Field carrying the skipped-row count of a `$partial` marker.
pub const SKIPPED_FIELD: &str = "skipped";

/// Tag field marking an unresolved three-way conflict in a cell.
pub const CONFLICT_TAG: &str = "$conflict";

/// One row: ordered mapping from column name to scalar value.
pub type FlatRow = IndexMap<String, Value>;

/// The canonical row-set representation: table name to ordered row sequence.
///
/// Insertion order is extraction order (primary-key order when fetched).
/// Rows are never mutated in place; transformations produce new datasets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatDataset {
    tables: IndexMap<String, Vec<FlatRow>>,
}

impl FlatDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of a table, empty when the table is absent.
    pub fn rows(&self, table: &str) -> &[FlatRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the dataset has an entry (possibly empty) for the table.
    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names in insertion order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    /// Ensure a (possibly empty) entry for the table exists, so downstream
    /// diffing sees it.
    pub fn ensure_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    /// Append a row to a table, creating the entry if needed.
    pub fn push_row(&mut self, table: &str, row: FlatRow) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> u64 {
        self.tables.values().map(|rows| rows.len() as u64).sum()
    }
}

/// A nested node sequence plus the skipped-row counts of truncated tables.
///
/// Each element of a root sequence is a nested row (plain JSON object), a
/// `$ref` marker, or a `$partial` marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedDataset {
    /// Root-table camelCase name to node sequence.
    pub roots: IndexMap<String, Vec<Value>>,

    /// Table name to number of rows skipped by truncation, for tables where
    /// a limit applied anywhere in the document.
    pub truncated: IndexMap<String, u64>,
}

impl NestedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a truncation and append a `$partial` marker to the table's
    /// top-level sequence (creating the key when the table was truncated
    /// away entirely).
    pub fn mark_truncated(&mut self, key: &str, table: &str, skipped: u64) {
        if skipped == 0 {
            return;
        }
        self.roots
            .entry(key.to_string())
            .or_default()
            .push(partial_marker(skipped));
        *self.truncated.entry(table.to_string()).or_insert(0) += skipped;
    }
}

/// Check whether a node is a `$partial` truncation marker.
///
/// Only the literal boolean `true` counts; `{"$partial": 1}` is a normal row.
pub fn is_partial_marker(node: &Value) -> bool {
    node.get(PARTIAL_TAG) == Some(&Value::Bool(true))
}

/// Check whether a node is a `$ref` collapsed-composition marker.
pub fn is_ref_marker(node: &Value) -> bool {
    node.get(REF_TAG) == Some(&Value::Bool(true))
}

/// Check whether a cell value is an unresolved `$conflict` marker.
pub fn is_conflict_marker(value: &Value) -> bool {
    value.is_object() && value.get(CONFLICT_TAG).is_some()
}

/// Build a `$partial` marker node.
pub fn partial_marker(skipped: u64) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert(PARTIAL_TAG.to_string(), Value::Bool(true));
    obj.insert(SKIPPED_FIELD.to_string(), Value::from(skipped));
    Value::Object(obj)
}

/// The skipped-row count of a `$partial` marker, zero when malformed.
pub fn partial_skipped(node: &Value) -> u64 {
    node.get(SKIPPED_FIELD).and_then(Value::as_u64).unwrap_or(0)
}

/// Convert a table name to the lowerCamelCase key used in nested documents.
///
/// Handles `snake_case`, `kebab-case`, spaces, and `PascalCase`; a name
/// already in camelCase is unchanged.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut first_segment = true;
    for segment in name.split(|c| c == '_' || c == '-' || c == ' ') {
        if segment.is_empty() {
            continue;
        }
        let mut chars = segment.chars();
        let head = chars.next().unwrap();
        if first_segment {
            out.extend(head.to_lowercase());
            first_segment = false;
        } else {
            out.extend(head.to_uppercase());
        }
        out.push_str(chars.as_str());
    }
    out
}

/// Map from camelCase document key to table name, for every table in the
/// schema. On a (rare) collision the first table in schema order wins.
pub fn camel_key_map(schema: &Schema) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for table in schema.tables() {
        let key = camel_case(&table.name);
        if let Some(existing) = map.get(&key) {
            tracing::warn!(
                "tables {} and {} both map to document key '{}'; keeping {}",
                existing,
                table.name,
                key,
                existing
            );
        } else {
            map.insert(key, table.name.clone());
        }
    }
    map
}

/// Canonicalize a JSON value: objects get sorted keys, recursively.
///
/// Used for building primary-key index keys, where byte-stable serialization
/// matters and the key never round-trips into SQL.
pub fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical_value(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

/// Canonical serialization of a sequence of values, usable as an index key.
pub fn canonical_key(values: &[&Value]) -> String {
    let canon: Vec<Value> = values.iter().map(|v| canonical_value(v)).collect();
    serde_json::to_string(&canon).unwrap_or_default()
}

/// Canonical serialization of a row's primary-key values.
///
/// Returns `None` when any PK column is missing from the row (such rows
/// cannot be keyed and are skipped by the diff).
pub fn pk_key(table: &Table, row: &FlatRow) -> Option<String> {
    let mut values = Vec::with_capacity(table.primary_key.len());
    for col in &table.primary_key {
        values.push(row.get(col)?);
    }
    Some(canonical_key(&values))
}

/// Extract the primary-key columns of a row into a new map.
pub fn pk_of(table: &Table, row: &FlatRow) -> FlatRow {
    let mut pk = FlatRow::new();
    for col in &table.primary_key {
        if let Some(v) = row.get(col) {
            pk.insert(col.clone(), v.clone());
        }
    }
    pk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_fixtures::org_project_task;
    use serde_json::json;

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("Organization"), "organization");
        assert_eq!(camel_case("user_profile"), "userProfile");
        assert_eq!(camel_case("user-profile"), "userProfile");
        assert_eq!(camel_case("UserProfile"), "userProfile");
        assert_eq!(camel_case("users"), "users");
        assert_eq!(camel_case("already camel"), "alreadyCamel");
    }

    #[test]
    fn test_markers_require_literal_true() {
        assert!(is_partial_marker(&json!({"$partial": true, "skipped": 3})));
        assert!(!is_partial_marker(&json!({"$partial": 1})));
        assert!(!is_partial_marker(&json!({"skipped": 3})));
        assert!(is_ref_marker(&json!({"$ref": true, "id": "x"})));
        assert!(!is_ref_marker(&json!({"$ref": "#/definitions/x"})));
    }

    #[test]
    fn test_partial_marker_round_trip() {
        let marker = partial_marker(42);
        assert!(is_partial_marker(&marker));
        assert_eq!(partial_skipped(&marker), 42);
    }

    #[test]
    fn test_conflict_marker_detection() {
        assert!(is_conflict_marker(
            &json!({"$conflict": {"base": 1, "ours": 2, "theirs": 3}})
        ));
        assert!(!is_conflict_marker(&json!({"name": "x"})));
        assert!(!is_conflict_marker(&json!("scalar")));
    }

    #[test]
    fn test_canonical_key_sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_key(&[&a]), canonical_key(&[&b]));
    }

    #[test]
    fn test_pk_key_missing_column() {
        let schema = org_project_task();
        let table = schema.table("Organization").unwrap();

        let mut row = FlatRow::new();
        row.insert("name".to_string(), json!("Acme"));
        assert!(pk_key(table, &row).is_none());

        row.insert("id".to_string(), json!("o1"));
        assert_eq!(pk_key(table, &row), Some("[\"o1\"]".to_string()));
    }

    #[test]
    fn test_flat_dataset_rows_default_empty() {
        let mut data = FlatDataset::new();
        assert!(data.rows("missing").is_empty());
        data.ensure_table("Organization");
        assert!(data.contains_table("Organization"));
        assert_eq!(data.row_count(), 0);
    }

    #[test]
    fn test_mark_truncated_appends_marker() {
        let mut nested = NestedDataset::new();
        nested.roots.insert("organization".to_string(), vec![]);
        nested.mark_truncated("organization", "Organization", 5);
        assert_eq!(nested.truncated.get("Organization"), Some(&5));
        let seq = &nested.roots["organization"];
        assert_eq!(seq.len(), 1);
        assert!(is_partial_marker(&seq[0]));

        // zero-skip truncations are a no-op
        nested.mark_truncated("organization", "Organization", 0);
        assert_eq!(nested.roots["organization"].len(), 1);
    }

    #[test]
    fn test_camel_key_map_collision_first_wins() {
        use crate::schema::test_fixtures::{col, table};
        let schema = crate::schema::Schema::new(
            vec![
                table("user_profile", vec![col("id", "int4")], &["id"]),
                table("UserProfile", vec![col("id", "int4")], &["id"]),
            ],
            vec![],
        );
        let map = camel_key_map(&schema);
        assert_eq!(map.get("userProfile").unwrap(), "user_profile");
    }
}
