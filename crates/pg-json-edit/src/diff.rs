//! Minimum change set between two flat datasets.
//!
//! Rows are keyed by the canonical serialization of their primary-key
//! values; the key never round-trips into SQL, so it needs no escaping.
//! Tables without a primary key cannot be keyed and are skipped.

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::dataset::{pk_key, pk_of, FlatDataset, FlatRow};
use crate::schema::{Schema, Table};

/// One mutation against a single table.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Row to create. Omitted columns defer to the server default.
    Insert { table: String, row: FlatRow },

    /// Row to modify. `old_values` and `new_values` carry exactly the set
    /// of changed non-PK columns.
    Update {
        table: String,
        primary_key: FlatRow,
        old_values: FlatRow,
        new_values: FlatRow,
    },

    /// Row to remove. `old_row` is the full pre-image.
    Delete {
        table: String,
        primary_key: FlatRow,
        old_row: FlatRow,
    },
}

impl Change {
    /// The table this change applies to.
    pub fn table(&self) -> &str {
        match self {
            Change::Insert { table, .. } => table,
            Change::Update { table, .. } => table,
            Change::Delete { table, .. } => table,
        }
    }
}

/// An unordered-then-ordered batch of changes.
pub type ChangeSet = Vec<Change>;

/// Compute the minimum change set turning `base` into `modified`.
///
/// Pure function; output order is schema table order then row order, but
/// callers must run it through the orderer before emission.
pub fn diff(schema: &Schema, base: &FlatDataset, modified: &FlatDataset) -> ChangeSet {
    let mut changes = ChangeSet::new();

    for table in schema.tables() {
        if !base.contains_table(&table.name) && !modified.contains_table(&table.name) {
            continue;
        }
        if !table.has_pk() {
            if !base.rows(&table.name).is_empty() || !modified.rows(&table.name).is_empty() {
                warn!("skipping diff for {}: no primary key to match rows on", table.name);
            }
            continue;
        }
        diff_table(table, base.rows(&table.name), modified.rows(&table.name), &mut changes);
    }

    changes
}

fn diff_table(table: &Table, base: &[FlatRow], modified: &[FlatRow], out: &mut ChangeSet) {
    let base_index = index_rows(table, base);
    let modified_index = index_rows(table, modified);

    // Updates and inserts, in modified order.
    for (key, new_row) in &modified_index {
        match base_index.get(key) {
            Some(old_row) => {
                if let Some((old_values, new_values)) = changed_columns(table, old_row, new_row) {
                    out.push(Change::Update {
                        table: table.name.clone(),
                        primary_key: pk_of(table, new_row),
                        old_values,
                        new_values,
                    });
                }
            }
            None => out.push(Change::Insert {
                table: table.name.clone(),
                row: insertable_row(table, new_row),
            }),
        }
    }

    // Deletes, in base order.
    for (key, old_row) in &base_index {
        if !modified_index.contains_key(key) {
            out.push(Change::Delete {
                table: table.name.clone(),
                primary_key: pk_of(table, old_row),
                old_row: (*old_row).clone(),
            });
        }
    }
}

fn index_rows<'a>(table: &Table, rows: &'a [FlatRow]) -> IndexMap<String, &'a FlatRow> {
    let mut index = IndexMap::with_capacity(rows.len());
    for row in rows {
        let Some(key) = pk_key(table, row) else {
            warn!("skipping a {} row with an incomplete primary key", table.name);
            continue;
        };
        if index.insert(key, row).is_some() {
            warn!("duplicate primary key in {}; keeping the later row", table.name);
        }
    }
    index
}

/// The changed non-PK columns between two versions of a row, or `None` when
/// the rows are equal. Compares the union of columns present on either
/// side, treating absence as null; generated columns are never reported.
fn changed_columns(table: &Table, old: &FlatRow, new: &FlatRow) -> Option<(FlatRow, FlatRow)> {
    let mut old_values = FlatRow::new();
    let mut new_values = FlatRow::new();

    let mut columns: Vec<&String> = new.keys().collect();
    for col in old.keys() {
        if !new.contains_key(col) {
            columns.push(col);
        }
    }

    for col in columns {
        if table.is_pk_column(col) {
            continue;
        }
        match table.column(col) {
            Some(c) if c.is_generated => continue,
            Some(_) => {}
            None => continue,
        }
        let old_value = old.get(col).cloned().unwrap_or(Value::Null);
        let new_value = new.get(col).cloned().unwrap_or(Value::Null);
        if !values_equal(&old_value, &new_value) {
            old_values.insert(col.clone(), old_value);
            new_values.insert(col.clone(), new_value);
        }
    }

    if new_values.is_empty() {
        None
    } else {
        Some((old_values, new_values))
    }
}

/// Strip columns that must never be written (generated) and columns not
/// declared by the table, keeping everything else for the INSERT.
fn insertable_row(table: &Table, row: &FlatRow) -> FlatRow {
    row.iter()
        .filter(|(col, _)| matches!(table.column(col), Some(c) if !c.is_generated))
        .map(|(col, value)| (col.clone(), value.clone()))
        .collect()
}

/// Scalar equality with instant-aware date-time comparison.
///
/// Nulls equal nulls; two strings that both parse as ISO-8601 date-times
/// compare as instants (so `+00:00` and `Z` spellings agree); structured
/// JSON compares structurally with key order ignored; everything else is
/// strict.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Value::String(sa), Value::String(sb)) = (a, b) {
        if let (Ok(da), Ok(db)) = (
            DateTime::parse_from_rfc3339(sa),
            DateTime::parse_from_rfc3339(sb),
        ) {
            return da == db;
        }
        if let (Ok(da), Ok(db)) = (parse_naive(sa), parse_naive(sb)) {
            return da == db;
        }
    }
    // serde_json object equality is key-order-insensitive, which is exactly
    // the canonical structural comparison for json/jsonb cells.
    a == b
}

fn parse_naive(s: &str) -> chrono::format::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
}
