//! User-facing document files.
//!
//! A document is a JSON object with optional `$schema` / `$base` metadata
//! keys and one key per table (flat layout, native table names) or per root
//! (nested layout, camelCase names). The base snapshot is always flat and
//! never truncated; it lives in a sibling `.db-editor/` directory together
//! with the JSON-schema companion, and the document references both by
//! relative path.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::dataset::{
    camel_case, is_conflict_marker, is_partial_marker, is_ref_marker, FlatDataset, FlatRow,
    NestedDataset,
};
use crate::error::{Result, SyncError};
use crate::schema::Schema;
use crate::tree::OwnershipTree;

/// Metadata key referencing the JSON-schema companion file.
pub const SCHEMA_KEY: &str = "$schema";

/// Metadata key referencing the base snapshot file.
pub const BASE_KEY: &str = "$base";

/// Directory (sibling to the document) holding base snapshots and schema
/// companions.
pub const COMPANION_DIR: &str = ".db-editor";

/// Which of the two layouts a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Flat,
    Nested,
}

/// A parsed document: metadata plus the raw table/root sequences.
#[derive(Debug, Clone)]
pub struct Document {
    pub schema_ref: Option<String>,
    pub base_ref: Option<String>,
    pub body: IndexMap<String, Vec<Value>>,
}

impl Document {
    /// Parse a document from JSON text. `origin` names the file in
    /// diagnostics.
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SyncError::parse(origin, &e))?;
        let Value::Object(map) = value else {
            return Err(SyncError::Parse {
                path: origin.to_string(),
                message: "document root must be a JSON object".to_string(),
            });
        };

        let mut doc = Document {
            schema_ref: None,
            base_ref: None,
            body: IndexMap::new(),
        };
        for (key, value) in map {
            match key.as_str() {
                SCHEMA_KEY | BASE_KEY => {
                    let Value::String(s) = value else {
                        return Err(SyncError::Parse {
                            path: origin.to_string(),
                            message: format!("{} must be a string path", key),
                        });
                    };
                    if key == SCHEMA_KEY {
                        doc.schema_ref = Some(s);
                    } else {
                        doc.base_ref = Some(s);
                    }
                }
                _ => {
                    let Value::Array(rows) = value else {
                        return Err(SyncError::Parse {
                            path: origin.to_string(),
                            message: format!("key {:?} must hold an array of rows", key),
                        });
                    };
                    doc.body.insert(key, rows);
                }
            }
        }
        Ok(doc)
    }

    /// Decide between flat and nested layout.
    ///
    /// A key that is not a native table name means nested; when every key
    /// is a table name the rows are inspected for camelCase child-sequence
    /// keys, which only the nested layout produces.
    pub fn detect_layout(&self, schema: &Schema, tree: &OwnershipTree) -> Layout {
        for key in self.body.keys() {
            if schema.table(key).is_none() {
                return Layout::Nested;
            }
        }
        for (key, rows) in &self.body {
            let child_keys: Vec<String> = tree
                .children_of(key)
                .iter()
                .map(|e| camel_case(&e.child_table))
                .collect();
            if child_keys.is_empty() {
                continue;
            }
            for row in rows {
                if let Value::Object(obj) = row {
                    if child_keys
                        .iter()
                        .any(|k| matches!(obj.get(k), Some(Value::Array(_))))
                    {
                        return Layout::Nested;
                    }
                }
            }
        }
        Layout::Flat
    }

    /// Interpret the body as flat layout. Initializes every schema table so
    /// removed table keys read as emptied tables.
    pub fn to_flat(&self, schema: &Schema) -> Result<FlatDataset> {
        let mut data = FlatDataset::new();
        for name in schema.table_names() {
            data.ensure_table(name);
        }

        for (key, rows) in &self.body {
            let table = schema
                .table(key)
                .ok_or_else(|| SyncError::UnknownTable(key.clone()))?;
            for node in rows {
                if is_partial_marker(node) {
                    return Err(SyncError::TruncatedInput(table.name.clone()));
                }
                if is_ref_marker(node) {
                    return Err(SyncError::Parse {
                        path: table.name.clone(),
                        message: "$ref markers are only valid in the nested layout".to_string(),
                    });
                }
                let Value::Object(obj) = node else {
                    return Err(SyncError::Parse {
                        path: table.name.clone(),
                        message: "rows must be JSON objects".to_string(),
                    });
                };

                let mut flat = FlatRow::with_capacity(obj.len());
                for (col, value) in obj {
                    if table.column(col).is_none() {
                        warn!("ignoring unknown column {:?} in a {} row", col, table.name);
                        continue;
                    }
                    if is_conflict_marker(value) {
                        return Err(SyncError::ConflictDetected {
                            table: table.name.clone(),
                            column: col.clone(),
                        });
                    }
                    flat.insert(col.clone(), value.clone());
                }
                data.push_row(&table.name, flat);
            }
        }
        Ok(data)
    }

    /// Interpret the body as nested layout.
    pub fn to_nested(&self) -> NestedDataset {
        NestedDataset {
            roots: self.body.clone(),
            truncated: IndexMap::new(),
        }
    }
}

/// Render a flat document with optional metadata references.
pub fn render_flat(
    data: &FlatDataset,
    schema_ref: Option<&str>,
    base_ref: Option<&str>,
) -> String {
    let mut map = serde_json::Map::new();
    insert_meta(&mut map, schema_ref, base_ref);
    for table in data.table_names() {
        let rows: Vec<Value> = data
            .rows(table)
            .iter()
            .map(|row| Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            .collect();
        map.insert(table.to_string(), Value::Array(rows));
    }
    pretty(Value::Object(map))
}

/// Render a nested document with optional metadata references.
pub fn render_nested(
    nested: &NestedDataset,
    schema_ref: Option<&str>,
    base_ref: Option<&str>,
) -> String {
    let mut map = serde_json::Map::new();
    insert_meta(&mut map, schema_ref, base_ref);
    for (key, nodes) in &nested.roots {
        map.insert(key.clone(), Value::Array(nodes.clone()));
    }
    pretty(Value::Object(map))
}

/// Render a base snapshot: plain flat layout, no metadata keys.
pub fn render_base(data: &FlatDataset) -> String {
    render_flat(data, None, None)
}

fn insert_meta(map: &mut serde_json::Map<String, Value>, schema_ref: Option<&str>, base_ref: Option<&str>) {
    if let Some(s) = schema_ref {
        map.insert(SCHEMA_KEY.to_string(), Value::String(s.to_string()));
    }
    if let Some(b) = base_ref {
        map.insert(BASE_KEY.to_string(), Value::String(b.to_string()));
    }
}

fn pretty(value: Value) -> String {
    let mut text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string());
    text.push('\n');
    text
}

/// Companion file locations for a document path.
#[derive(Debug, Clone)]
pub struct CompanionPaths {
    pub base_path: PathBuf,
    pub schema_path: PathBuf,
    /// Relative references embedded into the document.
    pub base_ref: String,
    pub schema_ref: String,
}

/// Derive the `.db-editor/` companion paths next to a document.
pub fn companion_paths(document: &Path) -> CompanionPaths {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dump".to_string());
    let dir = document.parent().unwrap_or_else(|| Path::new("."));

    let base_name = format!("{}.base.json", stem);
    let schema_name = format!("{}.schema.json", stem);
    CompanionPaths {
        base_path: dir.join(COMPANION_DIR).join(&base_name),
        schema_path: dir.join(COMPANION_DIR).join(&schema_name),
        base_ref: format!("{}/{}", COMPANION_DIR, base_name),
        schema_ref: format!("{}/{}", COMPANION_DIR, schema_name),
    }
}

/// Resolve a document-relative reference (e.g. the `$base` path).
pub fn resolve_ref(document: &Path, reference: &str) -> PathBuf {
    let referenced = Path::new(reference);
    if referenced.is_absolute() {
        referenced.to_path_buf()
    } else {
        document
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(referenced)
    }
}

/// Write a file atomically: temp file in the target directory, then rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
