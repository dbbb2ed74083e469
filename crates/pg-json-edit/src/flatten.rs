//! Flattener: nested document tree back to the canonical flat dataset.
//!
//! The inverse of the nester. FK columns that were omitted from nested rows
//! are restored from the parent context; `$ref` markers become minimal
//! PK-plus-FK rows; any `$partial` marker aborts the whole conversion, since
//! a truncated document cannot be diffed safely.

use serde_json::Value;
use tracing::warn;

use crate::dataset::{
    camel_case, camel_key_map, is_conflict_marker, is_partial_marker, is_ref_marker, FlatDataset,
    FlatRow, NestedDataset, PARTIAL_TAG, REF_TAG,
};
use crate::error::{Result, SyncError};
use crate::schema::{Schema, Table};
use crate::tree::{OwnershipEdge, OwnershipTree};

/// Convert a nested dataset back to flat form.
///
/// Every table in the schema gets an entry (possibly empty) so the diff
/// sees tables the document no longer mentions. Fails with `TruncatedInput`
/// on any `$partial` marker, `UnknownTable` on a key that resolves to no
/// table or nesting edge, and `ConflictDetected` on a `$conflict` cell.
pub fn flatten(
    nested: &NestedDataset,
    schema: &Schema,
    tree: &OwnershipTree,
) -> Result<FlatDataset> {
    let mut data = FlatDataset::new();
    for name in schema.table_names() {
        data.ensure_table(name);
    }

    let key_map = camel_key_map(schema);

    for (key, nodes) in &nested.roots {
        let table_name = key_map
            .get(key)
            .ok_or_else(|| SyncError::UnknownTable(key.clone()))?;
        let table = schema
            .table(table_name)
            .expect("camel key map only contains schema tables");
        for node in nodes {
            walk_node(node, table, None, schema, tree, &mut data)?;
        }
    }

    Ok(data)
}

/// Parent context for FK restoration: the edge that introduced the child,
/// and the parent's already-flattened row.
struct ParentCtx<'a> {
    edge: &'a OwnershipEdge,
    parent_row: &'a FlatRow,
}

fn walk_node(
    node: &Value,
    table: &Table,
    parent: Option<&ParentCtx<'_>>,
    schema: &Schema,
    tree: &OwnershipTree,
    data: &mut FlatDataset,
) -> Result<()> {
    if is_partial_marker(node) {
        return Err(SyncError::TruncatedInput(table.name.clone()));
    }

    let Some(obj) = node.as_object() else {
        return Err(SyncError::Parse {
            path: table.name.clone(),
            message: format!("expected a row object, found {}", type_name(node)),
        });
    };

    if is_ref_marker(node) {
        // Collapsed composition: only the PK survives in the document; the
        // subtree is declared to exist elsewhere.
        let mut flat = FlatRow::new();
        for col in &table.primary_key {
            if let Some(v) = obj.get(col) {
                flat.insert(col.clone(), v.clone());
            } else {
                return Err(SyncError::Parse {
                    path: table.name.clone(),
                    message: format!("$ref marker is missing primary key column {:?}", col),
                });
            }
        }
        if let Some(ctx) = parent {
            write_inherited_fk(&mut flat, ctx);
        }
        data.push_row(&table.name, flat);
        return Ok(());
    }

    // 1. Copy declared scalar columns.
    let mut flat = FlatRow::new();
    for (key, value) in obj {
        if key == REF_TAG || key == PARTIAL_TAG {
            continue;
        }
        if table.column(key).is_some() {
            if is_conflict_marker(value) {
                return Err(SyncError::ConflictDetected {
                    table: table.name.clone(),
                    column: key.clone(),
                });
            }
            flat.insert(key.clone(), value.clone());
        }
    }

    // 2. Restore FK columns from the nesting context. Parent context wins
    // over any inline value, preserving the tree's structure.
    if let Some(ctx) = parent {
        write_inherited_fk(&mut flat, ctx);
    }

    // 3. Append before recursing so children read the completed row.
    data.push_row(&table.name, flat);
    let parent_row = data.rows(&table.name).last().cloned().unwrap_or_default();

    // 4. Recurse over dominant child sequences; flag leftover keys.
    let child_edges = tree.children_of(&table.name);
    for (key, value) in obj {
        if key == REF_TAG || key == PARTIAL_TAG || table.column(key).is_some() {
            continue;
        }
        let edge = child_edges.iter().find(|e| camel_case(&e.child_table) == *key);
        match (edge, value) {
            (Some(edge), Value::Array(children)) => {
                let Some(child_table) = schema.table(&edge.child_table) else {
                    continue;
                };
                let ctx = ParentCtx {
                    edge,
                    parent_row: &parent_row,
                };
                for child in children {
                    walk_node(child, child_table, Some(&ctx), schema, tree, data)?;
                }
            }
            (Some(_), other) => {
                return Err(SyncError::Parse {
                    path: table.name.clone(),
                    message: format!(
                        "child key {:?} must hold an array, found {}",
                        key,
                        type_name(other)
                    ),
                });
            }
            (None, Value::Array(_)) => {
                return Err(SyncError::UnknownTable(format!(
                    "{} (under {})",
                    key, table.name
                )));
            }
            (None, _) => {
                warn!("ignoring unknown key {:?} in a {} row", key, table.name);
            }
        }
    }

    Ok(())
}

/// Fill the child's FK columns from the parent row, pairing columns by
/// constraint ordinal.
fn write_inherited_fk(flat: &mut FlatRow, ctx: &ParentCtx<'_>) {
    let rel = &ctx.edge.relationship;
    for (fk_col, parent_col) in rel.from_columns.iter().zip(&rel.to_columns) {
        let value = ctx
            .parent_row
            .get(parent_col)
            .cloned()
            .unwrap_or(Value::Null);
        flat.insert(fk_col.clone(), value);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
