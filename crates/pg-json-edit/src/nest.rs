//! Nester: flat dataset to nested document tree.
//!
//! Rows of root tables become top-level sequences; rows of owned tables are
//! folded under their dominant parent, with the parent-pointing FK columns
//! omitted (they are implicit from nesting context). Rows whose dominant
//! parent cannot be located (FK is null, or the parent row is absent from
//! the dataset) are emitted at top level under their own table key with all
//! columns kept inline, so no row is ever dropped.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::dataset::{camel_case, canonical_key, FlatDataset, FlatRow, NestedDataset};
use crate::schema::{Schema, Table};
use crate::tree::OwnershipTree;

/// Truncation options for the nester.
#[derive(Debug, Clone, Default)]
pub struct NestOptions {
    /// Maximum rows per root-table sequence; excess becomes a `$partial`
    /// marker.
    pub limit: Option<usize>,

    /// Maximum rows per child sequence, applied identically at every depth.
    pub nested_limit: Option<usize>,
}

/// Convert a flat dataset into the nested document form.
///
/// Deterministic given a deterministic input: root order is the tree's root
/// order, children keep flat insertion order, and truncation boundaries are
/// positional.
pub fn nest(
    data: &FlatDataset,
    schema: &Schema,
    tree: &OwnershipTree,
    opts: &NestOptions,
) -> NestedDataset {
    let mut nester = Nester::new(data, schema, tree, opts);
    nester.run()
}

struct Nester<'a> {
    data: &'a FlatDataset,
    schema: &'a Schema,
    tree: &'a OwnershipTree,
    opts: &'a NestOptions,
    /// Per-table consumed flags; leftovers surface in the orphan pass.
    visited: HashMap<&'a str, Vec<bool>>,
    /// Relationship id -> canonical parent key -> child row indexes.
    edge_index: HashMap<&'a str, IndexMap<String, Vec<usize>>>,
    truncated: IndexMap<String, u64>,
}

impl<'a> Nester<'a> {
    fn new(
        data: &'a FlatDataset,
        schema: &'a Schema,
        tree: &'a OwnershipTree,
        opts: &'a NestOptions,
    ) -> Self {
        let mut visited = HashMap::new();
        for table in schema.tables() {
            visited.insert(table.name.as_str(), vec![false; data.rows(&table.name).len()]);
        }

        let mut edge_index: HashMap<&str, IndexMap<String, Vec<usize>>> = HashMap::new();
        for table in schema.tables() {
            for edge in tree.children_of(&table.name) {
                let mut index: IndexMap<String, Vec<usize>> = IndexMap::new();
                for (idx, row) in data.rows(&edge.child_table).iter().enumerate() {
                    if let Some(key) = fk_key(row, &edge.foreign_key_columns) {
                        index.entry(key).or_default().push(idx);
                    }
                }
                edge_index.insert(edge.relationship.id.as_str(), index);
            }
        }

        Self {
            data,
            schema,
            tree,
            opts,
            visited,
            edge_index,
            truncated: IndexMap::new(),
        }
    }

    fn run(&mut self) -> NestedDataset {
        let mut roots: IndexMap<String, Vec<Value>> = IndexMap::new();

        for root in self.tree.roots() {
            let table = match self.schema.table(root) {
                Some(t) => t,
                None => continue,
            };
            if !table.has_pk() {
                debug!("skipping {} in nested output: no primary key", root);
                continue;
            }

            let rows = self.data.rows(root);
            let emit = self.opts.limit.map_or(rows.len(), |l| l.min(rows.len()));
            let mut seq = Vec::with_capacity(emit);
            for idx in 0..emit {
                self.mark_visited(root, idx);
                seq.push(self.build_row(table, &rows[idx], None));
            }
            if rows.len() > emit {
                let skipped = (rows.len() - emit) as u64;
                seq.push(crate::dataset::partial_marker(skipped));
                *self.truncated.entry(root.clone()).or_insert(0) += skipped;
            }
            roots.insert(camel_case(root), seq);
        }

        self.emit_orphans(&mut roots);

        NestedDataset {
            roots,
            truncated: std::mem::take(&mut self.truncated),
        }
    }

    /// Top-level pass for rows no dominant parent claimed. They keep their
    /// FK columns inline, exactly like a root row.
    fn emit_orphans(&mut self, roots: &mut IndexMap<String, Vec<Value>>) {
        let tables: Vec<&Table> = self
            .schema
            .tables()
            .filter(|t| !self.tree.is_root(&t.name) && t.has_pk())
            .collect();
        for table in tables {
            let rows = self.data.rows(&table.name);
            for idx in 0..rows.len() {
                if self.visited[table.name.as_str()][idx] {
                    continue;
                }
                self.mark_visited(&table.name, idx);
                let node = self.build_row(table, &rows[idx], None);
                roots
                    .entry(camel_case(&table.name))
                    .or_default()
                    .push(node);
            }
        }
    }

    /// Materialize one nested row: scalar columns minus the omitted FK
    /// columns, then one camelCase key per dominant child edge.
    fn build_row(&mut self, table: &Table, row: &FlatRow, omit: Option<&[String]>) -> Value {
        let mut obj = serde_json::Map::new();
        for (col, value) in row {
            if omit.is_some_and(|cols| cols.contains(col)) {
                continue;
            }
            obj.insert(col.clone(), value.clone());
        }

        for edge in self.tree.children_of(&table.name) {
            let Some(child_table) = self.schema.table(&edge.child_table) else {
                continue;
            };
            let Some(parent_key) = fk_key(row, &edge.relationship.to_columns) else {
                continue;
            };
            let matches: Vec<usize> = self
                .edge_index
                .get(edge.relationship.id.as_str())
                .and_then(|index| index.get(&parent_key))
                .map(|idxs| {
                    idxs.iter()
                        .copied()
                        .filter(|&i| !self.visited[edge.child_table.as_str()][i])
                        .collect()
                })
                .unwrap_or_default();
            if matches.is_empty() {
                continue;
            }

            let child_rows = self.data.rows(&edge.child_table);
            let emit = self
                .opts
                .nested_limit
                .map_or(matches.len(), |l| l.min(matches.len()));

            // Everything matched is consumed here; skipped rows are
            // represented by the marker, never re-emitted as orphans.
            for &idx in &matches {
                self.mark_visited(&edge.child_table, idx);
            }

            let mut seq = Vec::with_capacity(emit);
            for &idx in matches.iter().take(emit) {
                seq.push(self.build_row(
                    child_table,
                    &child_rows[idx],
                    Some(&edge.foreign_key_columns),
                ));
            }
            if matches.len() > emit {
                let skipped = (matches.len() - emit) as u64;
                seq.push(crate::dataset::partial_marker(skipped));
                *self
                    .truncated
                    .entry(edge.child_table.clone())
                    .or_insert(0) += skipped;
            }
            obj.insert(camel_case(&edge.child_table), Value::Array(seq));
        }

        Value::Object(obj)
    }

    fn mark_visited(&mut self, table: &str, idx: usize) {
        if let Some(flags) = self.visited.get_mut(table) {
            flags[idx] = true;
        }
    }
}

/// Canonical key over a subset of a row's columns; `None` when any column
/// is missing or null (SQL NULL never matches a parent key).
fn fk_key(row: &FlatRow, columns: &[String]) -> Option<String> {
    let mut values = Vec::with_capacity(columns.len());
    for col in columns {
        let v = row.get(col)?;
        if v.is_null() {
            return None;
        }
        values.push(v);
    }
    Some(canonical_key(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::is_partial_marker;
    use crate::schema::test_fixtures::{col, fk, nullable, org_project_task, table};
    use crate::schema::{FkAction, Schema};
    use crate::tree::OwnershipTree;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> FlatRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn org_dataset() -> FlatDataset {
        let mut data = FlatDataset::new();
        data.push_row(
            "Organization",
            row(&[("id", json!("o1")), ("name", json!("Acme"))]),
        );
        data.push_row(
            "Project",
            row(&[
                ("id", json!("p1")),
                ("name", json!("Alpha")),
                ("organizationId", json!("o1")),
            ]),
        );
        data
    }

    #[test]
    fn test_cascade_nesting() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();
        let nested = nest(&org_dataset(), &schema, &tree, &NestOptions::default());

        let orgs = &nested.roots["organization"];
        assert_eq!(orgs.len(), 1);
        assert_eq!(
            orgs[0],
            json!({
                "id": "o1",
                "name": "Acme",
                "project": [{"id": "p1", "name": "Alpha"}]
            })
        );
        assert!(nested.truncated.is_empty());
    }

    #[test]
    fn test_fk_columns_omitted_from_nested_children() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();
        let nested = nest(&org_dataset(), &schema, &tree, &NestOptions::default());

        let project = &nested.roots["organization"][0]["project"][0];
        assert!(project.get("organizationId").is_none());
    }

    #[test]
    fn test_limit_appends_partial_marker() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();

        let mut data = FlatDataset::new();
        for i in 0..5 {
            data.push_row(
                "Organization",
                row(&[("id", json!(format!("o{i}"))), ("name", json!("x"))]),
            );
        }

        let opts = NestOptions {
            limit: Some(2),
            nested_limit: None,
        };
        let nested = nest(&data, &schema, &tree, &opts);
        let orgs = &nested.roots["organization"];
        assert_eq!(orgs.len(), 3);
        assert!(is_partial_marker(&orgs[2]));
        assert_eq!(orgs[2]["skipped"], json!(3));
        assert_eq!(nested.truncated.get("Organization"), Some(&3));
    }

    #[test]
    fn test_nested_limit_truncates_children_without_reemitting() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();

        let mut data = FlatDataset::new();
        data.push_row(
            "Organization",
            row(&[("id", json!("o1")), ("name", json!("Acme"))]),
        );
        for i in 0..4 {
            data.push_row(
                "Project",
                row(&[
                    ("id", json!(format!("p{i}"))),
                    ("name", json!("x")),
                    ("organizationId", json!("o1")),
                ]),
            );
        }

        let opts = NestOptions {
            limit: None,
            nested_limit: Some(2),
        };
        let nested = nest(&data, &schema, &tree, &opts);

        let projects = nested.roots["organization"][0]["project"].as_array().unwrap();
        assert_eq!(projects.len(), 3);
        assert!(is_partial_marker(&projects[2]));
        assert_eq!(nested.truncated.get("Project"), Some(&2));
        // Truncated children are consumed by the marker, not emitted as
        // top-level orphans.
        assert!(nested.roots.get("project").is_none());
    }

    #[test]
    fn test_null_fk_child_emitted_top_level_with_fk_inline() {
        let schema = Schema::new(
            vec![
                table("Organization", vec![col("id", "text"), col("name", "text")], &["id"]),
                table(
                    "Project",
                    vec![col("id", "text"), nullable("organizationId", "text")],
                    &["id"],
                ),
            ],
            vec![fk(
                "Project_organizationId_fkey",
                "Project",
                &["organizationId"],
                "Organization",
                &["id"],
                FkAction::Cascade,
            )],
        );
        let tree = OwnershipTree::build(&schema).unwrap();

        let mut data = FlatDataset::new();
        data.push_row(
            "Project",
            row(&[("id", json!("p9")), ("organizationId", Value::Null)]),
        );

        let nested = nest(&data, &schema, &tree, &NestOptions::default());
        let projects = &nested.roots["project"];
        assert_eq!(projects.len(), 1);
        // Orphans keep the FK column inline so the round-trip is lossless.
        assert_eq!(projects[0]["organizationId"], Value::Null);
    }

    #[test]
    fn test_membership_nests_under_project_keeps_user_reference() {
        let schema = Schema::new(
            vec![
                table("User", vec![col("id", "text")], &["id"]),
                table("Project", vec![col("id", "text")], &["id"]),
                table(
                    "Membership",
                    vec![col("id", "text"), col("userId", "text"), col("projectId", "text")],
                    &["id"],
                ),
            ],
            vec![
                fk("Membership_userId_fkey", "Membership", &["userId"], "User", &["id"], FkAction::Cascade),
                fk("Membership_projectId_fkey", "Membership", &["projectId"], "Project", &["id"], FkAction::Cascade),
            ],
        );
        let tree = OwnershipTree::build(&schema).unwrap();

        let mut data = FlatDataset::new();
        data.push_row("User", row(&[("id", json!("u1"))]));
        data.push_row("Project", row(&[("id", json!("p1"))]));
        data.push_row(
            "Membership",
            row(&[("id", json!("m1")), ("userId", json!("u1")), ("projectId", json!("p1"))]),
        );

        let nested = nest(&data, &schema, &tree, &NestOptions::default());
        let membership = &nested.roots["project"][0]["membership"][0];
        assert_eq!(membership["userId"], json!("u1"));
        assert!(membership.get("projectId").is_none());
        assert!(nested.roots["user"][0].get("membership").is_none());
    }

    #[test]
    fn test_deterministic_output() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();
        let data = org_dataset();

        let a = nest(&data, &schema, &tree, &NestOptions::default());
        let b = nest(&data, &schema, &tree, &NestOptions::default());
        let a_text = serde_json::to_string(&Value::Object(
            a.roots.iter().map(|(k, v)| (k.clone(), Value::Array(v.clone()))).collect(),
        ))
        .unwrap();
        let b_text = serde_json::to_string(&Value::Object(
            b.roots.iter().map(|(k, v)| (k.clone(), Value::Array(v.clone()))).collect(),
        ))
        .unwrap();
        assert_eq!(a_text, b_text);
    }
}
