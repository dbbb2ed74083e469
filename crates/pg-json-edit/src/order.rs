//! FK-safe ordering of a change set.
//!
//! Tables are sorted parents-first by a depth-first topological sort of the
//! FK dependency graph. Deletes then run child-first (reverse), inserts
//! parent-first, and updates keep their input order: within a transaction a
//! column update cannot violate a FK that the deletes and inserts respect.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::diff::{Change, ChangeSet};
use crate::schema::Schema;

/// Parents-first table order. Deterministic: tables and their dependencies
/// are visited alphabetically; self-referential and back edges (cycles) are
/// skipped, leaving the affected tables at a stable position.
pub fn topo_order(schema: &Schema) -> Vec<String> {
    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for name in schema.table_names() {
        deps.entry(name).or_default();
    }
    for rel in schema.relationships() {
        if rel.is_self_referential() {
            continue;
        }
        // from_table depends on to_table existing first.
        if deps.contains_key(rel.to_table.as_str()) {
            deps.entry(rel.from_table.as_str())
                .or_default()
                .insert(rel.to_table.as_str());
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        table: &'a str,
        deps: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        out: &mut Vec<String>,
    ) {
        match marks.get(table) {
            Some(Mark::Done) => return,
            // Back edge: part of a FK cycle, settled by the outer loop.
            Some(Mark::Visiting) => return,
            None => {}
        }
        marks.insert(table, Mark::Visiting);
        if let Some(parents) = deps.get(table) {
            for parent in parents {
                visit(parent, deps, marks, out);
            }
        }
        marks.insert(table, Mark::Done);
        out.push(table.to_string());
    }

    let mut marks = HashMap::new();
    let mut out = Vec::with_capacity(deps.len());
    for table in deps.keys() {
        visit(table, &deps, &mut marks, &mut out);
    }
    out
}

/// Reorder a change set so that executing it statement by statement never
/// violates a foreign key: all deletes (child tables first), then updates
/// (input order), then inserts (parent tables first).
pub fn order_changes(schema: &Schema, changes: ChangeSet) -> ChangeSet {
    let order = topo_order(schema);
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let pos = |table: &str| position.get(table).copied().unwrap_or(usize::MAX);

    let mut deletes = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();
    for change in changes {
        match change {
            Change::Delete { .. } => deletes.push(change),
            Change::Update { .. } => updates.push(change),
            Change::Insert { .. } => inserts.push(change),
        }
    }

    // Stable sorts keep row order inside each table.
    deletes.sort_by_key(|c| std::cmp::Reverse(pos(c.table())));
    inserts.sort_by_key(|c| pos(c.table()));

    let mut out = deletes;
    out.append(&mut updates);
    out.append(&mut inserts);
    out
}
