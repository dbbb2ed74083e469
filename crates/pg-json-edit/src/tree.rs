//! Ownership-tree construction.
//!
//! The schema's foreign keys form a directed graph; the nested document
//! needs a tree. Each relationship is classified as a *composition*
//! (cascading delete to a different table) or a *reference* (everything
//! else, self-referential FKs included). For every table with at least one
//! incoming composition, exactly one is selected as *dominant*; the dominant
//! edges form a spanning forest over the tables, and the forest's roots are
//! the top-level keys of the nested document. Non-dominant relationships
//! keep their FK columns inline in the row.

use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};
use crate::schema::{FkAction, Relationship, Schema};

/// How a relationship participates in the ownership design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Cascading delete to a different table; candidate for nesting.
    Composition,
    /// Kept inline as FK columns.
    Reference,
}

/// A relationship plus its classification.
#[derive(Debug, Clone)]
pub struct ClassifiedRelationship {
    pub relationship: Relationship,
    pub kind: RelationshipKind,
    /// True for the one composition per child that forms a tree edge.
    pub dominant: bool,
}

/// A dominant edge of the ownership forest.
#[derive(Debug, Clone)]
pub struct OwnershipEdge {
    pub parent_table: String,
    pub child_table: String,
    /// The underlying foreign key.
    pub relationship: Relationship,
    /// FK column list on the child (copy of `from_columns`).
    pub foreign_key_columns: Vec<String>,
}

impl OwnershipEdge {
    fn from_relationship(rel: &Relationship) -> Self {
        Self {
            parent_table: rel.to_table.clone(),
            child_table: rel.from_table.clone(),
            foreign_key_columns: rel.from_columns.clone(),
            relationship: rel.clone(),
        }
    }
}

/// The ownership forest derived from a schema. Immutable once built.
#[derive(Debug, Clone)]
pub struct OwnershipTree {
    roots: Vec<String>,
    children: IndexMap<String, Vec<OwnershipEdge>>,
    dominant_parent: IndexMap<String, OwnershipEdge>,
    classified: Vec<ClassifiedRelationship>,
}

impl OwnershipTree {
    /// Build the ownership tree. Pure function of the schema; deterministic.
    ///
    /// Dominance tie-break per child: lower FK arity first, then
    /// alphabetically earlier parent table, then constraint name. A
    /// candidate whose selection would close a cycle through already chosen
    /// dominant edges is passed over for the next-preferred one; if every
    /// candidate closes a cycle the build fails with `CyclicOwnership`.
    pub fn build(schema: &Schema) -> Result<Self> {
        let classified: Vec<ClassifiedRelationship> = schema
            .relationships()
            .iter()
            .map(|rel| ClassifiedRelationship {
                kind: classify(rel),
                dominant: false,
                relationship: rel.clone(),
            })
            .collect();

        // Candidate compositions per child, sorted by the tie-break order.
        // BTreeMap keys give the alphabetical child resolution order.
        let mut candidates: BTreeMap<&str, Vec<&Relationship>> = BTreeMap::new();
        for entry in &classified {
            if entry.kind == RelationshipKind::Composition {
                candidates
                    .entry(entry.relationship.from_table.as_str())
                    .or_default()
                    .push(&entry.relationship);
            }
        }
        for list in candidates.values_mut() {
            list.sort_by(|a, b| {
                a.arity()
                    .cmp(&b.arity())
                    .then_with(|| a.to_table.cmp(&b.to_table))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        let mut dominant_parent: IndexMap<String, OwnershipEdge> = IndexMap::new();
        for (child, list) in &candidates {
            let chosen = list
                .iter()
                .find(|rel| !closes_cycle(child, &rel.to_table, &dominant_parent))
                .ok_or_else(|| SyncError::CyclicOwnership(child.to_string()))?;
            dominant_parent.insert(child.to_string(), OwnershipEdge::from_relationship(chosen));
        }

        let classified = classified
            .into_iter()
            .map(|mut entry| {
                entry.dominant = dominant_parent
                    .get(&entry.relationship.from_table)
                    .is_some_and(|e| e.relationship.id == entry.relationship.id);
                entry
            })
            .collect();

        let mut roots: Vec<String> = schema
            .table_names()
            .filter(|t| !dominant_parent.contains_key(*t))
            .map(|t| t.to_string())
            .collect();
        roots.sort();

        // Per-parent child edges, sorted by child table for reproducible
        // nesting order.
        let mut children: IndexMap<String, Vec<OwnershipEdge>> = IndexMap::new();
        for edge in dominant_parent.values() {
            children
                .entry(edge.parent_table.clone())
                .or_default()
                .push(edge.clone());
        }
        for edges in children.values_mut() {
            edges.sort_by(|a, b| a.child_table.cmp(&b.child_table));
        }

        Ok(Self {
            roots,
            children,
            dominant_parent,
            classified,
        })
    }

    /// Root tables (no dominant parent), alphabetical.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Whether a table is a root.
    pub fn is_root(&self, table: &str) -> bool {
        !self.dominant_parent.contains_key(table)
    }

    /// Dominant child edges of a table, ordered by child name.
    pub fn children_of(&self, table: &str) -> &[OwnershipEdge] {
        self.children.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single dominant edge into a non-root table.
    pub fn dominant_parent_of(&self, table: &str) -> Option<&OwnershipEdge> {
        self.dominant_parent.get(table)
    }

    /// Every relationship with its classification.
    pub fn relationships(&self) -> &[ClassifiedRelationship] {
        &self.classified
    }
}

/// A relationship is a composition iff it cascades deletes to a *different*
/// table. Self-referential FKs stay references regardless of action, so the
/// forest can never contain a length-one cycle.
fn classify(rel: &Relationship) -> RelationshipKind {
    if !rel.is_self_referential() && rel.on_delete == FkAction::Cascade {
        RelationshipKind::Composition
    } else {
        RelationshipKind::Reference
    }
}

/// Would `child -> parent` close a cycle through the dominant edges chosen
/// so far? Walks the chosen parent chain upward from `parent`.
fn closes_cycle(child: &str, parent: &str, chosen: &IndexMap<String, OwnershipEdge>) -> bool {
    let mut current = parent;
    loop {
        if current == child {
            return true;
        }
        match chosen.get(current) {
            Some(edge) => current = &edge.parent_table,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_fixtures::{col, fk, nullable, org_project_task, table};
    use crate::schema::FkAction;

    #[test]
    fn test_cascade_chain_forms_tree() {
        let schema = org_project_task();
        let tree = OwnershipTree::build(&schema).unwrap();

        assert_eq!(tree.roots(), &["Organization".to_string()]);
        assert_eq!(tree.children_of("Organization").len(), 1);
        assert_eq!(tree.children_of("Organization")[0].child_table, "Project");
        assert_eq!(tree.children_of("Project")[0].child_table, "Task");
        assert!(tree.children_of("Task").is_empty());

        let edge = tree.dominant_parent_of("Task").unwrap();
        assert_eq!(edge.parent_table, "Project");
        assert_eq!(edge.foreign_key_columns, vec!["projectId".to_string()]);
    }

    #[test]
    fn test_self_reference_stays_reference() {
        let schema = Schema::new(
            vec![table(
                "Category",
                vec![col("id", "text"), nullable("parentId", "text")],
                &["id"],
            )],
            vec![fk(
                "Category_parentId_fkey",
                "Category",
                &["parentId"],
                "Category",
                &["id"],
                FkAction::Cascade,
            )],
        );
        let tree = OwnershipTree::build(&schema).unwrap();

        assert_eq!(tree.roots(), &["Category".to_string()]);
        assert!(tree.children_of("Category").is_empty());
        assert_eq!(tree.relationships()[0].kind, RelationshipKind::Reference);
        assert!(!tree.relationships()[0].dominant);
    }

    #[test]
    fn test_multi_parent_alphabetical_tie_break() {
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
                fk(
                    "Membership_userId_fkey",
                    "Membership",
                    &["userId"],
                    "User",
                    &["id"],
                    FkAction::Cascade,
                ),
                fk(
                    "Membership_projectId_fkey",
                    "Membership",
                    &["projectId"],
                    "Project",
                    &["id"],
                    FkAction::Cascade,
                ),
            ],
        );
        let tree = OwnershipTree::build(&schema).unwrap();

        let edge = tree.dominant_parent_of("Membership").unwrap();
        assert_eq!(edge.parent_table, "Project");

        // The losing composition keeps its classification but no edge.
        let user_rel = tree
            .relationships()
            .iter()
            .find(|r| r.relationship.to_table == "User")
            .unwrap();
        assert_eq!(user_rel.kind, RelationshipKind::Composition);
        assert!(!user_rel.dominant);
        assert!(tree.children_of("User").is_empty());
    }

    #[test]
    fn test_lower_arity_wins_over_alphabetical() {
        let schema = Schema::new(
            vec![
                table("Alpha", vec![col("a", "text"), col("b", "text")], &["a", "b"]),
                table("Beta", vec![col("id", "text")], &["id"]),
                table(
                    "Child",
                    vec![
                        col("id", "text"),
                        col("alphaA", "text"),
                        col("alphaB", "text"),
                        col("betaId", "text"),
                    ],
                    &["id"],
                ),
            ],
            vec![
                fk(
                    "Child_alpha_fkey",
                    "Child",
                    &["alphaA", "alphaB"],
                    "Alpha",
                    &["a", "b"],
                    FkAction::Cascade,
                ),
                fk(
                    "Child_betaId_fkey",
                    "Child",
                    &["betaId"],
                    "Beta",
                    &["id"],
                    FkAction::Cascade,
                ),
            ],
        );
        let tree = OwnershipTree::build(&schema).unwrap();
        assert_eq!(tree.dominant_parent_of("Child").unwrap().parent_table, "Beta");
    }

    #[test]
    fn test_mutual_cascade_fails_cyclic() {
        let schema = Schema::new(
            vec![
                table("A", vec![col("id", "text"), col("bId", "text")], &["id"]),
                table("B", vec![col("id", "text"), col("aId", "text")], &["id"]),
            ],
            vec![
                fk("A_bId_fkey", "A", &["bId"], "B", &["id"], FkAction::Cascade),
                fk("B_aId_fkey", "B", &["aId"], "A", &["id"], FkAction::Cascade),
            ],
        );
        let err = OwnershipTree::build(&schema).unwrap_err();
        assert!(matches!(err, SyncError::CyclicOwnership(_)));
    }

    #[test]
    fn test_cycle_avoided_by_next_candidate() {
        // B's preferred parent is A (alphabetical), but A is B's dominant
        // child via C, so B must fall back to D.
        let schema = Schema::new(
            vec![
                table("A", vec![col("id", "text"), col("bId", "text")], &["id"]),
                table("B", vec![col("id", "text"), col("aId", "text"), col("dId", "text")], &["id"]),
                table("D", vec![col("id", "text")], &["id"]),
            ],
            vec![
                fk("A_bId_fkey", "A", &["bId"], "B", &["id"], FkAction::Cascade),
                fk("B_aId_fkey", "B", &["aId"], "A", &["id"], FkAction::Cascade),
                fk("B_dId_fkey", "B", &["dId"], "D", &["id"], FkAction::Cascade),
            ],
        );
        let tree = OwnershipTree::build(&schema).unwrap();
        // A resolved first (alphabetical): dominant parent B. B then cannot
        // choose A and falls back to D.
        assert_eq!(tree.dominant_parent_of("A").unwrap().parent_table, "B");
        assert_eq!(tree.dominant_parent_of("B").unwrap().parent_table, "D");
        assert_eq!(tree.roots(), &["D".to_string()]);
    }

    #[test]
    fn test_restrict_fk_is_reference() {
        let schema = Schema::new(
            vec![
                table("User", vec![col("id", "text")], &["id"]),
                table("Post", vec![col("id", "text"), col("authorId", "text")], &["id"]),
            ],
            vec![fk(
                "Post_authorId_fkey",
                "Post",
                &["authorId"],
                "User",
                &["id"],
                FkAction::Restrict,
            )],
        );
        let tree = OwnershipTree::build(&schema).unwrap();
        assert_eq!(tree.roots(), &["Post".to_string(), "User".to_string()]);
        assert_eq!(tree.relationships()[0].kind, RelationshipKind::Reference);
    }
}
