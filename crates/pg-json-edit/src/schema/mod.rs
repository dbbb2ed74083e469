//! Schema and metadata types for tables, columns, and foreign keys.
//!
//! These types are a snapshot of the database's structural metadata,
//! immutable after extraction. The ownership tree and everything downstream
//! is derived from them.

mod extract;

pub use extract::extract_schema;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Referential action attached to a foreign key (`ON DELETE` / `ON UPDATE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FkAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl FkAction {
    /// Map the single-character action code from `pg_constraint`
    /// (`confdeltype` / `confupdtype`) to the symbolic action.
    pub fn from_code(code: char) -> Self {
        match code {
            'c' => FkAction::Cascade,
            'n' => FkAction::SetNull,
            'd' => FkAction::SetDefault,
            'r' => FkAction::Restrict,
            _ => FkAction::NoAction,
        }
    }

    /// The SQL spelling of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
            FkAction::Restrict => "RESTRICT",
            FkAction::NoAction => "NO ACTION",
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Native type name (`udt_name`, e.g. "int4", "text", "timestamptz").
    pub data_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the server supplies a value when the column is omitted.
    pub has_default: bool,

    /// Whether the server always computes the value. Generated columns are
    /// never written by the emitter.
    pub is_generated: bool,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in ordinal position order.
    pub columns: Vec<Column>,

    /// Primary key column names in key position order. May be empty, which
    /// disables diff, nesting, and SQL emission for the table.
    pub primary_key: Vec<String>,
}

impl Table {
    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check whether a column participates in the primary key.
    pub fn is_pk_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|c| c == name)
    }

    /// Names of all declared columns, in ordinal order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Foreign key metadata.
///
/// A composite foreign key with k child columns maps to one relationship of
/// arity k; `from_columns[i]` pairs with `to_columns[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Constraint name, unique within the schema.
    pub id: String,

    /// Child-side table.
    pub from_table: String,

    /// Child-side column names, in constraint order.
    pub from_columns: Vec<String>,

    /// Parent-side table.
    pub to_table: String,

    /// Parent-side column names (a key of the parent, typically its PK).
    pub to_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: FkAction,

    /// ON UPDATE action.
    pub on_update: FkAction,
}

impl Relationship {
    /// Number of column pairs in the constraint.
    pub fn arity(&self) -> usize {
        self.from_columns.len()
    }

    /// Whether the constraint points back at its own table.
    pub fn is_self_referential(&self) -> bool {
        self.from_table == self.to_table
    }
}

/// A snapshot of the database's structural metadata. Immutable after
/// extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    tables: IndexMap<String, Table>,
    relationships: Vec<Relationship>,
}

impl Schema {
    /// Assemble a schema from parts. Table iteration order follows insertion
    /// order (extraction inserts alphabetically).
    pub fn new(tables: Vec<Table>, relationships: Vec<Relationship>) -> Self {
        let tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self {
            tables,
            relationships,
        }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Iterate tables in extraction order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Table names in extraction order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    /// All foreign-key relationships, in extraction order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Number of tables in the snapshot.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Hand-built schemas reused by tests across modules.

    use super::*;

    pub fn col(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: false,
            has_default: false,
            is_generated: false,
        }
    }

    pub fn nullable(name: &str, data_type: &str) -> Column {
        Column {
            is_nullable: true,
            ..col(name, data_type)
        }
    }

    pub fn table(name: &str, columns: Vec<Column>, pk: &[&str]) -> Table {
        Table {
            name: name.to_string(),
            columns,
            primary_key: pk.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn fk(
        id: &str,
        from_table: &str,
        from_columns: &[&str],
        to_table: &str,
        to_columns: &[&str],
        on_delete: FkAction,
    ) -> Relationship {
        Relationship {
            id: id.to_string(),
            from_table: from_table.to_string(),
            from_columns: from_columns.iter().map(|c| c.to_string()).collect(),
            to_table: to_table.to_string(),
            to_columns: to_columns.iter().map(|c| c.to_string()).collect(),
            on_delete,
            on_update: FkAction::NoAction,
        }
    }

    /// Organization -> Project -> Task, all cascade compositions.
    pub fn org_project_task() -> Schema {
        Schema::new(
            vec![
                table("Organization", vec![col("id", "text"), col("name", "text")], &["id"]),
                table(
                    "Project",
                    vec![col("id", "text"), col("name", "text"), col("organizationId", "text")],
                    &["id"],
                ),
                table(
                    "Task",
                    vec![col("id", "text"), col("title", "text"), col("projectId", "text")],
                    &["id"],
                ),
            ],
            vec![
                fk(
                    "Project_organizationId_fkey",
                    "Project",
                    &["organizationId"],
                    "Organization",
                    &["id"],
                    FkAction::Cascade,
                ),
                fk(
                    "Task_projectId_fkey",
                    "Task",
                    &["projectId"],
                    "Project",
                    &["id"],
                    FkAction::Cascade,
                ),
            ],
        )
    }
}
