//! Database driver abstraction.
//!
//! The rest of the library depends on a deliberately narrow capability set:
//! run a parameterized query and decode the result rows into JSON values,
//! run a parameterized statement, and run a bare batch (transaction
//! control). Anything that satisfies [`Driver`] works - the live
//! PostgreSQL client here, or a test double.

mod params;
mod postgres;

pub use params::SqlParam;
pub use postgres::PgDriver;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Decode strategy for a result column, derived from the column's native
/// type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Uuid,
    Text,
    Bytea,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Json,
}

impl ColumnKind {
    /// Map a PostgreSQL `udt_name` (or spelled-out type) to a decode kind.
    /// Unknown types decode as text.
    pub fn from_type_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "bool" | "boolean" => ColumnKind::Bool,
            "int2" | "smallint" => ColumnKind::Int2,
            "int4" | "integer" | "int" => ColumnKind::Int4,
            "int8" | "bigint" => ColumnKind::Int8,
            "float4" | "real" => ColumnKind::Float4,
            "float8" | "double precision" => ColumnKind::Float8,
            "numeric" | "decimal" => ColumnKind::Numeric,
            "uuid" => ColumnKind::Uuid,
            "bytea" => ColumnKind::Bytea,
            "timestamp" | "timestamp without time zone" => ColumnKind::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnKind::TimestampTz,
            "date" => ColumnKind::Date,
            "time" | "time without time zone" => ColumnKind::Time,
            "json" | "jsonb" => ColumnKind::Json,
            _ => ColumnKind::Text,
        }
    }
}

/// The narrow database capability the core depends on.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Run a query and decode each row per `kinds` (one entry per selected
    /// column, in order).
    async fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        kinds: &[ColumnKind],
    ) -> Result<Vec<Vec<Value>>>;

    /// Run a statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64>;

    /// Run statements with no parameters or results (BEGIN, COMMIT, SET).
    async fn batch(&self, sql: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_from_type_name() {
        assert_eq!(ColumnKind::from_type_name("int4"), ColumnKind::Int4);
        assert_eq!(ColumnKind::from_type_name("BIGINT"), ColumnKind::Int8);
        assert_eq!(ColumnKind::from_type_name("timestamptz"), ColumnKind::TimestampTz);
        assert_eq!(ColumnKind::from_type_name("jsonb"), ColumnKind::Json);
        assert_eq!(ColumnKind::from_type_name("varchar"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_type_name("my_enum"), ColumnKind::Text);
    }
}
