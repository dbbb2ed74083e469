//! Schema extraction from the PostgreSQL catalogs.
//!
//! Reads ordinary base tables, their columns in ordinal order, primary keys
//! in key position order, and foreign keys with column pairing preserved by
//! ordinal. Any driver failure surfaces as `ExtractFailed`.

use serde_json::Value;
use tracing::{debug, info};

use super::{Column, FkAction, Relationship, Schema, Table};
use crate::driver::{ColumnKind, Driver, SqlParam};
use crate::error::{Result, SyncError};

const TABLES_QUERY: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema = $1
    ORDER BY table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        column_name,
        udt_name,
        is_nullable = 'YES',
        column_default IS NOT NULL OR COALESCE(identity_generation, '') = 'BY DEFAULT',
        is_generated = 'ALWAYS' OR COALESCE(identity_generation, '') = 'ALWAYS'
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT a.attname
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'p'
      AND a.attnum = ANY(c.conkey)
    ORDER BY array_position(c.conkey, a.attnum)
"#;

/// One row per FK column pair, ordered by constraint and ordinal, so
/// composite keys regroup losslessly in Rust.
const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname,
        t.relname AS from_table,
        a.attname AS from_column,
        rt.relname AS to_table,
        ra.attname AS to_column,
        c.confdeltype::text,
        c.confupdtype::text
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    CROSS JOIN LATERAL unnest(c.conkey, c.confkey)
        WITH ORDINALITY AS pairs(from_num, to_num, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = pairs.from_num
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = pairs.to_num
    WHERE n.nspname = $1
      AND rn.nspname = $1
      AND c.contype = 'f'
    ORDER BY t.relname, c.conname, pairs.ord
"#;

/// Extract the schema snapshot for one namespace (usually `public`).
pub async fn extract_schema(driver: &dyn Driver, namespace: &str) -> Result<Schema> {
    let ns = SqlParam::Text(namespace.to_string());

    let table_rows = driver
        .query(TABLES_QUERY, std::slice::from_ref(&ns), &[ColumnKind::Text])
        .await
        .map_err(extract_failed)?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in &table_rows {
        let name = text(&row[0], "table name")?;

        let column_rows = driver
            .query(
                COLUMNS_QUERY,
                &[ns.clone(), SqlParam::Text(name.clone())],
                &[
                    ColumnKind::Text,
                    ColumnKind::Text,
                    ColumnKind::Bool,
                    ColumnKind::Bool,
                    ColumnKind::Bool,
                ],
            )
            .await
            .map_err(extract_failed)?;
        let columns = parse_column_rows(&column_rows)?;

        let pk_rows = driver
            .query(
                PRIMARY_KEY_QUERY,
                &[ns.clone(), SqlParam::Text(name.clone())],
                &[ColumnKind::Text],
            )
            .await
            .map_err(extract_failed)?;
        let mut primary_key = Vec::with_capacity(pk_rows.len());
        for pk_row in &pk_rows {
            primary_key.push(text(&pk_row[0], "primary key column")?);
        }

        debug!(
            "table {}: {} columns, pk {:?}",
            name,
            columns.len(),
            primary_key
        );
        tables.push(Table {
            name,
            columns,
            primary_key,
        });
    }

    let fk_rows = driver
        .query(
            FOREIGN_KEYS_QUERY,
            std::slice::from_ref(&ns),
            &[ColumnKind::Text; 7],
        )
        .await
        .map_err(extract_failed)?;
    let relationships = parse_fk_rows(&fk_rows)?;

    info!(
        "Extracted {} tables and {} foreign keys from schema '{}'",
        tables.len(),
        relationships.len(),
        namespace
    );
    Ok(Schema::new(tables, relationships))
}

fn parse_column_rows(rows: &[Vec<Value>]) -> Result<Vec<Column>> {
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(Column {
            name: text(&row[0], "column name")?,
            data_type: text(&row[1], "column type")?,
            is_nullable: boolean(&row[2], "is_nullable")?,
            has_default: boolean(&row[3], "has_default")?,
            is_generated: boolean(&row[4], "is_generated")?,
        });
    }
    Ok(columns)
}

/// Regroup the per-column-pair FK rows into relationships. Rows arrive
/// sorted by (table, constraint, ordinal).
fn parse_fk_rows(rows: &[Vec<Value>]) -> Result<Vec<Relationship>> {
    let mut relationships: Vec<Relationship> = Vec::new();
    for row in rows {
        let id = text(&row[0], "constraint name")?;
        let from_table = text(&row[1], "child table")?;
        let from_column = text(&row[2], "child column")?;
        let to_table = text(&row[3], "parent table")?;
        let to_column = text(&row[4], "parent column")?;
        let on_delete = action(&row[5], "delete action")?;
        let on_update = action(&row[6], "update action")?;

        match relationships.last_mut() {
            Some(rel) if rel.id == id => {
                rel.from_columns.push(from_column);
                rel.to_columns.push(to_column);
            }
            _ => relationships.push(Relationship {
                id,
                from_table,
                from_columns: vec![from_column],
                to_table,
                to_columns: vec![to_column],
                on_delete,
                on_update,
            }),
        }
    }
    Ok(relationships)
}

fn extract_failed(err: SyncError) -> SyncError {
    SyncError::ExtractFailed(err.to_string())
}

fn text(value: &Value, what: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SyncError::ExtractFailed(format!("catalog returned non-text {}", what)))
}

fn boolean(value: &Value, what: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| SyncError::ExtractFailed(format!("catalog returned non-bool {}", what)))
}

fn action(value: &Value, what: &str) -> Result<FkAction> {
    let code = text(value, what)?;
    Ok(FkAction::from_code(code.chars().next().unwrap_or('a')))
}
