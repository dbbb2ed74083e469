//! Row fetch from the live database.
//!
//! Reads every keyed table in primary-key order so dumps are stable across
//! runs. A row limit truncates per table and records how many rows were
//! skipped; the skipped counts become `$partial` markers in the written
//! document.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::{FlatDataset, FlatRow};
use crate::driver::{ColumnKind, Driver};
use crate::emit::quote_ident;
use crate::error::Result;
use crate::schema::{Schema, Table};

/// Fetch options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum rows per table; `None` fetches everything.
    pub limit: Option<u64>,
}

/// Fetch a flat dataset plus the per-table skipped-row counts when a limit
/// truncated the fetch.
pub async fn fetch_dataset(
    driver: &dyn Driver,
    schema: &Schema,
    options: &FetchOptions,
) -> Result<(FlatDataset, IndexMap<String, u64>)> {
    let mut data = FlatDataset::new();
    let mut truncated = IndexMap::new();

    for table in schema.tables() {
        if !table.has_pk() {
            warn!("skipping {}: no primary key to order or diff on", table.name);
            continue;
        }
        data.ensure_table(&table.name);

        let kinds: Vec<ColumnKind> = table
            .columns
            .iter()
            .map(|c| ColumnKind::from_type_name(&c.data_type))
            .collect();
        let sql = select_query(table, options.limit)?;
        let rows = driver.query(&sql, &[], &kinds).await?;
        let fetched = rows.len() as u64;

        for row in rows {
            let mut flat = FlatRow::with_capacity(table.columns.len());
            for (column, value) in table.columns.iter().zip(row) {
                flat.insert(column.name.clone(), value);
            }
            data.push_row(&table.name, flat);
        }

        // Only count the remainder when the limit actually bit.
        if let Some(limit) = options.limit {
            if fetched == limit {
                let total = count_rows(driver, table).await?;
                if total > limit {
                    truncated.insert(table.name.clone(), total - limit);
                }
            }
        }

        debug!("fetched {} rows from {}", fetched, table.name);
    }

    Ok((data, truncated))
}

fn select_query(table: &Table, limit: Option<u64>) -> Result<String> {
    let columns = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let order = table
        .primary_key
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns,
        quote_ident(&table.name)?,
        order
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok(sql)
}

async fn count_rows(driver: &dyn Driver, table: &Table) -> Result<u64> {
    let sql = format!("SELECT COUNT(*)::int8 FROM {}", quote_ident(&table.name)?);
    let rows = driver.query(&sql, &[], &[ColumnKind::Int8]).await?;
    Ok(rows
        .first()
        .and_then(|r| r.first())
        .and_then(Value::as_i64)
        .unwrap_or(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_fixtures::org_project_task;

    #[test]
    fn test_select_query_orders_by_pk() {
        let schema = org_project_task();
        let table = schema.table("Project").unwrap();
        let sql = select_query(table, None).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\", \"organizationId\" FROM \"Project\" ORDER BY \"id\""
        );
    }

    #[test]
    fn test_select_query_with_limit() {
        let schema = org_project_task();
        let table = schema.table("Organization").unwrap();
        let sql = select_query(table, Some(50)).unwrap();
        assert!(sql.ends_with("LIMIT 50"));
    }
}
