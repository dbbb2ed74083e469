//! SQL rendering.
//!
//! Identifiers cannot be passed as statement parameters, so they are
//! validated and quoted here - doubling embedded double quotes is the sole
//! escaping mechanism, and identifiers never interpolate user-controlled
//! data directly. Values travel exclusively as positional `$n` parameters.

use crate::dataset::is_conflict_marker;
use crate::diff::Change;
use crate::driver::SqlParam;
use crate::error::{Result, SyncError};

/// Maximum identifier length. PostgreSQL truncates identifiers at 63 bytes;
/// anything longer in a document is suspicious.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// One renderable statement: SQL text plus its positional parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Render an ordered change set into statements, one per change.
pub fn emit(changes: &[Change]) -> Result<Vec<Statement>> {
    changes.iter().map(emit_change).collect()
}

fn emit_change(change: &Change) -> Result<Statement> {
    match change {
        Change::Insert { table, row } => {
            let mut columns = Vec::with_capacity(row.len());
            let mut placeholders = Vec::with_capacity(row.len());
            let mut params = Vec::with_capacity(row.len());
            for (idx, (col, value)) in row.iter().enumerate() {
                reject_conflict(table, col, value)?;
                columns.push(quote_ident(col)?);
                placeholders.push(format!("${}", idx + 1));
                params.push(SqlParam::from_value(value));
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table)?,
                columns.join(", "),
                placeholders.join(", ")
            );
            Ok(Statement { sql, params })
        }
        Change::Update {
            table,
            primary_key,
            new_values,
            ..
        } => {
            let mut assignments = Vec::with_capacity(new_values.len());
            let mut params = Vec::with_capacity(new_values.len() + primary_key.len());
            let mut idx = 0;
            for (col, value) in new_values {
                reject_conflict(table, col, value)?;
                idx += 1;
                assignments.push(format!("{} = ${}", quote_ident(col)?, idx));
                params.push(SqlParam::from_value(value));
            }
            let mut conditions = Vec::with_capacity(primary_key.len());
            for (col, value) in primary_key {
                idx += 1;
                conditions.push(format!("{} = ${}", quote_ident(col)?, idx));
                params.push(SqlParam::from_value(value));
            }
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                quote_ident(table)?,
                assignments.join(", "),
                conditions.join(" AND ")
            );
            Ok(Statement { sql, params })
        }
        Change::Delete {
            table, primary_key, ..
        } => {
            let mut conditions = Vec::with_capacity(primary_key.len());
            let mut params = Vec::with_capacity(primary_key.len());
            for (idx, (col, value)) in primary_key.iter().enumerate() {
                conditions.push(format!("{} = ${}", quote_ident(col)?, idx + 1));
                params.push(SqlParam::from_value(value));
            }
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                quote_ident(table)?,
                conditions.join(" AND ")
            );
            Ok(Statement { sql, params })
        }
    }
}

/// The emitter is the last line of defense against syncing an unresolved
/// merge conflict into the database.
fn reject_conflict(table: &str, column: &str, value: &serde_json::Value) -> Result<()> {
    if is_conflict_marker(value) {
        return Err(SyncError::ConflictDetected {
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FlatRow;
    use serde_json::{json, Value};

    fn row(pairs: &[(&str, Value)]) -> FlatRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("User").unwrap(), "\"User\"");
        assert_eq!(quote_ident("table\"name").unwrap(), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_ident_injection_safely_quoted() {
        let quoted = quote_ident("Robert'); DROP TABLE Students;--").unwrap();
        assert_eq!(quoted, "\"Robert'); DROP TABLE Students;--\"");
    }

    #[test]
    fn test_validate_identifier_rejections() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("table\0name").is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_emit_update_set_params_before_where_params() {
        let change = Change::Update {
            table: "User".to_string(),
            primary_key: row(&[("id", json!("u1"))]),
            old_values: row(&[("name", json!("Alice")), ("email", json!("old@example.com"))]),
            new_values: row(&[
                ("name", json!("Alice Updated")),
                ("email", json!("new@example.com")),
            ]),
        };

        let statements = emit(&[change]).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            "UPDATE \"User\" SET \"name\" = $1, \"email\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(
            statements[0].params,
            vec![
                SqlParam::Text("Alice Updated".to_string()),
                SqlParam::Text("new@example.com".to_string()),
                SqlParam::Text("u1".to_string()),
            ]
        );
    }

    #[test]
    fn test_emit_insert_omits_absent_columns() {
        let change = Change::Insert {
            table: "User".to_string(),
            row: row(&[("id", json!("u1")), ("name", json!("Alice"))]),
        };
        let statements = emit(&[change]).unwrap();
        assert_eq!(
            statements[0].sql,
            "INSERT INTO \"User\" (\"id\", \"name\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn test_emit_delete_composite_pk() {
        let change = Change::Delete {
            table: "Membership".to_string(),
            primary_key: row(&[("userId", json!("u1")), ("projectId", json!("p1"))]),
            old_row: row(&[("userId", json!("u1")), ("projectId", json!("p1"))]),
        };
        let statements = emit(&[change]).unwrap();
        assert_eq!(
            statements[0].sql,
            "DELETE FROM \"Membership\" WHERE \"userId\" = $1 AND \"projectId\" = $2"
        );
        assert_eq!(statements[0].params.len(), 2);
    }

    #[test]
    fn test_emit_rejects_conflict_marker() {
        let change = Change::Update {
            table: "User".to_string(),
            primary_key: row(&[("id", json!("u1"))]),
            old_values: row(&[("name", json!("a"))]),
            new_values: row(&[(
                "name",
                json!({"$conflict": {"base": "a", "ours": "b", "theirs": "c"}}),
            )]),
        };
        assert!(matches!(
            emit(&[change]),
            Err(SyncError::ConflictDetected { .. })
        ));
    }

    #[test]
    fn test_emit_quoted_identifier_parses_as_single_identifier() {
        let change = Change::Insert {
            table: "weird\"table".to_string(),
            row: row(&[("id", json!(1))]),
        };
        let statements = emit(&[change]).unwrap();
        assert!(statements[0].sql.starts_with("INSERT INTO \"weird\"\"table\""));
    }
}
