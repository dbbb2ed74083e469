//! SQL parameter values.
//!
//! Statement parameters start life as JSON scalars; the concrete wire
//! encoding depends on the parameter type the server declares when the
//! statement is prepared. [`SqlParam`] holds the scalar and adapts it at
//! bind time: a string becomes a uuid for a `uuid` parameter, an instant
//! for a `timestamptz` parameter, decoded base64 for `bytea`, and so on.
//! Values never appear in SQL text.

use std::str::FromStr;

use base64::Engine;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A statement parameter, carried as the JSON scalar it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Structured value destined for a json/jsonb column.
    Json(Value),
}

impl SqlParam {
    /// Build a parameter from a JSON cell value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => SqlParam::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Json(other.clone()),
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            SqlParam::Null => Ok(IsNull::Yes),
            SqlParam::Bool(b) => {
                if *ty == Type::JSON || *ty == Type::JSONB {
                    Value::Bool(*b).to_sql(ty, out)
                } else {
                    b.to_sql(ty, out)
                }
            }
            SqlParam::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*i).to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    Value::from(*i).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlParam::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::try_from(*f)?.to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    Value::from(*f).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlParam::Text(s) => text_to_sql(s, ty, out),
            SqlParam::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Adaptation happens per declared type inside to_sql.
        true
    }

    to_sql_checked!();
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::UUID {
        Uuid::parse_str(s)?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        let instant = DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc);
        instant.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        parse_naive_datetime(s)?.to_sql(ty, out)
    } else if *ty == Type::DATE {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
    } else if *ty == Type::TIME {
        NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out)
    } else if *ty == Type::BYTEA {
        let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
        bytes.to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from_str(s)?.to_sql(ty, out)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Value::String(s.to_string()).to_sql(ty, out)
    } else if matches!(ty.kind(), Kind::Enum(_)) {
        // Enum wire format is the bare label.
        out.put_slice(s.as_bytes());
        Ok(IsNull::No)
    } else {
        s.to_sql(ty, out)
    }
}

/// Accept both the bare ISO shape and an offset form for columns that store
/// no zone.
fn parse_naive_datetime(s: &str) -> Result<NaiveDateTime, BoxError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive);
    }
    Ok(DateTime::parse_from_rfc3339(s)?.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_mapping() {
        assert_eq!(SqlParam::from_value(&Value::Null), SqlParam::Null);
        assert_eq!(SqlParam::from_value(&json!(true)), SqlParam::Bool(true));
        assert_eq!(SqlParam::from_value(&json!(42)), SqlParam::Int(42));
        assert_eq!(SqlParam::from_value(&json!(1.5)), SqlParam::Float(1.5));
        assert_eq!(
            SqlParam::from_value(&json!("x")),
            SqlParam::Text("x".to_string())
        );
        assert_eq!(
            SqlParam::from_value(&json!({"a": 1})),
            SqlParam::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_text_binds_as_uuid() {
        let mut buf = BytesMut::new();
        let param = SqlParam::Text("550e8400-e29b-41d4-a716-446655440000".to_string());
        let result = param.to_sql(&Type::UUID, &mut buf).unwrap();
        assert!(matches!(result, IsNull::No));
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_text_binds_as_timestamptz() {
        let mut buf = BytesMut::new();
        let param = SqlParam::Text("2024-03-01T12:00:00Z".to_string());
        assert!(param.to_sql(&Type::TIMESTAMPTZ, &mut buf).is_ok());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_text_rejects_bad_uuid() {
        let mut buf = BytesMut::new();
        let param = SqlParam::Text("not-a-uuid".to_string());
        assert!(param.to_sql(&Type::UUID, &mut buf).is_err());
    }

    #[test]
    fn test_int_narrows_to_declared_width() {
        let mut buf = BytesMut::new();
        SqlParam::Int(7).to_sql(&Type::INT2, &mut buf).unwrap();
        assert_eq!(buf.len(), 2);

        let mut buf = BytesMut::new();
        SqlParam::Int(7).to_sql(&Type::INT8, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_null_is_null_for_any_type() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            SqlParam::Null.to_sql(&Type::UUID, &mut buf).unwrap(),
            IsNull::Yes
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bytea_decodes_base64() {
        let mut buf = BytesMut::new();
        let param = SqlParam::Text(base64::engine::general_purpose::STANDARD.encode(b"abc"));
        param.to_sql(&Type::BYTEA, &mut buf).unwrap();
        assert_eq!(&buf[..], b"abc");
    }

    #[test]
    fn test_numeric_from_string() {
        let mut buf = BytesMut::new();
        let param = SqlParam::Text("12345.6789".to_string());
        assert!(param.to_sql(&Type::NUMERIC, &mut buf).is_ok());
        assert!(!buf.is_empty());
    }
}
