//! Module: store::sql::dialect
//! Responsibility: rendering condition trees and values into one SQL dialect.
//! Does not own: DDL; tables are created by the caller.

use crate::{
    error::{BackendError, StoreError},
    model::FieldKind,
    pushdown::sql::{SqlCondition, SqlScope},
    store::sql::SqlValue,
    value::Value,
};
use chrono::DateTime;
use uuid::Uuid;

///
/// SqlDialect
///

pub trait SqlDialect: Send + Sync {
    fn quote_ident(&self, ident: &str) -> String;

    /// Placeholder for the parameter at 1-based `position`.
    fn placeholder(&self, position: usize) -> String;

    fn scope(&self) -> SqlScope;

    /// Render `condition`, appending bound values to `params`.
    fn render(&self, condition: &SqlCondition, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
        let bind = |value: SqlValue, params: &mut Vec<SqlValue>| {
            params.push(value);
            self.placeholder(params.len())
        };
        let guarded = |column: &str, test: String| {
            let column = self.quote_ident(column);
            format!("({column} IS NOT NULL AND {test})")
        };

        Ok(match condition {
            SqlCondition::Constant(true) => "1=1".to_string(),
            SqlCondition::Constant(false) => "1=0".to_string(),
            SqlCondition::IsNull { column, negated } => {
                let column = self.quote_ident(column);
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            SqlCondition::Compare { column, op, value } => {
                let p = bind(to_sql_value(value)?, params);
                let test = format!("{} {} {p}", self.quote_ident(column), op.symbol());
                guarded(column, test)
            }
            SqlCondition::Contains { column, needle } => {
                let p = bind(SqlValue::Text(needle.clone()), params);
                let test = format!("instr({}, {p}) > 0", self.quote_ident(column));
                guarded(column, test)
            }
            SqlCondition::StartsWith { column, prefix } => {
                let p1 = bind(SqlValue::Text(prefix.clone()), params);
                let p2 = bind(SqlValue::Text(prefix.clone()), params);
                let test = format!("substr({}, 1, length({p1})) = {p2}", self.quote_ident(column));
                guarded(column, test)
            }
            SqlCondition::EndsWith { column, suffix } => {
                let p1 = bind(SqlValue::Text(suffix.clone()), params);
                let p2 = bind(SqlValue::Text(suffix.clone()), params);
                let test = format!("substr({}, -length({p1})) = {p2}", self.quote_ident(column));
                guarded(column, test)
            }
            SqlCondition::In { column, values } => {
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    placeholders.push(bind(to_sql_value(value)?, params));
                }
                let test = format!("{} IN ({})", self.quote_ident(column), placeholders.join(", "));
                guarded(column, test)
            }
            SqlCondition::Like { column, pattern } => {
                let p = bind(SqlValue::Text(pattern.clone()), params);
                let test = format!("{} LIKE {p} ESCAPE '\\'", self.quote_ident(column));
                guarded(column, test)
            }
            SqlCondition::And(parts) if parts.is_empty() => "1=1".to_string(),
            SqlCondition::Or(parts) if parts.is_empty() => "1=0".to_string(),
            SqlCondition::And(parts) => self.render_joined(parts, " AND ", params)?,
            SqlCondition::Or(parts) => self.render_joined(parts, " OR ", params)?,
            SqlCondition::Not(inner) => format!("NOT ({})", self.render(inner, params)?),
        })
    }

    fn render_joined(&self, parts: &[SqlCondition], glue: &str, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
        let rendered = parts
            .iter()
            .map(|part| self.render(part, params))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(format!("({})", rendered.join(glue)))
    }
}

///
/// SqliteDialect
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, _: usize) -> String {
        "?".to_string()
    }

    fn scope(&self) -> SqlScope {
        SqlScope {
            case_insensitive_like: true,
        }
    }
}

///
/// Value mapping
///
/// timestamp → INTEGER microseconds, uuid → TEXT, bool → INTEGER 0/1,
/// json → TEXT.
///

pub fn to_sql_value(value: &Value) -> Result<SqlValue, StoreError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Timestamp(ts) => SqlValue::Integer(ts.timestamp_micros()),
        Value::Uuid(id) => SqlValue::Text(id.hyphenated().to_string()),
        Value::Json(json) => SqlValue::Text(json.to_string()),
        Value::List(_) => {
            return Err(BackendError::new("sql", "list values cannot be bound as a column value").into());
        }
    })
}

/// Read a column value back as the field's declared kind.
pub fn from_sql_value(column: &str, kind: FieldKind, value: SqlValue) -> Result<Value, StoreError> {
    let mismatch = |found: &SqlValue| {
        StoreError::from(BackendError::new(
            "sql",
            format!(
                "column '{column}': expected {}, found {}",
                kind.label(),
                found.type_label()
            ),
        ))
    };

    #[allow(clippy::cast_precision_loss)]
    Ok(match (kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldKind::Text, SqlValue::Text(text)) => Value::Text(text),
        (FieldKind::Int, SqlValue::Integer(n)) => Value::Int(n),
        (FieldKind::Float, SqlValue::Real(f)) => Value::Float(f),
        (FieldKind::Float, SqlValue::Integer(n)) => Value::Float(n as f64),
        (FieldKind::Bool, SqlValue::Integer(n)) => Value::Bool(n != 0),
        (FieldKind::Blob, SqlValue::Blob(bytes)) => Value::Blob(bytes),
        (FieldKind::Timestamp, SqlValue::Integer(micros)) => DateTime::from_timestamp_micros(micros)
            .map(Value::Timestamp)
            .ok_or_else(|| mismatch(&SqlValue::Integer(micros)))?,
        (FieldKind::Uuid, SqlValue::Text(text)) => match Uuid::parse_str(&text) {
            Ok(id) => Value::Uuid(id),
            Err(_) => return Err(mismatch(&SqlValue::Text(text))),
        },
        (FieldKind::Json, SqlValue::Text(text)) => match serde_json::from_str(&text) {
            Ok(json) => Value::Json(json),
            Err(_) => return Err(mismatch(&SqlValue::Text(text))),
        },
        (_, other) => return Err(mismatch(&other)),
    })
}
