//! Module: store::sql::connection
//! Responsibility: the narrow SQL client seam and its SQLite implementation.
//! Does not own: connection pooling, retries, or schema migration.

use parking_lot::Mutex;
use rusqlite::{
    Connection, ErrorCode,
    types::{ToSqlOutput, Value as SqliteValue, ValueRef},
};
use std::path::Path;
use thiserror::Error as ThisError;

///
/// SqlValue
/// Storage classes a relational backend binds and returns.
///

#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

pub type SqlRow = Vec<SqlValue>;

///
/// SqlError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SqlError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("{0}")]
    Other(String),
}

///
/// SqlConnection
///
/// Executes already-rendered statements. Implementations serialize access
/// internally; the store holds one shared handle.
///

pub trait SqlConnection: Send + Sync {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, SqlError>;

    /// Returns the number of affected rows.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError>;
}

///
/// SqliteConnection
///

pub struct SqliteConnection {
    conn: Mutex<Connection>,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlError> {
        let conn = Connection::open(path.as_ref()).map_err(map_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(map_err)?;

        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, SqlError> {
        Connection::open_in_memory()
            .map(Self::from_connection)
            .map_err(map_err)
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run a batch of statements without parameters (schema setup).
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqlError> {
        self.conn.lock().execute_batch(sql).map_err(map_err)
    }
}

impl SqlConnection for SqliteConnection {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, SqlError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql).map_err(map_err)?;
        let width = stmt.column_count();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(from_value_ref(row.get_ref(idx).map_err(map_err)?));
            }
            out.push(values);
        }

        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql).map_err(map_err)?;

        stmt.execute(rusqlite::params_from_iter(params.iter()))
            .map_err(map_err)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SqliteConnection")
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Integer(n) => ToSqlOutput::Owned(SqliteValue::Integer(*n)),
            Self::Real(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(text) => SqlValue::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn map_err(err: rusqlite::Error) -> SqlError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                ) =>
        {
            SqlError::UniqueViolation(err.to_string())
        }
        _ => SqlError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violations_are_classified() {
        let conn = SqliteConnection::open_in_memory().expect("sqlite should open");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER);")
            .expect("table should be created");

        let insert = "INSERT INTO t (id, n) VALUES (?, ?)";
        let params = [SqlValue::Text("a".into()), SqlValue::Integer(1)];
        assert_eq!(conn.execute(insert, &params), Ok(1));
        assert!(matches!(
            conn.execute(insert, &params),
            Err(SqlError::UniqueViolation(_))
        ));
    }

    #[test]
    fn query_returns_storage_classes() {
        let conn = SqliteConnection::open_in_memory().expect("sqlite should open");
        let rows = conn
            .query("SELECT 1, 2.5, 'x', NULL, x'ff'", &[])
            .expect("query should run");

        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Integer(1),
                SqlValue::Real(2.5),
                SqlValue::Text("x".into()),
                SqlValue::Null,
                SqlValue::Blob(vec![0xff]),
            ]]
        );
    }
}
