//! Module: store::sql
//! Responsibility: table-per-record-type store over a `SqlConnection`.
//! Does not own: DDL or connection lifecycle.
//! Boundary: one column per declared field, named after the field; the key
//! fields form the table's primary key.

mod connection;
mod dialect;


pub use connection::{SqlConnection, SqlError, SqlRow, SqlValue, SqliteConnection};
pub use dialect::{SqlDialect, SqliteDialect, from_sql_value, to_sql_value};

use crate::{
    context::StoreContext,
    error::{BackendError, StoreError},
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    pushdown::{
        Conversion,
        sql::{SqlCompare, SqlCondition, SqlConverterChain, sql_converters},
    },
    record::Record,
    store::{PageKey, PagePosition, ResultSet, Store, check_query, count_by_scan},
};
use std::sync::Arc;

// Rows fetched per round trip when results must be post-filtered.
const MIN_SCAN_CHUNK: usize = 32;

impl From<SqlError> for StoreError {
    fn from(err: SqlError) -> Self {
        Self::Backend(BackendError::new("sql", err.to_string()))
    }
}

///
/// SqlTableStore
///
/// Pushes filters down through the relational converters. Pages resume by
/// offset into a deterministic `ORDER BY <order>, <key columns>` scan, so a
/// cursor stays valid even when rows are post-filtered in memory.
///

pub struct SqlTableStore {
    meta: StorageMeta,
    ctx: StoreContext,
    table: String,
    conn: Arc<dyn SqlConnection>,
    dialect: Box<dyn SqlDialect>,
    converters: SqlConverterChain,
}

impl SqlTableStore {
    /// Store over table `meta.name()` using the SQLite dialect.
    #[must_use]
    pub fn sqlite(meta: StorageMeta, conn: Arc<dyn SqlConnection>, ctx: &StoreContext) -> Self {
        Self::with_dialect(meta, conn, Box::new(SqliteDialect), ctx)
    }

    #[must_use]
    pub fn with_dialect(
        meta: StorageMeta,
        conn: Arc<dyn SqlConnection>,
        dialect: Box<dyn SqlDialect>,
        ctx: &StoreContext,
    ) -> Self {
        Self {
            table: meta.name().to_string(),
            meta,
            ctx: ctx.clone(),
            conn,
            dialect,
            converters: sql_converters(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn table(&self) -> String {
        self.dialect.quote_ident(&self.table)
    }

    fn column_list(&self) -> String {
        self.meta
            .fields()
            .iter()
            .map(|field| self.dialect.quote_ident(field.name()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn convert(&self, filter: &SearchFilter) -> Conversion<SqlCondition> {
        let conversion = self.converters.convert(filter, &self.meta, &self.dialect.scope());
        tracing::debug!(
            record = self.meta.name(),
            handled = conversion.handled,
            pushed = conversion.condition.is_some(),
            "sql pushdown"
        );

        conversion
    }

    // Equality on every key column of `key`.
    fn key_condition(&self, key: &str) -> Result<SqlCondition, StoreError> {
        let parts = self.meta.key_fields_of(key)?;
        let mut conditions: Vec<SqlCondition> = self
            .meta
            .key_config()
            .fields()
            .into_iter()
            .map(|name| SqlCondition::Compare {
                column: name.to_string(),
                op: SqlCompare::Eq,
                value: parts.value(name).clone(),
            })
            .collect();

        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            SqlCondition::And(conditions)
        })
    }

    fn where_clause(&self, condition: Option<&SqlCondition>, params: &mut Vec<SqlValue>) -> Result<String, StoreError> {
        match condition {
            None => Ok(String::new()),
            Some(condition) => Ok(format!(" WHERE {}", self.dialect.render(condition, params)?)),
        }
    }

    fn order_clause(&self, order: &SearchOrder) -> String {
        let mut terms: Vec<String> = order
            .keys()
            .iter()
            .map(|key| {
                let column = self.dialect.quote_ident(&key.field);
                if key.desc {
                    format!("{column} DESC")
                } else {
                    format!("{column} ASC")
                }
            })
            .collect();
        for name in self.meta.key_config().fields() {
            if !order.keys().iter().any(|key| key.field == name) {
                terms.push(format!("{} ASC", self.dialect.quote_ident(name)));
            }
        }

        format!(" ORDER BY {}", terms.join(", "))
    }

    fn select(&self, condition: Option<&SqlCondition>, order: &SearchOrder, offset: u64, limit: usize) -> Result<Vec<Record>, StoreError> {
        let mut params = Vec::new();
        let where_clause = self.where_clause(condition, &mut params)?;
        let sql = format!(
            "SELECT {} FROM {}{where_clause}{} LIMIT {} OFFSET {}",
            self.column_list(),
            self.table(),
            self.order_clause(order),
            self.dialect.placeholder(params.len() + 1),
            self.dialect.placeholder(params.len() + 2),
        );
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        self.conn
            .query(&sql, &params)?
            .into_iter()
            .map(|row| self.row_to_record(row))
            .collect()
    }

    fn select_where(&self, condition: &SqlCondition) -> Result<Vec<Record>, StoreError> {
        let mut params = Vec::new();
        let where_clause = self.where_clause(Some(condition), &mut params)?;
        let sql = format!("SELECT {} FROM {}{where_clause}", self.column_list(), self.table());

        self.conn
            .query(&sql, &params)?
            .into_iter()
            .map(|row| self.row_to_record(row))
            .collect()
    }

    // Null columns are left out, so they read back as missing.
    fn row_to_record(&self, row: SqlRow) -> Result<Record, StoreError> {
        let mut record = Record::new();
        for (field, value) in self.meta.fields().iter().zip(row) {
            let value = from_sql_value(field.name(), field.kind(), value)?;
            if !value.is_null() {
                record.set(field.name(), value);
            }
        }

        Ok(record)
    }

    // Outer error: value binding. Inner error: the statement itself.
    fn insert(&self, record: &Record) -> Result<Result<(), SqlError>, StoreError> {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for field in self.meta.fields() {
            if let Some(value) = record.get(field.name()) {
                columns.push(self.dialect.quote_ident(field.name()));
                params.push(to_sql_value(value)?);
            }
        }
        let placeholders: Vec<String> = (1..=params.len())
            .map(|position| self.dialect.placeholder(position))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(self.conn.execute(&sql, &params).map(|_| ()))
    }

    fn reread(&self, key: &str) -> Result<Record, StoreError> {
        self.read(key)?.ok_or_else(|| {
            BackendError::new("sql", format!("row '{key}' vanished after write")).into()
        })
    }
}

impl Store for SqlTableStore {
    fn meta(&self) -> &StorageMeta {
        &self.meta
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let record = self.meta.prepare_create(&item, self.ctx.now());
        let key = self.meta.key_of(&record)?;

        match self.insert(&record)? {
            Ok(()) => self.reread(&key),
            Err(SqlError::UniqueViolation(_)) => Err(StoreError::duplicate_key(self.meta.name(), key)),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let condition = self.key_condition(key)?;
        Ok(self.select_where(&condition)?.into_iter().next())
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let conditions = keys
            .iter()
            .map(|key| self.key_condition(key))
            .collect::<Result<Vec<_>, _>>()?;
        let found = self.select_where(&SqlCondition::Or(conditions))?;
        let by_key: std::collections::BTreeMap<String, Record> = found
            .into_iter()
            .filter_map(|record| Some((self.meta.key_of(&record).ok()?, record)))
            .collect();

        Ok(keys.iter().map(|key| by_key.get(key).cloned()).collect())
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        precondition.validate_for_fields(self.meta.fields())?;
        let key = self.meta.key_of(&updates)?;
        let Some(existing) = self.read(&key)? else {
            return Ok(None);
        };
        if !precondition.matches(&existing, self.meta.fields()) {
            return Ok(None);
        }

        let merged = self.meta.prepare_update(&existing, &updates, self.ctx.now());
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for field in self.meta.fields() {
            if self.meta.key_config().is_key_field(field.name()) {
                continue;
            }
            params.push(to_sql_value(merged.value(field.name()))?);
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote_ident(field.name()),
                self.dialect.placeholder(params.len())
            ));
        }
        if assignments.is_empty() {
            return Ok(Some(existing));
        }

        let condition = self.key_condition(&key)?;
        let where_clause = self.where_clause(Some(&condition), &mut params)?;
        let sql = format!("UPDATE {} SET {}{where_clause}", self.table(), assignments.join(", "));
        if self.conn.execute(&sql, &params)? == 0 {
            return Ok(None);
        }

        self.reread(&key).map(Some)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let condition = self.key_condition(key)?;
        let mut params = Vec::new();
        let where_clause = self.where_clause(Some(&condition), &mut params)?;
        let sql = format!("DELETE FROM {}{where_clause}", self.table());

        Ok(self.conn.execute(&sql, &params)? > 0)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        check_query(&self.meta, filter, &SearchOrder::none())?;
        if filter.is_exclude_all() {
            return Ok(0);
        }

        let conversion = self.convert(filter);
        if !conversion.handled {
            return count_by_scan(self, filter);
        }

        let mut params = Vec::new();
        let where_clause = self.where_clause(conversion.condition.as_ref(), &mut params)?;
        let sql = format!("SELECT COUNT(*) FROM {}{where_clause}", self.table());
        match self.conn.query(&sql, &params)?.first().and_then(|row| row.first()) {
            Some(SqlValue::Integer(n)) => Ok(u64::try_from(*n).unwrap_or(0)),
            other => Err(BackendError::new("sql", format!("unexpected count result: {other:?}")).into()),
        }
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        check_query(&self.meta, filter, order)?;
        let limit = self.meta.resolve_limit(limit)?;
        if filter.is_exclude_all() {
            return Ok(ResultSet::empty());
        }

        let offset = PageKey::decode_offset(page_key, filter, order)?;
        let conversion = self.convert(filter);
        let next_key = |offset: u64| PageKey::new(filter, order, PagePosition::Offset(offset)).encode();

        if conversion.handled {
            let mut rows = self.select(conversion.condition.as_ref(), order, offset, limit + 1)?;
            let more = rows.len() > limit;
            rows.truncate(limit);
            let next_page_key = if more {
                Some(next_key(offset + rows.len() as u64)?)
            } else {
                None
            };

            return Ok(ResultSet::new(rows, next_page_key));
        }

        // Over-fetch: the cursor tracks rows scanned, not rows returned.
        let chunk = (limit * 2).max(MIN_SCAN_CHUNK);
        let mut scanned = offset;
        let mut results = Vec::with_capacity(limit);
        loop {
            let rows = self.select(conversion.condition.as_ref(), order, scanned, chunk)?;
            let exhausted = rows.len() < chunk;
            for row in rows {
                scanned += 1;
                if filter.matches(&row, self.meta.fields()) {
                    results.push(row);
                    if results.len() == limit {
                        return Ok(ResultSet::new(results, Some(next_key(scanned)?)));
                    }
                }
            }
            if exhausted {
                return Ok(ResultSet::new(results, None));
            }
        }
    }
}

impl std::fmt::Debug for SqlTableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTableStore")
            .field("record", &self.meta.name())
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
