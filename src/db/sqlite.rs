// ABOUTME: SQLite backend for the column conversion, built on rusqlite
// ABOUTME: Decodes values by storage class since SQLite has no native datetime type

use super::{
    max_rows_per_statement, select_page_sql, update_page_sql, Connection, PageQuery, PageWrite,
};
use crate::schema::codec::{
    datetime_to_decimal, decimal_to_datetime, epoch_micros_to_datetime,
    epoch_seconds_to_datetime, format_datetime, parse_datetime,
};
use crate::schema::{ColumnInfo, Engine, KeyValue, Row, StorageFormat, TableSchema};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::{Value, ValueRef};
use std::path::Path;

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Ok(Self { conn })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database '{}'", path.display()))?;
        Ok(Self { conn })
    }

    /// Open `sqlite::memory:`, `sqlite://PATH`, or `sqlite:PATH`
    pub fn open_url(url: &str) -> Result<Self> {
        let rest = url
            .trim()
            .strip_prefix("sqlite:")
            .ok_or_else(|| anyhow!("Not a SQLite URL: {}", url))?;

        if rest == ":memory:" || rest == "//:memory:" {
            return Self::open_in_memory();
        }

        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            bail!(
                "SQLite URL is missing a database path.\n\
                 Expected format: sqlite:///path/to/database.db or sqlite::memory:"
            );
        }
        Self::open(path)
    }

    /// Underlying rusqlite handle, for fixtures and inspection
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

/// rusqlite quotes the whole statement in input errors; keep only the message
fn without_sql(err: rusqlite::Error) -> anyhow::Error {
    match err {
        rusqlite::Error::SqlInputError { msg, offset, .. } => {
            anyhow!("{} at offset {}", msg, offset)
        }
        other => other.into(),
    }
}

fn decode_key(value: ValueRef<'_>) -> Result<KeyValue> {
    match value {
        ValueRef::Integer(i) => Ok(KeyValue::Int(i)),
        ValueRef::Text(bytes) => Ok(KeyValue::Text(
            std::str::from_utf8(bytes)
                .context("Primary key is not valid UTF-8")?
                .to_string(),
        )),
        other => bail!("Unsupported primary key storage class {:?}", other.data_type()),
    }
}

fn decode_value(value: ValueRef<'_>) -> Result<Option<NaiveDateTime>> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(seconds) => {
            let micros = seconds
                .checked_mul(1_000_000)
                .ok_or_else(|| anyhow!("Timestamp {} out of range", seconds))?;
            epoch_micros_to_datetime(micros).map(Some)
        }
        ValueRef::Real(seconds) => epoch_seconds_to_datetime(seconds).map(Some),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).context("Timestamp is not valid UTF-8")?;
            if text.contains(':') {
                parse_datetime(text).map(Some)
            } else {
                decimal_to_datetime(text).map(Some)
            }
        }
        ValueRef::Blob(_) => bail!("Cannot read a timestamp from a BLOB value"),
    }
}

fn encode_key(key: &KeyValue) -> Value {
    match key {
        KeyValue::Int(i) => Value::Integer(*i),
        KeyValue::Text(s) => Value::Text(s.clone()),
    }
}

fn encode_value(value: Option<&NaiveDateTime>, format: StorageFormat) -> Value {
    match (value, format) {
        (None, _) => Value::Null,
        (Some(v), StorageFormat::DateTime) => Value::Text(format_datetime(v)),
        (Some(v), StorageFormat::EpochDecimal) => Value::Text(datetime_to_decimal(v)),
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(without_sql)
            .with_context(|| format!("SQLite statement failed: {}", sql))
    }

    async fn reflect_table(&mut self, table: &str) -> Result<TableSchema> {
        let sql = format!("PRAGMA table_info({})", Engine::Sqlite.quote_ident(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to reflect table '{}'", table))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo::new(
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .with_context(|| format!("Failed to read columns of table '{}'", table))?;

        if columns.is_empty() {
            bail!("Table '{}' does not exist", table);
        }

        Ok(TableSchema {
            name: table.to_string(),
            columns,
        })
    }

    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        let sql = select_page_sql(Engine::Sqlite, query, limit, offset);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare page query on '{}'", query.table))?;
        let mut rows = stmt
            .query([])
            .with_context(|| format!("Failed to read page of '{}'", query.table))?;

        let mut page = Vec::new();
        while let Some(row) = rows.next()? {
            let key = decode_key(row.get_ref(0)?)?;
            let value = decode_value(row.get_ref(1)?).with_context(|| {
                format!(
                    "Failed to decode {}.{} for key {}",
                    query.table, query.value_column, key
                )
            })?;
            page.push(Row { key, value });
        }

        Ok(page)
    }

    async fn write_page(&mut self, write: &PageWrite, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .context("Failed to start page transaction")?;
        for chunk in rows.chunks(max_rows_per_statement(Engine::Sqlite)) {
            let sql = update_page_sql(Engine::Sqlite, write, chunk.len());
            let mut params = Vec::with_capacity(chunk.len() * 2);
            for row in chunk {
                params.push(encode_key(&row.key));
                params.push(encode_value(row.value.as_ref(), write.target_format));
            }

            tx.execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map_err(without_sql)
                .with_context(|| {
                    format!(
                        "Failed to write {} rows into {}.{}",
                        chunk.len(),
                        write.table,
                        write.target_column
                    )
                })?;
        }
        tx.commit().context("Failed to commit page transaction")?;

        Ok(())
    }
}

/// SQLite storage behind the MySQL engine and column layout
///
/// Lets unit tests drive the guarded conversion path without a MySQL server.
#[cfg(test)]
pub(crate) struct MySqlLayout(pub SqliteConnection);

#[cfg(test)]
#[async_trait]
impl Connection for MySqlLayout {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.0.execute(sql).await
    }

    async fn reflect_table(&mut self, table: &str) -> Result<TableSchema> {
        self.0.reflect_table(table).await
    }

    async fn fetch_page(
        &mut self,
        query: &PageQuery,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Row>> {
        self.0.fetch_page(query, limit, offset).await
    }

    async fn write_page(&mut self, write: &PageWrite, rows: &[Row]) -> Result<()> {
        self.0.write_page(write, rows).await
    }
}
