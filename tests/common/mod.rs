// ABOUTME: Shared fixtures for integration tests: seeded SQLite alarm tables
// ABOUTME: and a wrapping connection that counts fetches, injects failures, and can pose as MySQL

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use precise_timestamp_migrator::db::{Connection, PageQuery, PageWrite, SqliteConnection};
use precise_timestamp_migrator::schema::codec::parse_datetime;
use precise_timestamp_migrator::schema::{ColumnType, Engine, KeyKind, KeyValue, Row, TableSchema};

pub const ALARM_DDL: &str = "CREATE TABLE alarm (
    id INTEGER PRIMARY KEY,
    name VARCHAR(255),
    timestamp DATETIME,
    state_timestamp DATETIME
)";

pub const ALARM_HISTORY_DDL: &str = "CREATE TABLE alarm_history (
    alarm_id VARCHAR(255) PRIMARY KEY,
    type VARCHAR(20),
    timestamp DATETIME
)";

/// Both alarm tables, empty
pub fn empty_db() -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory().unwrap();
    conn.raw().execute_batch(ALARM_DDL).unwrap();
    conn.raw().execute_batch(ALARM_HISTORY_DDL).unwrap();
    conn
}

/// The two-row scenario plus one history row per alarm
pub fn scenario_db() -> SqliteConnection {
    let conn = empty_db();
    conn.raw()
        .execute_batch(
            "INSERT INTO alarm VALUES (1, 'cpu_high', '2013-01-01 00:00:00', '2013-01-01 00:00:00');
             INSERT INTO alarm VALUES (2, 'disk_full', '2013-06-15 12:30:00', '2013-06-15 12:31:00');
             INSERT INTO alarm_history VALUES ('a1b2-c3', 'creation', '2013-01-01 00:00:00');
             INSERT INTO alarm_history VALUES ('d4e5-f6', 'state transition', '2013-06-15 12:30:00');",
        )
        .unwrap();
    conn
}

/// An alarm table with `count` rows, inserted in descending key order
///
/// Row `id` holds `2013-01-01 00:00:00` plus `id` seconds.
pub fn alarm_db_with_rows(count: i64) -> SqliteConnection {
    let conn = empty_db();
    conn.raw()
        .execute(
            "WITH RECURSIVE n(i) AS (SELECT ?1 UNION ALL SELECT i - 1 FROM n WHERE i > 1)
             INSERT INTO alarm (id, name, timestamp, state_timestamp)
             SELECT i, 'alarm', datetime(1356998400 + i, 'unixepoch'), NULL FROM n WHERE i > 0",
            [count],
        )
        .unwrap();
    conn
}

pub fn at(text: &str) -> NaiveDateTime {
    parse_datetime(text).unwrap()
}

/// Read every (key, value) of a column in key order
pub async fn read_column<C: Connection + ?Sized>(
    conn: &mut C,
    table: &str,
    key_column: &str,
    key_kind: KeyKind,
    column: &str,
) -> Vec<(KeyValue, Option<NaiveDateTime>)> {
    let query = PageQuery {
        table: table.to_string(),
        key_column: key_column.to_string(),
        key_kind,
        value_column: column.to_string(),
    };
    conn.fetch_page(&query, 1_000_000, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.key, row.value))
        .collect()
}

/// Read `alarm.<column>` keyed by `id`
pub async fn read_alarm_column<C: Connection + ?Sized>(
    conn: &mut C,
    column: &str,
) -> Vec<(KeyValue, Option<NaiveDateTime>)> {
    read_column(conn, "alarm", "id", KeyKind::Int, column).await
}

/// Declared type of a column, as the engine recognizes it
pub async fn column_type_of<C: Connection + ?Sized>(
    conn: &mut C,
    table: &str,
    column: &str,
) -> Option<ColumnType> {
    let schema = conn.reflect_table(table).await.unwrap();
    let engine = conn.engine();
    schema
        .column(column)
        .and_then(|info| engine.column_type(&info.data_type))
}

/// Wraps a SQLite connection to observe and break the conversion
///
/// - `fetches` / `writes` count page reads and page writes
/// - `fail_drop` / `fail_rename` make the matching DDL step fail
/// - `fail_after_pages` makes every page write past that many fail
/// - `engine` overrides the reported engine family; DDL issued through the
///   trait defaults then uses that engine's quoting and column types
pub struct InstrumentedConnection {
    pub inner: SqliteConnection,
    pub fetches: u64,
    pub writes: u64,
    pub fail_drop: bool,
    pub fail_rename: bool,
    pub fail_after_pages: Option<u64>,
    pub engine: Option<Engine>,
}

impl InstrumentedConnection {
    pub fn new(inner: SqliteConnection) -> Self {
        Self {
            inner,
            fetches: 0,
            writes: 0,
            fail_drop: false,
            fail_rename: false,
            fail_after_pages: None,
            engine: None,
        }
    }

    /// SQLite storage with the MySQL engine and column layout, so the guarded path runs
    pub fn mysql(inner: SqliteConnection) -> Self {
        Self {
            engine: Some(Engine::MySql),
            ..Self::new(inner)
        }
    }
}

#[async_trait]
impl Connection for InstrumentedConnection {
    fn engine(&self) -> Engine {
        self.engine.unwrap_or_else(|| self.inner.engine())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.inner.execute(sql).await
    }

    async fn reflect_table(&mut self, table: &str) -> Result<TableSchema> {
        self.inner.reflect_table(table).await
    }

    async fn fetch_page(&mut self, query: &PageQuery, limit: u64, offset: u64) -> Result<Vec<Row>> {
        self.fetches += 1;
        self.inner.fetch_page(query, limit, offset).await
    }

    async fn write_page(&mut self, write: &PageWrite, rows: &[Row]) -> Result<()> {
        if let Some(limit) = self.fail_after_pages {
            if self.writes >= limit {
                bail!("simulated crash while writing page {}", self.writes + 1);
            }
        }
        self.inner.write_page(write, rows).await?;
        self.writes += 1;
        Ok(())
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        if self.fail_drop {
            bail!("simulated crash before dropping {}.{}", table, column);
        }
        self.inner.drop_column(table, column).await
    }

    async fn rename_column(
        &mut self,
        table: &str,
        from: &str,
        to: &str,
        column_type: ColumnType,
    ) -> Result<()> {
        if self.fail_rename {
            bail!("simulated crash before renaming {}.{}", table, from);
        }
        self.inner.rename_column(table, from, to, column_type).await
    }
}
