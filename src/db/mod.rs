// ABOUTME: Live database connection seam used by the column conversion
// ABOUTME: Defines the Connection trait, shared SQL builders, and URL-based connect

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::schema::{ColumnType, Engine, KeyKind, Row, StorageFormat, TableSchema};
use crate::utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

pub use mysql::MySqlConnection;
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

/// Two-column projection read by the paged backfill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub table: String,
    pub key_column: String,
    pub key_kind: KeyKind,
    pub value_column: String,
}

/// Target of one page of keyed updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWrite {
    pub table: String,
    pub key_column: String,
    pub key_kind: KeyKind,
    pub target_column: String,
    /// Layout the values are encoded with
    pub target_format: StorageFormat,
}

/// A live connection able to reflect, alter, read, and write one table at a time
///
/// All methods are issued strictly one after another by the conversion; no
/// implementation needs to support concurrent use.
#[async_trait]
pub trait Connection: Send {
    fn engine(&self) -> Engine;

    /// Run a single statement that returns no rows
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Load the live column definitions of `table`
    ///
    /// Fails if the table does not exist.
    async fn reflect_table(&mut self, table: &str) -> Result<TableSchema>;

    /// Fetch at most `limit` rows starting at `offset`, ordered by the key
    async fn fetch_page(&mut self, query: &PageQuery, limit: u64, offset: u64)
        -> Result<Vec<Row>>;

    /// Write every row's value into the target column in one transaction
    async fn write_page(&mut self, write: &PageWrite, rows: &[Row]) -> Result<()>;

    async fn add_column(&mut self, table: &str, column: &str, column_type: ColumnType) -> Result<()> {
        let engine = self.engine();
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            engine.quote_ident(table),
            engine.quote_ident(column),
            engine.sql_type(column_type)
        );
        self.execute(&sql)
            .await
            .with_context(|| format!("Failed to add column {}.{}", table, column))
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        let engine = self.engine();
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            engine.quote_ident(table),
            engine.quote_ident(column)
        );
        self.execute(&sql)
            .await
            .with_context(|| format!("Failed to drop column {}.{}", table, column))
    }

    /// Rename a column; `column_type` is the type the column currently has
    async fn rename_column(
        &mut self,
        table: &str,
        from: &str,
        to: &str,
        _column_type: ColumnType,
    ) -> Result<()> {
        let engine = self.engine();
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            engine.quote_ident(table),
            engine.quote_ident(from),
            engine.quote_ident(to)
        );
        self.execute(&sql)
            .await
            .with_context(|| format!("Failed to rename column {}.{} to {}", table, from, to))
    }
}

/// Connect to the database named by `url`, picking the backend from its scheme
pub async fn connect(url: &str) -> Result<Box<dyn Connection>> {
    let connection: Box<dyn Connection> = match Engine::from_url(url)? {
        Engine::MySql => Box::new(MySqlConnection::connect(url).await?),
        Engine::Postgres => Box::new(PostgresConnection::connect(url).await?),
        Engine::Sqlite => Box::new(SqliteConnection::open_url(url)?),
    };
    Ok(connection)
}

/// Connect with automatic retry for transient failures
pub async fn connect_with_retry(url: &str) -> Result<Box<dyn Connection>> {
    utils::retry_with_backoff(
        || connect(url),
        3,                      // Max 3 retries
        Duration::from_secs(1), // Start with 1 second delay
    )
    .await
    .context("Failed to connect after retries")
}

/// Build the ordered offset/limit page query
///
/// PostgreSQL gets explicit key casts so integer keys of any width come back
/// as `int8` and everything else as `text`.
pub(crate) fn select_page_sql(engine: Engine, query: &PageQuery, limit: u64, offset: u64) -> String {
    let key = engine.quote_ident(&query.key_column);
    let key_expr = match (engine, query.key_kind) {
        (Engine::Postgres, KeyKind::Int) => format!("{}::int8", key),
        (Engine::Postgres, KeyKind::Text) => format!("{}::text", key),
        _ => key.clone(),
    };

    format!(
        "SELECT {}, {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
        key_expr,
        engine.quote_ident(&query.value_column),
        engine.quote_ident(&query.table),
        key,
        limit,
        offset
    )
}

/// Bind parameters each row takes in [`update_page_sql`]
fn params_per_row(engine: Engine) -> usize {
    match engine {
        Engine::MySql => 3,
        Engine::Postgres | Engine::Sqlite => 2,
    }
}

/// Most rows one UPDATE may carry before hitting the engine's bind-parameter limit
pub(crate) fn max_rows_per_statement(engine: Engine) -> usize {
    let max_params = match engine {
        Engine::Sqlite => 32_766,
        Engine::MySql | Engine::Postgres => 65_535,
    };
    max_params / params_per_row(engine)
}

/// Build one conditional UPDATE covering `row_count` keys
///
/// Parameter layout per engine:
/// - MySQL: `k1, v1, ..., kn, vn, k1, ..., kn` (positional `?` cannot be reused)
/// - SQLite and PostgreSQL: `k1, v1, ..., kn, vn`, keys referenced twice by number
pub(crate) fn update_page_sql(engine: Engine, write: &PageWrite, row_count: usize) -> String {
    let key = engine.quote_ident(&write.key_column);
    let param = |index: usize| match engine {
        Engine::MySql => "?".to_string(),
        Engine::Sqlite => format!("?{}", index),
        Engine::Postgres => format!("${}", index),
    };

    let mut cases = String::new();
    let mut keys = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let key_index = 2 * i + 1;
        cases.push_str(&format!(
            " WHEN {} THEN {}",
            param(key_index),
            param(key_index + 1)
        ));
        keys.push(param(key_index));
    }

    format!(
        "UPDATE {} SET {} = CASE {}{} END WHERE {} IN ({})",
        engine.quote_ident(&write.table),
        engine.quote_ident(&write.target_column),
        key,
        cases,
        key,
        keys.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(key_kind: KeyKind) -> PageQuery {
        PageQuery {
            table: "alarm".to_string(),
            key_column: "id".to_string(),
            key_kind,
            value_column: "timestamp".to_string(),
        }
    }

    fn write(key_kind: KeyKind) -> PageWrite {
        PageWrite {
            table: "alarm".to_string(),
            key_column: "id".to_string(),
            key_kind,
            target_column: "tmp".to_string(),
            target_format: StorageFormat::EpochDecimal,
        }
    }

    #[test]
    fn test_select_page_sql_orders_by_key() {
        assert_eq!(
            select_page_sql(Engine::MySql, &query(KeyKind::Int), 1000, 2000),
            "SELECT `id`, `timestamp` FROM `alarm` ORDER BY `id` LIMIT 1000 OFFSET 2000"
        );
        assert_eq!(
            select_page_sql(Engine::Sqlite, &query(KeyKind::Int), 10, 0),
            "SELECT \"id\", \"timestamp\" FROM \"alarm\" ORDER BY \"id\" LIMIT 10 OFFSET 0"
        );
    }

    #[test]
    fn test_select_page_sql_casts_postgres_keys() {
        assert_eq!(
            select_page_sql(Engine::Postgres, &query(KeyKind::Int), 5, 5),
            "SELECT \"id\"::int8, \"timestamp\" FROM \"alarm\" ORDER BY \"id\" LIMIT 5 OFFSET 5"
        );
        assert!(select_page_sql(Engine::Postgres, &query(KeyKind::Text), 5, 0)
            .starts_with("SELECT \"id\"::text"));
    }

    #[test]
    fn test_update_page_sql_mysql() {
        assert_eq!(
            update_page_sql(Engine::MySql, &write(KeyKind::Int), 2),
            "UPDATE `alarm` SET `tmp` = CASE `id` WHEN ? THEN ? WHEN ? THEN ? END WHERE `id` IN (?, ?)"
        );
    }

    #[test]
    fn test_update_page_sql_sqlite_reuses_numbered_keys() {
        assert_eq!(
            update_page_sql(Engine::Sqlite, &write(KeyKind::Int), 2),
            "UPDATE \"alarm\" SET \"tmp\" = CASE \"id\" WHEN ?1 THEN ?2 WHEN ?3 THEN ?4 END WHERE \"id\" IN (?1, ?3)"
        );
    }

    #[test]
    fn test_max_rows_per_statement_stays_under_parameter_limits() {
        assert_eq!(max_rows_per_statement(Engine::Sqlite), 16_383);
        assert_eq!(max_rows_per_statement(Engine::MySql), 21_845);
        for engine in [Engine::MySql, Engine::Sqlite] {
            let params = max_rows_per_statement(engine) * params_per_row(engine);
            let limit = if engine == Engine::Sqlite { 32_766 } else { 65_535 };
            assert!(params <= limit, "{}", engine);
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = connect("mongodb://localhost:27017/ceilometer").await;
        assert!(result.is_err());
    }
}
