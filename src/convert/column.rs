// ABOUTME: One column's type change through a temp column and a paged backfill
// ABOUTME: Derives resumable progress from reflection and refuses half-done work unless resuming

use super::paged::PagedReader;
use super::ConversionSpec;
use crate::db::{Connection, PageQuery, PageWrite};
use crate::schema::{ColumnInfo, ColumnType, Engine, KeyKind, TableSchema};
use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Name of the column holding converted values until it is renamed into place
pub const TEMP_COLUMN: &str = "convert_data_type_temp_col";

pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// How far a conversion got, read back from the live table
///
/// Only `TempColumnAdded` and `OriginalDropped` are intermediate. They are
/// left behind when a previous run failed between two DDL statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionState {
    /// Original column of the source type, no temp column
    NotStarted,
    /// Original column plus a temp column of the destination type
    TempColumnAdded,
    /// Only the temp column remains
    OriginalDropped,
    /// Original column already has the destination type
    Complete,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversionState::NotStarted => "not started",
            ConversionState::TempColumnAdded => "temp column added",
            ConversionState::OriginalDropped => "original dropped",
            ConversionState::Complete => "complete",
        };
        write!(f, "{}", label)
    }
}

/// Compare a reflected column against a type the way the engine reports it back
fn reflects_as(engine: Engine, column: &ColumnInfo, expected: ColumnType) -> bool {
    let reflected = engine.column_type(&column.data_type);
    reflected.is_some() && reflected == engine.column_type(engine.sql_type(expected))
}

impl ConversionState {
    /// Derive the state of `spec` from the reflected `table`
    ///
    /// On PostgreSQL both types reflect identically, so an untouched column
    /// always reads as `NotStarted`.
    pub fn detect(engine: Engine, table: &TableSchema, spec: &ConversionSpec) -> Result<Self> {
        let original = table.column(&spec.column);
        let temp = table.column(TEMP_COLUMN);

        let state = match (original, temp) {
            (Some(column), None) => {
                if reflects_as(engine, column, spec.from) {
                    ConversionState::NotStarted
                } else if reflects_as(engine, column, spec.to) {
                    ConversionState::Complete
                } else {
                    bail!(
                        "Column {}.{} has unexpected type '{}' (expected {} or {})",
                        spec.table,
                        spec.column,
                        column.data_type,
                        engine.sql_type(spec.from),
                        engine.sql_type(spec.to)
                    );
                }
            }
            (Some(column), Some(temp)) => {
                if !reflects_as(engine, temp, spec.to) || !reflects_as(engine, column, spec.from) {
                    bail!(
                        "Table '{}' has a leftover {} column of type '{}' next to {} '{}' \
                         that does not belong to {}",
                        spec.table,
                        TEMP_COLUMN,
                        temp.data_type,
                        spec.column,
                        column.data_type,
                        spec
                    );
                }
                ConversionState::TempColumnAdded
            }
            (None, Some(temp)) => {
                if !reflects_as(engine, temp, spec.to) {
                    bail!(
                        "Table '{}' is missing column '{}' and its {} column has type '{}'",
                        spec.table,
                        spec.column,
                        TEMP_COLUMN,
                        temp.data_type
                    );
                }
                ConversionState::OriginalDropped
            }
            (None, None) => bail!(
                "Column '{}' does not exist in table '{}'",
                spec.column,
                spec.table
            ),
        };

        Ok(state)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            ConversionState::TempColumnAdded | ConversionState::OriginalDropped
        )
    }
}

/// Result of one converter run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Column rewritten; `pages` counts non-empty pages
    Converted { rows: u64, pages: u64 },
    /// Engine alters this type natively, nothing was touched
    Skipped,
    /// Column already had the destination type
    AlreadyConverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterOptions {
    pub page_size: u64,
    /// Finish conversions left in an intermediate state instead of failing
    pub resume: bool,
    pub show_progress: bool,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            resume: false,
            show_progress: false,
        }
    }
}

/// Changes the type of one column on a live table
///
/// The steps are: add the temp column, copy every row's value into it one
/// page at a time, drop the original, rename the temp column into place.
/// Each DDL statement and each page commits on its own. A failure aborts the
/// remaining steps and leaves the table in whatever state it reached, which
/// [`ColumnConverter::inspect`] reports and `resume` can finish.
pub struct ColumnConverter {
    spec: ConversionSpec,
    options: ConverterOptions,
}

impl ColumnConverter {
    pub fn new(spec: &ConversionSpec, options: ConverterOptions) -> Self {
        Self {
            spec: spec.clone(),
            options,
        }
    }

    /// Report the current state without changing anything
    pub async fn inspect<C>(&self, conn: &mut C) -> Result<ConversionState>
    where
        C: Connection + ?Sized,
    {
        let table = conn.reflect_table(&self.spec.table).await?;
        ConversionState::detect(conn.engine(), &table, &self.spec)
    }

    pub async fn run<C>(&self, conn: &mut C) -> Result<ConversionOutcome>
    where
        C: Connection + ?Sized,
    {
        let spec = &self.spec;
        if self.options.page_size == 0 {
            bail!("Page size must be greater than zero");
        }
        if spec.key_column.eq_ignore_ascii_case(&spec.column) {
            bail!(
                "Cannot convert {}: it is the primary key column",
                spec
            );
        }

        let table = conn
            .reflect_table(&spec.table)
            .await
            .with_context(|| format!("Failed to inspect table for {}", spec))?;
        let key_kind = table
            .column(&spec.key_column)
            .map(ColumnInfo::key_kind)
            .ok_or_else(|| {
                anyhow!(
                    "Key column '{}' does not exist in table '{}'",
                    spec.key_column,
                    spec.table
                )
            })?;
        let state = ConversionState::detect(conn.engine(), &table, spec)?;

        match state {
            ConversionState::Complete => {
                tracing::info!("{} already converted, nothing to do", spec);
                return Ok(ConversionOutcome::AlreadyConverted);
            }
            ConversionState::NotStarted => {
                tracing::info!("Converting {}...", spec);
            }
            interrupted if !self.options.resume => {
                bail!(
                    "{} was interrupted by an earlier run and is in state '{}'.\n\
                     Inspect table '{}', then rerun with --resume to finish the conversion.",
                    spec,
                    interrupted,
                    spec.table
                );
            }
            interrupted => {
                tracing::warn!("Resuming {} from state '{}'", spec, interrupted);
            }
        }

        if state == ConversionState::NotStarted {
            tracing::info!("  Step 1/4: Adding column {}...", TEMP_COLUMN);
            conn.add_column(&spec.table, TEMP_COLUMN, spec.to).await?;
        }

        let (rows, pages) = if state == ConversionState::OriginalDropped {
            tracing::info!("  Step 2/4: Original column already dropped, skipping backfill");
            (0, 0)
        } else {
            tracing::info!(
                "  Step 2/4: Copying {} into {} ({} rows per page)...",
                spec.column,
                TEMP_COLUMN,
                self.options.page_size
            );
            self.backfill(conn, key_kind).await?
        };

        if state != ConversionState::OriginalDropped {
            tracing::info!("  Step 3/4: Dropping column {}...", spec.column);
            conn.drop_column(&spec.table, &spec.column).await?;
        }

        tracing::info!("  Step 4/4: Renaming {} to {}...", TEMP_COLUMN, spec.column);
        conn.rename_column(&spec.table, TEMP_COLUMN, &spec.column, spec.to)
            .await?;

        tracing::info!("✓ Converted {} ({} rows in {} pages)", spec, rows, pages);
        Ok(ConversionOutcome::Converted { rows, pages })
    }

    /// Copy every value of the original column into the temp column
    ///
    /// Returns the number of rows copied and the number of non-empty pages.
    async fn backfill<C>(&self, conn: &mut C, key_kind: KeyKind) -> Result<(u64, u64)>
    where
        C: Connection + ?Sized,
    {
        let spec = &self.spec;
        let query = PageQuery {
            table: spec.table.clone(),
            key_column: spec.key_column.clone(),
            key_kind,
            value_column: spec.column.clone(),
        };
        let write = PageWrite {
            table: spec.table.clone(),
            key_column: spec.key_column.clone(),
            key_kind,
            target_column: TEMP_COLUMN.to_string(),
            target_format: conn.engine().storage_format(spec.to),
        };
        let mut reader = PagedReader::new(query, self.options.page_size)?;

        let progress = if self.options.show_progress {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .context("Invalid progress template")?,
            );
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner
        } else {
            ProgressBar::hidden()
        };

        while let Some(page) = reader.next_page(&mut *conn).await? {
            conn.write_page(&write, &page).await.with_context(|| {
                format!(
                    "Backfill of {} failed at page {}",
                    spec,
                    reader.fetch_count()
                )
            })?;
            tracing::debug!(
                "    page {}: {} rows written ({} total)",
                reader.fetch_count(),
                page.len(),
                reader.rows_read()
            );
            progress.set_message(format!("{}: {} rows copied", spec, reader.rows_read()));
        }

        progress.finish_and_clear();
        Ok((reader.rows_read(), reader.fetch_count().saturating_sub(1)))
    }
}
