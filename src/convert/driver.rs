// ABOUTME: Applies the column converter across the fixed list of alarm timestamp columns
// ABOUTME: Skips every column on engines that can change the type in place

use super::column::{ColumnConverter, ConversionOutcome, ConversionState, ConverterOptions};
use super::ConversionSpec;
use crate::db::Connection;
use crate::schema::{ColumnType, Engine};
use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// (table, column, primary key) triples moved from `DateTime` to `PreciseTimestamp`
pub const TO_CONVERT: [(&str, &str, &str); 3] = [
    ("alarm", "timestamp", "id"),
    ("alarm", "state_timestamp", "id"),
    ("alarm_history", "timestamp", "alarm_id"),
];

/// Conversion specs for the upgrade direction, in application order
pub fn default_specs() -> Vec<ConversionSpec> {
    TO_CONVERT
        .iter()
        .map(|(table, column, key)| {
            ConversionSpec::new(
                *table,
                *column,
                *key,
                ColumnType::DateTime,
                ColumnType::PreciseTimestamp,
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    /// Orient an upgrade spec for this direction
    pub fn orient(&self, spec: &ConversionSpec) -> ConversionSpec {
        match self {
            Direction::Upgrade => spec.clone(),
            Direction::Downgrade => spec.reversed(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => write!(f, "upgrade"),
            Direction::Downgrade => write!(f, "downgrade"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub spec: ConversionSpec,
    #[serde(flatten)]
    pub outcome: ConversionOutcome,
}

/// Where one upgrade spec stands on a given database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecStatus {
    pub spec: ConversionSpec,
    pub engine: Engine,
    /// The engine converts this type in place, so no column rewrite is needed
    pub native: bool,
    /// Reflected progress; not reported for native engines
    pub state: Option<ConversionState>,
}

/// Runs one [`ColumnConverter`] per spec, strictly in order
pub struct MigrationDriver {
    specs: Vec<ConversionSpec>,
    options: ConverterOptions,
}

impl MigrationDriver {
    pub fn new(options: ConverterOptions) -> Self {
        Self::with_specs(default_specs(), options)
    }

    /// Drive a custom list of upgrade specs
    pub fn with_specs(specs: Vec<ConversionSpec>, options: ConverterOptions) -> Self {
        Self { specs, options }
    }

    pub fn specs(&self) -> &[ConversionSpec] {
        &self.specs
    }

    pub async fn upgrade<C>(&self, conn: &mut C) -> Result<Vec<ConversionReport>>
    where
        C: Connection + ?Sized,
    {
        self.run(Direction::Upgrade, conn).await
    }

    pub async fn downgrade<C>(&self, conn: &mut C) -> Result<Vec<ConversionReport>>
    where
        C: Connection + ?Sized,
    {
        self.run(Direction::Downgrade, conn).await
    }

    /// Convert every spec in `direction`
    ///
    /// The first failure aborts the run; specs already converted stay converted.
    pub async fn run<C>(&self, direction: Direction, conn: &mut C) -> Result<Vec<ConversionReport>>
    where
        C: Connection + ?Sized,
    {
        let engine = conn.engine();
        let mut reports = Vec::with_capacity(self.specs.len());

        for (index, upgrade_spec) in self.specs.iter().enumerate() {
            let spec = direction.orient(upgrade_spec);
            tracing::info!(
                "[{}/{}] {} {}",
                index + 1,
                self.specs.len(),
                direction,
                spec
            );

            let outcome = if engine.supports_native_conversion(spec.from, spec.to) {
                tracing::info!(
                    "  {} converts {} to {} natively, skipping",
                    engine,
                    spec.from,
                    spec.to
                );
                ConversionOutcome::Skipped
            } else {
                ColumnConverter::new(&spec, self.options)
                    .run(&mut *conn)
                    .await?
            };

            reports.push(ConversionReport { spec, outcome });
        }

        Ok(reports)
    }

    /// Reflect the state of every upgrade spec without changing anything
    pub async fn status<C>(&self, conn: &mut C) -> Result<Vec<SpecStatus>>
    where
        C: Connection + ?Sized,
    {
        let engine = conn.engine();
        let mut statuses = Vec::with_capacity(self.specs.len());

        for spec in &self.specs {
            let native = engine.supports_native_conversion(spec.from, spec.to);
            let state = if native {
                None
            } else {
                Some(
                    ColumnConverter::new(spec, self.options)
                        .inspect(&mut *conn)
                        .await?,
                )
            };
            statuses.push(SpecStatus {
                spec: spec.clone(),
                engine,
                native,
                state,
            });
        }

        Ok(statuses)
    }
}

/// Move the alarm timestamp columns to `PreciseTimestamp` with default options
pub async fn upgrade<C>(conn: &mut C) -> Result<()>
where
    C: Connection + ?Sized,
{
    MigrationDriver::new(ConverterOptions::default())
        .upgrade(conn)
        .await?;
    Ok(())
}

/// Move the alarm timestamp columns back to `DateTime` with default options
pub async fn downgrade<C>(conn: &mut C) -> Result<()>
where
    C: Connection + ?Sized,
{
    MigrationDriver::new(ConverterOptions::default())
        .downgrade(conn)
        .await?;
    Ok(())
}
