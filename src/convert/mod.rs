// ABOUTME: Column type conversion for engines without in-place type alteration
// ABOUTME: Exports the paged reader, single-column converter, and migration driver

pub mod column;
pub mod driver;
pub mod paged;

use crate::schema::ColumnType;
use serde::Serialize;
use std::fmt;

pub use column::{
    ColumnConverter, ConversionOutcome, ConversionState, ConverterOptions, DEFAULT_PAGE_SIZE,
    TEMP_COLUMN,
};
pub use driver::{
    default_specs, downgrade, upgrade, ConversionReport, Direction, MigrationDriver, SpecStatus,
    TO_CONVERT,
};
pub use paged::PagedReader;

/// One column type swap: which column, keyed by what, from which type to which
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionSpec {
    pub table: String,
    pub column: String,
    pub key_column: String,
    pub from: ColumnType,
    pub to: ColumnType,
}

impl ConversionSpec {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        key_column: impl Into<String>,
        from: ColumnType,
        to: ColumnType,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            key_column: key_column.into(),
            from,
            to,
        }
    }

    /// The same column converted back the other way
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            ..self.clone()
        }
    }
}

impl fmt::Display for ConversionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} ({} -> {})",
            self.table, self.column, self.from, self.to
        )
    }
}
