// ABOUTME: Schema and value model shared by every backend
// ABOUTME: Exports engine capabilities, column type descriptors, reflected tables, and codecs

pub mod codec;
pub mod table;
pub mod types;

pub use table::{ColumnInfo, KeyKind, KeyValue, Row, TableSchema};
pub use types::{ColumnType, Engine, StorageFormat};
