// ABOUTME: Library module for precise-timestamp-migrator
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod config;
pub mod convert;
pub mod db;
pub mod schema;
pub mod utils;

pub use convert::{downgrade, upgrade};
