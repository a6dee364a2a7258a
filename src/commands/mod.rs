// ABOUTME: Command implementations for the migrator CLI
// ABOUTME: Exports the migrate (upgrade/downgrade) and status commands

pub mod migrate;
pub mod status;

pub use migrate::migrate;
pub use status::status;
