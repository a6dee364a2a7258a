// ABOUTME: Status command implementation - report conversion progress per column
// ABOUTME: Prints a table or JSON without touching the database schema

use crate::convert::{ConverterOptions, MigrationDriver, SpecStatus};
use crate::db;
use crate::utils;
use anyhow::{Context, Result};

/// Show where each alarm timestamp column stands on the database at `database_url`
///
/// Interrupted conversions are flagged so an operator knows to rerun with
/// `--resume`.
pub async fn status(database_url: &str, json: bool) -> Result<()> {
    utils::validate_connection_string(database_url).context("Invalid database URL")?;

    tracing::info!("Checking conversion status...");
    tracing::info!("Connecting to {}...", utils::redact_url(database_url));
    let mut conn = db::connect_with_retry(database_url)
        .await
        .context("Failed to connect to database")?;

    let driver = MigrationDriver::new(ConverterOptions::default());
    let statuses = driver
        .status(&mut *conn)
        .await
        .context("Failed to inspect columns")?;

    if json {
        let output =
            serde_json::to_string_pretty(&statuses).context("Failed to serialize status")?;
        println!("{}", output);
    } else {
        println!("{}", render_table(&statuses));
    }

    let interrupted = statuses
        .iter()
        .filter(|s| s.state.map(|state| state.is_interrupted()).unwrap_or(false))
        .count();
    if interrupted > 0 {
        tracing::warn!(
            "⚠ {} column(s) were left mid-conversion. Rerun with --resume to finish them.",
            interrupted
        );
    }

    Ok(())
}

fn render_table(statuses: &[SpecStatus]) -> String {
    let mut lines = Vec::with_capacity(statuses.len() + 2);
    lines.push(format!("{:<32} {:<12} {}", "Column", "Engine", "State"));
    lines.push("─".repeat(64));

    for status in statuses {
        let state = match status.state {
            None => "native (no rewrite needed)".to_string(),
            Some(state) if state.is_interrupted() => format!("{} ⚠", state),
            Some(state) => state.to_string(),
        };
        lines.push(format!(
            "{:<32} {:<12} {}",
            utils::sanitize_identifier(&format!(
                "{}.{}",
                status.spec.table, status.spec.column
            )),
            status.engine,
            state
        ));
    }

    lines.join("\n")
}
