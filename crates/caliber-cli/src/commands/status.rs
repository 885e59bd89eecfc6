use std::path::Path;

use caliber_core::util::format_millis;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_store};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub db_path: String,
    pub pending: usize,
    pub in_flight: usize,
    pub needs_attention: usize,
    pub open_conflicts: usize,
    pub last_sync_at: Option<i64>,
    pub last_sync_at_iso: Option<String>,
}

pub async fn load_status(db_path: &Path) -> Result<StatusItem, CliError> {
    let store = open_store(db_path).await?;
    let last_sync_at = store.last_sync_at().await?;

    Ok(StatusItem {
        db_path: db_path.display().to_string(),
        pending: store.list_pending().await?.len(),
        in_flight: store.list_in_flight().await?.len(),
        needs_attention: store.list_failed().await?.len(),
        open_conflicts: store.open_conflicts().await?.len(),
        last_sync_at,
        last_sync_at_iso: last_sync_at.map(format_millis),
    })
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let status = load_status(db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Database:        {}", status.db_path);
    println!("Pending:         {}", status.pending);
    if status.in_flight > 0 {
        println!("In flight:       {}", status.in_flight);
    }
    println!("Needs attention: {}", status.needs_attention);
    println!("Open conflicts:  {}", status.open_conflicts);
    println!(
        "Last sync:       {}",
        status
            .last_sync_at
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    Ok(())
}

pub async fn run_reset(confirmed: bool, db_path: &Path) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }

    let store = open_store(db_path).await?;
    store.reset().await?;
    println!("Local sync state cleared");
    Ok(())
}
