use std::path::Path;

use caliber_core::conflict::Resolution;
use caliber_core::services::OfflineService;

use crate::cli::ResolveChoice;
use crate::commands::common::{
    conflict_log_to_item, format_conflict_log_lines, format_open_conflict_lines,
    open_conflict_to_item, open_store, parse_json_object, resolve_mutation_id, ConflictLogItem,
    OpenConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(
    show_log: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    if show_log {
        let entries = store.conflict_log(limit).await?;
        if as_json {
            let json_items = entries
                .iter()
                .map(conflict_log_to_item)
                .collect::<Vec<ConflictLogItem>>();
            println!("{}", serde_json::to_string_pretty(&json_items)?);
        } else if entries.is_empty() {
            println!("No sync conflicts recorded.");
        } else {
            for line in format_conflict_log_lines(&entries) {
                println!("{line}");
            }
        }
        return Ok(());
    }

    let conflicts = store.open_conflicts().await?;
    if as_json {
        let json_items = conflicts
            .iter()
            .map(open_conflict_to_item)
            .collect::<Vec<OpenConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if conflicts.is_empty() {
        println!("No open conflicts.");
    } else {
        for line in format_open_conflict_lines(&conflicts) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn resolution_for(
    choice: ResolveChoice,
    payload: Option<&str>,
) -> Result<Resolution, CliError> {
    match choice {
        ResolveChoice::Local => Ok(Resolution::UseLocal),
        ResolveChoice::Remote => Ok(Resolution::UseRemote),
        ResolveChoice::Merge => {
            let payload = payload.ok_or(CliError::MergePayloadRequired)?;
            Ok(Resolution::Merge(parse_json_object(payload)?))
        }
    }
}

pub async fn run_resolve(
    id: &str,
    choice: ResolveChoice,
    payload: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let resolution = resolution_for(choice, payload)?;
    let store = open_store(db_path).await?;
    let mutation_id = resolve_mutation_id(id, &store).await?;
    let entry = OfflineService::new(store)
        .resolve_conflict(&mutation_id, resolution)
        .await?;

    println!(
        "Resolved {}/{} with {}",
        entry.entity_kind, entry.entity_id, entry.resolution
    );
    Ok(())
}
