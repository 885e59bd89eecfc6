use std::path::Path;

use crate::commands::common::{format_mutation_lines, mutation_to_item, open_store, MutationItem};
use crate::error::CliError;

pub async fn run_queue(failed: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mutations = if failed {
        store.list_failed().await?
    } else {
        store.list_pending().await?
    };

    if as_json {
        let json_items = mutations
            .iter()
            .map(mutation_to_item)
            .collect::<Vec<MutationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if mutations.is_empty() {
        if failed {
            println!("No mutations need attention.");
        } else {
            println!("Queue is empty.");
        }
        return Ok(());
    }

    for line in format_mutation_lines(&mutations) {
        println!("{line}");
    }
    Ok(())
}
