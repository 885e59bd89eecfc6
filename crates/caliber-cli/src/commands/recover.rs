use std::path::Path;

use caliber_core::services::OfflineService;

use crate::commands::common::{open_store, resolve_mutation_id, short_id};
use crate::error::CliError;

pub async fn run_retry(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mutation_id = resolve_mutation_id(id, &store).await?;
    let mutation = OfflineService::new(store).retry(&mutation_id).await?;

    println!(
        "Queued {} for retry ({})",
        mutation.entity_key(),
        short_id(&mutation.id.to_string())
    );
    Ok(())
}

pub async fn run_discard(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mutation_id = resolve_mutation_id(id, &store).await?;
    if !OfflineService::new(store).discard(&mutation_id).await? {
        return Err(CliError::MutationNotFound(id.trim().to_string()));
    }

    println!("Discarded {}", short_id(&mutation_id.to_string()));
    Ok(())
}
