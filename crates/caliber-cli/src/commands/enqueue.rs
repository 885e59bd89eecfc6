use std::path::Path;

use caliber_core::services::OfflineService;
use caliber_core::MutationKind;

use crate::cli::MutationKindArg;
use crate::commands::common::{open_store, resolve_json_input, resolve_json_object, short_id};
use crate::error::CliError;

pub const fn mutation_kind(arg: MutationKindArg) -> MutationKind {
    match arg {
        MutationKindArg::Create => MutationKind::Create,
        MutationKindArg::Update => MutationKind::Update,
        MutationKindArg::Delete => MutationKind::Delete,
    }
}

/// Queue a mutation as-is, without touching the cache.
pub async fn run_enqueue(
    kind: MutationKindArg,
    entity_kind: &str,
    payload: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = resolve_json_input(payload)?;
    let store = open_store(db_path).await?;
    let mutation = store
        .enqueue(mutation_kind(kind), entity_kind, payload)
        .await?;

    println!(
        "Queued {} {} ({})",
        mutation.kind,
        mutation.entity_key(),
        short_id(&mutation.id.to_string())
    );
    Ok(())
}

pub async fn run_create(
    entity_kind: &str,
    data: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let data = resolve_json_object(data)?;
    let service = OfflineService::new(open_store(db_path).await?);
    let record = service.create(entity_kind, data).await?;

    println!("Created {} (pending sync)", record.key());
    Ok(())
}

pub async fn run_update(
    entity_kind: &str,
    id: &str,
    patch: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let patch = resolve_json_object(patch)?;
    let service = OfflineService::new(open_store(db_path).await?);
    if service.get(entity_kind, id).await?.is_none() {
        return Err(CliError::EntityNotFound(format!("{entity_kind}/{id}")));
    }
    let record = service.update(entity_kind, id, patch).await?;

    println!("Updated {} (pending sync)", record.key());
    Ok(())
}

pub async fn run_delete(entity_kind: &str, id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = OfflineService::new(open_store(db_path).await?);
    let mutation = service.delete(entity_kind, id).await?;

    println!("Deleted {} (pending sync)", mutation.entity_key());
    Ok(())
}
