use std::path::Path;

use caliber_core::models::CacheFilter;

use crate::commands::common::{
    entity_to_item, format_entity_lines, open_store, parse_field_filter, EntityItem,
};
use crate::error::CliError;

pub fn cache_filter(dirty_only: bool, field: Option<&str>) -> Result<Option<CacheFilter>, CliError> {
    let filter = match field {
        Some(raw) => Some(parse_field_filter(raw)?),
        None => None,
    };
    Ok(match (filter, dirty_only) {
        (Some(filter), true) => Some(filter.and_dirty()),
        (Some(filter), false) => Some(filter),
        (None, true) => Some(CacheFilter::dirty()),
        (None, false) => None,
    })
}

pub async fn run_cache_list(
    entity_kind: &str,
    dirty_only: bool,
    field: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let filter = cache_filter(dirty_only, field)?;
    let store = open_store(db_path).await?;
    let records = store.list_entities(entity_kind, filter.as_ref()).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(entity_to_item)
            .collect::<Vec<EntityItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No cached {entity_kind} records.");
        return Ok(());
    }

    for line in format_entity_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_cache_get(entity_kind: &str, id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let record = store
        .get_entity(entity_kind, id)
        .await?
        .ok_or_else(|| CliError::EntityNotFound(format!("{entity_kind}/{id}")))?;

    println!("{}", serde_json::to_string_pretty(&entity_to_item(&record))?);
    Ok(())
}
