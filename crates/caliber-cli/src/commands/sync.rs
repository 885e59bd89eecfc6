use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use caliber_core::conflict::{BuiltinStrategy, ConflictResolver};
use caliber_core::connectivity::connectivity;
use caliber_core::engine::{DrainReport, MutationOutcome, SyncEngine, SyncScheduler};
use caliber_core::remote::SupabaseBackend;
use tokio::time::MissedTickBehavior;

use crate::commands::common::{
    engine_config, env_lookup, open_store, short_id, supabase_backend,
};
use crate::error::CliError;

async fn build_engine(
    strategy: BuiltinStrategy,
    db_path: &Path,
) -> Result<(SyncEngine<SupabaseBackend>, SupabaseBackend), CliError> {
    let backend = supabase_backend(env_lookup)?;
    let config = engine_config(env_lookup)?;
    let store = open_store(db_path).await?;
    let engine = SyncEngine::new(store, backend.clone(), config)
        .with_resolver(ConflictResolver::new(strategy));
    Ok((engine, backend))
}

pub async fn run_sync(
    strategy: BuiltinStrategy,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let (engine, _) = build_engine(strategy, db_path).await?;
    let report = engine.drain().await?.ok_or(CliError::SyncInProgress)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_report_lines(&report) {
        println!("{line}");
    }
    println!("{}", summarize_report(&report));
    Ok(())
}

pub fn format_report_lines(report: &DrainReport) -> Vec<String> {
    report
        .outcomes
        .iter()
        .map(|entry| {
            let detail = match &entry.outcome {
                MutationOutcome::Retrying { attempts, error }
                | MutationOutcome::Failed { attempts, error } => {
                    format!("  attempts={attempts}  error={error}")
                }
                MutationOutcome::ConflictResolved { resolution } => format!("  {resolution}"),
                MutationOutcome::Deferred { retry_at } => format!("  retry_at={retry_at}"),
                _ => String::new(),
            };
            format!(
                "{:<13}  {:<17}  {}{detail}",
                short_id(&entry.mutation_id.to_string()),
                entry.outcome.label(),
                entry.entity
            )
        })
        .collect()
}

pub fn summarize_report(report: &DrainReport) -> String {
    if report.is_noop() {
        return "Nothing to sync".to_string();
    }
    let mut summary = format!(
        "Sync finished: {} delivered, {} failed, {} conflicts",
        report.succeeded(),
        report.failed(),
        report.conflicts()
    );
    if report.cancelled {
        summary.push_str(" (cancelled)");
    }
    summary
}

/// Run the scheduler in the foreground until Ctrl-C.
///
/// Connectivity is approximated by probing the Supabase REST endpoint.
pub async fn run_watch(
    probe_interval_secs: u64,
    strategy: BuiltinStrategy,
    db_path: &Path,
) -> Result<(), CliError> {
    let (engine, backend) = build_engine(strategy, db_path).await?;
    let (network, signal) = connectivity(backend.probe().await.is_ok());
    let scheduler = SyncScheduler::spawn(Arc::new(engine), signal);
    let mut states = scheduler.subscribe();

    let mut probe = tokio::time::interval(Duration::from_secs(probe_interval_secs));
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    println!("Watching for changes (Ctrl-C to stop)");
    println!("State: {}", scheduler.state().label());
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = probe.tick() => {
                let online = backend.probe().await.is_ok();
                network.set_online(online);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("State: {}", state.label());
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

pub async fn run_pull(entity_kind: &str, db_path: &Path) -> Result<(), CliError> {
    let backend = supabase_backend(env_lookup)?;
    let records = backend
        .list(entity_kind)
        .await
        .map_err(caliber_core::Error::from)?;
    let store = open_store(db_path).await?;
    let diverged = store.apply_remote_snapshot(entity_kind, &records).await?;

    println!("Pulled {} {entity_kind} records", records.len());
    for key in &diverged {
        println!("Changed remotely while edited locally: {key}");
    }
    Ok(())
}
