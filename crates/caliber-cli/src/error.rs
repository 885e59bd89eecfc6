use std::io;

use caliber_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] caliber_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("No payload provided")]
    EmptyPayload,
    #[error("Mutation ID cannot be empty")]
    EmptyMutationId,
    #[error("Mutation not found for id/prefix: {0}")]
    MutationNotFound(String),
    #[error("{0}")]
    AmbiguousMutationId(String),
    #[error("No cached {0}")]
    EntityNotFound(String),
    #[error("Invalid filter '{0}': expected FIELD=VALUE")]
    InvalidFilter(String),
    #[error("`merge` needs --payload with the merged JSON object")]
    MergePayloadRequired,
    #[error("Refusing to wipe local sync state without --yes")]
    ConfirmationRequired,
    #[error("A sync cycle is already running")]
    SyncInProgress,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(
        "Sync is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY (and SUPABASE_ACCESS_TOKEN for a signed-in session)."
    )]
    SyncNotConfigured,
}
