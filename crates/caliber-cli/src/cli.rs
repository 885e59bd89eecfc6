use std::path::PathBuf;

use caliber_core::conflict::BuiltinStrategy;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "caliber")]
#[command(about = "Inspect and drive the CaliberVault offline sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a raw mutation for delivery
    Enqueue {
        /// Mutation kind
        #[arg(value_enum)]
        kind: MutationKindArg,
        /// Entity kind (remote table name)
        entity_kind: String,
        /// JSON payload (read from stdin when omitted)
        payload: Option<String>,
    },
    /// Create a record locally and queue it
    Create {
        /// Entity kind (remote table name)
        entity_kind: String,
        /// JSON object (read from stdin when omitted)
        data: Option<String>,
    },
    /// Patch a cached record locally and queue the change
    Update {
        /// Entity kind (remote table name)
        entity_kind: String,
        /// Entity ID
        id: String,
        /// JSON object with the changed fields (read from stdin when omitted)
        patch: Option<String>,
    },
    /// Delete a record locally and queue the deletion
    Delete {
        /// Entity kind (remote table name)
        entity_kind: String,
        /// Entity ID
        id: String,
    },
    /// List queued mutations
    Queue {
        /// Show mutations that need attention instead of pending ones
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one drain cycle against Supabase
    Sync {
        /// Conflict strategy
        #[arg(long, default_value_t = BuiltinStrategy::NewestWins)]
        strategy: BuiltinStrategy,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground, following connectivity
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "15", value_parser = clap::value_parser!(u64).range(1..=3600))]
        probe_interval: u64,
        /// Conflict strategy
        #[arg(long, default_value_t = BuiltinStrategy::NewestWins)]
        strategy: BuiltinStrategy,
    },
    /// Force-retry a failed mutation
    Retry {
        /// Mutation ID or unique ID prefix
        id: String,
    },
    /// Drop a queued mutation without delivering it
    Discard {
        /// Mutation ID or unique ID prefix
        id: String,
    },
    /// List open conflicts, or the resolution log
    Conflicts {
        /// Show resolved conflicts instead of open ones
        #[arg(long)]
        log: bool,
        /// Number of log entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve an open conflict
    Resolve {
        /// Mutation ID or unique ID prefix
        id: String,
        /// How to resolve it
        #[arg(value_enum)]
        choice: ResolveChoice,
        /// Merged JSON payload (required for `merge`)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Inspect the local entity cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Refresh the cache for one entity kind from Supabase
    Pull {
        /// Entity kind (remote table name)
        entity_kind: String,
    },
    /// Wipe queue, cache, conflicts, and sync metadata
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached records of one kind
    List {
        /// Entity kind
        entity_kind: String,
        /// Only records with unsynced changes
        #[arg(long)]
        dirty: bool,
        /// Top-level field filter, e.g. `caliber=.308`
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        filter: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one cached record as JSON
    Get {
        /// Entity kind
        entity_kind: String,
        /// Entity ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum MutationKindArg {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveChoice {
    /// Keep the local change and retry it
    Local,
    /// Drop the local change and keep the server value
    Remote,
    /// Retry with a combined payload
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
