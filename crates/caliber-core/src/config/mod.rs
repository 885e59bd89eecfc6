//! Runtime configuration for the sync engine and the Supabase backend.
//!
//! Both structs read from the process environment through `from_env`, or from
//! any lookup function through `from_lookup` so tests never touch real env vars.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::backoff::{
    BackoffPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONFLICT_REBASES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Drain engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backoff: BackoffPolicy,
    /// Entity lanes delivered concurrently
    pub concurrency: usize,
    /// Upper bound for one remote call
    pub delivery_timeout: Duration,
    /// Periodic drain while online; `None` disables the timer
    pub sync_interval: Option<Duration>,
    /// Automatic rebases of one mutation per cycle before its conflict is parked for the user
    pub max_conflict_rebases: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            sync_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            max_conflict_rebases: DEFAULT_MAX_CONFLICT_REBASES,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_delay_ms = parse_in_range(
            &lookup,
            "CALIBER_SYNC_BASE_DELAY_MS",
            DEFAULT_BASE_DELAY_MS,
            1..=3_600_000,
        )?;
        let max_delay_ms = parse_in_range(
            &lookup,
            "CALIBER_SYNC_MAX_DELAY_MS",
            DEFAULT_MAX_DELAY_MS,
            1..=86_400_000,
        )?;
        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::Invalid(
                "CALIBER_SYNC_MAX_DELAY_MS must be >= CALIBER_SYNC_BASE_DELAY_MS".to_string(),
            ));
        }
        let max_retries = parse_in_range(
            &lookup,
            "CALIBER_SYNC_MAX_RETRIES",
            u64::from(DEFAULT_MAX_RETRIES),
            1..=100,
        )?;
        let concurrency = parse_in_range(
            &lookup,
            "CALIBER_SYNC_CONCURRENCY",
            DEFAULT_CONCURRENCY as u64,
            1..=64,
        )?;
        let timeout_secs = parse_in_range(
            &lookup,
            "CALIBER_SYNC_TIMEOUT_SECS",
            DEFAULT_DELIVERY_TIMEOUT_SECS,
            1..=120,
        )?;

        let interval_secs = parse_in_range(
            &lookup,
            "CALIBER_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            0..=86_400,
        )?;
        if (1..5).contains(&interval_secs) {
            return Err(ConfigError::Invalid(
                "CALIBER_SYNC_INTERVAL_SECS must be 0 (disabled) or in [5, 86400]".to_string(),
            ));
        }

        Ok(Self {
            backoff: BackoffPolicy::new(
                base_delay_ms,
                max_delay_ms,
                u32::try_from(max_retries).unwrap_or(DEFAULT_MAX_RETRIES),
            ),
            concurrency: usize::try_from(concurrency).unwrap_or(DEFAULT_CONCURRENCY),
            delivery_timeout: Duration::from_secs(timeout_secs),
            sync_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            max_conflict_rebases: DEFAULT_MAX_CONFLICT_REBASES,
        })
    }
}

/// Supabase project settings for the PostgREST backend.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// User session token; the anon key is used as bearer when absent
    pub access_token: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &self.supabase_anon_key)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let supabase_url = required_trimmed(&lookup, "SUPABASE_URL")?;
        if !is_http_url(&supabase_url) {
            return Err(ConfigError::Invalid(
                "SUPABASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let supabase_anon_key = required_trimmed(&lookup, "SUPABASE_ANON_KEY")?;
        let access_token = optional_trimmed(&lookup, "SUPABASE_ACCESS_TOKEN");

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            access_token,
        })
    }

    /// Token sent as `Authorization: Bearer`.
    pub fn bearer_token(&self) -> &str {
        self.access_token
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<u64>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
