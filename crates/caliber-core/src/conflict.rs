//! Conflict resolution between pending local changes and the remote record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::ConflictRecord;

/// Clock skew tolerated before two timestamps count as divergent.
pub const DIVERGENCE_TOLERANCE_MS: i64 = 1_000;

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local change and retry it against the new remote version
    UseLocal,
    /// Drop the local change and adopt the remote value
    UseRemote,
    /// Retry with a combined payload
    Merge(serde_json::Value),
    /// Park for the user
    Manual,
}

impl Resolution {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UseLocal => "use_local",
            Self::UseRemote => "use_remote",
            Self::Merge(_) => "merge",
            Self::Manual => "manual",
        }
    }
}

/// Pluggable policy that turns a conflict into a resolution.
pub trait ConflictStrategy: Send + Sync {
    fn resolve(&self, conflict: &ConflictRecord) -> Resolution;
}

impl<F> ConflictStrategy for F
where
    F: Fn(&ConflictRecord) -> Resolution + Send + Sync,
{
    fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        self(conflict)
    }
}

/// Built-in strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinStrategy {
    ServerWins,
    ClientWins,
    /// Last-write-wins by timestamp. Ties go to the user.
    #[default]
    NewestWins,
    ManualOnly,
    /// Remote value with local non-null fields filling remote gaps
    MergeFields,
}

impl BuiltinStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "server-wins",
            Self::ClientWins => "client-wins",
            Self::NewestWins => "newest-wins",
            Self::ManualOnly => "manual",
            Self::MergeFields => "merge-fields",
        }
    }
}

impl fmt::Display for BuiltinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltinStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server-wins" | "server" => Ok(Self::ServerWins),
            "client-wins" | "client" => Ok(Self::ClientWins),
            "newest-wins" | "newest" => Ok(Self::NewestWins),
            "manual" | "manual-only" => Ok(Self::ManualOnly),
            "merge-fields" | "merge" => Ok(Self::MergeFields),
            other => Err(format!("unknown conflict strategy '{other}'")),
        }
    }
}

impl ConflictStrategy for BuiltinStrategy {
    fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        match self {
            Self::ServerWins => Resolution::UseRemote,
            Self::ClientWins => Resolution::UseLocal,
            Self::NewestWins => newest_wins(conflict),
            Self::ManualOnly => Resolution::Manual,
            Self::MergeFields => Resolution::Merge(merge_fields(
                &conflict.local_value,
                &conflict.remote_value,
            )),
        }
    }
}

fn newest_wins(conflict: &ConflictRecord) -> Resolution {
    match conflict.local_timestamp.cmp(&conflict.remote_timestamp) {
        std::cmp::Ordering::Greater => Resolution::UseLocal,
        std::cmp::Ordering::Less => Resolution::UseRemote,
        std::cmp::Ordering::Equal => Resolution::Manual,
    }
}

/// Resolver invoked by the engine once a real conflict is established.
pub struct ConflictResolver {
    strategy: Box<dyn ConflictStrategy>,
}

impl ConflictResolver {
    pub fn new(strategy: impl ConflictStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
        }
    }

    pub fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        let resolution = self.strategy.resolve(conflict);
        tracing::debug!(
            entity = %conflict.entity_key(),
            local_timestamp = conflict.local_timestamp,
            remote_timestamp = conflict.remote_timestamp,
            resolution = resolution.label(),
            "Resolved sync conflict"
        );
        resolution
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(BuiltinStrategy::default())
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver").finish_non_exhaustive()
    }
}

/// Start from `remote` and fill in local fields that are non-null where remote has none.
pub fn merge_fields(local: &serde_json::Value, remote: &serde_json::Value) -> serde_json::Value {
    let (serde_json::Value::Object(local), serde_json::Value::Object(remote)) = (local, remote)
    else {
        return remote.clone();
    };

    let mut merged = remote.clone();
    for (key, value) in local {
        if value.is_null() {
            continue;
        }
        if merged.get(key).is_none_or(serde_json::Value::is_null) {
            merged.insert(key.clone(), value.clone());
        }
    }
    serde_json::Value::Object(merged)
}

/// Whether two timestamps differ by more than `tolerance_ms`.
pub const fn is_divergent(local_ts: i64, remote_ts: i64, tolerance_ms: i64) -> bool {
    local_ts.abs_diff(remote_ts) > tolerance_ms.unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict(local_timestamp: i64, remote_timestamp: i64) -> ConflictRecord {
        ConflictRecord {
            entity_kind: "item".into(),
            entity_id: "42".into(),
            local_value: json!({"id": "42", "price": 100, "notes": "scope", "serial": null}),
            remote_value: json!({"id": "42", "price": 120, "notes": null, "serial": "A1"}),
            local_timestamp,
            remote_timestamp,
        }
    }

    #[test]
    fn newest_wins_by_timestamp() {
        let resolver = ConflictResolver::default();
        assert_eq!(resolver.resolve(&conflict(2_000, 1_000)), Resolution::UseLocal);
        assert_eq!(resolver.resolve(&conflict(1_000, 2_000)), Resolution::UseRemote);
    }

    #[test]
    fn newest_wins_tie_is_manual() {
        let resolver = ConflictResolver::default();
        assert_eq!(resolver.resolve(&conflict(1_000, 1_000)), Resolution::Manual);
    }

    #[test]
    fn fixed_strategies_ignore_timestamps() {
        let record = conflict(5, 1);
        assert_eq!(BuiltinStrategy::ServerWins.resolve(&record), Resolution::UseRemote);
        assert_eq!(BuiltinStrategy::ClientWins.resolve(&conflict(1, 5)), Resolution::UseLocal);
        assert_eq!(BuiltinStrategy::ManualOnly.resolve(&record), Resolution::Manual);
    }

    #[test]
    fn merge_fields_prefers_remote_and_fills_gaps() {
        let record = conflict(1, 2);
        let Resolution::Merge(merged) = BuiltinStrategy::MergeFields.resolve(&record) else {
            panic!("expected merge");
        };
        assert_eq!(
            merged,
            json!({"id": "42", "price": 120, "notes": "scope", "serial": "A1"})
        );
    }

    #[test]
    fn merge_fields_with_non_objects_returns_remote() {
        assert_eq!(merge_fields(&json!(1), &json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn closures_are_strategies() {
        let resolver = ConflictResolver::new(|conflict: &ConflictRecord| {
            if conflict.entity_kind == "item" {
                Resolution::UseRemote
            } else {
                Resolution::Manual
            }
        });
        assert_eq!(resolver.resolve(&conflict(9, 1)), Resolution::UseRemote);
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!(
            "Server-Wins".parse::<BuiltinStrategy>().unwrap(),
            BuiltinStrategy::ServerWins
        );
        assert_eq!(
            "merge".parse::<BuiltinStrategy>().unwrap(),
            BuiltinStrategy::MergeFields
        );
        assert!("coin-flip".parse::<BuiltinStrategy>().is_err());
    }

    #[test]
    fn divergence_uses_tolerance() {
        assert!(!is_divergent(10_000, 10_900, DIVERGENCE_TOLERANCE_MS));
        assert!(!is_divergent(10_000, 11_000, DIVERGENCE_TOLERANCE_MS));
        assert!(is_divergent(10_000, 11_001, DIVERGENCE_TOLERANCE_MS));
        assert!(is_divergent(12_000, 10_000, DIVERGENCE_TOLERANCE_MS));
    }

    #[test]
    fn resolution_labels() {
        assert_eq!(Resolution::Merge(json!({})).label(), "merge");
        assert_eq!(Resolution::UseLocal.label(), "use_local");
    }
}
