//! Per-cycle drain results.

use serde::Serialize;

use crate::models::{EntityKey, MutationId};

/// What happened to one mutation during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Accepted by the server and removed from the queue
    Completed,
    /// Failed transiently; retried once its backoff elapses
    Retrying { attempts: u32, error: String },
    /// Surfaced to the user; no further automatic attempts
    Failed { attempts: u32, error: String },
    /// Conflict resolved automatically with the given resolution label
    ConflictResolved { resolution: String },
    /// Conflict parked for the user
    ConflictOpen,
    /// Backoff has not elapsed yet
    Deferred { retry_at: i64 },
    /// Entity blocked by an earlier surfaced failure or open conflict
    Blocked,
}

impl MutationOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::ConflictOpen => "conflict_open",
            Self::Deferred { .. } => "deferred",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub mutation_id: MutationId,
    pub entity: EntityKey,
    pub outcome: MutationOutcome,
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub outcomes: Vec<MutationReport>,
    /// Cycle stopped early because cancellation was requested
    pub cancelled: bool,
    /// In-flight leftovers from an interrupted cycle put back in the queue
    pub recovered: u64,
}

impl DrainReport {
    pub(crate) fn push(
        &mut self,
        mutation_id: MutationId,
        entity: EntityKey,
        outcome: MutationOutcome,
    ) {
        self.outcomes.push(MutationReport {
            mutation_id,
            entity,
            outcome,
        });
    }

    pub(crate) fn extend(&mut self, other: Self) {
        self.outcomes.extend(other.outcomes);
        self.cancelled |= other.cancelled;
        self.recovered += other.recovered;
    }

    /// No delivery was attempted.
    pub fn is_noop(&self) -> bool {
        self.outcomes.iter().all(|report| {
            matches!(
                report.outcome,
                MutationOutcome::Deferred { .. } | MutationOutcome::Blocked
            )
        })
    }

    /// Deliveries the server accepted.
    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, MutationOutcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| {
            matches!(
                outcome,
                MutationOutcome::Retrying { .. } | MutationOutcome::Failed { .. }
            )
        })
    }

    pub fn conflicts(&self) -> usize {
        self.count(|outcome| {
            matches!(
                outcome,
                MutationOutcome::ConflictOpen | MutationOutcome::ConflictResolved { .. }
            )
        })
    }

    pub fn outcome_for(&self, mutation_id: &MutationId) -> Option<&MutationOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|report| report.mutation_id == *mutation_id)
            .map(|report| &report.outcome)
    }

    fn count(&self, predicate: impl Fn(&MutationOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}
