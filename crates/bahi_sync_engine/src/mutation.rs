//! Mutation lifecycle state machine and the dedup registry.
//!
//! Every write accepted by the broker becomes an `OptimisticMutation` that
//! moves through a small state machine:
//!
//! ```text
//! Pending ──► Confirmed                      (terminal success)
//! Pending ──► Retrying ──► Confirmed|Failed  (transient errors, bounded)
//! Pending|Retrying ──► Failed ──► RolledBack (terminal failure)
//! ```
//!
//! Terminal mutations are retained for the configured dedup window so that
//! the change feed can still recognize their remote echo, then evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bahi_core::{BatchId, MutationId, RecordId, Table, Timestamp};
use parking_lot::Mutex;
use tracing::trace;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// The kind of write a mutation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// A single create.
    Create,
    /// An update patch.
    Update,
    /// A soft delete.
    Delete,
    /// One member of a batch create.
    BatchCreate,
}

/// Lifecycle state of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Dispatched (or about to be); no outcome yet.
    Pending,
    /// A transient failure occurred; waiting for the next bounded attempt.
    Retrying,
    /// The remote store accepted the write. Terminal.
    Confirmed,
    /// The write failed; local state not yet reverted.
    Failed,
    /// Local state was reverted after failure. Terminal.
    RolledBack,
}

impl MutationState {
    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Confirmed | MutationState::RolledBack)
    }

    /// Returns true while a remote outcome is still possible.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, MutationState::Pending | MutationState::Retrying)
    }

    /// Returns true if the transition to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: MutationState) -> bool {
        use MutationState::{Confirmed, Failed, Pending, Retrying, RolledBack};
        matches!(
            (self, next),
            (Pending, Retrying | Confirmed | Failed)
                | (Retrying, Retrying | Confirmed | Failed)
                | (Failed, RolledBack)
        )
    }
}

/// One in-flight or recently terminal change.
#[derive(Debug, Clone)]
pub struct OptimisticMutation {
    /// Unique per attempt, generated locally.
    pub id: MutationId,
    /// The affected table.
    pub table: Table,
    /// The kind of write.
    pub op: MutationOp,
    /// The target record id, known up front even for creates.
    pub target: RecordId,
    /// Batch correlation id for batch creates.
    pub batch: Option<BatchId>,
    /// Current lifecycle state.
    pub state: MutationState,
    /// Number of dispatch attempts made.
    pub attempts: u32,
    /// Last error observed, if any.
    pub last_error: Option<String>,
    /// The `updated_at` the optimistic write stamped locally.
    pub local_updated_at: Timestamp,
    /// The `updated_at` of the authoritative post-image, once confirmed.
    pub confirmed_updated_at: Option<Timestamp>,
    /// When the mutation reached a terminal state.
    terminal_at: Option<Instant>,
}

/// The in-flight and recently-terminal mutation registry.
///
/// Owned exclusively by the engine; callers never touch it directly. The
/// feed manager consults it to classify inbound events as echoes of local
/// writes. Eviction is lazy: every access prunes terminal entries older
/// than the dedup window.
#[derive(Debug)]
pub struct MutationRegistry {
    echo_window_ms: i64,
    dedup_ttl: Duration,
    inner: Mutex<HashMap<MutationId, OptimisticMutation>>,
}

impl MutationRegistry {
    /// Creates a registry using the engine's dedup configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            echo_window_ms: config.echo_window.as_millis() as i64,
            dedup_ttl: config.dedup_ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new pending mutation and returns its id.
    pub fn register(
        &self,
        table: Table,
        op: MutationOp,
        target: RecordId,
        local_updated_at: Timestamp,
        batch: Option<BatchId>,
    ) -> MutationId {
        let id = MutationId::generate();
        let mutation = OptimisticMutation {
            id,
            table,
            op,
            target,
            batch,
            state: MutationState::Pending,
            attempts: 0,
            last_error: None,
            local_updated_at,
            confirmed_updated_at: None,
            terminal_at: None,
        };
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, self.dedup_ttl);
        inner.insert(id, mutation);
        id
    }

    /// Counts one dispatch attempt.
    pub fn record_attempt(&self, id: MutationId) {
        if let Some(m) = self.inner.lock().get_mut(&id) {
            m.attempts += 1;
        }
    }

    /// Moves a mutation into `Retrying`.
    pub fn mark_retrying(&self, id: MutationId) {
        self.transition(id, MutationState::Retrying);
    }

    /// Confirms a mutation with the authoritative `updated_at`.
    pub fn confirm(&self, id: MutationId, confirmed_updated_at: Timestamp) {
        let mut inner = self.inner.lock();
        if let Some(m) = inner.get_mut(&id) {
            if m.state.can_transition_to(MutationState::Confirmed) {
                m.state = MutationState::Confirmed;
                m.confirmed_updated_at = Some(confirmed_updated_at);
                m.terminal_at = Some(Instant::now());
            } else {
                trace!(mutation = %id, state = ?m.state, "ignoring confirm in terminal state");
            }
        }
    }

    /// Records a failure.
    pub fn fail(&self, id: MutationId, error: &EngineError) {
        let mut inner = self.inner.lock();
        if let Some(m) = inner.get_mut(&id) {
            if m.state.can_transition_to(MutationState::Failed) {
                m.state = MutationState::Failed;
                m.last_error = Some(error.to_string());
            }
        }
    }

    /// Marks a failed mutation as rolled back (terminal).
    pub fn mark_rolled_back(&self, id: MutationId) {
        let mut inner = self.inner.lock();
        if let Some(m) = inner.get_mut(&id) {
            if m.state.can_transition_to(MutationState::RolledBack) {
                m.state = MutationState::RolledBack;
                m.terminal_at = Some(Instant::now());
            }
        }
    }

    /// Returns true if a feed event for `target` at `event_ts` is the echo
    /// of a mutation this client issued.
    ///
    /// Matches in-flight mutations and terminal ones still inside the dedup
    /// window, comparing the event timestamp against both the optimistic
    /// and the confirmed `updated_at` within the epsilon window. Rolled-back
    /// mutations never match: their write did not survive, so a remote
    /// event for the same record must be treated as external.
    #[must_use]
    pub fn is_echo(&self, target: RecordId, event_ts: Timestamp) -> bool {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, self.dedup_ttl);
        inner.values().any(|m| {
            if m.target != target || matches!(m.state, MutationState::RolledBack) {
                return false;
            }
            let near_local = event_ts.abs_diff_millis(m.local_updated_at) <= self.echo_window_ms;
            let near_confirmed = m
                .confirmed_updated_at
                .map(|ts| event_ts.abs_diff_millis(ts) <= self.echo_window_ms)
                .unwrap_or(false);
            near_local || near_confirmed
        })
    }

    /// Returns a snapshot of a mutation, if still retained.
    #[must_use]
    pub fn get(&self, id: MutationId) -> Option<OptimisticMutation> {
        self.inner.lock().get(&id).cloned()
    }

    /// Number of in-flight mutations.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|m| m.state.is_in_flight())
            .count()
    }

    fn transition(&self, id: MutationId, next: MutationState) {
        let mut inner = self.inner.lock();
        if let Some(m) = inner.get_mut(&id) {
            if m.state.can_transition_to(next) {
                m.state = next;
            } else {
                trace!(mutation = %id, from = ?m.state, to = ?next, "invalid transition ignored");
            }
        }
    }

    fn prune(inner: &mut HashMap<MutationId, OptimisticMutation>, ttl: Duration) {
        inner.retain(|_, m| match m.terminal_at {
            Some(at) => at.elapsed() <= ttl,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUSTOMERS: Table = Table::new("customers");

    fn registry() -> MutationRegistry {
        MutationRegistry::new(&EngineConfig::new())
    }

    fn short_ttl_registry() -> MutationRegistry {
        MutationRegistry::new(&EngineConfig::new().with_dedup_ttl(Duration::ZERO))
    }

    #[test]
    fn state_machine_transitions() {
        use MutationState::{Confirmed, Failed, Pending, Retrying, RolledBack};

        assert!(Pending.can_transition_to(Retrying));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Retrying.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Confirmed));
        assert!(Failed.can_transition_to(RolledBack));

        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!RolledBack.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(RolledBack));

        assert!(Confirmed.is_terminal());
        assert!(RolledBack.is_terminal());
        assert!(!Failed.is_terminal());
        assert!(Pending.is_in_flight());
        assert!(Retrying.is_in_flight());
    }

    #[test]
    fn register_and_confirm() {
        let registry = registry();
        let target = RecordId::generate();
        let id = registry.register(
            CUSTOMERS,
            MutationOp::Create,
            target,
            Timestamp::from_millis(1000),
            None,
        );

        assert_eq!(registry.in_flight_len(), 1);
        registry.record_attempt(id);
        registry.confirm(id, Timestamp::from_millis(1005));

        let m = registry.get(id).unwrap();
        assert_eq!(m.state, MutationState::Confirmed);
        assert_eq!(m.attempts, 1);
        assert_eq!(m.confirmed_updated_at, Some(Timestamp::from_millis(1005)));
        assert_eq!(registry.in_flight_len(), 0);
    }

    #[test]
    fn failure_then_rollback() {
        let registry = registry();
        let id = registry.register(
            CUSTOMERS,
            MutationOp::Update,
            RecordId::generate(),
            Timestamp::from_millis(1),
            None,
        );

        registry.fail(id, &EngineError::transient_fatal("boom"));
        assert_eq!(registry.get(id).unwrap().state, MutationState::Failed);
        assert!(registry.get(id).unwrap().last_error.unwrap().contains("boom"));

        registry.mark_rolled_back(id);
        assert_eq!(registry.get(id).unwrap().state, MutationState::RolledBack);
    }

    #[test]
    fn echo_matches_within_window() {
        let registry = registry();
        let target = RecordId::generate();
        let id = registry.register(
            CUSTOMERS,
            MutationOp::Update,
            target,
            Timestamp::from_millis(10_000),
            None,
        );

        // In-flight mutations match near the optimistic timestamp.
        assert!(registry.is_echo(target, Timestamp::from_millis(10_500)));
        // Outside the 2s default window.
        assert!(!registry.is_echo(target, Timestamp::from_millis(13_000)));
        // Different record never matches.
        assert!(!registry.is_echo(RecordId::generate(), Timestamp::from_millis(10_000)));

        // After confirmation the server timestamp also matches.
        registry.confirm(id, Timestamp::from_millis(12_800));
        assert!(registry.is_echo(target, Timestamp::from_millis(13_000)));
    }

    #[test]
    fn rolled_back_mutations_never_match() {
        let registry = registry();
        let target = RecordId::generate();
        let id = registry.register(
            CUSTOMERS,
            MutationOp::Create,
            target,
            Timestamp::from_millis(1000),
            None,
        );

        registry.fail(id, &EngineError::ValidationRejected("nope".into()));
        registry.mark_rolled_back(id);

        assert!(!registry.is_echo(target, Timestamp::from_millis(1000)));
    }

    #[test]
    fn terminal_mutations_evicted_after_ttl() {
        let registry = short_ttl_registry();
        let target = RecordId::generate();
        let id = registry.register(
            CUSTOMERS,
            MutationOp::Create,
            target,
            Timestamp::from_millis(1000),
            None,
        );
        registry.confirm(id, Timestamp::from_millis(1000));

        // Zero TTL: the next access prunes the terminal entry.
        assert!(!registry.is_echo(target, Timestamp::from_millis(1000)));
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn batch_members_share_correlation_id() {
        let registry = registry();
        let batch = BatchId::generate();
        let a = registry.register(
            CUSTOMERS,
            MutationOp::BatchCreate,
            RecordId::generate(),
            Timestamp::from_millis(1),
            Some(batch),
        );
        let b = registry.register(
            CUSTOMERS,
            MutationOp::BatchCreate,
            RecordId::generate(),
            Timestamp::from_millis(2),
            Some(batch),
        );

        assert_eq!(registry.get(a).unwrap().batch, Some(batch));
        assert_eq!(registry.get(b).unwrap().batch, Some(batch));
    }
}
