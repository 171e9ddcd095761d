//! Reconciliation: last-write-wins merging of record versions.
//!
//! Given the locally held version of a record and an incoming remote value,
//! decide which survives and whether subscribers must be told. The version
//! with the greater `updated_at` wins; ties prefer the remote value, since
//! the server assigns canonical timestamps. A winning tombstone turns the
//! record into a delete, never an update.
//!
//! Invoked by the broker after every remote response and by the feed
//! manager before every fan-out. Conflicts resolved here never surface to
//! callers.

use bahi_core::{ChangeKind, SyncedRecord};

/// Outcome of merging an incoming remote value into local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// The incoming value is strictly older than the local version; it is
    /// dropped and no notification fires.
    Discard,
    /// The incoming value survives and replaces the local version.
    Apply {
        /// What subscribers should be told, relative to the previous local
        /// state. `None` means the surviving value carries no observable
        /// change (e.g. the confirmation of an identical optimistic write).
        notify: Option<ChangeKind>,
    },
}

/// The reconciliation rule. Stateless; all inputs are explicit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    /// Merges `incoming` (a remote value) against the local version.
    #[must_use]
    pub fn merge(local: Option<&SyncedRecord>, incoming: &SyncedRecord) -> MergeDecision {
        let Some(local) = local else {
            // Nothing held locally: the remote value materializes here.
            let notify = if incoming.is_deleted() {
                Some(ChangeKind::Delete)
            } else {
                Some(ChangeKind::Insert)
            };
            return MergeDecision::Apply { notify };
        };

        // Strictly older remote values lose; ties go to the remote side.
        if incoming.updated_at < local.updated_at {
            return MergeDecision::Discard;
        }

        let notify = match (local.is_deleted(), incoming.is_deleted()) {
            (false, true) => Some(ChangeKind::Delete),
            (true, true) => None,
            (true, false) => Some(ChangeKind::Insert),
            (false, false) => {
                if same_content(local, incoming) {
                    None
                } else {
                    Some(ChangeKind::Update)
                }
            }
        };

        MergeDecision::Apply { notify }
    }
}

/// Compares the observable content of two versions, ignoring `synced_at`
/// (a purely local bookkeeping column).
fn same_content(a: &SyncedRecord, b: &SyncedRecord) -> bool {
    a.updated_at == b.updated_at && a.deleted_at == b.deleted_at && a.fields == b.fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use bahi_core::{Document, OwnerId, RecordId, Timestamp};
    use serde_json::json;

    fn record_at(millis: i64, name: &str) -> SyncedRecord {
        let mut fields = Document::new();
        fields.insert("name".into(), json!(name));
        SyncedRecord::new(
            RecordId::generate(),
            OwnerId::new("u1"),
            Timestamp::from_millis(millis),
            fields,
        )
    }

    fn versions(t_local: i64, t_remote: i64) -> (SyncedRecord, SyncedRecord) {
        let local = record_at(t_local, "local");
        let mut remote = record_at(t_remote, "remote");
        remote.id = local.id;
        remote.created_at = local.created_at;
        (local, remote)
    }

    #[test]
    fn unknown_record_materializes_as_insert() {
        let incoming = record_at(100, "x");
        assert_eq!(
            Reconciler::merge(None, &incoming),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Insert)
            }
        );
    }

    #[test]
    fn unknown_tombstone_fires_delete() {
        let incoming = record_at(100, "x").tombstoned(Timestamp::from_millis(100));
        assert_eq!(
            Reconciler::merge(None, &incoming),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Delete)
            }
        );
    }

    #[test]
    fn stale_incoming_is_discarded() {
        let (local, remote) = versions(200, 100);
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Discard
        );
    }

    #[test]
    fn newer_incoming_wins_as_update() {
        let (local, remote) = versions(100, 200);
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Update)
            }
        );
    }

    #[test]
    fn tie_prefers_remote_without_noise() {
        // Identical content at the same instant: remote wins, nobody told.
        let local = record_at(100, "same");
        let mut remote = local.clone();
        remote.synced_at = Some(Timestamp::from_millis(150));
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply { notify: None }
        );

        // Same instant, different content (server rewrote a field): remote
        // wins and subscribers are corrected.
        let (local, remote) = versions(100, 100);
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Update)
            }
        );
    }

    #[test]
    fn winning_tombstone_is_a_delete() {
        let (local, remote) = versions(100, 100);
        let remote = remote.tombstoned(Timestamp::from_millis(200));
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Delete)
            }
        );
    }

    #[test]
    fn already_dead_record_stays_silent() {
        let (local, remote) = versions(100, 100);
        let local = local.tombstoned(Timestamp::from_millis(150));
        let remote = remote.tombstoned(Timestamp::from_millis(300));
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply { notify: None }
        );
    }

    #[test]
    fn newer_live_version_resurrects_tombstone() {
        let (local, remote) = versions(100, 400);
        let local = local.tombstoned(Timestamp::from_millis(200));
        assert_eq!(
            Reconciler::merge(Some(&local), &remote),
            MergeDecision::Apply {
                notify: Some(ChangeKind::Insert)
            }
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Last-write-wins is order-independent: for any two distinct
            /// timestamps, applying both versions in either order leaves
            /// the later one surviving.
            #[test]
            fn lww_is_order_independent(t1 in 0i64..1_000_000, t2 in 0i64..1_000_000) {
                prop_assume!(t1 != t2);
                let (a, mut b) = versions(t1, t2);
                b.id = a.id;

                // Order 1: a held locally, b arrives.
                let survivor_1 = match Reconciler::merge(Some(&a), &b) {
                    MergeDecision::Apply { .. } => b.clone(),
                    MergeDecision::Discard => a.clone(),
                };
                // Order 2: b held locally, a arrives.
                let survivor_2 = match Reconciler::merge(Some(&b), &a) {
                    MergeDecision::Apply { .. } => a.clone(),
                    MergeDecision::Discard => b.clone(),
                };

                prop_assert_eq!(survivor_1.updated_at, survivor_2.updated_at);
                prop_assert_eq!(survivor_1.fields, survivor_2.fields);
                prop_assert_eq!(survivor_1.updated_at.as_millis(), t1.max(t2));
            }

            /// A strictly older incoming value never generates a
            /// notification.
            #[test]
            fn stale_values_never_notify(newer in 1i64..1_000_000, delta in 1i64..1_000_000) {
                let (local, mut remote) = versions(newer, newer.saturating_sub(delta));
                remote.id = local.id;
                prop_assume!(remote.updated_at < local.updated_at);
                prop_assert_eq!(
                    Reconciler::merge(Some(&local), &remote),
                    MergeDecision::Discard
                );
            }
        }
    }
}
