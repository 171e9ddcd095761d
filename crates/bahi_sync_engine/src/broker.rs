//! The mutation broker.
//!
//! Accepts create/update/delete/batch-create requests, materializes the
//! optimistic result before any suspension point, dispatches the remote
//! write in the background with bounded retry, and drives each mutation
//! through its lifecycle. A failed mutation is always rolled back: readers
//! and subscribers never keep seeing a write that did not durably succeed.

use std::sync::Arc;

use bahi_core::{
    validate_patch, validate_payload, BatchId, ChangeKind, Clock, Document, MutationId, OwnerId,
    RecordId, SyncedRecord, Table,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::LocalCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::feed::SubscriptionManager;
use crate::mutation::{MutationOp, MutationRegistry};
use crate::reconcile::{MergeDecision, Reconciler};
use crate::remote::{AuthProvider, RemoteStore};
use crate::stats::StatsInner;

/// Options for [`MutationBroker::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Use this id for the new record instead of generating one.
    pub optimistic_id: Option<RecordId>,
}

/// An accepted write: the optimistic record plus its confirmation signal.
///
/// The record is already visible to readers and subscribers when this value
/// is returned; the remote write proceeds in the background.
#[derive(Debug)]
pub struct PendingWrite {
    /// The optimistic record (`synced_at` is `None`).
    pub record: SyncedRecord,
    /// Resolves with the authoritative outcome.
    pub confirmation: Confirmation,
}

/// Resolves once the remote store accepts the write or the mutation is
/// rolled back after failure.
#[derive(Debug)]
pub struct Confirmation {
    rx: oneshot::Receiver<EngineResult<SyncedRecord>>,
}

impl Confirmation {
    /// Waits for the remote outcome: the authoritative record on success,
    /// the typed error after rollback on failure.
    pub async fn wait(self) -> EngineResult<SyncedRecord> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(EngineError::transient_fatal("confirmation channel dropped")))
    }
}

/// An accepted batch create: per-item optimistic outcomes plus the batch
/// confirmation signal.
#[derive(Debug)]
pub struct PendingBatch {
    /// Per-item optimistic results, in payload order. Items rejected by
    /// boundary validation carry their error here and are never dispatched.
    pub records: Vec<EngineResult<SyncedRecord>>,
    /// Resolves with the per-item final outcomes, in payload order.
    pub confirmation: BatchConfirmation,
}

/// Resolves with the final per-item outcomes of a batch create.
#[derive(Debug)]
pub struct BatchConfirmation {
    rx: oneshot::Receiver<Vec<EngineResult<SyncedRecord>>>,
}

impl BatchConfirmation {
    /// Waits for every item of the batch to confirm or roll back.
    pub async fn wait(self) -> Vec<EngineResult<SyncedRecord>> {
        self.rx.await.unwrap_or_default()
    }
}

/// Which remote write a dispatch performs.
#[derive(Debug, Clone, Copy)]
enum RemoteWrite {
    Insert,
    Update,
    Delete,
}

/// How to revert local state if the dispatch fails.
enum Rollback {
    /// A failed create: the record is removed and a delete correction is
    /// fanned out.
    RemoveCreate,
    /// A failed update/delete: the pre-mutation snapshot is restored and
    /// fanned out with the given corrective kind.
    Restore(SyncedRecord, ChangeKind),
}

/// One batch-create item after the optimistic phase.
enum BatchItem {
    Invalid(EngineError),
    Dispatch { mid: MutationId, record: SyncedRecord },
}

/// The mutation broker. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct MutationBroker {
    config: EngineConfig,
    registry: Arc<MutationRegistry>,
    cache: Arc<LocalCache>,
    stats: Arc<StatsInner>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    feed: SubscriptionManager,
}

impl MutationBroker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfig,
        registry: Arc<MutationRegistry>,
        cache: Arc<LocalCache>,
        stats: Arc<StatsInner>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        feed: SubscriptionManager,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            stats,
            remote,
            auth,
            clock,
            feed,
        }
    }

    /// Creates a record.
    ///
    /// The optimistic record is materialized and fanned out before any
    /// suspension point; the remote insert runs in the background.
    pub async fn create(
        &self,
        table: Table,
        payload: Document,
        options: CreateOptions,
    ) -> EngineResult<PendingWrite> {
        let owner = self.owner()?;
        validate_payload(&payload)?;

        let id = options.optimistic_id.unwrap_or_else(RecordId::generate);
        if self.cache.peek(table, id).is_some() {
            return Err(EngineError::ValidationRejected(format!(
                "record {id} already exists in {table}"
            )));
        }

        let now = self.clock.now();
        let record = SyncedRecord::new(id, owner.clone(), now, payload);
        self.cache.insert(table, record.clone());
        let mid = self
            .registry
            .register(table, MutationOp::Create, id, now, None);
        self.feed.fan_out_local(table, ChangeKind::Insert, &record);
        self.stats.inc_optimistic_applied();
        debug!(%table, record = %id, "optimistic create applied");

        let confirmation = self.spawn_dispatch(
            owner,
            table,
            mid,
            record.clone(),
            RemoteWrite::Insert,
            Rollback::RemoveCreate,
        );
        Ok(PendingWrite {
            record,
            confirmation,
        })
    }

    /// Applies a patch to a record.
    ///
    /// Requires the last known-good version locally; rolls back to the
    /// pre-patch snapshot if the remote write fails.
    pub async fn update(
        &self,
        table: Table,
        id: RecordId,
        patch: Document,
    ) -> EngineResult<PendingWrite> {
        let owner = self.owner()?;
        validate_patch(&patch)?;

        let current = self
            .cache
            .get_live(table, id)
            .ok_or_else(|| EngineError::not_found(table, id))?;

        let now = self.clock.now();
        let post = current.with_patch(&patch, now);
        self.cache.insert(table, post.clone());
        let mid = self
            .registry
            .register(table, MutationOp::Update, id, now, None);
        self.feed.fan_out_local(table, ChangeKind::Update, &post);
        self.stats.inc_optimistic_applied();
        debug!(%table, record = %id, "optimistic update applied");

        let confirmation = self.spawn_dispatch(
            owner,
            table,
            mid,
            post.clone(),
            RemoteWrite::Update,
            Rollback::Restore(current, ChangeKind::Update),
        );
        Ok(PendingWrite {
            record: post,
            confirmation,
        })
    }

    /// Soft-deletes a record: a patch setting the tombstone, never a
    /// physical remove.
    pub async fn delete(&self, table: Table, id: RecordId) -> EngineResult<PendingWrite> {
        let owner = self.owner()?;

        let current = self
            .cache
            .get_live(table, id)
            .ok_or_else(|| EngineError::not_found(table, id))?;

        let now = self.clock.now();
        let post = current.tombstoned(now);
        self.cache.insert(table, post.clone());
        let mid = self
            .registry
            .register(table, MutationOp::Delete, id, now, None);
        self.feed.fan_out_local(table, ChangeKind::Delete, &post);
        self.stats.inc_optimistic_applied();
        debug!(%table, record = %id, "optimistic delete applied");

        let confirmation = self.spawn_dispatch(
            owner,
            table,
            mid,
            post.clone(),
            RemoteWrite::Delete,
            Rollback::Restore(current, ChangeKind::Insert),
        );
        Ok(PendingWrite {
            record: post,
            confirmation,
        })
    }

    /// Creates several records at once.
    ///
    /// Every entry shares one batch correlation id in the dedup registry,
    /// but each record confirms or rolls back independently: a rejected
    /// item never aborts the rest of the batch.
    pub async fn batch_create(
        &self,
        table: Table,
        payloads: Vec<Document>,
    ) -> EngineResult<PendingBatch> {
        let owner = self.owner()?;
        let batch = BatchId::generate();

        let mut optimistic = Vec::with_capacity(payloads.len());
        let mut items = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if let Err(err) = validate_payload(&payload) {
                let err = EngineError::from(err);
                optimistic.push(Err(err.clone()));
                items.push(BatchItem::Invalid(err));
                continue;
            }

            let id = RecordId::generate();
            let now = self.clock.now();
            let record = SyncedRecord::new(id, owner.clone(), now, payload);
            self.cache.insert(table, record.clone());
            let mid =
                self.registry
                    .register(table, MutationOp::BatchCreate, id, now, Some(batch));
            self.feed.fan_out_local(table, ChangeKind::Insert, &record);
            self.stats.inc_optimistic_applied();
            optimistic.push(Ok(record.clone()));
            items.push(BatchItem::Dispatch { mid, record });
        }
        debug!(%table, %batch, items = items.len(), "optimistic batch create applied");

        let (tx, rx) = oneshot::channel();
        let broker = self.clone();
        tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    BatchItem::Invalid(err) => outcomes.push(Err(err)),
                    BatchItem::Dispatch { mid, record } => {
                        let result = broker
                            .dispatch(&owner, table, mid, &record, RemoteWrite::Insert)
                            .await;
                        match result {
                            Ok(authoritative) => {
                                outcomes.push(Ok(broker.finish_confirmed(table, mid, authoritative)));
                            }
                            Err(err) => {
                                broker.rollback(table, mid, record.id, Rollback::RemoveCreate, &err);
                                outcomes.push(Err(err));
                            }
                        }
                    }
                }
            }
            let _ = tx.send(outcomes);
        });

        Ok(PendingBatch {
            records: optimistic,
            confirmation: BatchConfirmation { rx },
        })
    }

    /// Returns all live records of a table (tombstones excluded).
    pub fn fetch(&self, table: Table) -> EngineResult<Vec<SyncedRecord>> {
        self.owner()?;
        Ok(self.cache.live(table))
    }

    /// Returns one record if present and not tombstoned.
    pub fn fetch_by_id(&self, table: Table, id: RecordId) -> EngineResult<Option<SyncedRecord>> {
        self.owner()?;
        Ok(self.cache.get_live(table, id))
    }

    /// Returns all records of a table, tombstones included.
    pub fn fetch_including_deleted(&self, table: Table) -> EngineResult<Vec<SyncedRecord>> {
        self.owner()?;
        Ok(self.cache.all(table))
    }

    fn owner(&self) -> EngineResult<OwnerId> {
        self.auth
            .current_owner()
            .ok_or(EngineError::Unauthenticated)
    }

    /// Spawns the background dispatch for one mutation and returns its
    /// confirmation signal.
    fn spawn_dispatch(
        &self,
        owner: OwnerId,
        table: Table,
        mid: MutationId,
        post: SyncedRecord,
        write: RemoteWrite,
        rollback: Rollback,
    ) -> Confirmation {
        let (tx, rx) = oneshot::channel();
        let broker = self.clone();
        tokio::spawn(async move {
            let result = match broker.dispatch(&owner, table, mid, &post, write).await {
                Ok(authoritative) => Ok(broker.finish_confirmed(table, mid, authoritative)),
                Err(err) => {
                    broker.rollback(table, mid, post.id, rollback, &err);
                    Err(err)
                }
            };
            let _ = tx.send(result);
        });
        Confirmation { rx }
    }

    /// Drives one remote write to completion with bounded retry and a
    /// per-attempt timeout.
    async fn dispatch(
        &self,
        owner: &OwnerId,
        table: Table,
        mid: MutationId,
        post: &SyncedRecord,
        write: RemoteWrite,
    ) -> EngineResult<SyncedRecord> {
        let retry = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                self.registry.mark_retrying(mid);
                self.stats.inc_retries();
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
            self.registry.record_attempt(mid);

            let call = async {
                match write {
                    RemoteWrite::Insert => self.remote.insert(owner, table, post).await,
                    RemoteWrite::Update => self.remote.update(owner, table, post).await,
                    RemoteWrite::Delete => self.remote.soft_delete(owner, table, post).await,
                }
            };
            let outcome = match tokio::time::timeout(self.config.op_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::transient("remote call timed out")),
            };

            match outcome {
                Ok(authoritative) => return Ok(authoritative),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(
                        %table, record = %post.id, attempt,
                        error = %err, "transient failure, retrying"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::transient_fatal("no dispatch attempts made")))
    }

    /// Reconciles an authoritative response into local state.
    ///
    /// If a newer local write superseded the response while it was in
    /// flight, the response is discarded silently; that conflict never
    /// surfaces to callers.
    fn finish_confirmed(
        &self,
        table: Table,
        mid: MutationId,
        authoritative: SyncedRecord,
    ) -> SyncedRecord {
        let now = self.clock.now();
        self.registry.confirm(mid, authoritative.updated_at);

        let stored = authoritative.confirmed_at(now);
        let local = self.cache.peek(table, stored.id);
        match Reconciler::merge(local.as_ref(), &stored) {
            MergeDecision::Discard => {
                debug!(%table, record = %stored.id, "response superseded by newer local write");
            }
            MergeDecision::Apply { notify } => {
                self.cache.insert(table, stored.clone());
                if let Some(kind) = notify {
                    // The authoritative record differs from what the UI saw
                    // optimistically (e.g. server-assigned fields).
                    self.feed.fan_out_local(table, kind, &stored);
                }
            }
        }
        self.stats.inc_confirmed();
        stored
    }

    /// Reverts local state after a failed dispatch.
    fn rollback(
        &self,
        table: Table,
        mid: MutationId,
        id: RecordId,
        plan: Rollback,
        err: &EngineError,
    ) {
        self.registry.fail(mid, err);
        match plan {
            Rollback::RemoveCreate => {
                if let Some(current) = self.cache.peek(table, id) {
                    self.cache.remove(table, id);
                    let image = current.tombstoned(self.clock.now());
                    self.feed.fan_out_local(table, ChangeKind::Delete, &image);
                }
            }
            Rollback::Restore(pre, kind) => {
                self.cache.insert(table, pre.clone());
                self.feed.fan_out_local(table, kind, &pre);
            }
        }
        self.registry.mark_rolled_back(mid);
        self.stats.inc_rolled_back();
        warn!(%table, record = %id, error = %err, "mutation rolled back");
    }
}

impl std::fmt::Debug for MutationBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationBroker")
            .field("in_flight", &self.registry.in_flight_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, StaticAuth};
    use bahi_core::ManualClock;
    use serde_json::json;

    const CUSTOMERS: Table = Table::new("customers");

    fn broker_with(remote: Arc<MockRemote>, auth: Arc<StaticAuth>) -> MutationBroker {
        let config = EngineConfig::new();
        let registry = Arc::new(MutationRegistry::new(&config));
        let cache = Arc::new(LocalCache::new());
        let stats = Arc::new(StatsInner::default());
        let clock = Arc::new(ManualClock::starting_at(1_000_000));
        let feed = SubscriptionManager::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&stats),
            remote.clone() as Arc<dyn RemoteStore>,
            auth.clone() as Arc<dyn AuthProvider>,
            clock.clone() as Arc<dyn Clock>,
        );
        MutationBroker::new(config, registry, cache, stats, remote, auth, clock, feed)
    }

    fn payload(name: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("name".into(), json!(name));
        doc
    }

    #[tokio::test]
    async fn create_requires_an_owner() {
        let broker = broker_with(
            Arc::new(MockRemote::new()),
            Arc::new(StaticAuth::signed_out()),
        );
        let err = broker
            .create(CUSTOMERS, payload("Asha"), CreateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Unauthenticated);
    }

    #[tokio::test]
    async fn create_rejects_reserved_keys() {
        let broker = broker_with(
            Arc::new(MockRemote::new()),
            Arc::new(StaticAuth::signed_in(bahi_core::OwnerId::new("u1"))),
        );
        let mut bad = payload("Asha");
        bad.insert("deleted_at".into(), json!(123));

        let err = broker
            .create(CUSTOMERS, bad, CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationRejected(_)));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_optimistic_id() {
        let remote = Arc::new(MockRemote::new());
        let broker = broker_with(
            Arc::clone(&remote),
            Arc::new(StaticAuth::signed_in(bahi_core::OwnerId::new("u1"))),
        );

        let first = broker
            .create(CUSTOMERS, payload("Asha"), CreateOptions::default())
            .await
            .unwrap();

        let err = broker
            .create(
                CUSTOMERS,
                payload("Banu"),
                CreateOptions {
                    optimistic_id: Some(first.record.id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationRejected(_)));

        first.confirmation.wait().await.unwrap();
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_not_found() {
        let broker = broker_with(
            Arc::new(MockRemote::new()),
            Arc::new(StaticAuth::signed_in(bahi_core::OwnerId::new("u1"))),
        );
        let id = RecordId::generate();
        let err = broker
            .update(CUSTOMERS, id, payload("x"))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::not_found(CUSTOMERS, id));
    }

    #[tokio::test]
    async fn delete_of_deleted_record_is_not_found() {
        let remote = Arc::new(MockRemote::new());
        let broker = broker_with(
            Arc::clone(&remote),
            Arc::new(StaticAuth::signed_in(bahi_core::OwnerId::new("u1"))),
        );

        let created = broker
            .create(CUSTOMERS, payload("Asha"), CreateOptions::default())
            .await
            .unwrap();
        created.confirmation.wait().await.unwrap();

        let deleted = broker.delete(CUSTOMERS, created.record.id).await.unwrap();
        deleted.confirmation.wait().await.unwrap();

        let err = broker.delete(CUSTOMERS, created.record.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
