//! The engine facade.
//!
//! `SyncEngine` wires the broker, the feed manager, and their shared state
//! together behind one explicitly constructed instance. Collaborators (the
//! remote store, the auth provider, the clock) are injected; there is no
//! ambient global state.

use std::sync::Arc;

use bahi_core::{Clock, Document, RecordId, SyncedRecord, SystemClock, Table};

use crate::broker::{CreateOptions, MutationBroker, PendingBatch, PendingWrite};
use crate::cache::LocalCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::feed::{SubscriptionHandle, SubscriptionManager, Subscriber};
use crate::mutation::MutationRegistry;
use crate::remote::{AuthProvider, RemoteStore};
use crate::stats::{EngineStats, StatsInner};

/// The optimistic realtime synchronization engine.
///
/// One instance serves every synchronized table. All writes go through the
/// four broker operations; all push notifications go through
/// [`SyncEngine::subscribe`]. The in-flight mutation registry and the
/// per-table subscriber lists are owned exclusively by the engine.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    broker: MutationBroker,
    feed: SubscriptionManager,
    stats: Arc<StatsInner>,
}

impl SyncEngine {
    /// Creates an engine using the wall clock.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self::with_clock(config, remote, auth, Arc::new(SystemClock))
    }

    /// Creates an engine with an injected clock (used by tests to control
    /// timestamp ordering).
    #[must_use]
    pub fn with_clock(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(MutationRegistry::new(&config));
        let cache = Arc::new(LocalCache::new());
        let stats = Arc::new(StatsInner::default());
        let feed = SubscriptionManager::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&stats),
            Arc::clone(&remote),
            Arc::clone(&auth),
            Arc::clone(&clock),
        );
        let broker = MutationBroker::new(
            config,
            registry,
            cache,
            Arc::clone(&stats),
            remote,
            auth,
            clock,
            feed.clone(),
        );
        Self {
            broker,
            feed,
            stats,
        }
    }

    /// Creates a record. See [`MutationBroker::create`].
    pub async fn create(
        &self,
        table: Table,
        payload: Document,
        options: CreateOptions,
    ) -> EngineResult<PendingWrite> {
        self.broker.create(table, payload, options).await
    }

    /// Updates a record. See [`MutationBroker::update`].
    pub async fn update(
        &self,
        table: Table,
        id: RecordId,
        patch: Document,
    ) -> EngineResult<PendingWrite> {
        self.broker.update(table, id, patch).await
    }

    /// Soft-deletes a record. See [`MutationBroker::delete`].
    pub async fn delete(&self, table: Table, id: RecordId) -> EngineResult<PendingWrite> {
        self.broker.delete(table, id).await
    }

    /// Creates several records at once. See [`MutationBroker::batch_create`].
    pub async fn batch_create(
        &self,
        table: Table,
        payloads: Vec<Document>,
    ) -> EngineResult<PendingBatch> {
        self.broker.batch_create(table, payloads).await
    }

    /// Returns all live records of a table.
    pub fn fetch(&self, table: Table) -> EngineResult<Vec<SyncedRecord>> {
        self.broker.fetch(table)
    }

    /// Returns one record if present and not tombstoned.
    pub fn fetch_by_id(&self, table: Table, id: RecordId) -> EngineResult<Option<SyncedRecord>> {
        self.broker.fetch_by_id(table, id)
    }

    /// Returns all records of a table, tombstones included.
    pub fn fetch_including_deleted(&self, table: Table) -> EngineResult<Vec<SyncedRecord>> {
        self.broker.fetch_including_deleted(table)
    }

    /// Subscribes to a table's change notifications.
    pub async fn subscribe(
        &self,
        table: Table,
        subscriber: Subscriber,
    ) -> EngineResult<SubscriptionHandle> {
        self.feed.subscribe(table, subscriber).await
    }

    /// Number of subscribers currently registered for a table.
    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.feed.subscriber_count(table)
    }

    /// A snapshot of the engine's activity counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }
}
