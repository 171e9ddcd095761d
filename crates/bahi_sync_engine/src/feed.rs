//! Change-feed subscription management.
//!
//! One logical upstream channel per table, reference-counted across
//! subscribers. Every inbound wire message is normalized and reconciled
//! before fan-out; events recognized as the remote echo of a local mutation
//! are suppressed, and per-record delivery order is monotonic in
//! `updated_at`. The broker reuses the same fan-out path to notify
//! subscribers of optimistic writes and rollback corrections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bahi_core::{
    ChangeEvent, ChangeKind, Clock, EventOrigin, RecordId, SyncedRecord, Table, Timestamp,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::LocalCache;
use crate::error::{EngineError, EngineResult};
use crate::mutation::MutationRegistry;
use crate::reconcile::{MergeDecision, Reconciler};
use crate::remote::{AuthProvider, FeedReceiver, RemoteStore, WireEvent};
use crate::stats::StatsInner;

/// Callback invoked with the post-image of a changed record.
pub type RecordCallback = Arc<dyn Fn(&SyncedRecord) + Send + Sync>;

/// Per-kind callbacks registered by one subscriber.
#[derive(Clone, Default)]
pub struct Subscriber {
    insert: Option<RecordCallback>,
    update: Option<RecordCallback>,
    delete: Option<RecordCallback>,
}

impl Subscriber {
    /// Creates a subscriber with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the insert callback.
    #[must_use]
    pub fn on_insert(mut self, f: impl Fn(&SyncedRecord) + Send + Sync + 'static) -> Self {
        self.insert = Some(Arc::new(f));
        self
    }

    /// Sets the update callback.
    #[must_use]
    pub fn on_update(mut self, f: impl Fn(&SyncedRecord) + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    /// Sets the delete callback. Receives the tombstoned image.
    #[must_use]
    pub fn on_delete(mut self, f: impl Fn(&SyncedRecord) + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }

    fn callback_for(&self, kind: ChangeKind) -> Option<RecordCallback> {
        match kind {
            ChangeKind::Insert => self.insert.clone(),
            ChangeKind::Update => self.update.clone(),
            ChangeKind::Delete => self.delete.clone(),
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("insert", &self.insert.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

/// One per-table channel: subscriber set plus delivery bookkeeping.
struct Channel {
    subscribers: Vec<(u64, Subscriber)>,
    last_delivered: HashMap<RecordId, Timestamp>,
    pump: Option<JoinHandle<()>>,
}

pub(crate) struct FeedShared {
    channels: Mutex<HashMap<Table, Channel>>,
    next_subscriber: AtomicU64,
    registry: Arc<MutationRegistry>,
    cache: Arc<LocalCache>,
    stats: Arc<StatsInner>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
}

/// Handle returned by [`SubscriptionManager::subscribe`].
///
/// Cancellation is explicit: call [`SubscriptionHandle::unsubscribe`].
/// Dropping the handle leaves the subscription in place.
pub struct SubscriptionHandle {
    table: Table,
    id: u64,
    shared: Arc<FeedShared>,
}

impl SubscriptionHandle {
    /// The subscribed table.
    #[must_use]
    pub fn table(&self) -> Table {
        self.table
    }

    /// Removes this subscriber. The upstream channel is torn down when the
    /// last subscriber of the table unsubscribes.
    pub fn unsubscribe(self) {
        let mut channels = self.shared.channels.lock();
        let Some(channel) = channels.get_mut(&self.table) else {
            return;
        };
        channel.subscribers.retain(|(id, _)| *id != self.id);
        if channel.subscribers.is_empty() {
            if let Some(pump) = channel.pump.take() {
                pump.abort();
            }
            channels.remove(&self.table);
            debug!(table = %self.table, "subscription channel torn down");
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("table", &self.table)
            .field("id", &self.id)
            .finish()
    }
}

/// Multiplexes the remote change feed to local subscribers, one upstream
/// channel per table.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<FeedShared>,
}

impl SubscriptionManager {
    pub(crate) fn new(
        registry: Arc<MutationRegistry>,
        cache: Arc<LocalCache>,
        stats: Arc<StatsInner>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                channels: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                registry,
                cache,
                stats,
                remote,
                auth,
                clock,
            }),
        }
    }

    /// Registers a subscriber for a table, opening the upstream feed if this
    /// is the table's first subscriber.
    pub async fn subscribe(
        &self,
        table: Table,
        subscriber: Subscriber,
    ) -> EngineResult<SubscriptionHandle> {
        let owner = self
            .shared
            .auth
            .current_owner()
            .ok_or(EngineError::Unauthenticated)?;
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);

        let needs_upstream = {
            let mut channels = self.shared.channels.lock();
            match channels.get_mut(&table) {
                Some(channel) => {
                    channel.subscribers.push((id, subscriber));
                    false
                }
                None => {
                    channels.insert(
                        table,
                        Channel {
                            subscribers: vec![(id, subscriber)],
                            last_delivered: HashMap::new(),
                            pump: None,
                        },
                    );
                    true
                }
            }
        };

        if needs_upstream {
            match self.shared.remote.open_feed(&owner, table).await {
                Ok(rx) => {
                    let pump = tokio::spawn(pump_feed(Arc::clone(&self.shared), table, rx));
                    let mut channels = self.shared.channels.lock();
                    match channels.get_mut(&table) {
                        Some(channel) => channel.pump = Some(pump),
                        // Everyone unsubscribed while the feed was opening.
                        None => pump.abort(),
                    }
                }
                Err(err) => {
                    self.shared.channels.lock().remove(&table);
                    return Err(err);
                }
            }
        }

        Ok(SubscriptionHandle {
            table,
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of subscribers currently registered for a table.
    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.shared
            .channels
            .lock()
            .get(&table)
            .map_or(0, |c| c.subscribers.len())
    }

    /// Number of live per-table channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.shared.channels.lock().len()
    }

    /// Notifies subscribers of a locally originated change (optimistic
    /// apply or rollback correction), recording it as delivered so a stale
    /// feed event cannot regress the record.
    pub(crate) fn fan_out_local(&self, table: Table, kind: ChangeKind, record: &SyncedRecord) {
        let callbacks = {
            let mut channels = self.shared.channels.lock();
            let Some(channel) = channels.get_mut(&table) else {
                return;
            };
            channel.last_delivered.insert(record.id, record.updated_at);
            snapshot_callbacks(channel, kind)
        };
        for cb in callbacks {
            cb(record);
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_wire_event(&self, table: Table, event: WireEvent) {
        self.shared.handle_wire_event(table, event);
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("channels", &self.channel_count())
            .finish()
    }
}

/// Reads the upstream feed until it closes, reconciling and fanning out
/// each message.
async fn pump_feed(shared: Arc<FeedShared>, table: Table, mut rx: FeedReceiver) {
    while let Some(event) = rx.recv().await {
        shared.handle_wire_event(table, event);
    }
    debug!(table = %table, "upstream change feed closed");
}

impl FeedShared {
    /// Normalizes, reconciles, and possibly fans out one wire message.
    ///
    /// Fully synchronous: bookkeeping is atomic with respect to other queued
    /// tasks, and subscriber callbacks run outside the channel lock.
    fn handle_wire_event(&self, table: Table, wire: WireEvent) {
        let record = wire.record;
        let id = record.id;

        let (event, callbacks) = {
            let mut channels = self.channels.lock();
            let Some(channel) = channels.get_mut(&table) else {
                return;
            };

            // Per-record monotonic delivery: drop anything older than what
            // subscribers already saw.
            if let Some(last) = channel.last_delivered.get(&id) {
                if record.updated_at < *last {
                    trace!(record = %id, "dropping out-of-order feed event");
                    return;
                }
            }

            let origin = if self.registry.is_echo(id, record.updated_at) {
                EventOrigin::RemoteEcho
            } else {
                EventOrigin::ExternalDevice
            };

            let local = self.cache.peek(table, id);
            let notify = match Reconciler::merge(local.as_ref(), &record) {
                MergeDecision::Discard => {
                    trace!(record = %id, "discarding stale feed event");
                    return;
                }
                MergeDecision::Apply { notify } => notify,
            };

            let stored = record.clone().confirmed_at(self.clock.now());
            self.cache.insert(table, stored);
            channel.last_delivered.insert(id, record.updated_at);

            if origin == EventOrigin::RemoteEcho {
                // The UI already saw this change when the broker applied it
                // optimistically.
                self.stats.inc_echoes_suppressed();
                trace!(record = %id, "suppressing remote echo");
                return;
            }

            let Some(kind) = notify else {
                return;
            };
            let event = match kind {
                ChangeKind::Insert => ChangeEvent::insert(table, record, origin),
                ChangeKind::Update => ChangeEvent::update(table, record, origin),
                ChangeKind::Delete => ChangeEvent::delete(table, record, origin),
            };
            (event, snapshot_callbacks(channel, kind))
        };

        for cb in &callbacks {
            cb(&event.record);
        }
        if !callbacks.is_empty() {
            self.stats.inc_external_delivered();
        }
    }
}

/// Snapshots the callbacks registered for one change kind so the lock is
/// released before any of them runs.
fn snapshot_callbacks(channel: &Channel, kind: ChangeKind) -> Vec<RecordCallback> {
    channel
        .subscribers
        .iter()
        .filter_map(|(_, s)| s.callback_for(kind))
        .collect()
}
