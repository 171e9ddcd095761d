//! The remote authority and session identity abstractions.
//!
//! The remote store is opaque to the engine: it accepts owner-scoped
//! insert/update/soft-delete requests, returns the authoritative post-image
//! (including server-assigned fields), and emits a per-table push feed of
//! the same three operation kinds. `MockRemote` provides a scriptable
//! implementation for tests: injected failures, held responses released in
//! any order, and manual feed events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bahi_core::{OwnerId, RecordId, SyncedRecord, Table};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{EngineError, EngineResult};

/// Operation kind of a pushed wire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEventKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was soft-deleted.
    Delete,
}

/// A raw change-feed message as delivered by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    /// What the server says happened.
    pub kind: WireEventKind,
    /// The post-image; the tombstoned image for deletes.
    pub record: SyncedRecord,
}

/// Receiving half of a per-table change feed.
pub type FeedReceiver = mpsc::Receiver<WireEvent>;

/// The authoritative remote store.
///
/// All requests are scoped by the owner identifier. Write methods return
/// the authoritative post-image, which may differ from the submitted record
/// (server-assigned fields).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(
        &self,
        owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord>;

    /// Overwrites a record with a new post-image.
    async fn update(
        &self,
        owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord>;

    /// Soft-deletes a record by storing its tombstoned post-image.
    async fn soft_delete(
        &self,
        owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord>;

    /// Opens the push-based change feed for one table.
    async fn open_feed(&self, owner: &OwnerId, table: Table) -> EngineResult<FeedReceiver>;
}

/// Supplies the current owner identity used to scope every request.
pub trait AuthProvider: Send + Sync {
    /// Returns the current owner, or `None` when signed out.
    fn current_owner(&self) -> Option<OwnerId>;
}

/// An auth provider backed by a settable owner slot.
#[derive(Debug, Default)]
pub struct StaticAuth {
    owner: Mutex<Option<OwnerId>>,
}

impl StaticAuth {
    /// Creates a provider already signed in as `owner`.
    #[must_use]
    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: Mutex::new(Some(owner)),
        }
    }

    /// Creates a signed-out provider.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signs in as `owner`.
    pub fn sign_in(&self, owner: OwnerId) {
        *self.owner.lock() = Some(owner);
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.owner.lock() = None;
    }
}

impl AuthProvider for StaticAuth {
    fn current_owner(&self) -> Option<OwnerId> {
        self.owner.lock().clone()
    }
}

/// A scriptable remote store for tests.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<HashMap<(Table, RecordId), SyncedRecord>>,
    fail_queue: Mutex<VecDeque<EngineError>>,
    feeds: Mutex<HashMap<Table, Vec<mpsc::Sender<WireEvent>>>>,
    holds: Mutex<Vec<oneshot::Sender<()>>>,
    manual_release: AtomicBool,
    echo_writes: AtomicBool,
    server_field: Mutex<Option<(String, Value)>>,
    write_log: Mutex<Vec<(WireEventKind, Table, RecordId)>>,
}

impl MockRemote {
    /// Creates a mock remote that accepts every write immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next write call.
    pub fn fail_next(&self, error: EngineError) {
        self.fail_queue.lock().push_back(error);
    }

    /// Queues the same error for the next `n` write calls.
    pub fn fail_times(&self, n: usize, error: &EngineError) {
        let mut queue = self.fail_queue.lock();
        for _ in 0..n {
            queue.push_back(error.clone());
        }
    }

    /// Makes every write response carry an extra server-assigned field.
    pub fn set_server_field(&self, key: impl Into<String>, value: Value) {
        *self.server_field.lock() = Some((key.into(), value));
    }

    /// Makes every accepted write also emit a feed event (the server echo).
    pub fn enable_write_echo(&self) {
        self.echo_writes.store(true, Ordering::SeqCst);
    }

    /// Holds every subsequent write until released via [`Self::release`].
    pub fn enable_manual_release(&self) {
        self.manual_release.store(true, Ordering::SeqCst);
    }

    /// Number of writes currently held.
    #[must_use]
    pub fn pending_holds(&self) -> usize {
        self.holds.lock().len()
    }

    /// Releases the held write at `index` (in arrival order). Returns false
    /// if no such hold exists.
    pub fn release(&self, index: usize) -> bool {
        let mut holds = self.holds.lock();
        if index >= holds.len() {
            return false;
        }
        let tx = holds.remove(index);
        tx.send(()).is_ok()
    }

    /// Releases the oldest held write.
    pub fn release_next(&self) -> bool {
        self.release(0)
    }

    /// Injects a wire event into the open feed(s) of a table.
    pub fn push_event(&self, table: Table, kind: WireEventKind, record: SyncedRecord) {
        self.broadcast(table, WireEvent { kind, record });
    }

    /// Returns the server-held version of a record.
    #[must_use]
    pub fn server_record(&self, table: Table, id: RecordId) -> Option<SyncedRecord> {
        self.state.lock().get(&(table, id)).cloned()
    }

    /// Number of accepted writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.write_log.lock().len()
    }

    /// Number of feed channels opened for a table.
    #[must_use]
    pub fn feed_count(&self, table: Table) -> usize {
        self.feeds.lock().get(&table).map_or(0, Vec::len)
    }

    /// The accepted writes, in order.
    #[must_use]
    pub fn write_log(&self) -> Vec<(WireEventKind, Table, RecordId)> {
        self.write_log.lock().clone()
    }

    fn broadcast(&self, table: Table, event: WireEvent) {
        let mut feeds = self.feeds.lock();
        if let Some(senders) = feeds.get_mut(&table) {
            senders.retain(|tx| tx.try_send(event.clone()).is_ok());
        }
    }

    async fn hold_if_manual(&self) {
        if self.manual_release.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.holds.lock().push(tx);
            let _ = rx.await;
        }
    }

    async fn write(
        &self,
        kind: WireEventKind,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord> {
        self.hold_if_manual().await;

        if let Some(error) = self.fail_queue.lock().pop_front() {
            return Err(error);
        }

        let mut post = record.clone();
        if let Some((key, value)) = self.server_field.lock().clone() {
            post.fields.insert(key, value);
        }

        self.write_log.lock().push((kind, table, post.id));
        self.state.lock().insert((table, post.id), post.clone());

        if self.echo_writes.load(Ordering::SeqCst) {
            self.broadcast(
                table,
                WireEvent {
                    kind,
                    record: post.clone(),
                },
            );
        }

        Ok(post)
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn insert(
        &self,
        _owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord> {
        self.write(WireEventKind::Insert, table, record).await
    }

    async fn update(
        &self,
        _owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord> {
        self.write(WireEventKind::Update, table, record).await
    }

    async fn soft_delete(
        &self,
        _owner: &OwnerId,
        table: Table,
        record: &SyncedRecord,
    ) -> EngineResult<SyncedRecord> {
        self.write(WireEventKind::Delete, table, record).await
    }

    async fn open_feed(&self, _owner: &OwnerId, table: Table) -> EngineResult<FeedReceiver> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds.lock().entry(table).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bahi_core::{Document, Timestamp};
    use serde_json::json;

    const STOCK: Table = Table::new("inventory");

    fn owner() -> OwnerId {
        OwnerId::new("u1")
    }

    fn record() -> SyncedRecord {
        SyncedRecord::new(
            RecordId::generate(),
            owner(),
            Timestamp::from_millis(1000),
            Document::new(),
        )
    }

    #[tokio::test]
    async fn accepted_writes_are_stored_and_logged() {
        let remote = MockRemote::new();
        let rec = record();

        let post = remote.insert(&owner(), STOCK, &rec).await.unwrap();
        assert_eq!(post, rec);
        assert_eq!(remote.write_count(), 1);
        assert_eq!(remote.server_record(STOCK, rec.id), Some(rec));
    }

    #[tokio::test]
    async fn fail_queue_is_consumed_in_order() {
        let remote = MockRemote::new();
        remote.fail_next(EngineError::transient("down"));
        let rec = record();

        let err = remote.insert(&owner(), STOCK, &rec).await.unwrap_err();
        assert!(err.is_retryable());

        // Queue exhausted: the next call succeeds.
        assert!(remote.insert(&owner(), STOCK, &rec).await.is_ok());
    }

    #[tokio::test]
    async fn server_fields_are_annotated() {
        let remote = MockRemote::new();
        remote.set_server_field("sequence", json!(42));
        let rec = record();

        let post = remote.update(&owner(), STOCK, &rec).await.unwrap();
        assert_eq!(post.fields["sequence"], json!(42));
    }

    #[tokio::test]
    async fn write_echo_reaches_open_feeds() {
        let remote = MockRemote::new();
        remote.enable_write_echo();
        let mut feed = remote.open_feed(&owner(), STOCK).await.unwrap();

        let rec = record();
        remote.soft_delete(&owner(), STOCK, &rec).await.unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.kind, WireEventKind::Delete);
        assert_eq!(event.record.id, rec.id);
    }

    #[tokio::test]
    async fn held_writes_complete_on_release() {
        let remote = std::sync::Arc::new(MockRemote::new());
        remote.enable_manual_release();

        let rec = record();
        let task = {
            let remote = std::sync::Arc::clone(&remote);
            let rec = rec.clone();
            tokio::spawn(async move { remote.insert(&owner(), STOCK, &rec).await })
        };

        // Wait for the write to be parked.
        while remote.pending_holds() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.write_count(), 0);

        assert!(remote.release_next());
        let post = task.await.unwrap().unwrap();
        assert_eq!(post.id, rec.id);
        assert_eq!(remote.write_count(), 1);
    }

    #[test]
    fn static_auth_sign_in_out() {
        let auth = StaticAuth::signed_out();
        assert_eq!(auth.current_owner(), None);

        auth.sign_in(OwnerId::new("u2"));
        assert_eq!(auth.current_owner(), Some(OwnerId::new("u2")));

        auth.sign_out();
        assert_eq!(auth.current_owner(), None);
    }
}
