//! The UI-visible record cache.
//!
//! Holds the locally known version of every record, optimistic or
//! confirmed. Default reads exclude tombstones; tombstoned rows remain in
//! the map because records are never physically removed through the normal
//! write paths. Physical removal only happens when a failed create is
//! rolled back.

use std::collections::HashMap;

use bahi_core::{RecordId, SyncedRecord, Table};
use parking_lot::RwLock;

/// In-memory view of all synchronized records, keyed by table and id.
#[derive(Debug, Default)]
pub struct LocalCache {
    tables: RwLock<HashMap<Table, HashMap<RecordId, SyncedRecord>>>,
}

impl LocalCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, replacing any previous version.
    pub fn insert(&self, table: Table, record: SyncedRecord) {
        self.tables
            .write()
            .entry(table)
            .or_default()
            .insert(record.id, record);
    }

    /// Returns the locally held version of a record, tombstoned or not.
    #[must_use]
    pub fn peek(&self, table: Table, id: RecordId) -> Option<SyncedRecord> {
        self.tables.read().get(&table)?.get(&id).cloned()
    }

    /// Returns a record if it exists and is not tombstoned.
    #[must_use]
    pub fn get_live(&self, table: Table, id: RecordId) -> Option<SyncedRecord> {
        self.peek(table, id).filter(|r| !r.is_deleted())
    }

    /// Returns all live records of a table, ordered by creation instant.
    #[must_use]
    pub fn live(&self, table: Table) -> Vec<SyncedRecord> {
        let mut records: Vec<SyncedRecord> = self
            .tables
            .read()
            .get(&table)
            .map(|rows| rows.values().filter(|r| !r.is_deleted()).cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Returns all records of a table, tombstones included.
    #[must_use]
    pub fn all(&self, table: Table) -> Vec<SyncedRecord> {
        let mut records: Vec<SyncedRecord> = self
            .tables
            .read()
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Physically removes a record (failed-create rollback only).
    pub fn remove(&self, table: Table, id: RecordId) {
        if let Some(rows) = self.tables.write().get_mut(&table) {
            rows.remove(&id);
        }
    }

    /// Restores the pre-mutation snapshot: `Some` re-inserts the prior
    /// version, `None` removes the row.
    pub fn restore(&self, table: Table, id: RecordId, prior: Option<SyncedRecord>) {
        match prior {
            Some(record) => self.insert(table, record),
            None => self.remove(table, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bahi_core::{Document, OwnerId, Timestamp};

    const BILLS: Table = Table::new("bills");

    fn record(millis: i64) -> SyncedRecord {
        SyncedRecord::new(
            RecordId::generate(),
            OwnerId::new("u1"),
            Timestamp::from_millis(millis),
            Document::new(),
        )
    }

    #[test]
    fn default_reads_exclude_tombstones() {
        let cache = LocalCache::new();
        let live = record(1);
        let dead = record(2).tombstoned(Timestamp::from_millis(3));
        cache.insert(BILLS, live.clone());
        cache.insert(BILLS, dead.clone());

        assert_eq!(cache.live(BILLS), vec![live.clone()]);
        assert_eq!(cache.all(BILLS).len(), 2);
        assert_eq!(cache.get_live(BILLS, dead.id), None);
        assert_eq!(cache.peek(BILLS, dead.id), Some(dead));
    }

    #[test]
    fn live_records_are_ordered_by_creation() {
        let cache = LocalCache::new();
        let newer = record(200);
        let older = record(100);
        cache.insert(BILLS, newer.clone());
        cache.insert(BILLS, older.clone());

        let ids: Vec<RecordId> = cache.live(BILLS).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[test]
    fn restore_with_prior_reinserts() {
        let cache = LocalCache::new();
        let original = record(1);
        let id = original.id;
        cache.insert(BILLS, original.clone());

        let patched = original.with_patch(&Document::new(), Timestamp::from_millis(9));
        cache.insert(BILLS, patched);
        cache.restore(BILLS, id, Some(original.clone()));

        assert_eq!(cache.peek(BILLS, id), Some(original));
    }

    #[test]
    fn restore_without_prior_removes() {
        let cache = LocalCache::new();
        let rec = record(1);
        let id = rec.id;
        cache.insert(BILLS, rec);
        cache.restore(BILLS, id, None);
        assert_eq!(cache.peek(BILLS, id), None);
    }
}
