//! Normalized change notifications.
//!
//! A `ChangeEvent` is constructed transiently, either from a wire message
//! delivered by the remote change feed or from a local optimistic write, and
//! consumed immediately by fan-out. Events are never persisted.

use crate::record::SyncedRecord;
use crate::types::Table;

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A record became visible (no live local version existed).
    Insert,
    /// A live record changed.
    Update,
    /// A record was tombstoned.
    Delete,
}

/// Where a change originated relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// The remote echo of a mutation this client issued itself.
    ///
    /// Subscribers already observed the change optimistically, so echoes are
    /// suppressed at fan-out.
    RemoteEcho,
    /// A change made by another device or session.
    ExternalDevice,
}

/// A normalized change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The affected table.
    pub table: Table,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Post-image of the record; the tombstoned image for deletes.
    pub record: SyncedRecord,
    /// Origin classification.
    pub origin: EventOrigin,
}

impl ChangeEvent {
    /// Creates an insert event.
    #[must_use]
    pub fn insert(table: Table, record: SyncedRecord, origin: EventOrigin) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            record,
            origin,
        }
    }

    /// Creates an update event.
    #[must_use]
    pub fn update(table: Table, record: SyncedRecord, origin: EventOrigin) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            record,
            origin,
        }
    }

    /// Creates a delete event carrying the tombstoned image.
    #[must_use]
    pub fn delete(table: Table, record: SyncedRecord, origin: EventOrigin) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            record,
            origin,
        }
    }

    /// Returns true if this event is the echo of a local mutation.
    #[must_use]
    pub fn is_echo(&self) -> bool {
        self.origin == EventOrigin::RemoteEcho
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Document;
    use crate::time::Timestamp;
    use crate::types::{OwnerId, RecordId};

    fn record() -> SyncedRecord {
        SyncedRecord::new(
            RecordId::generate(),
            OwnerId::new("u1"),
            Timestamp::from_millis(1),
            Document::new(),
        )
    }

    #[test]
    fn constructors_set_kind() {
        let table = Table::new("bills");
        let e = ChangeEvent::insert(table, record(), EventOrigin::ExternalDevice);
        assert_eq!(e.kind, ChangeKind::Insert);
        assert!(!e.is_echo());

        let e = ChangeEvent::update(table, record(), EventOrigin::RemoteEcho);
        assert_eq!(e.kind, ChangeKind::Update);
        assert!(e.is_echo());

        let e = ChangeEvent::delete(table, record(), EventOrigin::ExternalDevice);
        assert_eq!(e.kind, ChangeKind::Delete);
    }
}
