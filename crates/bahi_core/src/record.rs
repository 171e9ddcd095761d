//! The synchronized record shape.
//!
//! Every row under sync management carries the same fixed core columns plus
//! a JSON extension map for table-specific fields. Payloads are validated at
//! the boundary: the extension map may not shadow core columns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::time::Timestamp;
use crate::types::{OwnerId, RecordId};

/// The table-specific extension map of a record.
pub type Document = serde_json::Map<String, Value>;

/// Keys reserved for the fixed core columns; payloads may not contain them.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "owner",
    "created_at",
    "updated_at",
    "synced_at",
    "deleted_at",
];

/// A row under sync management.
///
/// # Fields
///
/// - `id`: stable identifier, client-assigned for creates
/// - `owner`: the acting user's scope
/// - `created_at` / `updated_at`: record clock; `updated_at` drives conflict
///   arbitration
/// - `synced_at`: last instant this client's copy was known to match the
///   remote value; `None` means not yet confirmed
/// - `deleted_at`: soft-delete tombstone; set means logically deleted
/// - `fields`: table-specific extension map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    /// Stable record identifier.
    pub id: RecordId,
    /// Owner scope.
    pub owner: OwnerId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last modification instant; the conflict arbitration key.
    pub updated_at: Timestamp,
    /// Last instant the local copy was known to match the remote value.
    pub synced_at: Option<Timestamp>,
    /// Soft-delete tombstone instant.
    pub deleted_at: Option<Timestamp>,
    /// Table-specific fields.
    pub fields: Document,
}

impl SyncedRecord {
    /// Creates a fresh, unconfirmed record from a payload.
    #[must_use]
    pub fn new(id: RecordId, owner: OwnerId, now: Timestamp, fields: Document) -> Self {
        Self {
            id,
            owner,
            created_at: now,
            updated_at: now,
            synced_at: None,
            deleted_at: None,
            fields,
        }
    }

    /// Returns true if the record is logically deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Applies a patch to the extension map, producing the post-image.
    ///
    /// `updated_at` moves to `now` and `synced_at` is cleared: the local
    /// copy is no longer known to match the remote value.
    #[must_use]
    pub fn with_patch(&self, patch: &Document, now: Timestamp) -> Self {
        let mut next = self.clone();
        for (key, value) in patch {
            next.fields.insert(key.clone(), value.clone());
        }
        next.updated_at = now;
        next.synced_at = None;
        next
    }

    /// Produces the tombstoned post-image of this record.
    #[must_use]
    pub fn tombstoned(&self, now: Timestamp) -> Self {
        let mut next = self.clone();
        next.deleted_at = Some(now);
        next.updated_at = now;
        next.synced_at = None;
        next
    }

    /// Marks the record as confirmed against the remote value.
    #[must_use]
    pub fn confirmed_at(mut self, instant: Timestamp) -> Self {
        self.synced_at = Some(instant);
        self
    }
}

/// Validates a create payload.
///
/// Rejects reserved keys; a payload may never carry its own tombstone or
/// shadow a core column.
pub fn validate_payload(payload: &Document) -> CoreResult<()> {
    for key in RESERVED_KEYS {
        if payload.contains_key(*key) {
            return Err(CoreError::ReservedKey {
                key: (*key).to_string(),
            });
        }
    }
    Ok(())
}

/// Validates an update patch. Same rules as create payloads.
pub fn validate_patch(patch: &Document) -> CoreResult<()> {
    validate_payload(patch)
}
