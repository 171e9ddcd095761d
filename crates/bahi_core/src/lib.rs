//! # Bahi Core
//!
//! Record model and change-event types for Bahi.
//!
//! This crate provides:
//! - Identifier newtypes (records, owners, mutations, tables)
//! - Millisecond timestamps with the last-write-wins comparator
//! - The `SyncedRecord` row shape shared by every synchronized table
//! - Normalized change events with origin classification
//! - Payload validation at the document boundary
//!
//! ## Key Invariants
//!
//! - Record ids are assigned by the client, so a create knows its id before
//!   remote confirmation
//! - Every record belongs to exactly one owner scope
//! - A set `deleted_at` means logically deleted; rows are never physically
//!   removed
//! - `updated_at` ordering is the only channel of conflict arbitration

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod record;
mod time;
mod types;

pub use error::{CoreError, CoreResult};
pub use event::{ChangeEvent, ChangeKind, EventOrigin};
pub use record::{validate_patch, validate_payload, Document, SyncedRecord, RESERVED_KEYS};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{BatchId, MutationId, OwnerId, RecordId, Table};
