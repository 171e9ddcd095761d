//! # Bahi Sync Engine
//!
//! Optimistic realtime synchronization engine for Bahi.
//!
//! This crate provides:
//! - Mutation broker (create/update/delete/batch-create) with optimistic
//!   local application
//! - Mutation lifecycle state machine with bounded retry and rollback
//! - Change-feed subscription manager with per-table channels
//! - Echo deduplication via the client-mutation registry
//! - Last-write-wins reconciliation by server timestamp
//!
//! ## Architecture
//!
//! A write is applied to the local view **before** any suspension point, so
//! the UI never blocks on network latency. The remote write then proceeds
//! in the background; its authoritative response and the server-pushed
//! change feed are both reconciled into local state by timestamp, and feed
//! events recognized as echoes of local writes are suppressed so no change
//! is delivered twice.
//!
//! ## Key Invariants
//!
//! - A failed mutation is always rolled back; readers never keep seeing a
//!   write that did not durably succeed
//! - Per-record delivery order is monotonic in `updated_at`
//! - Ties between record versions are resolved in favor of the remote value
//! - Deletes are soft: a tombstone, never a physical remove
//! - Suspension points are exactly the remote calls; all bookkeeping is
//!   synchronous

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod cache;
mod config;
mod engine;
mod error;
mod feed;
mod mutation;
mod reconcile;
mod remote;
mod stats;

pub use broker::{
    BatchConfirmation, Confirmation, CreateOptions, MutationBroker, PendingBatch, PendingWrite,
};
pub use cache::LocalCache;
pub use config::{EngineConfig, RetryConfig};
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use feed::{RecordCallback, Subscriber, SubscriptionHandle, SubscriptionManager};
pub use mutation::{MutationOp, MutationRegistry, MutationState, OptimisticMutation};
pub use reconcile::{MergeDecision, Reconciler};
pub use remote::{
    AuthProvider, FeedReceiver, MockRemote, RemoteStore, StaticAuth, WireEvent, WireEventKind,
};
pub use stats::EngineStats;
