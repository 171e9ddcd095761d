//! # Bahi Services
//!
//! Typed per-entity CRUD services for Bahi.
//!
//! Each domain service is a thin consumer of the sync engine's four broker
//! operations plus `subscribe`: it adds domain validation and derived-field
//! computation (balances, bill totals, weighted-average costs) on top of
//! the engine's untyped record surface, and never bypasses the broker for
//! writes that subscribers need to observe.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bill;
mod cashbook;
mod customer;
mod entity;
mod error;
mod inventory;
mod staff;
mod supplier;
mod transaction;

pub use bill::{Bill, BillLine, BillService};
pub use cashbook::{net_balance_minor, CashFlow, CashbookEntry, CashbookService};
pub use customer::{running_balance_minor, Customer, CustomerService};
pub use entity::{
    EntityService, LedgerEntity, Synced, TypedBatch, TypedSubscriber, TypedWrite,
};
pub use error::{ServiceError, ServiceResult};
pub use inventory::{InventoryItem, InventoryService};
pub use staff::{StaffMember, StaffService};
pub use supplier::{payable_balance_minor, Supplier, SupplierService};
pub use transaction::{LedgerTxn, TransactionService, TxnDirection};
