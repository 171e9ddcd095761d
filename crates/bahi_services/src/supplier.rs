//! Suppliers and payable balances.

use bahi_core::Table;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity, Synced};
use crate::error::{ServiceError, ServiceResult};
use crate::transaction::LedgerTxn;

/// A supplier the business buys from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    /// Display name.
    pub name: String,
    /// Contact phone, if known.
    pub phone: Option<String>,
    /// Postal address, if known.
    pub address: Option<String>,
    /// Balance carried over from before bookkeeping started, in minor
    /// units. Positive means the business owes the supplier.
    pub opening_balance_minor: i64,
}

impl LedgerEntity for Supplier {
    const TABLE: Table = Table::new("suppliers");

    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::invalid("supplier name must not be empty"));
        }
        Ok(())
    }
}

/// CRUD service for suppliers.
pub type SupplierService = EntityService<Supplier>;

/// The current payable balance towards a supplier: opening balance plus
/// all of their signed transactions (credits book purchases, debits book
/// payments made).
#[must_use]
pub fn payable_balance_minor(supplier: &Synced<Supplier>, txns: &[Synced<LedgerTxn>]) -> i64 {
    supplier.data.opening_balance_minor
        + txns
            .iter()
            .filter(|t| t.data.party == supplier.id)
            .map(|t| t.data.signed_amount_minor())
            .sum::<i64>()
}
