//! Customers and receivable balances.

use bahi_core::Table;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity, Synced};
use crate::error::{ServiceError, ServiceResult};
use crate::transaction::LedgerTxn;

/// A customer of the business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Display name.
    pub name: String,
    /// Contact phone, if known.
    pub phone: Option<String>,
    /// Postal address, if known.
    pub address: Option<String>,
    /// Balance carried over from before bookkeeping started, in minor
    /// units. Positive means the customer owes the business.
    pub opening_balance_minor: i64,
}

impl LedgerEntity for Customer {
    const TABLE: Table = Table::new("customers");

    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::invalid("customer name must not be empty"));
        }
        Ok(())
    }
}

/// CRUD service for customers.
pub type CustomerService = EntityService<Customer>;

/// The customer's current receivable balance: opening balance plus all of
/// their signed transactions.
#[must_use]
pub fn running_balance_minor(customer: &Synced<Customer>, txns: &[Synced<LedgerTxn>]) -> i64 {
    customer.data.opening_balance_minor
        + txns
            .iter()
            .filter(|t| t.data.party == customer.id)
            .map(|t| t.data.signed_amount_minor())
            .sum::<i64>()
}
