//! Bills (invoices) and their line totals.

use bahi_core::{RecordId, Table};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity};
use crate::error::{ServiceError, ServiceResult};

/// One line of a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillLine {
    /// What was sold.
    pub description: String,
    /// Quantity; fractional for weighed goods.
    pub quantity: f64,
    /// Price per unit, in minor units.
    pub unit_price_minor: i64,
}

impl BillLine {
    /// The line total in minor units, rounded to the nearest unit.
    #[must_use]
    pub fn total_minor(&self) -> i64 {
        (self.quantity * self.unit_price_minor as f64).round() as i64
    }
}

/// A bill issued to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    /// The billed customer.
    pub customer: RecordId,
    /// Human-facing bill number.
    pub number: String,
    /// Issue date.
    pub issued_on: NaiveDate,
    /// Line items.
    pub lines: Vec<BillLine>,
    /// Amount already paid against this bill, in minor units.
    pub paid_minor: i64,
}

impl Bill {
    /// The bill total in minor units.
    #[must_use]
    pub fn total_minor(&self) -> i64 {
        self.lines.iter().map(BillLine::total_minor).sum()
    }

    /// The unpaid remainder in minor units (never negative).
    #[must_use]
    pub fn outstanding_minor(&self) -> i64 {
        (self.total_minor() - self.paid_minor).max(0)
    }
}

impl LedgerEntity for Bill {
    const TABLE: Table = Table::new("bills");

    fn validate(&self) -> ServiceResult<()> {
        if self.number.trim().is_empty() {
            return Err(ServiceError::invalid("bill number must not be empty"));
        }
        if self.lines.is_empty() {
            return Err(ServiceError::invalid("a bill needs at least one line"));
        }
        for line in &self.lines {
            if !(line.quantity.is_finite() && line.quantity > 0.0) {
                return Err(ServiceError::invalid("line quantity must be positive"));
            }
            if line.unit_price_minor < 0 {
                return Err(ServiceError::invalid("line price must not be negative"));
            }
        }
        if self.paid_minor < 0 {
            return Err(ServiceError::invalid("paid amount must not be negative"));
        }
        Ok(())
    }
}

/// CRUD service for bills.
pub type BillService = EntityService<Bill>;
