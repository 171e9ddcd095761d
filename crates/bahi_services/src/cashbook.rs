//! Cashbook entries: money in, money out.

use bahi_core::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity, Synced};
use crate::error::{ServiceError, ServiceResult};

/// Direction of cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlow {
    /// Cash received.
    In,
    /// Cash paid out.
    Out,
}

/// One cashbook entry. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashbookEntry {
    /// In or out.
    pub flow: CashFlow,
    /// Amount in minor units; always positive.
    pub amount_minor: i64,
    /// Free-form note.
    pub note: Option<String>,
    /// Book date of the entry.
    pub entry_date: NaiveDate,
}

impl CashbookEntry {
    /// The amount signed by flow: inflows positive, outflows negative.
    #[must_use]
    pub fn signed_amount_minor(&self) -> i64 {
        match self.flow {
            CashFlow::In => self.amount_minor,
            CashFlow::Out => -self.amount_minor,
        }
    }
}

impl LedgerEntity for CashbookEntry {
    const TABLE: Table = Table::new("cashbook");

    fn validate(&self) -> ServiceResult<()> {
        if self.amount_minor <= 0 {
            return Err(ServiceError::invalid("cash amount must be positive"));
        }
        Ok(())
    }
}

/// CRUD service for cashbook entries.
pub type CashbookService = EntityService<CashbookEntry>;

/// Net cash position across a set of entries, in minor units.
#[must_use]
pub fn net_balance_minor(entries: &[Synced<CashbookEntry>]) -> i64 {
    entries.iter().map(|e| e.data.signed_amount_minor()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bahi_core::{RecordId, Timestamp};

    fn entry(flow: CashFlow, amount: i64) -> Synced<CashbookEntry> {
        Synced {
            id: RecordId::generate(),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
            synced_at: None,
            data: CashbookEntry {
                flow,
                amount_minor: amount,
                note: None,
                entry_date: NaiveDate::from_ymd_opt(2024, 5, 5).unwrap(),
            },
        }
    }

    #[test]
    fn net_balance_offsets_in_and_out() {
        let entries = vec![
            entry(CashFlow::In, 5_000),
            entry(CashFlow::Out, 1_200),
            entry(CashFlow::In, 300),
        ];
        assert_eq!(net_balance_minor(&entries), 4_100);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let e = entry(CashFlow::In, 0).data;
        assert!(matches!(e.validate(), Err(ServiceError::Invalid(_))));
    }
}
