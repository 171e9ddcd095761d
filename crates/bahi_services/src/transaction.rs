//! Ledger transactions against a party (customer or supplier).

use bahi_core::{RecordId, Table};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity};
use crate::error::{ServiceError, ServiceResult};

/// Direction of a ledger transaction relative to the party's account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnDirection {
    /// The party's balance grows (goods given on credit, purchase booked).
    Credit,
    /// The party's balance shrinks (payment settled).
    Debit,
}

/// A single ledger transaction. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTxn {
    /// The customer or supplier this transaction belongs to.
    pub party: RecordId,
    /// Credit or debit.
    pub direction: TxnDirection,
    /// Amount in minor units; always positive.
    pub amount_minor: i64,
    /// Free-form note.
    pub memo: Option<String>,
    /// Book date of the entry.
    pub entry_date: NaiveDate,
}

impl LedgerTxn {
    /// The amount signed by direction: credits positive, debits negative.
    #[must_use]
    pub fn signed_amount_minor(&self) -> i64 {
        match self.direction {
            TxnDirection::Credit => self.amount_minor,
            TxnDirection::Debit => -self.amount_minor,
        }
    }
}

impl LedgerEntity for LedgerTxn {
    const TABLE: Table = Table::new("transactions");

    fn validate(&self) -> ServiceResult<()> {
        if self.amount_minor <= 0 {
            return Err(ServiceError::invalid("transaction amount must be positive"));
        }
        Ok(())
    }
}

/// CRUD service for ledger transactions.
pub type TransactionService = EntityService<LedgerTxn>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn signed_amounts() {
        let credit = LedgerTxn {
            party: RecordId::generate(),
            direction: TxnDirection::Credit,
            amount_minor: 500,
            memo: None,
            entry_date: date(),
        };
        assert_eq!(credit.signed_amount_minor(), 500);

        let debit = LedgerTxn {
            direction: TxnDirection::Debit,
            ..credit
        };
        assert_eq!(debit.signed_amount_minor(), -500);
    }

    #[test]
    fn amounts_must_be_positive() {
        let txn = LedgerTxn {
            party: RecordId::generate(),
            direction: TxnDirection::Credit,
            amount_minor: 0,
            memo: None,
            entry_date: date(),
        };
        assert!(matches!(txn.validate(), Err(ServiceError::Invalid(_))));
    }

    #[test]
    fn serde_uses_snake_case_directions() {
        let json = serde_json::to_value(TxnDirection::Credit).unwrap();
        assert_eq!(json, serde_json::json!("credit"));
    }
}
