//! Staff members and salary fields.

use bahi_core::Table;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity};
use crate::error::{ServiceError, ServiceResult};

/// An employee on the payroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    /// Display name.
    pub name: String,
    /// Job title, if recorded.
    pub role: Option<String>,
    /// Monthly salary in minor units.
    pub monthly_salary_minor: i64,
    /// First day of employment.
    pub joined_on: NaiveDate,
}

impl StaffMember {
    /// Salary for a partial month, in minor units.
    #[must_use]
    pub fn prorated_salary_minor(&self, days_worked: u32, days_in_month: u32) -> i64 {
        if days_in_month == 0 {
            return 0;
        }
        let days_worked = days_worked.min(days_in_month);
        (i128::from(self.monthly_salary_minor) * i128::from(days_worked)
            / i128::from(days_in_month)) as i64
    }
}

impl LedgerEntity for StaffMember {
    const TABLE: Table = Table::new("staff");

    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::invalid("staff name must not be empty"));
        }
        if self.monthly_salary_minor < 0 {
            return Err(ServiceError::invalid("salary must not be negative"));
        }
        Ok(())
    }
}

/// CRUD service for staff members.
pub type StaffService = EntityService<StaffMember>;
