//! Inventory items and weighted-average costing.

use bahi_core::Table;
use serde::{Deserialize, Serialize};

use crate::entity::{EntityService, LedgerEntity};
use crate::error::{ServiceError, ServiceResult};

/// A stocked item. Costs are in minor units per unit of quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Display name.
    pub name: String,
    /// Stock-keeping unit code, if used.
    pub sku: Option<String>,
    /// Quantity on hand; fractional for weighed goods.
    pub quantity: f64,
    /// Weighted-average unit cost in minor units.
    pub unit_cost_minor: i64,
}

impl InventoryItem {
    /// The item after receiving `quantity` more units bought at
    /// `unit_cost_minor`, with the average cost reweighted across old and
    /// new stock.
    #[must_use]
    pub fn receive_stock(&self, quantity: f64, unit_cost_minor: i64) -> Self {
        let total_quantity = self.quantity + quantity;
        let unit_cost = if total_quantity > 0.0 {
            let blended = self.quantity * self.unit_cost_minor as f64
                + quantity * unit_cost_minor as f64;
            (blended / total_quantity).round() as i64
        } else {
            self.unit_cost_minor
        };
        Self {
            quantity: total_quantity,
            unit_cost_minor: unit_cost,
            ..self.clone()
        }
    }

    /// The item after issuing `quantity` units; the average cost does not
    /// change on the way out.
    #[must_use]
    pub fn issue_stock(&self, quantity: f64) -> Self {
        Self {
            quantity: (self.quantity - quantity).max(0.0),
            ..self.clone()
        }
    }

    /// Current stock value in minor units.
    #[must_use]
    pub fn stock_value_minor(&self) -> i64 {
        (self.quantity * self.unit_cost_minor as f64).round() as i64
    }
}

impl LedgerEntity for InventoryItem {
    const TABLE: Table = Table::new("inventory");

    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::invalid("item name must not be empty"));
        }
        if !(self.quantity.is_finite() && self.quantity >= 0.0) {
            return Err(ServiceError::invalid("quantity must not be negative"));
        }
        if self.unit_cost_minor < 0 {
            return Err(ServiceError::invalid("unit cost must not be negative"));
        }
        Ok(())
    }
}

/// CRUD service for inventory items.
pub type InventoryService = EntityService<InventoryItem>;

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> InventoryItem {
        InventoryItem {
            name: "Cement 50kg".into(),
            sku: Some("CEM-50".into()),
            quantity: 10.0,
            unit_cost_minor: 40_000,
        }
    }

    #[test]
    fn receiving_stock_reweights_the_average_cost() {
        // 10 bags @ 400.00 + 10 bags @ 500.00 = 20 bags @ 450.00
        let restocked = item().receive_stock(10.0, 50_000);
        assert_eq!(restocked.quantity, 20.0);
        assert_eq!(restocked.unit_cost_minor, 45_000);
    }

    #[test]
    fn receiving_into_empty_stock_takes_the_new_cost() {
        let empty = InventoryItem {
            quantity: 0.0,
            ..item()
        };
        let restocked = empty.receive_stock(5.0, 52_000);
        assert_eq!(restocked.unit_cost_minor, 52_000);
    }

    #[test]
    fn issuing_stock_keeps_the_cost_and_floors_at_zero() {
        let issued = item().issue_stock(4.0);
        assert_eq!(issued.quantity, 6.0);
        assert_eq!(issued.unit_cost_minor, 40_000);

        let drained = item().issue_stock(99.0);
        assert_eq!(drained.quantity, 0.0);
    }

    #[test]
    fn stock_value() {
        assert_eq!(item().stock_value_minor(), 400_000);
    }
}
