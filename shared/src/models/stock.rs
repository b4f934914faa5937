//! Inventory events and the derived stock movement log

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ordering::{Direction, EventRef, ReferenceKind, StockKey};
use crate::error::EventError;

/// What a stock event records, with the per-unit amount that only makes
/// sense for that kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockEventKind {
    Purchase { unit_cost: Decimal },
    Sale { unit_price: Decimal },
}

/// An immutable purchase or sale-line fact for one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEvent {
    pub id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub kind: StockEventKind,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Deletion stamp of the owning sale, for sale lines
    pub parent_deleted_at: Option<DateTime<Utc>>,
}

impl StockEvent {
    /// Build a purchase event, rejecting malformed input
    pub fn purchase(
        id: i64,
        product_id: i64,
        quantity: Decimal,
        unit_cost: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Self::new(
            id,
            product_id,
            StockEventKind::Purchase { unit_cost },
            quantity,
            occurred_at,
        )
    }

    /// Build a sale-line event, rejecting malformed input
    pub fn sale(
        id: i64,
        product_id: i64,
        quantity: Decimal,
        unit_price: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Self::new(
            id,
            product_id,
            StockEventKind::Sale { unit_price },
            quantity,
            occurred_at,
        )
    }

    fn new(
        id: i64,
        product_id: i64,
        kind: StockEventKind,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let event = Self {
            id,
            product_id,
            variant_id: None,
            kind,
            quantity,
            occurred_at,
            created_by: None,
            deleted_at: None,
            parent_deleted_at: None,
        };
        event.check()?;
        Ok(event)
    }

    /// Boundary check applied to every event read or written
    pub fn check(&self) -> Result<(), EventError> {
        if self.quantity <= Decimal::ZERO {
            return Err(EventError::invalid("quantity", "must be positive"));
        }
        match self.kind {
            StockEventKind::Purchase { unit_cost } if unit_cost < Decimal::ZERO => {
                Err(EventError::invalid("unit_cost", "cannot be negative"))
            }
            StockEventKind::Sale { unit_price } if unit_price < Decimal::ZERO => {
                Err(EventError::invalid("unit_price", "cannot be negative"))
            }
            _ => Ok(()),
        }
    }

    /// The single soft-delete predicate used by every replay
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.parent_deleted_at.is_none()
    }

    pub fn reference_kind(&self) -> ReferenceKind {
        match self.kind {
            StockEventKind::Purchase { .. } => ReferenceKind::Purchase,
            StockEventKind::Sale { .. } => ReferenceKind::Sale,
        }
    }

    pub fn reference(&self) -> EventRef {
        EventRef {
            kind: self.reference_kind(),
            id: self.id,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            occurred_at: self.occurred_at,
            id: self.id,
            kind: self.reference_kind(),
        }
    }

    pub fn direction(&self) -> Direction {
        match self.kind {
            StockEventKind::Purchase { .. } => Direction::In,
            StockEventKind::Sale { .. } => Direction::Out,
        }
    }

    /// Calendar date the event belongs to, used for window membership
    pub fn date(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// Quantity times the per-unit cost or price
    pub fn extended_amount(&self) -> Option<Decimal> {
        let unit = match self.kind {
            StockEventKind::Purchase { unit_cost } => unit_cost,
            StockEventKind::Sale { unit_price } => unit_price,
        };
        self.quantity.checked_mul(unit)
    }
}

/// Derived row: one per active stock event, forming a contiguous chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: i64,
    pub reference: EventRef,
    pub direction: Direction,
    pub quantity: Decimal,
    pub before_quantity: Decimal,
    /// True running quantity after this movement; negative on oversell
    pub after_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn key(&self) -> StockKey {
        StockKey {
            occurred_at: self.occurred_at,
            id: self.reference.id,
            kind: self.reference.kind,
        }
    }

    /// After-quantity as shown on stock cards, never below zero
    pub fn display_after_quantity(&self) -> Decimal {
        self.after_quantity.max(Decimal::ZERO)
    }

    /// Signed change this movement applies to the running quantity
    pub fn signed_quantity(&self) -> Decimal {
        match self.direction {
            Direction::In => self.quantity,
            Direction::Out => -self.quantity,
        }
    }
}

/// Point-in-time valuation of a product's stock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductValuationSnapshot {
    pub product_id: i64,
    pub as_of_date: NaiveDate,
    pub quantity_on_hand: Decimal,
    pub weighted_avg_unit_cost: Decimal,
    pub stock_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let err = StockEvent::purchase(1, 1, Decimal::ZERO, Decimal::from(10), at(1)).unwrap_err();
        assert_eq!(err.field(), "quantity");

        let err = StockEvent::sale(1, 1, Decimal::from(-3), Decimal::from(10), at(1)).unwrap_err();
        assert_eq!(err.field(), "quantity");
    }

    #[test]
    fn test_rejects_negative_unit_amounts() {
        let err = StockEvent::purchase(1, 1, Decimal::ONE, Decimal::from(-1), at(1)).unwrap_err();
        assert_eq!(err.field(), "unit_cost");

        let err = StockEvent::sale(1, 1, Decimal::ONE, Decimal::from(-1), at(1)).unwrap_err();
        assert_eq!(err.field(), "unit_price");
    }

    #[test]
    fn test_sale_line_inactive_when_parent_deleted() {
        let mut event = StockEvent::sale(5, 1, Decimal::ONE, Decimal::from(150), at(2)).unwrap();
        assert!(event.is_active());

        event.parent_deleted_at = Some(at(3));
        assert!(!event.is_active());

        event.parent_deleted_at = None;
        event.deleted_at = Some(at(3));
        assert!(!event.is_active());
    }

    #[test]
    fn test_direction_and_reference_follow_kind() {
        let purchase = StockEvent::purchase(8, 1, Decimal::ONE, Decimal::ONE, at(1)).unwrap();
        assert_eq!(purchase.direction(), Direction::In);
        assert_eq!(purchase.reference(), EventRef::purchase(8));

        let sale = StockEvent::sale(8, 1, Decimal::ONE, Decimal::ONE, at(1)).unwrap();
        assert_eq!(sale.direction(), Direction::Out);
        assert_eq!(sale.reference(), EventRef::sale(8));
        assert!(purchase.key() < sale.key());
    }

    #[test]
    fn test_display_after_quantity_clamps() {
        let movement = StockMovement {
            product_id: 1,
            reference: EventRef::sale(1),
            direction: Direction::Out,
            quantity: Decimal::from(5),
            before_quantity: Decimal::from(2),
            after_quantity: Decimal::from(-3),
            occurred_at: at(1),
        };
        assert_eq!(movement.display_after_quantity(), Decimal::ZERO);
        assert_eq!(movement.signed_quantity(), Decimal::from(-5));
    }
}
