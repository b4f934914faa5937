//! Weighted-average inventory valuation over a date window.
//!
//! The average is total acquisition cost over total acquired quantity up to a
//! point in time. Sales never reduce the denominator.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::models::{ProductValuationSnapshot, StockEvent, StockEventKind};
use crate::types::{round_money, round_unit_cost};

/// Quantity, cost basis and profitability of a product over `[start, end]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub product_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Quantity on hand before `start`
    pub before_quantity: Decimal,
    /// Cumulative purchase cost before `start`
    pub before_value: Decimal,
    pub buy_quantity: Decimal,
    pub total_buy: Decimal,
    pub sale_quantity: Decimal,
    pub total_sale: Decimal,
    /// Weighted-average unit cost as of `end`, rounded for display
    pub weighted_avg_cost: Decimal,
    pub cogs: Decimal,
    /// Closing stock value: `before_value + total_buy - cogs`
    pub stock_value: Decimal,
    pub profit: Decimal,
    pub available_quantity: Decimal,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    purchased_quantity: Decimal,
    purchased_cost: Decimal,
    sold_quantity: Decimal,
    sold_revenue: Decimal,
}

impl Totals {
    fn add(&mut self, event: &StockEvent) -> Result<(), ValuationError> {
        let amount = event
            .extended_amount()
            .map(round_money)
            .ok_or(ValuationError::Overflow("extending amount"))?;

        let (quantity, value) = match event.kind {
            StockEventKind::Purchase { .. } => {
                (&mut self.purchased_quantity, &mut self.purchased_cost)
            }
            StockEventKind::Sale { .. } => (&mut self.sold_quantity, &mut self.sold_revenue),
        };
        *quantity = quantity
            .checked_add(event.quantity)
            .ok_or(ValuationError::Overflow("summing quantity"))?;
        *value = value
            .checked_add(amount)
            .ok_or(ValuationError::Overflow("summing amount"))?;
        Ok(())
    }

    fn on_hand(&self) -> Decimal {
        self.purchased_quantity - self.sold_quantity
    }
}

fn sum<'a>(
    events: impl Iterator<Item = &'a StockEvent>,
) -> Result<Totals, ValuationError> {
    let mut totals = Totals::default();
    for event in events {
        totals.add(event)?;
    }
    Ok(totals)
}

/// Total cost over total quantity, rounded once at the point of division.
///
/// Zero when nothing has been purchased.
pub fn weighted_average_cost(total_cost: Decimal, total_quantity: Decimal) -> Decimal {
    if total_quantity.is_zero() {
        return Decimal::ZERO;
    }
    total_cost
        .checked_div(total_quantity)
        .map(round_unit_cost)
        .unwrap_or(Decimal::ZERO)
}

fn active_for(product_id: i64, events: &[StockEvent]) -> impl Iterator<Item = &StockEvent> {
    events
        .iter()
        .filter(move |e| e.product_id == product_id && e.is_active())
}

fn average_as_of(
    product_id: i64,
    events: &[StockEvent],
    as_of: NaiveDate,
) -> Result<Decimal, ValuationError> {
    let purchases = sum(active_for(product_id, events).filter(|e| {
        e.date() <= as_of && matches!(e.kind, StockEventKind::Purchase { .. })
    }))?;
    Ok(weighted_average_cost(
        purchases.purchased_cost,
        purchases.purchased_quantity,
    ))
}

fn money_product(quantity: Decimal, unit: Decimal) -> Result<Decimal, ValuationError> {
    quantity
        .checked_mul(unit)
        .map(round_money)
        .ok_or(ValuationError::Overflow("multiplying by unit cost"))
}

/// Value a product over the inclusive window `[start, end]`.
///
/// Read-only and deterministic for a given event set.
pub fn valuate(
    product_id: i64,
    events: &[StockEvent],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Valuation, ValuationError> {
    if start > end {
        return Err(ValuationError::InvalidWindow { start, end });
    }

    let opening = sum(active_for(product_id, events).filter(|e| e.date() < start))?;
    let period = sum(active_for(product_id, events).filter(|e| start <= e.date() && e.date() <= end))?;

    let average = average_as_of(product_id, events, end)?;
    let cogs = money_product(period.sold_quantity, average)?;

    let before_quantity = opening.on_hand();
    let before_value = opening.purchased_cost;

    Ok(Valuation {
        product_id,
        start,
        end,
        before_quantity,
        before_value,
        buy_quantity: period.purchased_quantity,
        total_buy: period.purchased_cost,
        sale_quantity: period.sold_quantity,
        total_sale: period.sold_revenue,
        weighted_avg_cost: round_money(average),
        cogs,
        stock_value: before_value + period.purchased_cost - cogs,
        profit: period.sold_revenue - cogs,
        available_quantity: before_quantity + period.purchased_quantity - period.sold_quantity,
    })
}

/// Quantity on hand and its value at the end of `as_of`
pub fn snapshot(
    product_id: i64,
    events: &[StockEvent],
    as_of: NaiveDate,
) -> Result<ProductValuationSnapshot, ValuationError> {
    let totals = sum(active_for(product_id, events).filter(|e| e.date() <= as_of))?;
    let average = average_as_of(product_id, events, as_of)?;
    let quantity_on_hand = totals.on_hand();

    Ok(ProductValuationSnapshot {
        product_id,
        as_of_date: as_of,
        quantity_on_hand,
        weighted_avg_unit_cost: average,
        stock_value: money_product(quantity_on_hand, average)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn purchase(id: i64, qty: &str, cost: &str, month: u32, day: u32) -> StockEvent {
        let at = Utc.with_ymd_and_hms(2024, month, day, 9, 0, 0).unwrap();
        StockEvent::purchase(id, 1, dec(qty), dec(cost), at).unwrap()
    }

    #[test]
    fn test_average_is_zero_without_purchases() {
        assert_eq!(weighted_average_cost(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        let v = valuate(1, &[], d("2024-01-01"), d("2024-01-31")).unwrap();
        assert_eq!(v.weighted_avg_cost, Decimal::ZERO);
        assert_eq!(v.stock_value, Decimal::ZERO);
    }

    #[test]
    fn test_average_rounds_once_at_division() {
        let avg = weighted_average_cost(dec("16000"), dec("150"));
        assert_eq!(avg, dec("106.6666666667"));
        assert_eq!(round_money(avg), dec("106.67"));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = valuate(1, &[], d("2024-02-01"), d("2024-01-01")).unwrap_err();
        assert!(matches!(err, ValuationError::InvalidWindow { .. }));
    }

    #[test]
    fn test_purchases_after_end_do_not_move_average() {
        let events = vec![
            purchase(1, "10", "10", 1, 5),
            purchase(2, "10", "30", 3, 5),
        ];
        let v = valuate(1, &events, d("2024-01-01"), d("2024-01-31")).unwrap();
        assert_eq!(v.weighted_avg_cost, dec("10.00"));
        assert_eq!(v.buy_quantity, dec("10"));
    }

    #[test]
    fn test_snapshot_value() {
        let events = vec![purchase(1, "4", "2.50", 1, 5), purchase(2, "6", "3.00", 1, 6)];
        let s = snapshot(1, &events, d("2024-01-31")).unwrap();
        assert_eq!(s.quantity_on_hand, dec("10"));
        assert_eq!(s.weighted_avg_unit_cost, dec("2.8"));
        assert_eq!(s.stock_value, dec("28.00"));
    }
}
