//! Drift between stored derived values and values recomputed from events,
//! plus the business invariant violations surfaced alongside it.

use std::collections::BTreeMap;
use std::fmt::Display;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{BalanceAssignment, BankTransaction, EventRef, StockMovement};
use crate::types::EntityRef;

/// Stored field that disagreed with its recomputed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftField {
    MovementMissing,
    MovementUnexpected,
    Direction,
    Quantity,
    BeforeQuantity,
    AfterQuantity,
    OccurredAt,
    AvailableQuantity,
    RunningBalance,
    CurrentBalance,
    Paid,
    Due,
    PaymentStatus,
}

/// One stored-vs-recomputed disagreement
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriftEntry {
    pub entity: EntityRef,
    /// Row within the entity's ledger, e.g. `sale:12` or `transaction:40`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<String>,
    pub field: DriftField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl DriftEntry {
    pub fn value<T: Display>(
        entity: EntityRef,
        row: Option<String>,
        field: DriftField,
        old_value: T,
        new_value: T,
    ) -> Self {
        Self {
            entity,
            row,
            field,
            old_value: Some(old_value.to_string()),
            new_value: Some(new_value.to_string()),
        }
    }
}

/// Business invariant broken by the event history itself.
///
/// These are not computation bugs and are never auto-corrected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    Oversell {
        product_id: i64,
        reference: EventRef,
        running_quantity: Decimal,
    },
    NegativeBalance {
        bank_account_id: i64,
        transaction_id: i64,
        running_balance: Decimal,
    },
    Overpayment {
        sale_id: i64,
        total: Decimal,
        paid: Decimal,
        excess: Decimal,
    },
}

/// Money comparison: drift only when the difference exceeds `tolerance`
pub fn money_drifted(stored: Decimal, recomputed: Decimal, tolerance: Decimal) -> bool {
    (stored - recomputed).abs() > tolerance
}

/// Compare a product's stored movement chain with a recomputed one.
///
/// Movements are matched by their purchase/sale reference; quantities are
/// compared exactly.
pub fn diff_movements(
    product_id: i64,
    stored: &[StockMovement],
    recomputed: &[StockMovement],
) -> Vec<DriftEntry> {
    let entity = EntityRef::product(product_id);
    let stored_by_ref: BTreeMap<EventRef, &StockMovement> =
        stored.iter().map(|m| (m.reference, m)).collect();
    let recomputed_by_ref: BTreeMap<EventRef, &StockMovement> =
        recomputed.iter().map(|m| (m.reference, m)).collect();

    let mut entries = Vec::new();

    for (reference, expected) in &recomputed_by_ref {
        let row = Some(reference.to_string());
        let Some(actual) = stored_by_ref.get(reference) else {
            entries.push(DriftEntry {
                entity,
                row,
                field: DriftField::MovementMissing,
                old_value: None,
                new_value: Some(expected.after_quantity.to_string()),
            });
            continue;
        };

        if actual.direction != expected.direction {
            entries.push(DriftEntry::value(
                entity,
                row.clone(),
                DriftField::Direction,
                actual.direction.as_str(),
                expected.direction.as_str(),
            ));
        }
        if actual.quantity != expected.quantity {
            entries.push(DriftEntry::value(
                entity,
                row.clone(),
                DriftField::Quantity,
                actual.quantity,
                expected.quantity,
            ));
        }
        if actual.before_quantity != expected.before_quantity {
            entries.push(DriftEntry::value(
                entity,
                row.clone(),
                DriftField::BeforeQuantity,
                actual.before_quantity,
                expected.before_quantity,
            ));
        }
        if actual.after_quantity != expected.after_quantity {
            entries.push(DriftEntry::value(
                entity,
                row.clone(),
                DriftField::AfterQuantity,
                actual.after_quantity,
                expected.after_quantity,
            ));
        }
        if actual.occurred_at != expected.occurred_at {
            entries.push(DriftEntry::value(
                entity,
                row,
                DriftField::OccurredAt,
                actual.occurred_at.to_rfc3339(),
                expected.occurred_at.to_rfc3339(),
            ));
        }
    }

    for (reference, actual) in &stored_by_ref {
        if !recomputed_by_ref.contains_key(reference) {
            entries.push(DriftEntry {
                entity,
                row: Some(reference.to_string()),
                field: DriftField::MovementUnexpected,
                old_value: Some(actual.after_quantity.to_string()),
                new_value: None,
            });
        }
    }

    entries
}

/// Compare stored running balances of active transactions with a replay
pub fn diff_running_balances(
    bank_account_id: i64,
    stored: &[BankTransaction],
    assignments: &[BalanceAssignment],
    tolerance: Decimal,
) -> Vec<DriftEntry> {
    let entity = EntityRef::bank_account(bank_account_id);
    let stored_by_id: BTreeMap<i64, &BankTransaction> =
        stored.iter().map(|tx| (tx.id, tx)).collect();

    assignments
        .iter()
        .filter_map(|assignment| {
            let stored_balance = stored_by_id
                .get(&assignment.transaction_id)
                .and_then(|tx| tx.running_balance);

            let drifted = match stored_balance {
                Some(value) => money_drifted(value, assignment.running_balance, tolerance),
                None => true,
            };

            drifted.then(|| DriftEntry {
                entity,
                row: Some(format!("transaction:{}", assignment.transaction_id)),
                field: DriftField::RunningBalance,
                old_value: stored_balance.map(|v| v.to_string()),
                new_value: Some(assignment.running_balance.to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn movement(id: i64, before: i64, after: i64) -> StockMovement {
        StockMovement {
            product_id: 1,
            reference: EventRef::purchase(id),
            direction: Direction::In,
            quantity: Decimal::from(after - before),
            before_quantity: Decimal::from(before),
            after_quantity: Decimal::from(after),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, id as u32, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_money_tolerance_boundary() {
        assert!(!money_drifted(dec("100.00"), dec("100.01"), dec("0.01")));
        assert!(money_drifted(dec("100.00"), dec("100.02"), dec("0.01")));
        assert!(money_drifted(dec("100.02"), dec("100.00"), dec("0.01")));
    }

    #[test]
    fn test_identical_chains_have_no_drift() {
        let chain = vec![movement(1, 0, 10), movement(2, 10, 15)];
        assert!(diff_movements(1, &chain, &chain).is_empty());
    }

    #[test]
    fn test_scale_differences_are_not_drift() {
        let stored = vec![movement(1, 0, 10)];
        let mut recomputed = stored.clone();
        recomputed[0].after_quantity = dec("10.0000");
        assert!(diff_movements(1, &stored, &recomputed).is_empty());
    }

    #[test]
    fn test_missing_and_unexpected_movements() {
        let stored = vec![movement(1, 0, 10), movement(3, 10, 12)];
        let recomputed = vec![movement(1, 0, 10), movement(2, 10, 15)];
        let entries = diff_movements(1, &stored, &recomputed);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field, DriftField::MovementMissing);
        assert_eq!(entries[0].row.as_deref(), Some("purchase:2"));
        assert_eq!(entries[1].field, DriftField::MovementUnexpected);
        assert_eq!(entries[1].row.as_deref(), Some("purchase:3"));
    }

    #[test]
    fn test_quantity_drift_reports_old_and_new() {
        let stored = vec![movement(1, 0, 10), movement(2, 10, 14)];
        let recomputed = vec![movement(1, 0, 10), movement(2, 10, 15)];
        let entries = diff_movements(1, &stored, &recomputed);

        let after = entries
            .iter()
            .find(|e| e.field == DriftField::AfterQuantity)
            .unwrap();
        assert_eq!(after.old_value.as_deref(), Some("14"));
        assert_eq!(after.new_value.as_deref(), Some("15"));
    }
}
