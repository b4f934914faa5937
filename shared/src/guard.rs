//! Sale payment invariants: `paid <= total`, `due = total - paid` and a
//! payment status derived from those two fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::drift::{money_drifted, DriftEntry, DriftField, Violation};
use crate::error::GuardError;
use crate::models::{PaymentStatus, Sale};
use crate::types::EntityRef;

/// Canonical payment fields for a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPayment {
    pub paid: Decimal,
    pub due: Decimal,
    pub status: PaymentStatus,
    /// Amount by which the stored payment exceeded the total
    pub overpayment: Option<Decimal>,
}

/// Status formula shared by the live check and the batch corrector
pub fn payment_status(total: Decimal, paid: Decimal) -> PaymentStatus {
    if paid >= total {
        PaymentStatus::Paid
    } else if paid > Decimal::ZERO {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Due
    }
}

/// Normalize `(total, paid)` into the canonical payment triple.
///
/// Negative payments are treated as nothing paid.
pub fn normalize(total: Decimal, paid: Decimal) -> NormalizedPayment {
    let overpayment = (paid > total).then(|| paid - total);
    let corrected_paid = paid.min(total).max(Decimal::ZERO);

    NormalizedPayment {
        paid: corrected_paid,
        due: total - corrected_paid,
        status: payment_status(total, corrected_paid),
        overpayment,
    }
}

/// Live invariant for recording a further payment against a sale
pub fn check_payment(
    total: Decimal,
    already_paid: Decimal,
    amount: Decimal,
) -> Result<NormalizedPayment, GuardError> {
    if amount <= Decimal::ZERO {
        return Err(GuardError::NonPositiveAmount);
    }

    let paid = already_paid + amount;
    if paid > total {
        return Err(GuardError::Overpayment {
            total,
            paid: already_paid,
            amount,
        });
    }

    Ok(normalize(total, paid))
}

/// Outcome of checking one stored sale against the formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleCheck {
    pub sale_id: i64,
    pub normalized: NormalizedPayment,
    pub drift: Vec<DriftEntry>,
    pub violation: Option<Violation>,
}

impl SaleCheck {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty() && self.violation.is_none()
    }
}

/// Compare a stored sale's payment fields with their normalized values.
///
/// Money differences within `tolerance` are not drift, and an excess payment
/// within `tolerance` is not an overpayment.
pub fn check_sale(sale: &Sale, tolerance: Decimal) -> SaleCheck {
    let normalized = normalize(sale.total, sale.paid);
    let entity = EntityRef::sale(sale.id);
    let mut drift = Vec::new();

    if money_drifted(sale.paid, normalized.paid, tolerance) {
        drift.push(DriftEntry::value(entity, None, DriftField::Paid, sale.paid, normalized.paid));
    }
    if money_drifted(sale.due, normalized.due, tolerance) {
        drift.push(DriftEntry::value(entity, None, DriftField::Due, sale.due, normalized.due));
    }
    if sale.payment_status != normalized.status {
        drift.push(DriftEntry::value(
            entity,
            None,
            DriftField::PaymentStatus,
            sale.payment_status,
            normalized.status,
        ));
    }

    let violation = normalized
        .overpayment
        .filter(|excess| *excess > tolerance)
        .map(|excess| Violation::Overpayment {
            sale_id: sale.id,
            total: sale.total,
            paid: sale.paid,
            excess,
        });

    SaleCheck {
        sale_id: sale.id,
        normalized,
        drift,
        violation,
    }
}
