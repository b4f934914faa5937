//! Content digests of derived ledger rows.
//!
//! Two rebuilds of the same history must produce the same digest. Decimals are
//! normalized first so `10` and `10.0000` hash alike.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::models::{BalanceAssignment, StockMovement};

fn finish(hasher: Sha256) -> String {
    STANDARD.encode(hasher.finalize())
}

/// Digest of a product's movement chain
pub fn stock_digest(movements: &[StockMovement]) -> String {
    let mut hasher = Sha256::new();
    for m in movements {
        let line = format!(
            "{}|{}|{}|{}|{}|{}|{}\n",
            m.product_id,
            m.reference,
            m.direction.as_str(),
            m.quantity.normalize(),
            m.before_quantity.normalize(),
            m.after_quantity.normalize(),
            m.occurred_at.timestamp_micros(),
        );
        hasher.update(line.as_bytes());
    }
    finish(hasher)
}

/// Digest of an account's running-balance assignments
pub fn bank_digest(assignments: &[BalanceAssignment]) -> String {
    let mut hasher = Sha256::new();
    for a in assignments {
        let line = format!(
            "{}|{}|{}|{}|{}\n",
            a.transaction_id,
            a.date,
            a.direction.as_str(),
            a.amount.normalize(),
            a.running_balance.normalize(),
        );
        hasher.update(line.as_bytes());
    }
    finish(hasher)
}
