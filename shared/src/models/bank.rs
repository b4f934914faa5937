//! Bank accounts and the transactions that move their balances

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ordering::{BankKey, Direction};
use crate::error::EventError;

/// Business origin of a bank transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Fund,
    SalePayment,
    Expense,
    ExtraIncome,
    Manual,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Fund => "fund",
            TransactionSource::SalePayment => "sale_payment",
            TransactionSource::Expense => "expense",
            TransactionSource::ExtraIncome => "extra_income",
            TransactionSource::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EventError> {
        match value {
            "fund" => Ok(TransactionSource::Fund),
            "sale_payment" => Ok(TransactionSource::SalePayment),
            "expense" => Ok(TransactionSource::Expense),
            "extra_income" => Ok(TransactionSource::ExtraIncome),
            "manual" => Ok(TransactionSource::Manual),
            other => Err(EventError::UnknownVariant {
                field: "source",
                value: other.to_string(),
            }),
        }
    }

    /// Direction money flows for this source, where it is fixed
    pub fn natural_direction(&self) -> Option<Direction> {
        match self {
            TransactionSource::SalePayment | TransactionSource::ExtraIncome => Some(Direction::In),
            TransactionSource::Expense => Some(Direction::Out),
            TransactionSource::Fund | TransactionSource::Manual => None,
        }
    }
}

/// A bank account with its immutable opening balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: i64,
    pub name: String,
    pub opening_balance: Decimal,
    /// Cache of the latest running balance, owned by the rebuilder
    pub current_balance: Decimal,
}

/// A deposit or withdrawal with its materialized running balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: i64,
    pub bank_account_id: i64,
    pub direction: Direction,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
    pub running_balance: Option<Decimal>,
    pub sale_id: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Deletion stamp of the linked sale, for payment transactions
    pub sale_deleted_at: Option<DateTime<Utc>>,
}

impl BankTransaction {
    /// Boundary check applied to every transaction read or written
    pub fn check(&self) -> Result<(), EventError> {
        if self.amount <= Decimal::ZERO {
            return Err(EventError::invalid("amount", "must be positive"));
        }
        if let Some(expected) = self.source.natural_direction() {
            if expected != self.direction {
                return Err(EventError::invalid(
                    "direction",
                    "does not match the transaction source",
                ));
            }
        }
        Ok(())
    }

    /// The single soft-delete predicate used by every replay
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.sale_deleted_at.is_none()
    }

    pub fn key(&self) -> BankKey {
        BankKey {
            date: self.date,
            id: self.id,
        }
    }

    /// Signed change this transaction applies to the balance
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::In => self.amount,
            Direction::Out => -self.amount,
        }
    }
}

/// Running balance assigned to one transaction during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAssignment {
    pub transaction_id: i64,
    pub date: NaiveDate,
    pub direction: Direction,
    pub amount: Decimal,
    pub running_balance: Decimal,
}

/// Balance of `account` at the end of `date`: the stored running balance of
/// the last active transaction on or before `date`, or the opening balance
/// when there is none.
///
/// Returns `None` when that last transaction has no stored running balance.
/// Earlier rows are not read.
pub fn balance_as_of(
    account: &BankAccount,
    transactions: &[BankTransaction],
    date: NaiveDate,
) -> Option<Decimal> {
    let last = transactions
        .iter()
        .filter(|tx| tx.bank_account_id == account.id && tx.is_active() && tx.date <= date)
        .max_by_key(|tx| tx.key());

    match last {
        Some(tx) => tx.running_balance,
        None => Some(account.opening_balance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn tx(id: i64, date: &str, direction: Direction, amount: i64, rb: Option<i64>) -> BankTransaction {
        BankTransaction {
            id,
            bank_account_id: 1,
            direction,
            source: TransactionSource::Manual,
            amount: Decimal::from(amount),
            description: "test".to_string(),
            date: d(date),
            running_balance: rb.map(Decimal::from),
            sale_id: None,
            deleted_at: None,
            sale_deleted_at: None,
        }
    }

    fn account() -> BankAccount {
        BankAccount {
            id: 1,
            name: "Main".to_string(),
            opening_balance: Decimal::from(1000),
            current_balance: Decimal::from(1000),
        }
    }

    #[test]
    fn test_source_direction_mismatch_rejected() {
        let mut t = tx(1, "2024-01-01", Direction::Out, 10, None);
        t.source = TransactionSource::SalePayment;
        assert_eq!(t.check().unwrap_err().field(), "direction");

        t.direction = Direction::In;
        assert!(t.check().is_ok());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let t = tx(1, "2024-01-01", Direction::In, 0, None);
        assert_eq!(t.check().unwrap_err().field(), "amount");
    }

    #[test]
    fn test_balance_as_of_reads_last_active_row() {
        let mut txs = vec![
            tx(1, "2024-01-01", Direction::In, 500, Some(1500)),
            tx(2, "2024-01-02", Direction::Out, 200, Some(1300)),
            tx(3, "2024-01-02", Direction::Out, 100, Some(1200)),
        ];
        txs[2].deleted_at = Some(chrono::Utc::now());

        assert_eq!(balance_as_of(&account(), &txs, d("2023-12-31")), Some(Decimal::from(1000)));
        assert_eq!(balance_as_of(&account(), &txs, d("2024-01-01")), Some(Decimal::from(1500)));
        assert_eq!(balance_as_of(&account(), &txs, d("2024-01-05")), Some(Decimal::from(1300)));
    }

    #[test]
    fn test_balance_as_of_unbuilt_row() {
        let txs = vec![tx(1, "2024-01-01", Direction::In, 500, None)];
        assert_eq!(balance_as_of(&account(), &txs, d("2024-01-01")), None);
    }
}
