//! Read-only contracts offered to reporting collaborators.
//!
//! Reports consume these values and never recompute ledger internals.

use chrono::NaiveDate;
use ledger_shared::{balance_as_of, EntityRef, ProductValuationSnapshot, Valuation};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::services::event_store;
use crate::services::valuation::{StockValueReport, ValuationService};

/// Query surface over the ledgers
#[derive(Clone)]
pub struct QueryService {
    db: PgPool,
    valuation: ValuationService,
}

/// Balance of an account at the end of a date
#[derive(Debug, Clone, Serialize)]
pub struct AccountBalance {
    pub bank_account_id: i64,
    pub as_of: NaiveDate,
    pub balance: Decimal,
}

impl QueryService {
    pub fn new(db: PgPool) -> Self {
        Self {
            valuation: ValuationService::new(db.clone()),
            db,
        }
    }

    pub async fn valuation(&self, product_id: i64, start: NaiveDate, end: NaiveDate) -> AppResult<Valuation> {
        self.valuation.valuate(product_id, start, end).await
    }

    /// Stored running balance of the last active transaction on or before
    /// `as_of`; fails when that row was never assigned one
    pub async fn running_balance_as_of(&self, account_id: i64, as_of: NaiveDate) -> AppResult<AccountBalance> {
        let mut conn = self.db.acquire().await?;
        let account = event_store::require_account(&mut conn, account_id).await?;
        let transactions = event_store::fetch_bank_transactions(&mut conn, account_id).await?;

        let balance = balance_as_of(&account, &transactions, as_of)
            .ok_or(AppError::StaleLedger(EntityRef::bank_account(account_id)))?;

        Ok(AccountBalance {
            bank_account_id: account_id,
            as_of,
            balance,
        })
    }

    pub async fn stock_value(&self, as_of: NaiveDate) -> AppResult<StockValueReport> {
        self.valuation.stock_value(as_of).await
    }

    pub async fn snapshot(&self, product_id: i64, as_of: NaiveDate) -> AppResult<ProductValuationSnapshot> {
        self.valuation.snapshot(product_id, as_of).await
    }
}
