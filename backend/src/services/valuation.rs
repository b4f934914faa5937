//! Read-only valuation over stored stock events

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ledger_shared::{snapshot, valuate, ProductValuationSnapshot, StockEvent, Valuation};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::services::event_store;

/// Valuation service for products
#[derive(Clone)]
pub struct ValuationService {
    db: PgPool,
}

/// Stock value across every product at the end of a date
#[derive(Debug, Clone, Serialize)]
pub struct StockValueReport {
    pub as_of: NaiveDate,
    pub total_value: Decimal,
    pub products: Vec<ProductValuationSnapshot>,
}

impl ValuationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Quantity, cost basis and profit of a product over `[start, end]`
    pub async fn valuate(&self, product_id: i64, start: NaiveDate, end: NaiveDate) -> AppResult<Valuation> {
        if start > end {
            return Err(AppError::validation("start", "start must not be after end"));
        }

        let mut conn = self.db.acquire().await?;
        event_store::require_product(&mut conn, product_id).await?;
        let events = event_store::fetch_stock_events(&mut conn, Some(product_id)).await?;

        Ok(valuate(product_id, &events, start, end)?)
    }

    /// On-hand quantity and weighted-average value of one product
    pub async fn snapshot(&self, product_id: i64, as_of: NaiveDate) -> AppResult<ProductValuationSnapshot> {
        let mut conn = self.db.acquire().await?;
        event_store::require_product(&mut conn, product_id).await?;
        let events = event_store::fetch_stock_events(&mut conn, Some(product_id)).await?;

        Ok(snapshot(product_id, &events, as_of)?)
    }

    /// Sum of per-product snapshots
    pub async fn stock_value(&self, as_of: NaiveDate) -> AppResult<StockValueReport> {
        let mut conn = self.db.acquire().await?;
        let product_ids = event_store::product_ids(&mut conn).await?;
        let events = event_store::fetch_stock_events(&mut conn, None).await?;

        let mut by_product: BTreeMap<i64, Vec<StockEvent>> =
            product_ids.into_iter().map(|id| (id, Vec::new())).collect();
        for event in events {
            by_product.entry(event.product_id).or_default().push(event);
        }

        let mut products = Vec::with_capacity(by_product.len());
        let mut total_value = Decimal::ZERO;
        for (product_id, events) in &by_product {
            let snap = snapshot(*product_id, events, as_of)?;
            total_value = total_value
                .checked_add(snap.stock_value)
                .ok_or_else(|| AppError::Internal("stock value overflow".to_string()))?;
            products.push(snap);
        }

        Ok(StockValueReport {
            as_of,
            total_value,
            products,
        })
    }
}
