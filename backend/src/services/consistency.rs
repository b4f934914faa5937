//! Batch check of cached sale payment fields.
//!
//! All sales in scope are checked in one transaction with their rows locked,
//! so a payment recorded concurrently waits for the sweep to finish.

use ledger_shared::{check_sale, EntityRef};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::batch::{BatchRun, UnitReport};
use crate::error::AppResult;
use crate::services::event_store;
use crate::services::rebuilder::warn_violations;
use crate::services::reconciliation::DriftMode;

/// Consistency guard over stored sales
#[derive(Clone)]
pub struct ConsistencyService {
    db: PgPool,
    money_tolerance: Decimal,
}

impl ConsistencyService {
    pub fn new(db: PgPool, money_tolerance: Decimal) -> Self {
        Self { db, money_tolerance }
    }

    /// Check active sales (one, or all when `sale_id` is `None`).
    ///
    /// Overpaid sales are reported as violations and only rewritten when
    /// `correct_overpayments` is set.
    pub async fn check_sales(
        &self,
        sale_id: Option<i64>,
        mode: DriftMode,
        correct_overpayments: bool,
    ) -> AppResult<BatchRun> {
        let mut tx = self.db.begin().await?;
        let sales = event_store::fetch_active_sales_for_update(&mut tx, sale_id).await?;

        let mut outcomes = Vec::with_capacity(sales.len());
        let mut corrected = 0usize;

        for sale in &sales {
            let check = check_sale(sale, self.money_tolerance);
            let entity = EntityRef::sale(sale.id);
            let mut report = UnitReport::new(entity);

            report.violations.extend(check.violation.clone());
            warn_violations(&report.violations);

            let may_correct = check.violation.is_none() || correct_overpayments;
            if mode == DriftMode::Apply && !check.drift.is_empty() && may_correct {
                event_store::update_sale_payment(&mut tx, sale.id, &check.normalized).await?;
                report.applied = true;
                corrected += 1;
            }

            report.drift = check.drift;
            outcomes.push((entity, Ok(report)));
        }

        match mode {
            DriftMode::Apply => tx.commit().await?,
            DriftMode::DryRun => tx.rollback().await?,
        }

        tracing::info!(checked = sales.len(), corrected, "sale payment sweep finished");
        Ok(BatchRun::from_outcomes(outcomes))
    }
}
