//! Drift detection between stored derived rows and a full replay.
//!
//! A unit compares one product or account. In apply mode the correction runs
//! through the rebuilder inside the same transaction as the comparison, so a
//! failure rolls back that entity only.

use ledger_shared::digest::{bank_digest, stock_digest};
use ledger_shared::{
    diff_movements, diff_running_balances, money_drifted, replay_bank, replay_stock, DriftEntry,
    DriftField, EntityRef, ReplayWindow,
};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::batch::UnitReport;
use crate::db;
use crate::error::AppResult;
use crate::locks::EntityLocks;
use crate::services::event_store;
use crate::services::rebuilder::{rebuild_bank_in, rebuild_product_in};

/// Whether detected drift is only reported or also corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftMode {
    DryRun,
    Apply,
}

/// Reconciliation service for products and bank accounts
#[derive(Clone)]
pub struct ReconciliationService {
    db: PgPool,
    locks: EntityLocks,
    tolerance: Decimal,
}

impl ReconciliationService {
    pub fn new(db: PgPool, locks: EntityLocks, tolerance: Decimal) -> Self {
        Self {
            db,
            locks,
            tolerance,
        }
    }

    /// Compare a product's stored movements and cached quantity with a replay
    pub async fn reconcile_product(&self, product_id: i64, mode: DriftMode) -> AppResult<UnitReport> {
        let entity = EntityRef::product(product_id);
        let _guard = self.locks.acquire(entity).await;
        let mut tx = self.db.begin().await?;

        db::lock_entity(&mut tx, entity).await?;
        let product = event_store::require_product(&mut tx, product_id).await?;
        let events = event_store::fetch_stock_events(&mut tx, Some(product_id)).await?;
        let stored = event_store::fetch_movements(&mut tx, product_id).await?;

        let replay = replay_stock(product_id, &events, ReplayWindow::full())?;
        let mut drift = diff_movements(product_id, &stored, &replay.movements);
        if product.available_quantity != replay.final_quantity {
            drift.push(DriftEntry::value(
                entity,
                None,
                DriftField::AvailableQuantity,
                product.available_quantity,
                replay.final_quantity,
            ));
        }

        let mut report = UnitReport::new(entity);
        report.digest = Some(stock_digest(&replay.movements));
        report.violations = replay.violations;

        if mode == DriftMode::Apply && !drift.is_empty() {
            rebuild_product_in(&mut tx, product_id, ReplayWindow::full()).await?;
            tx.commit().await?;
            report.applied = true;
            tracing::info!(product_id, corrections = drift.len(), "product drift corrected");
        } else {
            tx.rollback().await?;
            if !drift.is_empty() {
                tracing::info!(product_id, found = drift.len(), "product drift found");
            }
        }

        for entry in &drift {
            tracing::debug!(
                %entity,
                row = ?entry.row,
                field = ?entry.field,
                old = ?entry.old_value,
                new = ?entry.new_value,
                "drift"
            );
        }
        report.drift = drift;
        Ok(report)
    }

    /// Compare an account's stored running balances and current balance with a replay
    pub async fn reconcile_account(&self, account_id: i64, mode: DriftMode) -> AppResult<UnitReport> {
        let entity = EntityRef::bank_account(account_id);
        let _guard = self.locks.acquire(entity).await;
        let mut tx = self.db.begin().await?;

        db::lock_entity(&mut tx, entity).await?;
        let account = event_store::require_account(&mut tx, account_id).await?;
        let transactions = event_store::fetch_bank_transactions(&mut tx, account_id).await?;

        let replay = replay_bank(&account, &transactions, None)?;
        let mut drift =
            diff_running_balances(account_id, &transactions, &replay.assignments, self.tolerance);
        if money_drifted(account.current_balance, replay.final_balance, self.tolerance) {
            drift.push(DriftEntry::value(
                entity,
                None,
                DriftField::CurrentBalance,
                account.current_balance,
                replay.final_balance,
            ));
        }

        let mut report = UnitReport::new(entity);
        report.digest = Some(bank_digest(&replay.assignments));
        report.violations = replay.violations;

        if mode == DriftMode::Apply && !drift.is_empty() {
            rebuild_bank_in(&mut tx, account_id, None).await?;
            tx.commit().await?;
            report.applied = true;
            tracing::info!(account_id, corrections = drift.len(), "account drift corrected");
        } else {
            tx.rollback().await?;
            if !drift.is_empty() {
                tracing::info!(account_id, found = drift.len(), "account drift found");
            }
        }

        report.drift = drift;
        Ok(report)
    }
}
