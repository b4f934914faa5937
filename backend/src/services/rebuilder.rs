//! Ledger rebuilder: the only writer of derived ledger rows.
//!
//! Stock movements, `products.available_quantity`, transaction running
//! balances and `bank_accounts.current_balance` are all written here and
//! nowhere else. Each per-entity rebuild runs in one transaction behind the
//! in-process entity lock and a Postgres advisory lock.

use std::collections::HashMap;

use chrono::NaiveDate;
use ledger_shared::digest::{bank_digest, stock_digest};
use ledger_shared::{
    append_bank_transaction, append_stock_event, replay_bank, replay_stock, stock_prefix_matches,
    BankTransaction, EntityRef, ReplayWindow, StockEvent, Violation,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::db;
use crate::error::AppResult;
use crate::locks::EntityLocks;
use crate::services::event_store;

/// Ledger rebuilder for products and bank accounts
#[derive(Clone)]
pub struct LedgerRebuilder {
    db: PgPool,
    locks: EntityLocks,
}

/// Result of rebuilding one product's movement chain
#[derive(Debug, Clone, Serialize)]
pub struct ProductRebuildOutcome {
    pub product_id: i64,
    pub window: ReplayWindow,
    pub movements_removed: u64,
    pub movements_written: usize,
    pub opening_quantity: Decimal,
    pub final_quantity: Decimal,
    pub available_quantity: Decimal,
    pub digest: String,
    pub violations: Vec<Violation>,
    /// Stored movements after a bounded window no longer continue the chain
    pub chain_break_after_window: bool,
    /// The stored prefix could not seed the window so the whole history was replayed
    pub widened_to_full: bool,
}

/// Result of rebuilding one account's running balances
#[derive(Debug, Clone, Serialize)]
pub struct BankRebuildOutcome {
    pub bank_account_id: i64,
    pub from: Option<NaiveDate>,
    pub seed: Decimal,
    pub transactions_replayed: usize,
    pub rows_updated: u64,
    pub final_balance: Decimal,
    pub digest: String,
    pub violations: Vec<Violation>,
}

/// How an incremental sync brought a ledger up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Appended,
    Rebuilt,
}

impl LedgerRebuilder {
    pub fn new(db: PgPool, locks: EntityLocks) -> Self {
        Self { db, locks }
    }

    /// Replay a product's events and replace its movements in `window`
    pub async fn rebuild_product_ledger(
        &self,
        product_id: i64,
        window: ReplayWindow,
    ) -> AppResult<ProductRebuildOutcome> {
        let _guard = self.locks.acquire(EntityRef::product(product_id)).await;
        let mut tx = self.db.begin().await?;
        let outcome = rebuild_product_in(&mut tx, product_id, window).await?;
        tx.commit().await?;

        tracing::info!(
            product_id,
            written = outcome.movements_written,
            final_quantity = %outcome.final_quantity,
            "product ledger rebuilt"
        );
        Ok(outcome)
    }

    /// Replay an account's transactions from `from` (or its opening balance)
    pub async fn rebuild_bank_ledger(
        &self,
        account_id: i64,
        from: Option<NaiveDate>,
    ) -> AppResult<BankRebuildOutcome> {
        let _guard = self.locks.acquire(EntityRef::bank_account(account_id)).await;
        let mut tx = self.db.begin().await?;
        let outcome = rebuild_bank_in(&mut tx, account_id, from).await?;
        tx.commit().await?;

        tracing::info!(
            account_id,
            replayed = outcome.transactions_replayed,
            final_balance = %outcome.final_balance,
            "bank ledger rebuilt"
        );
        Ok(outcome)
    }
}

/// Rebuild a product's movements inside the caller's transaction
pub async fn rebuild_product_in(
    conn: &mut PgConnection,
    product_id: i64,
    window: ReplayWindow,
) -> AppResult<ProductRebuildOutcome> {
    db::lock_entity(conn, EntityRef::product(product_id)).await?;
    event_store::require_product(conn, product_id).await?;

    let events = event_store::fetch_stock_events(conn, Some(product_id)).await?;

    let mut window = window;
    let mut widened_to_full = false;
    if let Some(from) = window.from {
        let stored = event_store::fetch_movements(conn, product_id).await?;
        if !stock_prefix_matches(product_id, &events, &stored, from)? {
            tracing::warn!(
                product_id,
                %from,
                "stored movements before the window do not match a replay, widening to full history"
            );
            window = ReplayWindow { from: None, ..window };
            widened_to_full = true;
        }
    }
    let replay = replay_stock(product_id, &events, window)?;

    let movements_removed = event_store::delete_movements(conn, product_id, window).await?;
    event_store::insert_movements(conn, &replay.movements).await?;
    tracing::debug!(
        product_id,
        removed = movements_removed,
        written = replay.movements.len(),
        "movements replaced"
    );

    let mut chain_break_after_window = false;
    let available_quantity = match window.end_instant_exclusive() {
        None => replay.final_quantity,
        Some(end) => {
            if let Some(next) = event_store::first_movement_from(conn, product_id, end).await? {
                chain_break_after_window = next.before_quantity != replay.final_quantity;
            }
            event_store::last_movement(conn, product_id)
                .await?
                .map(|m| m.after_quantity)
                .unwrap_or(replay.final_quantity)
        }
    };
    event_store::set_available_quantity(conn, product_id, available_quantity).await?;

    if chain_break_after_window {
        tracing::warn!(
            product_id,
            "movements after the rebuilt window no longer continue the chain; run an unbounded rebuild"
        );
    }
    warn_violations(&replay.violations);

    Ok(ProductRebuildOutcome {
        product_id,
        window,
        movements_removed,
        movements_written: replay.movements.len(),
        opening_quantity: replay.opening_quantity,
        final_quantity: replay.final_quantity,
        available_quantity,
        digest: stock_digest(&replay.movements),
        violations: replay.violations,
        chain_break_after_window,
        widened_to_full,
    })
}

/// Rebuild an account's running balances inside the caller's transaction
pub async fn rebuild_bank_in(
    conn: &mut PgConnection,
    account_id: i64,
    from: Option<NaiveDate>,
) -> AppResult<BankRebuildOutcome> {
    db::lock_entity(conn, EntityRef::bank_account(account_id)).await?;
    let account = event_store::require_account(conn, account_id).await?;
    let transactions = event_store::fetch_bank_transactions(conn, account_id).await?;

    let replay = replay_bank(&account, &transactions, from)?;
    if from.is_some() && replay.from.is_none() && !replay.assignments.is_empty() {
        tracing::debug!(account_id, "no stored seed before window, replayed full history");
    }

    // Only rows whose stored balance differs are written.
    let stored: HashMap<i64, Option<Decimal>> = transactions
        .iter()
        .map(|tx| (tx.id, tx.running_balance))
        .collect();
    let changed: Vec<_> = replay
        .assignments
        .iter()
        .filter(|a| stored.get(&a.transaction_id).copied().flatten() != Some(a.running_balance))
        .cloned()
        .collect();
    let rows_updated = event_store::update_running_balances(conn, &changed).await?;
    event_store::set_current_balance(conn, account_id, replay.final_balance).await?;

    warn_violations(&replay.violations);

    Ok(BankRebuildOutcome {
        bank_account_id: account_id,
        from: replay.from,
        seed: replay.seed,
        transactions_replayed: replay.assignments.len(),
        rows_updated,
        final_balance: replay.final_balance,
        digest: bank_digest(&replay.assignments),
        violations: replay.violations,
    })
}

/// Bring a product's movements up to date after `event` was inserted.
///
/// Appends one movement when the event sorts after a stored chain that
/// covers every other active event. A backdated event replays from its
/// date and an incomplete chain replays the full history.
pub async fn sync_product_after_insert(
    conn: &mut PgConnection,
    event: &StockEvent,
) -> AppResult<(SyncKind, Vec<Violation>)> {
    let product_id = event.product_id;
    db::lock_entity(conn, EntityRef::product(product_id)).await?;

    // The stored chain must already cover every other active event before
    // anything is appended to it.
    let stored = event_store::count_movements(conn, product_id).await?;
    let active = event_store::count_active_stock_events(conn, product_id).await?;
    let expected = active - i64::from(event.is_active());
    if stored != expected {
        tracing::warn!(
            product_id,
            stored,
            expected,
            "stored movements do not cover the product's events, replaying full history"
        );
        let outcome = rebuild_product_in(conn, product_id, ReplayWindow::full()).await?;
        return Ok((SyncKind::Rebuilt, outcome.violations));
    }

    let last = event_store::last_movement(conn, product_id).await?;
    let sorts_last = last.as_ref().map_or(true, |m| m.key() < event.key());

    if !sorts_last {
        tracing::debug!(product_id, reference = %event.reference(), "backdated event, replaying");
        let outcome = rebuild_product_in(conn, product_id, ReplayWindow::from(event.date())).await?;
        return Ok((SyncKind::Rebuilt, outcome.violations));
    }

    let (movement, violation) = append_stock_event(last.as_ref(), event)?;
    event_store::insert_movements(conn, std::slice::from_ref(&movement)).await?;
    event_store::set_available_quantity(conn, product_id, movement.after_quantity).await?;

    let violations: Vec<Violation> = violation.into_iter().collect();
    warn_violations(&violations);
    Ok((SyncKind::Appended, violations))
}

/// Bring an account's running balances up to date after `tx` was inserted.
///
/// Appends when `tx` sorts last and the stored chain ends at the account's
/// current balance; otherwise replays.
pub async fn sync_account_after_insert(
    conn: &mut PgConnection,
    tx: &BankTransaction,
) -> AppResult<(SyncKind, Vec<Violation>)> {
    let account_id = tx.bank_account_id;
    db::lock_entity(conn, EntityRef::bank_account(account_id)).await?;

    let account = event_store::require_account(conn, account_id).await?;
    let last = event_store::last_active_transaction(conn, account_id, tx.id).await?;

    // The predecessor's stored balance must be the account's current balance
    // before anything is appended after it.
    let chain_current = match &last {
        Some(last) => last.running_balance == Some(account.current_balance),
        None => account.current_balance == account.opening_balance,
    };
    if !chain_current {
        tracing::warn!(
            account_id,
            current_balance = %account.current_balance,
            "stored balances do not agree with the account, replaying full history"
        );
        let outcome = rebuild_bank_in(conn, account_id, None).await?;
        return Ok((SyncKind::Rebuilt, outcome.violations));
    }

    let sorts_last = last.as_ref().map_or(true, |last| last.key() < tx.key());
    if !sorts_last {
        tracing::debug!(account_id, transaction_id = tx.id, "backdated transaction, replaying");
        let outcome = rebuild_bank_in(conn, account_id, Some(tx.date)).await?;
        return Ok((SyncKind::Rebuilt, outcome.violations));
    }

    let (assignment, violation) = append_bank_transaction(&account, last.as_ref(), tx)?;
    event_store::update_running_balances(conn, std::slice::from_ref(&assignment)).await?;
    event_store::set_current_balance(conn, account_id, assignment.running_balance).await?;

    let violations: Vec<Violation> = violation.into_iter().collect();
    warn_violations(&violations);
    Ok((SyncKind::Appended, violations))
}

pub(crate) fn warn_violations(violations: &[Violation]) {
    for violation in violations {
        match violation {
            Violation::Oversell {
                product_id,
                reference,
                running_quantity,
            } => tracing::warn!(
                product_id,
                %reference,
                %running_quantity,
                "oversell: running quantity went negative"
            ),
            Violation::NegativeBalance {
                bank_account_id,
                transaction_id,
                running_balance,
            } => tracing::warn!(
                bank_account_id,
                transaction_id,
                %running_balance,
                "running balance went negative"
            ),
            Violation::Overpayment {
                sale_id, excess, ..
            } => tracing::warn!(sale_id, %excess, "sale is overpaid"),
        }
    }
}
