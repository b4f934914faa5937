//! Write path for new raw events.
//!
//! Inputs are validated whole before anything is written. After the insert the
//! affected ledgers are brought up to date in the same transaction, either by
//! appending one derived row or by a windowed rebuild for backdated events.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use ledger_shared::{
    check_payment, normalize, round_money, validate_amount, validate_description,
    validate_quantity, validate_unit_amount, Direction, EntityRef, ReplayWindow,
    TransactionSource, Violation,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use validator::{Validate, ValidationError};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::locks::{EntityGuard, EntityLocks};
use crate::services::event_store::{self, BankTransactionDraft};
use crate::services::rebuilder::{
    rebuild_bank_in, rebuild_product_in, sync_account_after_insert, sync_product_after_insert,
    SyncKind,
};

// ============================================================================
// Inputs
// ============================================================================

/// Input for recording a stock purchase
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordPurchaseInput {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "unit_amount")]
    pub unit_cost: Decimal,
    pub purchased_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

/// One line of a sale
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaleLineInput {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "unit_amount")]
    pub unit_price: Decimal,
}

/// Money received against a sale into a bank account
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SalePaymentInput {
    pub bank_account_id: i64,
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
}

/// Input for posting a sale with its lines and an optional first payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordSaleInput {
    #[validate(length(min = 1, message = "A sale needs at least one line"))]
    pub lines: Vec<SaleLineInput>,
    pub payment: Option<SalePaymentInput>,
    pub sold_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

/// Input for a fund, expense, extra income or manual bank posting
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordBankTransactionInput {
    pub bank_account_id: i64,
    pub source: TransactionSource,
    /// Required for sources without a fixed direction
    pub direction: Option<Direction>,
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    #[validate(custom = "description")]
    pub description: String,
    pub date: NaiveDate,
}

fn to_validation_error(code: &'static str, result: Result<(), &'static str>) -> Result<(), ValidationError> {
    result.map_err(|message| {
        let mut err = ValidationError::new(code);
        err.message = Some(message.into());
        err
    })
}

fn positive_quantity(value: &Decimal) -> Result<(), ValidationError> {
    to_validation_error("quantity", validate_quantity(*value))
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    to_validation_error("amount", validate_amount(*value))
}

fn unit_amount(value: &Decimal) -> Result<(), ValidationError> {
    to_validation_error("unit_amount", validate_unit_amount(*value))
}

fn description(value: &str) -> Result<(), ValidationError> {
    to_validation_error("description", validate_description(value))
}

// ============================================================================
// Outcomes
// ============================================================================

/// A ledger touched by an intake operation
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncedLedger {
    pub entity: EntityRef,
    pub kind: SyncKind,
}

/// Result of an intake operation
#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    /// Id of the row created or changed
    pub id: i64,
    pub synced: Vec<SyncedLedger>,
    pub violations: Vec<Violation>,
}

impl IntakeOutcome {
    fn new(id: i64) -> Self {
        Self {
            id,
            synced: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn record(&mut self, entity: EntityRef, (kind, violations): (SyncKind, Vec<Violation>)) {
        self.synced.push(SyncedLedger { entity, kind });
        self.violations.extend(violations);
    }
}

// ============================================================================
// Service
// ============================================================================

/// Intake service for purchases, sales and bank postings
#[derive(Clone)]
pub struct IntakeService {
    db: PgPool,
    locks: EntityLocks,
}

impl IntakeService {
    pub fn new(db: PgPool, locks: EntityLocks) -> Self {
        Self { db, locks }
    }

    /// Lock entities in one global order: sales, then products, then accounts
    async fn acquire_all(&self, entities: BTreeSet<EntityRef>) -> Vec<EntityGuard> {
        let (sales, rest): (Vec<_>, Vec<_>) = entities
            .into_iter()
            .partition(|e| e.kind == ledger_shared::EntityKind::Sale);

        let mut guards = Vec::with_capacity(sales.len() + rest.len());
        for entity in sales.into_iter().chain(rest) {
            guards.push(self.locks.acquire(entity).await);
        }
        guards
    }

    /// Record a purchase and append or replay the product's movements
    pub async fn record_purchase(&self, input: RecordPurchaseInput) -> AppResult<IntakeOutcome> {
        input.validate()?;

        let entity = EntityRef::product(input.product_id);
        let _guard = self.locks.acquire(entity).await;
        let mut tx = self.db.begin().await?;

        event_store::require_product(&mut tx, input.product_id).await?;
        let event = event_store::insert_purchase(
            &mut tx,
            input.product_id,
            input.variant_id,
            input.quantity,
            input.unit_cost,
            input.purchased_at,
            input.created_by,
        )
        .await?;

        let mut outcome = IntakeOutcome::new(event.id);
        outcome.record(entity, sync_product_after_insert(&mut tx, &event).await?);
        tx.commit().await?;

        tracing::info!(
            purchase_id = event.id,
            product_id = input.product_id,
            quantity = %input.quantity,
            "purchase recorded"
        );
        Ok(outcome)
    }

    /// Record a sale, its lines and an optional first payment.
    ///
    /// The payment may not exceed the sale total.
    pub async fn record_sale(&self, input: RecordSaleInput) -> AppResult<IntakeOutcome> {
        input.validate()?;
        for line in &input.lines {
            line.validate()?;
        }
        if let Some(payment) = &input.payment {
            payment.validate()?;
        }

        let mut total = Decimal::ZERO;
        for line in &input.lines {
            let amount = line
                .quantity
                .checked_mul(line.unit_price)
                .map(round_money)
                .ok_or_else(|| AppError::validation("lines", "line amount overflows"))?;
            total = total
                .checked_add(amount)
                .ok_or_else(|| AppError::validation("lines", "sale total overflows"))?;
        }

        let payment = match &input.payment {
            Some(p) => check_payment(total, Decimal::ZERO, p.amount)?,
            None => normalize(total, Decimal::ZERO),
        };

        let mut entities: BTreeSet<EntityRef> = input
            .lines
            .iter()
            .map(|line| EntityRef::product(line.product_id))
            .collect();
        entities.extend(input.payment.iter().map(|p| EntityRef::bank_account(p.bank_account_id)));
        let guards = self.acquire_all(entities).await;

        let mut tx = self.db.begin().await?;
        for guard in &guards {
            db::lock_entity(&mut tx, guard.entity).await?;
        }
        for line in &input.lines {
            event_store::require_product(&mut tx, line.product_id).await?;
        }
        if let Some(p) = &input.payment {
            event_store::require_account(&mut tx, p.bank_account_id).await?;
        }

        let sale = event_store::insert_sale(&mut tx, total, &payment, input.sold_at).await?;
        let mut outcome = IntakeOutcome::new(sale.id);

        // Each line is synced before the next is inserted so the stored
        // chain always covers every other active event of the product.
        for line in &input.lines {
            let event = event_store::insert_sale_item(
                &mut tx,
                &sale,
                line.product_id,
                line.variant_id,
                line.quantity,
                line.unit_price,
                input.created_by,
            )
            .await?;
            let synced = sync_product_after_insert(&mut tx, &event).await?;
            outcome.record(EntityRef::product(event.product_id), synced);
        }

        if let Some(p) = &input.payment {
            let description = format!("Payment for sale #{}", sale.id);
            let draft = BankTransactionDraft {
                bank_account_id: p.bank_account_id,
                direction: Direction::In,
                source: TransactionSource::SalePayment,
                amount: p.amount,
                description: &description,
                date: input.sold_at.date_naive(),
                sale_id: Some(sale.id),
            };
            let posted = event_store::insert_bank_transaction(&mut tx, &draft).await?;
            outcome.record(
                EntityRef::bank_account(p.bank_account_id),
                sync_account_after_insert(&mut tx, &posted).await?,
            );
        }

        tx.commit().await?;

        tracing::info!(
            sale_id = sale.id,
            lines = input.lines.len(),
            total = %total,
            status = %payment.status,
            "sale recorded"
        );
        Ok(outcome)
    }

    /// Record a further payment against an existing sale
    pub async fn record_payment(
        &self,
        sale_id: i64,
        input: SalePaymentInput,
        date: NaiveDate,
    ) -> AppResult<IntakeOutcome> {
        input.validate()?;

        let entities = BTreeSet::from([
            EntityRef::sale(sale_id),
            EntityRef::bank_account(input.bank_account_id),
        ]);
        let _guards = self.acquire_all(entities).await;
        let mut tx = self.db.begin().await?;

        let sale = event_store::fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sale {}", sale_id)))?;
        if !sale.is_active() {
            return Err(AppError::validation("sale_id", "Sale has been deleted"));
        }
        event_store::require_account(&mut tx, input.bank_account_id).await?;

        let payment = check_payment(sale.total, sale.paid, input.amount)?;
        event_store::update_sale_payment(&mut tx, sale_id, &payment).await?;

        let description = format!("Payment for sale #{}", sale_id);
        let draft = BankTransactionDraft {
            bank_account_id: input.bank_account_id,
            direction: Direction::In,
            source: TransactionSource::SalePayment,
            amount: input.amount,
            description: &description,
            date,
            sale_id: Some(sale_id),
        };
        let posted = event_store::insert_bank_transaction(&mut tx, &draft).await?;

        let mut outcome = IntakeOutcome::new(posted.id);
        outcome.record(
            EntityRef::bank_account(input.bank_account_id),
            sync_account_after_insert(&mut tx, &posted).await?,
        );
        tx.commit().await?;

        tracing::info!(sale_id, amount = %input.amount, status = %payment.status, "payment recorded");
        Ok(outcome)
    }

    /// Record a fund, expense, extra income or manual posting
    pub async fn record_bank_transaction(
        &self,
        input: RecordBankTransactionInput,
    ) -> AppResult<IntakeOutcome> {
        input.validate()?;

        if input.source == TransactionSource::SalePayment {
            return Err(AppError::validation(
                "source",
                "Sale payments are recorded against their sale",
            ));
        }
        let direction = match (input.source.natural_direction(), input.direction) {
            (Some(natural), Some(given)) if natural != given => {
                return Err(AppError::validation(
                    "direction",
                    "Direction does not match the transaction source",
                ));
            }
            (Some(natural), _) => natural,
            (None, Some(given)) => given,
            (None, None) => {
                return Err(AppError::validation(
                    "direction",
                    "Direction is required for this source",
                ));
            }
        };

        let entity = EntityRef::bank_account(input.bank_account_id);
        let _guard = self.locks.acquire(entity).await;
        let mut tx = self.db.begin().await?;

        event_store::require_account(&mut tx, input.bank_account_id).await?;
        let draft = BankTransactionDraft {
            bank_account_id: input.bank_account_id,
            direction,
            source: input.source,
            amount: input.amount,
            description: input.description.trim(),
            date: input.date,
            sale_id: None,
        };
        let posted = event_store::insert_bank_transaction(&mut tx, &draft).await?;

        let mut outcome = IntakeOutcome::new(posted.id);
        outcome.record(entity, sync_account_after_insert(&mut tx, &posted).await?);
        tx.commit().await?;

        tracing::info!(
            transaction_id = posted.id,
            account_id = input.bank_account_id,
            source = input.source.as_str(),
            amount = %input.amount,
            "bank transaction recorded"
        );
        Ok(outcome)
    }

    /// Soft-delete a sale; its lines and payments drop out of every replay
    pub async fn soft_delete_sale(&self, sale_id: i64) -> AppResult<IntakeOutcome> {
        self.set_sale_deleted(sale_id, Some(Utc::now())).await
    }

    /// Undo a soft delete; replays reproduce the ledger as it was before
    pub async fn restore_sale(&self, sale_id: i64) -> AppResult<IntakeOutcome> {
        self.set_sale_deleted(sale_id, None).await
    }

    async fn set_sale_deleted(
        &self,
        sale_id: i64,
        deleted_at: Option<DateTime<Utc>>,
    ) -> AppResult<IntakeOutcome> {
        let sale_guard = self.locks.acquire(EntityRef::sale(sale_id)).await;

        let (products, accounts) = {
            let mut conn = self.db.acquire().await?;
            (
                event_store::sale_product_ids(&mut conn, sale_id).await?,
                event_store::sale_payment_accounts(&mut conn, sale_id).await?,
            )
        };
        let entities: BTreeSet<EntityRef> = products
            .iter()
            .map(|id| EntityRef::product(*id))
            .chain(accounts.iter().map(|(id, _)| EntityRef::bank_account(*id)))
            .collect();
        let _guards = self.acquire_all(entities).await;

        let mut tx = self.db.begin().await?;
        let sale = event_store::fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sale {}", sale_id)))?;

        let mut outcome = IntakeOutcome::new(sale_id);
        if sale.deleted_at.is_some() == deleted_at.is_some() {
            tracing::debug!(sale_id, "sale already in requested state");
            tx.rollback().await?;
            return Ok(outcome);
        }

        event_store::set_sale_deleted(&mut tx, sale_id, deleted_at).await?;
        replay_sale_ledgers(&mut tx, &mut outcome, &products, &accounts, sale.sold_at.date_naive())
            .await?;
        tx.commit().await?;
        drop(sale_guard);

        tracing::info!(
            sale_id,
            deleted = deleted_at.is_some(),
            products = products.len(),
            accounts = accounts.len(),
            "sale deletion state changed"
        );
        Ok(outcome)
    }
}

async fn replay_sale_ledgers(
    conn: &mut PgConnection,
    outcome: &mut IntakeOutcome,
    products: &[i64],
    accounts: &[(i64, NaiveDate)],
    sold_on: NaiveDate,
) -> AppResult<()> {
    for product_id in products {
        let rebuilt = rebuild_product_in(conn, *product_id, ReplayWindow::from(sold_on)).await?;
        outcome.record(
            EntityRef::product(*product_id),
            (SyncKind::Rebuilt, rebuilt.violations),
        );
    }
    for (account_id, first_payment) in accounts {
        let rebuilt = rebuild_bank_in(conn, *account_id, Some(*first_payment)).await?;
        outcome.record(
            EntityRef::bank_account(*account_id),
            (SyncKind::Rebuilt, rebuilt.violations),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn purchase(quantity: &str, unit_cost: &str) -> RecordPurchaseInput {
        RecordPurchaseInput {
            product_id: 1,
            variant_id: None,
            quantity: dec(quantity),
            unit_cost: dec(unit_cost),
            purchased_at: Utc.with_ymd_and_hms(2024, 10, 15, 9, 0, 0).unwrap(),
            created_by: None,
        }
    }

    #[test]
    fn test_purchase_input_validation() {
        assert!(purchase("100", "100").validate().is_ok());
        assert!(purchase("0", "100").validate().is_err());
        assert!(purchase("1", "-5").validate().is_err());
        assert!(purchase("0.00001", "5").validate().is_err());
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = AppError::from(purchase("-1", "100").validate().unwrap_err());
        match err {
            AppError::Validation { field, message } => {
                assert_eq!(field, "quantity");
                assert_eq!(message, "Quantity must be positive");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sale_needs_lines() {
        let input = RecordSaleInput {
            lines: Vec::new(),
            payment: None,
            sold_at: Utc.with_ymd_and_hms(2024, 11, 20, 9, 0, 0).unwrap(),
            created_by: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_sale_with_line_validates() {
        let input = RecordSaleInput {
            lines: vec![SaleLineInput {
                product_id: 7,
                variant_id: None,
                quantity: dec("3"),
                unit_price: dec("16.50"),
            }],
            payment: None,
            sold_at: Utc.with_ymd_and_hms(2024, 11, 20, 9, 0, 0).unwrap(),
            created_by: None,
        };
        assert!(input.validate().is_ok());
        assert!(input.lines[0].validate().is_ok());
    }

    #[test]
    fn test_bank_input_description_is_checked() {
        let input = RecordBankTransactionInput {
            bank_account_id: 1,
            source: TransactionSource::Fund,
            direction: Some(Direction::In),
            amount: dec("500"),
            description: "   ".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_outcome_collects_violations() {
        let mut outcome = IntakeOutcome::new(5);
        outcome.record(
            EntityRef::product(1),
            (
                SyncKind::Appended,
                vec![Violation::Oversell {
                    product_id: 1,
                    reference: ledger_shared::EventRef::sale(5),
                    running_quantity: dec("-2"),
                }],
            ),
        );
        assert_eq!(outcome.synced[0].kind, SyncKind::Appended);
        assert_eq!(outcome.violations.len(), 1);
    }
}
