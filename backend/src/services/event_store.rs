//! Postgres adapter for raw events and derived ledger rows.
//!
//! Reads return soft-deleted rows too; the replay's `is_active` predicate is
//! the only place deletion is interpreted. Active rows are checked at this
//! boundary and rejected as malformed before they reach a fold.

use chrono::{DateTime, NaiveDate, Utc};
use ledger_shared::{
    BalanceAssignment, BankAccount, BankTransaction, Direction, EventRef, NormalizedPayment,
    PaymentStatus, ReferenceKind, ReplayWindow, Sale, StockEvent, StockEventKind, StockMovement,
    TransactionSource,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};

use crate::error::{AppError, AppResult};

/// Rows per multi-value INSERT; eight binds each stays well under the
/// Postgres parameter limit.
const INSERT_CHUNK: usize = 1000;

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: i64,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: Decimal,
    unit_cost: Decimal,
    purchased_at: DateTime<Utc>,
    created_by: Option<i64>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PurchaseRow> for StockEvent {
    type Error = AppError;

    fn try_from(row: PurchaseRow) -> AppResult<Self> {
        let event = StockEvent {
            id: row.id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            kind: StockEventKind::Purchase {
                unit_cost: row.unit_cost,
            },
            quantity: row.quantity,
            occurred_at: row.purchased_at,
            created_by: row.created_by,
            deleted_at: row.deleted_at,
            parent_deleted_at: None,
        };
        checked_event("purchase", event)
    }
}

#[derive(Debug, FromRow)]
struct SaleItemRow {
    id: i64,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: Decimal,
    unit_price: Decimal,
    sold_at: DateTime<Utc>,
    created_by: Option<i64>,
    deleted_at: Option<DateTime<Utc>>,
    sale_deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SaleItemRow> for StockEvent {
    type Error = AppError;

    fn try_from(row: SaleItemRow) -> AppResult<Self> {
        let event = StockEvent {
            id: row.id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            kind: StockEventKind::Sale {
                unit_price: row.unit_price,
            },
            quantity: row.quantity,
            occurred_at: row.sold_at,
            created_by: row.created_by,
            deleted_at: row.deleted_at,
            parent_deleted_at: row.sale_deleted_at,
        };
        checked_event("sale_item", event)
    }
}

fn checked_event(entity: &'static str, event: StockEvent) -> AppResult<StockEvent> {
    if event.is_active() {
        event
            .check()
            .map_err(|e| AppError::malformed(entity, event.id, e))?;
    }
    Ok(event)
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: i64,
    product_id: i64,
    reference_kind: String,
    reference_id: i64,
    direction: String,
    quantity: Decimal,
    before_quantity: Decimal,
    after_quantity: Decimal,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> AppResult<Self> {
        let malformed = |e| AppError::malformed("stock_movement", row.id, e);
        Ok(StockMovement {
            product_id: row.product_id,
            reference: EventRef {
                kind: ReferenceKind::parse(&row.reference_kind).map_err(malformed)?,
                id: row.reference_id,
            },
            direction: Direction::parse(&row.direction).map_err(malformed)?,
            quantity: row.quantity,
            before_quantity: row.before_quantity,
            after_quantity: row.after_quantity,
            occurred_at: row.occurred_at,
        })
    }
}

/// Product with its cached on-hand quantity
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub available_quantity: Decimal,
}

#[derive(Debug, FromRow)]
struct BankAccountRow {
    id: i64,
    name: String,
    opening_balance: Decimal,
    current_balance: Decimal,
}

impl From<BankAccountRow> for BankAccount {
    fn from(row: BankAccountRow) -> Self {
        BankAccount {
            id: row.id,
            name: row.name,
            opening_balance: row.opening_balance,
            current_balance: row.current_balance,
        }
    }
}

#[derive(Debug, FromRow)]
struct BankTransactionRow {
    id: i64,
    bank_account_id: i64,
    direction: String,
    source: String,
    amount: Decimal,
    description: String,
    date: NaiveDate,
    running_balance: Option<Decimal>,
    sale_id: Option<i64>,
    deleted_at: Option<DateTime<Utc>>,
    sale_deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<BankTransactionRow> for BankTransaction {
    type Error = AppError;

    fn try_from(row: BankTransactionRow) -> AppResult<Self> {
        let id = row.id;
        let malformed = |e| AppError::malformed("bank_transaction", id, e);
        let tx = BankTransaction {
            id,
            bank_account_id: row.bank_account_id,
            direction: Direction::parse(&row.direction).map_err(malformed)?,
            source: TransactionSource::parse(&row.source).map_err(malformed)?,
            amount: row.amount,
            description: row.description,
            date: row.date,
            running_balance: row.running_balance,
            sale_id: row.sale_id,
            deleted_at: row.deleted_at,
            sale_deleted_at: row.sale_deleted_at,
        };
        if tx.is_active() {
            tx.check().map_err(malformed)?;
        }
        Ok(tx)
    }
}

#[derive(Debug, FromRow)]
struct SaleRow {
    id: i64,
    total: Decimal,
    paid: Decimal,
    due: Decimal,
    payment_status: String,
    sold_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SaleRow> for Sale {
    type Error = AppError;

    fn try_from(row: SaleRow) -> AppResult<Self> {
        Ok(Sale {
            id: row.id,
            total: row.total,
            paid: row.paid,
            due: row.due,
            payment_status: PaymentStatus::parse(&row.payment_status)
                .map_err(|e| AppError::malformed("sale", row.id, e))?,
            sold_at: row.sold_at,
            deleted_at: row.deleted_at,
        })
    }
}

/// A bank transaction about to be inserted; its running balance is assigned
/// by the rebuilder afterwards
#[derive(Debug, Clone)]
pub struct BankTransactionDraft<'a> {
    pub bank_account_id: i64,
    pub direction: Direction,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub description: &'a str,
    pub date: NaiveDate,
    pub sale_id: Option<i64>,
}

// ============================================================================
// Products and stock
// ============================================================================

pub async fn fetch_product(conn: &mut PgConnection, product_id: i64) -> AppResult<Option<ProductRecord>> {
    let product = sqlx::query_as::<_, ProductRecord>(
        "SELECT id, name, available_quantity FROM products WHERE id = $1",
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await?;
    Ok(product)
}

pub async fn require_product(conn: &mut PgConnection, product_id: i64) -> AppResult<ProductRecord> {
    fetch_product(conn, product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product {}", product_id)))
}

pub async fn product_ids(conn: &mut PgConnection) -> AppResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM products ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

/// Purchases and sale lines, for one product or for all of them
pub async fn fetch_stock_events(
    conn: &mut PgConnection,
    product_id: Option<i64>,
) -> AppResult<Vec<StockEvent>> {
    let purchases = sqlx::query_as::<_, PurchaseRow>(
        r#"
        SELECT id, product_id, variant_id, quantity, unit_cost, purchased_at, created_by, deleted_at
        FROM purchases
        WHERE ($1::BIGINT IS NULL OR product_id = $1)
        "#,
    )
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    let lines = sqlx::query_as::<_, SaleItemRow>(
        r#"
        SELECT si.id, si.product_id, si.variant_id, si.quantity, si.unit_price,
               s.sold_at, si.created_by, si.deleted_at, s.deleted_at AS sale_deleted_at
        FROM sale_items si
        JOIN sales s ON s.id = si.sale_id
        WHERE ($1::BIGINT IS NULL OR si.product_id = $1)
        "#,
    )
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut events = Vec::with_capacity(purchases.len() + lines.len());
    for row in purchases {
        events.push(StockEvent::try_from(row)?);
    }
    for row in lines {
        events.push(StockEvent::try_from(row)?);
    }
    Ok(events)
}

const MOVEMENT_COLUMNS: &str = "id, product_id, reference_kind, reference_id, direction, quantity, \
     before_quantity, after_quantity, occurred_at";

/// Stored movement chain of a product in ordering-key order
pub async fn fetch_movements(conn: &mut PgConnection, product_id: i64) -> AppResult<Vec<StockMovement>> {
    let rows = sqlx::query_as::<_, MovementRow>(&format!(
        "SELECT {} FROM stock_movements WHERE product_id = $1 \
         ORDER BY occurred_at, reference_id, reference_kind",
        MOVEMENT_COLUMNS
    ))
    .bind(product_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(StockMovement::try_from).collect()
}

pub async fn last_movement(conn: &mut PgConnection, product_id: i64) -> AppResult<Option<StockMovement>> {
    let row = sqlx::query_as::<_, MovementRow>(&format!(
        "SELECT {} FROM stock_movements WHERE product_id = $1 \
         ORDER BY occurred_at DESC, reference_id DESC, reference_kind DESC LIMIT 1",
        MOVEMENT_COLUMNS
    ))
    .bind(product_id)
    .fetch_optional(conn)
    .await?;

    row.map(StockMovement::try_from).transpose()
}

pub async fn count_movements(conn: &mut PgConnection, product_id: i64) -> AppResult<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stock_movements WHERE product_id = $1")
        .bind(product_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Purchases and sale lines of a product that a replay would include
pub async fn count_active_stock_events(conn: &mut PgConnection, product_id: i64) -> AppResult<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM purchases
             WHERE product_id = $1 AND deleted_at IS NULL)
          + (SELECT COUNT(*) FROM sale_items si
             JOIN sales s ON s.id = si.sale_id
             WHERE si.product_id = $1 AND si.deleted_at IS NULL AND s.deleted_at IS NULL)
        "#,
    )
    .bind(product_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// First stored movement at or after `at`
pub async fn first_movement_from(
    conn: &mut PgConnection,
    product_id: i64,
    at: DateTime<Utc>,
) -> AppResult<Option<StockMovement>> {
    let row = sqlx::query_as::<_, MovementRow>(&format!(
        "SELECT {} FROM stock_movements WHERE product_id = $1 AND occurred_at >= $2 \
         ORDER BY occurred_at, reference_id, reference_kind LIMIT 1",
        MOVEMENT_COLUMNS
    ))
    .bind(product_id)
    .bind(at)
    .fetch_optional(conn)
    .await?;

    row.map(StockMovement::try_from).transpose()
}

/// Remove a product's movements inside `window` (all of them when unbounded)
pub async fn delete_movements(
    conn: &mut PgConnection,
    product_id: i64,
    window: ReplayWindow,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM stock_movements
        WHERE product_id = $1
          AND ($2::TIMESTAMPTZ IS NULL OR occurred_at >= $2)
          AND ($3::TIMESTAMPTZ IS NULL OR occurred_at < $3)
        "#,
    )
    .bind(product_id)
    .bind(window.start_instant())
    .bind(window.end_instant_exclusive())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Bulk insert movements, replacing any stored row for the same reference
pub async fn insert_movements(conn: &mut PgConnection, movements: &[StockMovement]) -> AppResult<u64> {
    let mut written = 0;
    for chunk in movements.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO stock_movements (product_id, reference_kind, reference_id, direction, \
             quantity, before_quantity, after_quantity, occurred_at) ",
        );
        builder.push_values(chunk, |mut row, m| {
            row.push_bind(m.product_id)
                .push_bind(m.reference.kind.as_str())
                .push_bind(m.reference.id)
                .push_bind(m.direction.as_str())
                .push_bind(m.quantity)
                .push_bind(m.before_quantity)
                .push_bind(m.after_quantity)
                .push_bind(m.occurred_at);
        });
        builder.push(
            " ON CONFLICT (product_id, reference_kind, reference_id) DO UPDATE SET \
             direction = EXCLUDED.direction, quantity = EXCLUDED.quantity, \
             before_quantity = EXCLUDED.before_quantity, after_quantity = EXCLUDED.after_quantity, \
             occurred_at = EXCLUDED.occurred_at",
        );

        written += builder.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(written)
}

pub async fn set_available_quantity(
    conn: &mut PgConnection,
    product_id: i64,
    quantity: Decimal,
) -> AppResult<()> {
    sqlx::query("UPDATE products SET available_quantity = $2 WHERE id = $1")
        .bind(product_id)
        .bind(quantity)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_purchase(
    conn: &mut PgConnection,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: Decimal,
    unit_cost: Decimal,
    purchased_at: DateTime<Utc>,
    created_by: Option<i64>,
) -> AppResult<StockEvent> {
    let row = sqlx::query_as::<_, PurchaseRow>(
        r#"
        INSERT INTO purchases (product_id, variant_id, quantity, unit_cost, purchased_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, product_id, variant_id, quantity, unit_cost, purchased_at, created_by, deleted_at
        "#,
    )
    .bind(product_id)
    .bind(variant_id)
    .bind(quantity)
    .bind(unit_cost)
    .bind(purchased_at)
    .bind(created_by)
    .fetch_one(conn)
    .await?;

    StockEvent::try_from(row)
}

// ============================================================================
// Sales
// ============================================================================

const SALE_COLUMNS: &str = "id, total, paid, due, payment_status, sold_at, deleted_at";

pub async fn fetch_sale(conn: &mut PgConnection, sale_id: i64) -> AppResult<Option<Sale>> {
    let row = sqlx::query_as::<_, SaleRow>(&format!(
        "SELECT {} FROM sales WHERE id = $1 FOR UPDATE",
        SALE_COLUMNS
    ))
    .bind(sale_id)
    .fetch_optional(conn)
    .await?;

    row.map(Sale::try_from).transpose()
}

/// Active sales, row-locked for the rest of the transaction
pub async fn fetch_active_sales_for_update(
    conn: &mut PgConnection,
    sale_id: Option<i64>,
) -> AppResult<Vec<Sale>> {
    let rows = sqlx::query_as::<_, SaleRow>(&format!(
        "SELECT {} FROM sales WHERE deleted_at IS NULL AND ($1::BIGINT IS NULL OR id = $1) \
         ORDER BY id FOR UPDATE",
        SALE_COLUMNS
    ))
    .bind(sale_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(Sale::try_from).collect()
}

pub async fn insert_sale(
    conn: &mut PgConnection,
    total: Decimal,
    payment: &NormalizedPayment,
    sold_at: DateTime<Utc>,
) -> AppResult<Sale> {
    let row = sqlx::query_as::<_, SaleRow>(&format!(
        "INSERT INTO sales (total, paid, due, payment_status, sold_at) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        SALE_COLUMNS
    ))
    .bind(total)
    .bind(payment.paid)
    .bind(payment.due)
    .bind(payment.status.as_str())
    .bind(sold_at)
    .fetch_one(conn)
    .await?;

    Sale::try_from(row)
}

pub async fn insert_sale_item(
    conn: &mut PgConnection,
    sale: &Sale,
    product_id: i64,
    variant_id: Option<i64>,
    quantity: Decimal,
    unit_price: Decimal,
    created_by: Option<i64>,
) -> AppResult<StockEvent> {
    let row = sqlx::query_as::<_, SaleItemRow>(
        r#"
        INSERT INTO sale_items (sale_id, product_id, variant_id, quantity, unit_price, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, product_id, variant_id, quantity, unit_price,
                  $7::TIMESTAMPTZ AS sold_at, created_by, deleted_at,
                  NULL::TIMESTAMPTZ AS sale_deleted_at
        "#,
    )
    .bind(sale.id)
    .bind(product_id)
    .bind(variant_id)
    .bind(quantity)
    .bind(unit_price)
    .bind(created_by)
    .bind(sale.sold_at)
    .fetch_one(conn)
    .await?;

    StockEvent::try_from(row)
}

pub async fn update_sale_payment(
    conn: &mut PgConnection,
    sale_id: i64,
    payment: &NormalizedPayment,
) -> AppResult<()> {
    sqlx::query("UPDATE sales SET paid = $2, due = $3, payment_status = $4 WHERE id = $1")
        .bind(sale_id)
        .bind(payment.paid)
        .bind(payment.due)
        .bind(payment.status.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// Set or clear a sale's deletion stamp. Lines and payments follow through
/// the parent in the replay.
pub async fn set_sale_deleted(
    conn: &mut PgConnection,
    sale_id: i64,
    deleted_at: Option<DateTime<Utc>>,
) -> AppResult<()> {
    sqlx::query("UPDATE sales SET deleted_at = $2 WHERE id = $1")
        .bind(sale_id)
        .bind(deleted_at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Products touched by a sale's lines
pub async fn sale_product_ids(conn: &mut PgConnection, sale_id: i64) -> AppResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT DISTINCT product_id FROM sale_items WHERE sale_id = $1 ORDER BY product_id",
    )
    .bind(sale_id)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

/// Accounts holding payments for a sale, with the earliest payment date on each
pub async fn sale_payment_accounts(
    conn: &mut PgConnection,
    sale_id: i64,
) -> AppResult<Vec<(i64, NaiveDate)>> {
    let rows = sqlx::query_as::<_, (i64, NaiveDate)>(
        r#"
        SELECT bank_account_id, MIN(date)
        FROM bank_transactions
        WHERE sale_id = $1
        GROUP BY bank_account_id
        ORDER BY bank_account_id
        "#,
    )
    .bind(sale_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Bank accounts and transactions
// ============================================================================

pub async fn account_ids(conn: &mut PgConnection) -> AppResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM bank_accounts ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

pub async fn fetch_account(conn: &mut PgConnection, account_id: i64) -> AppResult<Option<BankAccount>> {
    let row = sqlx::query_as::<_, BankAccountRow>(
        "SELECT id, name, opening_balance, current_balance FROM bank_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(BankAccount::from))
}

pub async fn require_account(conn: &mut PgConnection, account_id: i64) -> AppResult<BankAccount> {
    fetch_account(conn, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Bank account {}", account_id)))
}

const TRANSACTION_SELECT: &str = r#"
    SELECT bt.id, bt.bank_account_id, bt.direction, bt.source, bt.amount, bt.description,
           bt.date, bt.running_balance, bt.sale_id, bt.deleted_at,
           s.deleted_at AS sale_deleted_at
    FROM bank_transactions bt
    LEFT JOIN sales s ON s.id = bt.sale_id
"#;

/// Every transaction of an account, deleted ones included
pub async fn fetch_bank_transactions(
    conn: &mut PgConnection,
    account_id: i64,
) -> AppResult<Vec<BankTransaction>> {
    let rows = sqlx::query_as::<_, BankTransactionRow>(&format!(
        "{} WHERE bt.bank_account_id = $1 ORDER BY bt.date, bt.id",
        TRANSACTION_SELECT
    ))
    .bind(account_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(BankTransaction::try_from).collect()
}

/// Latest active transaction other than `excluding`
pub async fn last_active_transaction(
    conn: &mut PgConnection,
    account_id: i64,
    excluding: i64,
) -> AppResult<Option<BankTransaction>> {
    let row = sqlx::query_as::<_, BankTransactionRow>(&format!(
        "{} WHERE bt.bank_account_id = $1 AND bt.id <> $2 \
         AND bt.deleted_at IS NULL AND s.deleted_at IS NULL \
         ORDER BY bt.date DESC, bt.id DESC LIMIT 1",
        TRANSACTION_SELECT
    ))
    .bind(account_id)
    .bind(excluding)
    .fetch_optional(conn)
    .await?;

    row.map(BankTransaction::try_from).transpose()
}

pub async fn insert_bank_transaction(
    conn: &mut PgConnection,
    draft: &BankTransactionDraft<'_>,
) -> AppResult<BankTransaction> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO bank_transactions (bank_account_id, direction, source, amount, description, date, sale_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(draft.bank_account_id)
    .bind(draft.direction.as_str())
    .bind(draft.source.as_str())
    .bind(draft.amount)
    .bind(draft.description)
    .bind(draft.date)
    .bind(draft.sale_id)
    .fetch_one(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, BankTransactionRow>(&format!(
        "{} WHERE bt.id = $1",
        TRANSACTION_SELECT
    ))
    .bind(id)
    .fetch_one(conn)
    .await?;

    BankTransaction::try_from(row)
}

/// Write running balances in one statement
pub async fn update_running_balances(
    conn: &mut PgConnection,
    assignments: &[BalanceAssignment],
) -> AppResult<u64> {
    if assignments.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i64> = assignments.iter().map(|a| a.transaction_id).collect();
    let balances: Vec<Decimal> = assignments.iter().map(|a| a.running_balance).collect();

    let result = sqlx::query(
        r#"
        UPDATE bank_transactions AS bt
        SET running_balance = v.running_balance
        FROM UNNEST($1::BIGINT[], $2::NUMERIC[]) AS v(id, running_balance)
        WHERE bt.id = v.id
        "#,
    )
    .bind(ids)
    .bind(balances)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_current_balance(
    conn: &mut PgConnection,
    account_id: i64,
    balance: Decimal,
) -> AppResult<()> {
    sqlx::query("UPDATE bank_accounts SET current_balance = $2 WHERE id = $1")
        .bind(account_id)
        .bind(balance)
        .execute(conn)
        .await?;
    Ok(())
}
