//! Ledger scenario tests
//!
//! Worked examples for:
//! - Scenario A: weighted-average valuation over a month
//! - Scenario B: bank running balances from an opening balance
//! - Scenario C: overpaid sale normalization
//! - Scenario D: soft-deleting and restoring a sale

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ledger_shared::digest::{bank_digest, stock_digest};
use ledger_shared::{
    balance_as_of, check_sale, normalize, replay_bank, replay_stock, valuate, BankAccount,
    BankTransaction, Direction, DriftField, EventRef, PaymentStatus, ReplayWindow, Sale,
    StockEvent, TransactionSource, Violation, MONEY_TOLERANCE,
};
use rust_decimal::Decimal;
use std::str::FromStr;

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
}

fn account(opening: &str) -> BankAccount {
    BankAccount {
        id: 1,
        name: "Main".to_string(),
        opening_balance: dec(opening),
        current_balance: Decimal::ZERO,
    }
}

fn bank_tx(
    id: i64,
    direction: Direction,
    source: TransactionSource,
    amount: &str,
    day: NaiveDate,
) -> BankTransaction {
    BankTransaction {
        id,
        bank_account_id: 1,
        direction,
        source,
        amount: dec(amount),
        description: format!("{} #{}", source.as_str(), id),
        date: day,
        running_balance: None,
        sale_id: None,
        deleted_at: None,
        sale_deleted_at: None,
    }
}

// ============================================================================
// Scenario A
// ============================================================================

fn scenario_a_events() -> Vec<StockEvent> {
    vec![
        StockEvent::purchase(1, 7, dec("100"), dec("100"), at(2024, 10, 15)).unwrap(),
        StockEvent::purchase(2, 7, dec("50"), dec("120"), at(2024, 11, 10)).unwrap(),
        StockEvent::sale(1, 7, dec("80"), dec("150"), at(2024, 11, 20)).unwrap(),
    ]
}

#[test]
fn test_scenario_a_valuation() {
    let valuation = valuate(7, &scenario_a_events(), date(2024, 11, 1), date(2024, 11, 30)).unwrap();

    assert_eq!(valuation.before_quantity, dec("100"));
    assert_eq!(valuation.before_value, dec("10000"));
    assert_eq!(valuation.buy_quantity, dec("50"));
    assert_eq!(valuation.total_buy, dec("6000"));
    assert_eq!(valuation.sale_quantity, dec("80"));
    assert_eq!(valuation.total_sale, dec("12000"));
    assert_eq!(valuation.weighted_avg_cost, dec("106.67"));
    assert_eq!(valuation.cogs, dec("8533.33"));
    assert_eq!(valuation.stock_value, dec("7466.67"));
    assert_eq!(valuation.profit, dec("3466.67"));
    assert_eq!(valuation.available_quantity, dec("70"));
}

#[test]
fn test_scenario_a_movement_chain() {
    let replay = replay_stock(7, &scenario_a_events(), ReplayWindow::full()).unwrap();

    let afters: Vec<Decimal> = replay.movements.iter().map(|m| m.after_quantity).collect();
    assert_eq!(afters, vec![dec("100"), dec("150"), dec("70")]);
    assert_eq!(replay.final_quantity, dec("70"));
    assert!(replay.violations.is_empty());
}

#[test]
fn test_scenario_a_windowed_rebuild_seeds_opening_quantity() {
    let window = ReplayWindow::from(date(2024, 11, 1));
    let replay = replay_stock(7, &scenario_a_events(), window).unwrap();

    assert_eq!(replay.opening_quantity, dec("100"));
    assert_eq!(replay.movements.len(), 2);
    assert_eq!(replay.movements[0].before_quantity, dec("100"));
    assert_eq!(replay.movements[0].reference, EventRef::purchase(2));
}

#[test]
fn test_valuation_rejects_inverted_window() {
    let result = valuate(7, &scenario_a_events(), date(2024, 11, 30), date(2024, 11, 1));
    assert!(result.is_err());
}

// ============================================================================
// Scenario B
// ============================================================================

#[test]
fn test_scenario_b_running_balances() {
    let account = account("1000");
    let txs = vec![
        bank_tx(1, Direction::In, TransactionSource::Fund, "500", date(2024, 11, 1)),
        bank_tx(2, Direction::Out, TransactionSource::Expense, "200", date(2024, 11, 2)),
    ];

    let replay = replay_bank(&account, &txs, None).unwrap();
    let balances: Vec<Decimal> = replay.assignments.iter().map(|a| a.running_balance).collect();

    assert_eq!(balances, vec![dec("1500"), dec("1300")]);
    assert_eq!(replay.final_balance, dec("1300"));
    assert!(replay.violations.is_empty());
}

#[test]
fn test_scenario_b_point_in_time_balance() {
    let account = account("1000");
    let mut txs = vec![
        bank_tx(1, Direction::In, TransactionSource::Fund, "500", date(2024, 11, 1)),
        bank_tx(2, Direction::Out, TransactionSource::Expense, "200", date(2024, 11, 2)),
    ];

    // Before the ledger is built the lookup refuses to guess.
    assert_eq!(balance_as_of(&account, &txs, date(2024, 11, 1)), None);

    let replay = replay_bank(&account, &txs, None).unwrap();
    for (tx, assignment) in txs.iter_mut().zip(&replay.assignments) {
        tx.running_balance = Some(assignment.running_balance);
    }

    assert_eq!(balance_as_of(&account, &txs, date(2024, 10, 31)), Some(dec("1000")));
    assert_eq!(balance_as_of(&account, &txs, date(2024, 11, 1)), Some(dec("1500")));
    assert_eq!(balance_as_of(&account, &txs, date(2024, 12, 31)), Some(dec("1300")));
}

#[test]
fn test_negative_balance_is_reported() {
    let account = account("100");
    let txs = vec![bank_tx(1, Direction::Out, TransactionSource::Expense, "250", date(2024, 11, 1))];

    let replay = replay_bank(&account, &txs, None).unwrap();
    assert_eq!(replay.final_balance, dec("-150"));
    assert!(matches!(
        replay.violations.as_slice(),
        [Violation::NegativeBalance { transaction_id: 1, .. }]
    ));
}

// ============================================================================
// Scenario C
// ============================================================================

#[test]
fn test_scenario_c_overpayment() {
    let normalized = normalize(dec("1000"), dec("1200"));

    assert_eq!(normalized.paid, dec("1000"));
    assert_eq!(normalized.due, dec("0"));
    assert_eq!(normalized.status, PaymentStatus::Paid);
    assert_eq!(normalized.overpayment, Some(dec("200")));
}

#[test]
fn test_scenario_c_stored_sale_check() {
    let sale = Sale {
        id: 3,
        total: dec("1000"),
        paid: dec("1200"),
        due: dec("-200"),
        payment_status: PaymentStatus::Paid,
        sold_at: at(2024, 11, 20),
        deleted_at: None,
    };

    let check = check_sale(&sale, MONEY_TOLERANCE);
    let fields: Vec<DriftField> = check.drift.iter().map(|d| d.field).collect();

    assert_eq!(fields, vec![DriftField::Paid, DriftField::Due]);
    assert!(matches!(
        check.violation,
        Some(Violation::Overpayment { sale_id: 3, excess, .. }) if excess == dec("200")
    ));
}

// ============================================================================
// Scenario D
// ============================================================================

struct SaleHistory {
    events: Vec<StockEvent>,
    account: BankAccount,
    transactions: Vec<BankTransaction>,
}

impl SaleHistory {
    fn new() -> Self {
        let mut payment = bank_tx(
            2,
            Direction::In,
            TransactionSource::SalePayment,
            "500",
            date(2024, 11, 20),
        );
        payment.sale_id = Some(9);

        Self {
            events: vec![
                StockEvent::purchase(1, 7, dec("100"), dec("10"), at(2024, 11, 1)).unwrap(),
                StockEvent::sale(4, 7, dec("30"), dec("16.50"), at(2024, 11, 20)).unwrap(),
                StockEvent::purchase(2, 7, dec("10"), dec("11"), at(2024, 11, 25)).unwrap(),
            ],
            account: account("0"),
            transactions: vec![
                bank_tx(1, Direction::In, TransactionSource::Fund, "1000", date(2024, 11, 1)),
                payment,
                bank_tx(3, Direction::Out, TransactionSource::Expense, "100", date(2024, 11, 26)),
            ],
        }
    }

    fn set_sale_deleted(&mut self, deleted_at: Option<DateTime<Utc>>) {
        for event in self.events.iter_mut().filter(|e| e.reference() == EventRef::sale(4)) {
            event.parent_deleted_at = deleted_at;
        }
        for tx in self.transactions.iter_mut().filter(|tx| tx.sale_id == Some(9)) {
            tx.sale_deleted_at = deleted_at;
        }
    }

    fn digests(&self) -> (String, String, Decimal, Decimal) {
        let stock = replay_stock(7, &self.events, ReplayWindow::full()).unwrap();
        let bank = replay_bank(&self.account, &self.transactions, None).unwrap();
        (
            stock_digest(&stock.movements),
            bank_digest(&bank.assignments),
            stock.final_quantity,
            bank.final_balance,
        )
    }
}

#[test]
fn test_scenario_d_soft_delete_removes_sale_effects() {
    let mut history = SaleHistory::new();
    let (_, _, quantity, balance) = history.digests();
    assert_eq!(quantity, dec("80"));
    assert_eq!(balance, dec("1400"));

    history.set_sale_deleted(Some(at(2024, 12, 1)));
    let stock = replay_stock(7, &history.events, ReplayWindow::full()).unwrap();
    let bank = replay_bank(&history.account, &history.transactions, None).unwrap();

    assert_eq!(stock.final_quantity, dec("110"));
    assert!(stock.movements.iter().all(|m| m.reference != EventRef::sale(4)));
    assert_eq!(bank.final_balance, dec("900"));
    assert!(bank.assignments.iter().all(|a| a.transaction_id != 2));
}

#[test]
fn test_scenario_d_restore_reproduces_ledger() {
    let mut history = SaleHistory::new();
    let before = history.digests();

    history.set_sale_deleted(Some(at(2024, 12, 1)));
    let deleted = history.digests();
    assert_ne!(before, deleted);

    history.set_sale_deleted(None);
    assert_eq!(history.digests(), before);
}

#[test]
fn test_scenario_d_matches_history_without_sale() {
    let mut history = SaleHistory::new();
    history.set_sale_deleted(Some(at(2024, 12, 1)));

    let never_sold: Vec<StockEvent> = history
        .events
        .iter()
        .filter(|e| e.reference() != EventRef::sale(4))
        .cloned()
        .collect();

    let deleted = replay_stock(7, &history.events, ReplayWindow::full()).unwrap();
    let clean = replay_stock(7, &never_sold, ReplayWindow::full()).unwrap();
    assert_eq!(deleted.movements, clean.movements);
}
