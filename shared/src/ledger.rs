//! Ordered replay of raw events into derived ledger rows.
//!
//! Both folds follow the same shape: apply the soft-delete predicate, sort by
//! the entity's ordering key (rejecting duplicates), then carry a running total
//! through the stream with checked arithmetic.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::drift::Violation;
use crate::error::RebuildError;
use crate::models::{
    sort_checked, BalanceAssignment, BankAccount, BankTransaction, Direction, StockEvent,
    StockMovement,
};
use crate::types::{EntityRef, ReplayWindow};

/// Result of replaying one product's stock events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReplay {
    pub product_id: i64,
    pub window: ReplayWindow,
    /// Running quantity carried into the window
    pub opening_quantity: Decimal,
    pub movements: Vec<StockMovement>,
    /// Running quantity after the last replayed event
    pub final_quantity: Decimal,
    pub violations: Vec<Violation>,
}

/// Result of replaying one account's bank transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BankReplay {
    pub bank_account_id: i64,
    /// Balance the replay started from
    pub seed: Decimal,
    /// Lower bound actually used; `None` when the whole history was replayed
    pub from: Option<NaiveDate>,
    pub assignments: Vec<BalanceAssignment>,
    pub final_balance: Decimal,
    pub violations: Vec<Violation>,
}

fn apply(
    running: Decimal,
    direction: Direction,
    amount: Decimal,
    scope: &EntityRef,
    operation: &'static str,
) -> Result<Decimal, RebuildError> {
    let next = match direction {
        Direction::In => running.checked_add(amount),
        Direction::Out => running.checked_sub(amount),
    };
    next.ok_or_else(|| RebuildError::Overflow {
        scope: scope.to_string(),
        operation,
    })
}

fn movement_for(
    event: &StockEvent,
    before: Decimal,
    scope: &EntityRef,
) -> Result<(StockMovement, Option<Violation>), RebuildError> {
    let direction = event.direction();
    let after = apply(before, direction, event.quantity, scope, "accumulating quantity")?;

    let violation = (direction == Direction::Out && after < Decimal::ZERO).then(|| {
        Violation::Oversell {
            product_id: event.product_id,
            reference: event.reference(),
            running_quantity: after,
        }
    });

    let movement = StockMovement {
        product_id: event.product_id,
        reference: event.reference(),
        direction,
        quantity: event.quantity,
        before_quantity: before,
        after_quantity: after,
        occurred_at: event.occurred_at,
    };

    Ok((movement, violation))
}

/// Replay a product's stock events into a contiguous movement chain.
///
/// Events before the window only contribute to the opening quantity; events
/// after it are ignored. A negative running quantity is reported as an
/// oversell and carried forward unchanged.
pub fn replay_stock(
    product_id: i64,
    events: &[StockEvent],
    window: ReplayWindow,
) -> Result<StockReplay, RebuildError> {
    let scope = EntityRef::product(product_id);

    let mut active: Vec<&StockEvent> = events
        .iter()
        .filter(|e| e.product_id == product_id && e.is_active() && !window.is_after(e.date()))
        .collect();
    sort_checked(&mut active, &scope.to_string(), |e| e.key())?;

    let mut running = Decimal::ZERO;
    let mut opening_quantity = None;
    let mut movements = Vec::new();
    let mut violations = Vec::new();

    for event in active {
        if window.is_before(event.date()) {
            running = apply(
                running,
                event.direction(),
                event.quantity,
                &scope,
                "accumulating opening quantity",
            )?;
            continue;
        }

        opening_quantity.get_or_insert(running);
        let (movement, violation) = movement_for(event, running, &scope)?;
        running = movement.after_quantity;
        movements.push(movement);
        violations.extend(violation);
    }

    Ok(StockReplay {
        product_id,
        window,
        opening_quantity: opening_quantity.unwrap_or(running),
        movements,
        final_quantity: running,
        violations,
    })
}

/// Movement for a single new event that sorts after every stored movement
pub fn append_stock_event(
    last: Option<&StockMovement>,
    event: &StockEvent,
) -> Result<(StockMovement, Option<Violation>), RebuildError> {
    let scope = EntityRef::product(event.product_id);
    if let Some(last) = last {
        if last.key() >= event.key() {
            return Err(RebuildError::DuplicateOrderingKey {
                scope: scope.to_string(),
                key: event.key().to_string(),
            });
        }
    }

    let before = last.map(|m| m.after_quantity).unwrap_or(Decimal::ZERO);
    movement_for(event, before, &scope)
}

fn assignment_for(
    tx: &BankTransaction,
    before: Decimal,
    scope: &EntityRef,
) -> Result<(BalanceAssignment, Option<Violation>), RebuildError> {
    let running_balance = apply(before, tx.direction, tx.amount, scope, "accumulating balance")?;

    let violation = (running_balance < Decimal::ZERO).then(|| Violation::NegativeBalance {
        bank_account_id: tx.bank_account_id,
        transaction_id: tx.id,
        running_balance,
    });

    let assignment = BalanceAssignment {
        transaction_id: tx.id,
        date: tx.date,
        direction: tx.direction,
        amount: tx.amount,
        running_balance,
    };

    Ok((assignment, violation))
}

/// True when the stored movements dated before `from` are exactly the ones a
/// full replay of `events` produces for that part of the history.
pub fn stock_prefix_matches(
    product_id: i64,
    events: &[StockEvent],
    stored: &[StockMovement],
    from: NaiveDate,
) -> Result<bool, RebuildError> {
    let replay = replay_stock(product_id, events, ReplayWindow::full())?;
    let before = |m: &&StockMovement| m.occurred_at.date_naive() < from;

    let expected = replay.movements.iter().filter(before);
    let actual = stored.iter().filter(|m| m.product_id == product_id).filter(before);
    Ok(expected.eq(actual))
}

/// Balance after `prefix` when every stored running balance in it matches a
/// replay from `opening`; `None` at the first missing or wrong balance.
fn verified_prefix_balance(
    opening: Decimal,
    prefix: &[&BankTransaction],
    scope: &EntityRef,
) -> Result<Option<Decimal>, RebuildError> {
    let mut running = opening;
    for tx in prefix {
        running = apply(running, tx.direction, tx.amount, scope, "verifying stored balances")?;
        if tx.running_balance != Some(running) {
            return Ok(None);
        }
    }
    Ok(Some(running))
}

/// Replay an account's transactions, assigning each its running balance.
///
/// With `from`, the replay starts at the first active transaction dated on
/// or after `from`, seeded from the balance of the transactions before it.
/// That seed is used only when every stored running balance before `from`
/// agrees with a replay from the opening balance; otherwise the whole history
/// is replayed and `from` in the result is `None`.
pub fn replay_bank(
    account: &BankAccount,
    transactions: &[BankTransaction],
    from: Option<NaiveDate>,
) -> Result<BankReplay, RebuildError> {
    let scope = EntityRef::bank_account(account.id);

    let mut active: Vec<&BankTransaction> = transactions
        .iter()
        .filter(|tx| tx.bank_account_id == account.id && tx.is_active())
        .collect();
    sort_checked(&mut active, &scope.to_string(), |tx| tx.key())?;

    let split = from
        .map(|from| active.partition_point(|tx| tx.date < from))
        .unwrap_or(0);

    let (start, seed, from) = match split {
        0 => (0, account.opening_balance, from.filter(|_| !active.is_empty())),
        n => match verified_prefix_balance(account.opening_balance, &active[..n], &scope)? {
            Some(balance) => (n, balance, from),
            None => (0, account.opening_balance, None),
        },
    };

    let mut running = seed;
    let mut assignments = Vec::with_capacity(active.len() - start);
    let mut violations = Vec::new();

    for tx in &active[start..] {
        let (assignment, violation) = assignment_for(tx, running, &scope)?;
        running = assignment.running_balance;
        assignments.push(assignment);
        violations.extend(violation);
    }

    Ok(BankReplay {
        bank_account_id: account.id,
        seed,
        from,
        assignments,
        final_balance: running,
        violations,
    })
}

/// Balance for a single new transaction that sorts after every active one
pub fn append_bank_transaction(
    account: &BankAccount,
    last: Option<&BankTransaction>,
    tx: &BankTransaction,
) -> Result<(BalanceAssignment, Option<Violation>), RebuildError> {
    let scope = EntityRef::bank_account(account.id);
    let before = match last {
        Some(last) if last.key() >= tx.key() => {
            return Err(RebuildError::DuplicateOrderingKey {
                scope: scope.to_string(),
                key: tx.key().to_string(),
            });
        }
        Some(last) => last.running_balance.unwrap_or(account.opening_balance),
        None => account.opening_balance,
    };
    assignment_for(tx, before, &scope)
}

/// Index of the first movement whose before-quantity does not continue the
/// previous movement's after-quantity
pub fn first_stock_chain_break(movements: &[StockMovement]) -> Option<usize> {
    movements
        .windows(2)
        .position(|pair| pair[0].after_quantity != pair[1].before_quantity)
        .map(|i| i + 1)
}

/// Index of the first assignment whose balance does not follow from the
/// previous one and its own amount
pub fn first_balance_chain_break(seed: Decimal, assignments: &[BalanceAssignment]) -> Option<usize> {
    let mut previous = seed;
    for (i, assignment) in assignments.iter().enumerate() {
        let expected = match assignment.direction {
            Direction::In => previous + assignment.amount,
            Direction::Out => previous - assignment.amount,
        };
        if expected != assignment.running_balance {
            return Some(i);
        }
        previous = assignment.running_balance;
    }
    None
}
