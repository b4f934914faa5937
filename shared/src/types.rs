//! Common types used across the ledger engine

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fractional digits kept for monetary amounts
pub const MONEY_SCALE: u32 = 2;

/// Fractional digits kept for stock quantities
pub const QUANTITY_SCALE: u32 = 4;

/// Fractional digits kept for a weighted-average unit cost after division
pub const UNIT_COST_SCALE: u32 = 10;

/// Default tolerance when comparing stored and recomputed money values
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Round a monetary amount half-up to [`MONEY_SCALE`] digits
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a unit cost half-up to [`UNIT_COST_SCALE`] digits
pub fn round_unit_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(UNIT_COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Kinds of entity the engine keeps derived state for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    BankAccount,
    Sale,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::BankAccount => "bank_account",
            EntityKind::Sale => "sale",
        }
    }
}

/// A single entity, the unit of rebuild and recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn product(id: i64) -> Self {
        Self {
            kind: EntityKind::Product,
            id,
        }
    }

    pub fn bank_account(id: i64) -> Self {
        Self {
            kind: EntityKind::BankAccount,
            id,
        }
    }

    pub fn sale(id: i64) -> Self {
        Self {
            kind: EntityKind::Sale,
            id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Optional, possibly half-open, date window for a rebuild.
///
/// `from` and `to` are both inclusive. A window with neither bound covers the
/// whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplayWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReplayWindow {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn from(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: None,
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn is_full(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// True when `date` falls strictly before the window's lower bound
    pub fn is_before(&self, date: NaiveDate) -> bool {
        matches!(self.from, Some(from) if date < from)
    }

    /// True when `date` falls strictly after the window's upper bound
    pub fn is_after(&self, date: NaiveDate) -> bool {
        matches!(self.to, Some(to) if date > to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        !self.is_before(date) && !self.is_after(date)
    }

    /// First instant covered by the window, if bounded below
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.from.map(start_of_day)
    }

    /// First instant after the window, if bounded above
    pub fn end_instant_exclusive(&self) -> Option<DateTime<Utc>> {
        self.to
            .map(|to| start_of_day(to.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)))
    }
}

/// Midnight UTC at the start of `date`
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
