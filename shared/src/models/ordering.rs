//! Temporal ordering keys and the closed enumerations used on ledger rows

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventError, RebuildError};

/// Kind of raw record a stock movement points back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Purchase,
    Sale,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Purchase => "purchase",
            ReferenceKind::Sale => "sale",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EventError> {
        match value {
            "purchase" => Ok(ReferenceKind::Purchase),
            "sale" => Ok(ReferenceKind::Sale),
            other => Err(EventError::UnknownVariant {
                field: "reference_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Tagged reference to the purchase or sale line behind a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub kind: ReferenceKind,
    pub id: i64,
}

impl EventRef {
    pub fn purchase(id: i64) -> Self {
        Self {
            kind: ReferenceKind::Purchase,
            id,
        }
    }

    pub fn sale(id: i64) -> Self {
        Self {
            kind: ReferenceKind::Sale,
            id,
        }
    }
}

impl std::fmt::Display for EventRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Direction of a stock movement or bank transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EventError> {
        match value {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(EventError::UnknownVariant {
                field: "direction",
                value: other.to_string(),
            }),
        }
    }
}

/// Total order over a product's stock events.
///
/// Field order is significant: `occurred_at`, then `id`, then `kind` (purchase
/// and sale lines live in separate tables, so their ids may coincide).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub occurred_at: DateTime<Utc>,
    pub id: i64,
    pub kind: ReferenceKind,
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.occurred_at.to_rfc3339(),
            self.id,
            self.kind.as_str()
        )
    }
}

/// Total order over an account's bank transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BankKey {
    pub date: NaiveDate,
    pub id: i64,
}

impl std::fmt::Display for BankKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.date, self.id)
    }
}

/// Sort `items` by `key` and reject any two items sharing a key
pub fn sort_checked<T, K, F>(items: &mut [T], scope: &str, key: F) -> Result<(), RebuildError>
where
    K: Ord + std::fmt::Display,
    F: Fn(&T) -> K,
{
    items.sort_by_key(|item| key(item));

    for pair in items.windows(2) {
        let (a, b) = (key(&pair[0]), key(&pair[1]));
        if a == b {
            return Err(RebuildError::DuplicateOrderingKey {
                scope: scope.to_string(),
                key: a.to_string(),
            });
        }
    }

    Ok(())
}
