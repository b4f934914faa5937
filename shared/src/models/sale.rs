//! Sale payment fields

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Payment status derived from a sale's total and paid amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Due,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Due => "due",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EventError> {
        match value {
            "paid" => Ok(PaymentStatus::Paid),
            "partial" => Ok(PaymentStatus::Partial),
            "due" => Ok(PaymentStatus::Due),
            other => Err(EventError::UnknownVariant {
                field: "payment_status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sale header as stored, with its cached payment fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: i64,
    pub total: Decimal,
    pub paid: Decimal,
    pub due: Decimal,
    pub payment_status: PaymentStatus,
    pub sold_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Sale {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}
