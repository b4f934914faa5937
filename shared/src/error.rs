//! Error types for the pure ledger computations

use thiserror::Error;

/// Failure while replaying an entity's event history
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebuildError {
    #[error("Duplicate ordering key {key} in {scope}")]
    DuplicateOrderingKey { scope: String, key: String },

    #[error("Numeric overflow while {operation} in {scope}")]
    Overflow {
        scope: String,
        operation: &'static str,
    },
}

/// Failure while computing a valuation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValuationError {
    #[error("Invalid window: start {start} is after end {end}")]
    InvalidWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Numeric overflow while {0}")]
    Overflow(&'static str),
}

/// A raw event rejected at the boundary before entering the ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },

    #[error("Unknown {field} value '{value}'")]
    UnknownVariant { field: &'static str, value: String },
}

impl EventError {
    pub fn invalid(field: &'static str, message: &'static str) -> Self {
        EventError::Invalid { field, message }
    }

    pub fn field(&self) -> &'static str {
        match self {
            EventError::Invalid { field, .. } => field,
            EventError::UnknownVariant { field, .. } => field,
        }
    }
}

/// Payment rejected by the live sale invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Payment of {amount} would exceed sale total {total} (already paid {paid})")]
    Overpayment {
        total: rust_decimal::Decimal,
        paid: rust_decimal::Decimal,
        amount: rust_decimal::Decimal,
    },

    #[error("Payment amount must be positive")]
    NonPositiveAmount,
}
