//! Error handling for the ledger engine
//!
//! Every failure carries a stable machine-readable code used in batch reports

use ledger_shared::{EntityRef, EventError, GuardError, RebuildError, ValuationError};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Malformed {entity} row {row_id}: {source}")]
    MalformedEvent {
        entity: &'static str,
        row_id: i64,
        #[source]
        source: EventError,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Ledger errors
    #[error("Rebuild failed: {0}")]
    Rebuild(#[from] RebuildError),

    #[error("Valuation failed: {0}")]
    Valuation(#[from] ValuationError),

    #[error("Payment rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("Ledger for {0} has not been built; run a rebuild first")]
    StaleLedger(EntityRef),

    #[error("Batch cancelled before {0} was processed")]
    Cancelled(EntityRef),

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Stable code for reports and exit summaries
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::MalformedEvent { .. } => "MALFORMED_EVENT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Rebuild(RebuildError::DuplicateOrderingKey { .. }) => "ORDERING_ERROR",
            AppError::Rebuild(RebuildError::Overflow { .. }) => "NUMERIC_OVERFLOW",
            AppError::Valuation(_) => "VALUATION_ERROR",
            AppError::Guard(GuardError::Overpayment { .. }) => "OVERPAYMENT",
            AppError::Guard(GuardError::NonPositiveAmount) => "VALIDATION_ERROR",
            AppError::StaleLedger(_) => "STALE_LEDGER",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Migration(_) => "MIGRATION_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wrap a boundary rejection of a stored row
    pub fn malformed(entity: &'static str, row_id: i64, source: EventError) -> Self {
        AppError::MalformedEvent {
            entity,
            row_id,
            source,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<_> = field_errors.iter().collect();
        fields.sort_by_key(|(field, _)| **field);

        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                AppError::validation(**field, message)
            }
            None => AppError::validation("input", errors.to_string()),
        }
    }
}

/// Error entry as it appears in reports
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;
