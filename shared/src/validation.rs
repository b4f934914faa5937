//! Boundary validations for raw events entering the ledger

use rust_decimal::Decimal;

use crate::types::{MONEY_SCALE, QUANTITY_SCALE};

// ============================================================================
// Quantity and Amount Validations
// ============================================================================

/// Validate a stock quantity: positive and within quantity precision
pub fn validate_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    if quantity.normalize().scale() > QUANTITY_SCALE {
        return Err("Quantity has too many fractional digits");
    }
    Ok(())
}

/// Validate a money amount: positive and at most two fractional digits
pub fn validate_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Amount must be positive");
    }
    validate_money_scale(amount)
}

/// Validate a unit cost or unit price: zero allowed, never negative
pub fn validate_unit_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount < Decimal::ZERO {
        return Err("Unit amount cannot be negative");
    }
    validate_money_scale(amount)
}

/// Validate a money value has at most two fractional digits
pub fn validate_money_scale(amount: Decimal) -> Result<(), &'static str> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err("Money amounts are limited to two fractional digits");
    }
    Ok(())
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate a transaction description (1-255 characters after trimming)
pub fn validate_description(description: &str) -> Result<(), &'static str> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err("Description is required");
    }
    if trimmed.chars().count() > 255 {
        return Err("Description must be at most 255 characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(dec("1")).is_ok());
        assert!(validate_quantity(dec("0.0001")).is_ok());
        assert!(validate_quantity(dec("2.50000")).is_ok());
        assert!(validate_quantity(dec("0")).is_err());
        assert!(validate_quantity(dec("-1")).is_err());
        assert!(validate_quantity(dec("0.00001")).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec("500")).is_ok());
        assert!(validate_amount(dec("0.01")).is_ok());
        assert!(validate_amount(dec("0")).is_err());
        assert!(validate_amount(dec("1.005")).is_err());
    }

    #[test]
    fn test_validate_unit_amount() {
        assert!(validate_unit_amount(dec("0")).is_ok());
        assert!(validate_unit_amount(dec("120.50")).is_ok());
        assert!(validate_unit_amount(dec("-0.01")).is_err());
    }

    #[test]
    fn test_validate_description() {
        assert!(validate_description("Owner capital").is_ok());
        assert!(validate_description("   ").is_err());
        assert!(validate_description(&"x".repeat(256)).is_err());
    }
}
