//! Validation utilities

use crate::types::*;

/// Validate a caller-supplied amount: any non-zero integer whose absolute
/// value fits in an `i64`
pub fn validate_amount(amount_minor: i64) -> LedgerResult<()> {
    if amount_minor == 0 {
        return Err(LedgerError::Validation(
            "amount_minor cannot be zero".to_string(),
        ));
    }
    if amount_minor == i64::MIN {
        return Err(LedgerError::Validation(
            "amount_minor is out of range".to_string(),
        ));
    }
    Ok(())
}

/// Validate a credit limit
pub fn validate_credit_limit(limit_minor: i64) -> LedgerResult<()> {
    if limit_minor < 0 {
        Err(LedgerError::Validation(
            "credit_limit_minor cannot be negative".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate a three letter currency code
pub fn validate_currency_code(code: &str) -> LedgerResult<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(LedgerError::Validation(format!(
            "base_currency must be a three letter uppercase code, got {code:?}"
        )));
    }
    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a transaction kind tag
pub fn validate_transaction_kind(kind: &str) -> LedgerResult<()> {
    if kind.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Transaction kind cannot be empty".to_string(),
        ));
    }

    if kind.len() > 50 {
        return Err(LedgerError::Validation(
            "Transaction kind cannot exceed 50 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a transaction description is valid
pub fn validate_transaction_description(description: &str) -> LedgerResult<()> {
    if description.len() > 500 {
        return Err(LedgerError::Validation(
            "Transaction description cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a 1-based inclusive position range and turn it into
/// `(skip, take)`
pub fn position_range(lower: u64, upper: u64) -> LedgerResult<(usize, usize)> {
    if lower < 1 || upper < lower {
        return Err(LedgerError::Validation(format!(
            "Invalid range {lower}..={upper}: lower must be >= 1 and upper >= lower"
        )));
    }
    let skip = usize::try_from(lower - 1)
        .map_err(|_| LedgerError::Validation("Range start is too large".to_string()))?;
    let take = usize::try_from(upper - lower + 1)
        .map_err(|_| LedgerError::Validation("Range is too large".to_string()))?;
    Ok((skip, take))
}
