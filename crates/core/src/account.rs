//! Balance arithmetic with ledger validation rules
//!
//! Amounts must be strictly positive and a debit may not overdraw the
//! balance. Violations are [`Error::Validation`], which is never retried.

use crate::error::{Error, Result};

/// Add `amount` to `balance`
pub fn credit(balance: i64, amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "credit amount must be positive, got {}",
            amount
        )));
    }
    balance
        .checked_add(amount)
        .ok_or_else(|| Error::Validation(format!("credit of {} overflows balance", amount)))
}

/// Subtract `amount` from `balance`
pub fn debit(balance: i64, amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "debit amount must be positive, got {}",
            amount
        )));
    }
    if balance < amount {
        return Err(Error::Validation(format!(
            "insufficient funds: balance={}, debit={}",
            balance, amount
        )));
    }
    Ok(balance - amount)
}
