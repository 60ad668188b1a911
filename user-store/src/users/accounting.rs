//! Used-space transitions
//!
//! [`next_used_space`] decides whether an adjustment may be committed. The
//! store calls it while holding the exclusive guard, between reading the row
//! and writing it back, so a rejected adjustment never reaches storage.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::users::types::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDirection {
    Increase,
    Decrease,
}

impl UsageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
        }
    }
}

impl fmt::Display for UsageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageDirection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "increase" | "incr" | "+" => Ok(Self::Increase),
            "decrease" | "decr" | "-" => Ok(Self::Decrease),
            other => Err(StoreError::Validation(format!(
                "unknown usage direction '{}'",
                other
            ))),
        }
    }
}

/// Compute the used space after moving `amount` bytes in `direction`.
///
/// Increases may not exceed the user's space limit, decreases may not drop
/// below zero. `amount` must be non-negative.
pub fn next_used_space(user: &User, direction: UsageDirection, amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(StoreError::Validation(format!(
            "adjustment amount must be >= 0, got {}",
            amount
        )));
    }

    match direction {
        UsageDirection::Increase => {
            let limit = user.quota.space_limit;
            match user.used_space.checked_add(amount) {
                Some(next) if next <= limit => Ok(next),
                _ => Err(StoreError::QuotaExceeded {
                    id: user.id,
                    used: user.used_space,
                    requested: amount,
                    limit,
                }),
            }
        }
        UsageDirection::Decrease => match user.used_space.checked_sub(amount) {
            Some(next) if next >= 0 => Ok(next),
            _ => Err(StoreError::NegativeUsage {
                id: user.id,
                used: user.used_space,
                requested: amount,
            }),
        },
    }
}
