//! Fixed-point decimal money type.
//!
//! Every balance, wager, and payout flows through `Money`. Floating-point
//! is never used for these quantities (§9: "untyped money as floating
//! numbers → fixed-point decimal value type").

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Truncates to 2 fractional digits, matching the crash-point
    /// derivation's own two-decimal truncation (spec §4.2).
    pub fn new(value: Decimal) -> Self {
        Money(value.round_dp(2))
    }

    pub fn from_i64_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money::new)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money::new)
    }

    /// `bet_amount * multiplier`, rounded to 2 decimal places — the payout
    /// formula in spec §4.2's cashout adjudication.
    pub fn checked_mul_multiplier(self, multiplier: Decimal) -> Option<Money> {
        self.0.checked_mul(multiplier).map(Money::new)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// `User.balance` carries a non-negative invariant (§3); this wrapper makes
/// constructing a negative balance a compile-time-checked mistake at the
/// call site rather than a runtime assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct NonNegativeMoney(Money);

impl NonNegativeMoney {
    pub fn try_new(value: Money) -> Option<Self> {
        if value.is_negative() {
            None
        } else {
            Some(NonNegativeMoney(value))
        }
    }

    pub fn zero() -> Self {
        NonNegativeMoney(Money::ZERO)
    }

    pub fn get(&self) -> Money {
        self.0
    }
}

pub const MIN_MULTIPLIER: Decimal = dec!(1.00);
