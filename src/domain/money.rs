use crate::error::CheckoutError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Number of minor units (cents) in one major unit.
const MINOR_SCALE: u32 = 2;

/// A monetary value held as an integer count of minor units.
///
/// All sale arithmetic (line totals, tax, change) stays in minor units.
/// `Decimal` is only used to read decimal input and to apply a tax rate,
/// where the single half-up rounding back to minor units happens.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Converts a major-unit decimal (e.g. `100.50`) into minor units.
    ///
    /// Values with more precision than the currency carries are rejected
    /// rather than rounded.
    pub fn from_decimal(value: Decimal) -> Result<Self, CheckoutError> {
        let normalized = value.normalize();
        if normalized.scale() > MINOR_SCALE {
            return Err(CheckoutError::InvalidAmount(format!(
                "{value} has more than {MINOR_SCALE} decimal places"
            )));
        }
        (normalized * Decimal::from(10_i64.pow(MINOR_SCALE)))
            .to_i64()
            .map(Self)
            .ok_or_else(|| CheckoutError::InvalidAmount(format!("{value} is out of range")))
    }

    /// Parses a major-unit amount such as `"300"` or `"12.50"`.
    pub fn parse_major(input: &str) -> Result<Self, CheckoutError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|e| CheckoutError::InvalidAmount(format!("'{input}': {e}")))?;
        Self::from_decimal(value)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, MINOR_SCALE)
    }

    /// `self * quantity`, saturating at the `i64` bounds.
    pub fn times(&self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(i64::from(quantity)))
    }

    pub fn checked_times(&self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }

    pub fn checked_add(&self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(&self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Renders the amount with a currency prefix, e.g. `KSh 290.00`.
    pub fn format(&self, currency: &str) -> String {
        format!("{currency} {self}")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

// The operators saturate instead of panicking. Amounts that must be exact
// go through the `checked_*` methods first (see `Totals::try_of_lines`).
impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// A tax rate expressed in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate(u32);

impl TaxRate {
    /// 16% VAT applied to every sale.
    pub const STANDARD: Self = Self(1600);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Tax due on `amount`, rounded half-up to the nearest minor unit.
    pub fn apply(&self, amount: Money) -> Money {
        let exact = Decimal::from(amount.minor()) * Decimal::new(i64::from(self.0), 4);
        let rounded = exact.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        // |amount| * rate / 10_000 always fits back into i64 for rates <= 100%.
        Money(rounded.to_i64().unwrap_or(i64::MAX))
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", Decimal::new(i64::from(self.0), 2).normalize())
    }
}
