//! Unsigned fixed-point money arithmetic.
//!
//! Two scalar scales are used across the engine: `Money` carries stable-token
//! amounts in 10^6 units (matching the 6-decimal collateral token) and `Price`
//! carries oracle prices in 10^8 units. All arithmetic is checked; overflow
//! and underflow surface as typed errors instead of wrapping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Units per whole stable token (6 decimals).
pub const MONEY_SCALE: u64 = 1_000_000;

/// Units per whole price point (8 decimals).
pub const PRICE_SCALE: u64 = 100_000_000;

/// Basis points per whole.
pub const BPS_SCALE: u64 = 10_000;

/// Arithmetic failures from fixed-point operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedPointError {
    /// Result exceeds the representable range.
    #[error("fixed-point overflow")]
    Overflow,

    /// Subtraction below zero on an unsigned quantity.
    #[error("fixed-point underflow")]
    Underflow,

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A price that must be strictly positive was zero or negative.
    #[error("non-positive price")]
    NonPositive,
}

// =============================================================================
// Money (10^6)
// =============================================================================

/// Stable-token amount in 10^6 fixed-point units. Unsigned by construction:
/// sub-ledger balances can never go negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Wraps a raw 10^6-unit amount.
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Converts whole tokens into units.
    ///
    /// # Errors
    /// Returns `Overflow` if the scaled amount exceeds `u64::MAX`.
    pub fn from_whole(whole: u64) -> Result<Self, FixedPointError> {
        whole
            .checked_mul(MONEY_SCALE)
            .map(Self)
            .ok_or(FixedPointError::Overflow)
    }

    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    ///
    /// # Errors
    /// Returns `Overflow` on overflow.
    pub fn checked_add(self, rhs: Self) -> Result<Self, FixedPointError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(FixedPointError::Overflow)
    }

    /// Checked subtraction.
    ///
    /// # Errors
    /// Returns `Underflow` if `rhs > self`.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, FixedPointError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(FixedPointError::Underflow)
    }

    /// Subtraction clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by a basis-point fraction: `self * bps / 10_000`.
    ///
    /// # Errors
    /// Returns `Overflow` if the result does not fit `u64`.
    pub fn mul_bps(self, bps: u64) -> Result<Self, FixedPointError> {
        let scaled = u128::from(self.0)
            .checked_mul(u128::from(bps))
            .ok_or(FixedPointError::Overflow)?
            / u128::from(BPS_SCALE);
        u64::try_from(scaled)
            .map(Self)
            .map_err(|_| FixedPointError::Overflow)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.0 / MONEY_SCALE, self.0 % MONEY_SCALE)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        // Saturating on purpose: totals are diagnostic, primitives use checked math.
        iter.fold(Self::ZERO, |acc, m| Self(acc.0.saturating_add(m.0)))
    }
}

// =============================================================================
// Price (10^8)
// =============================================================================

/// Oracle price in 10^8 fixed-point units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Converts a whole-number price into units.
    ///
    /// # Errors
    /// Returns `Overflow` if the scaled price exceeds `u64::MAX`.
    pub fn from_whole(whole: u64) -> Result<Self, FixedPointError> {
        whole
            .checked_mul(PRICE_SCALE)
            .map(Self)
            .ok_or(FixedPointError::Overflow)
    }

    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:08}", self.0 / PRICE_SCALE, self.0 % PRICE_SCALE)
    }
}

/// Absolute deviation between two prices in basis points of `reference`:
/// `|price − reference| · 10_000 / reference`.
///
/// # Errors
/// Returns `DivisionByZero` for a zero reference and `Overflow` if the
/// deviation does not fit `u64`.
pub fn deviation_bps(price: Price, reference: Price) -> Result<u64, FixedPointError> {
    if reference.is_zero() {
        return Err(FixedPointError::DivisionByZero);
    }
    let diff = u128::from(price.0.abs_diff(reference.0));
    let bps = diff * u128::from(BPS_SCALE) / u128::from(reference.0);
    u64::try_from(bps).map_err(|_| FixedPointError::Overflow)
}

/// Normalizes a raw feed answer quoted at `decimals` into 10^8 units.
///
/// Sources below 8 decimals scale up, above 8 scale down (truncating).
///
/// # Errors
/// Returns `NonPositive` for answers ≤ 0 and `Overflow` if the scaled price
/// does not fit `u64`.
pub fn normalize_decimals(raw: i128, decimals: u32) -> Result<Price, FixedPointError> {
    if raw <= 0 {
        return Err(FixedPointError::NonPositive);
    }
    let value = raw as u128;
    let scaled = if decimals < 8 {
        let factor = 10u128
            .checked_pow(8 - decimals)
            .ok_or(FixedPointError::Overflow)?;
        value.checked_mul(factor).ok_or(FixedPointError::Overflow)?
    } else if decimals > 8 {
        let factor = 10u128
            .checked_pow(decimals - 8)
            .ok_or(FixedPointError::Overflow)?;
        value / factor
    } else {
        value
    };
    u64::try_from(scaled)
        .map(Price)
        .map_err(|_| FixedPointError::Overflow)
}

/// Normalizes a signed-exponent feed answer: `raw · 10^(8 + expo)`.
///
/// # Errors
/// Returns `NonPositive` for answers ≤ 0 and `Overflow` if the scaled price
/// does not fit `u64`.
pub fn normalize_expo(raw: i128, expo: i32) -> Result<Price, FixedPointError> {
    if raw <= 0 {
        return Err(FixedPointError::NonPositive);
    }
    let shift = 8i64 + i64::from(expo);
    let value = raw as u128;
    let scaled = if shift >= 0 {
        let factor = 10u128
            .checked_pow(u32::try_from(shift).map_err(|_| FixedPointError::Overflow)?)
            .ok_or(FixedPointError::Overflow)?;
        value.checked_mul(factor).ok_or(FixedPointError::Overflow)?
    } else {
        let factor = 10u128
            .checked_pow(u32::try_from(-shift).map_err(|_| FixedPointError::Overflow)?)
            .ok_or(FixedPointError::Overflow)?;
        value / factor
    };
    u64::try_from(scaled)
        .map(Price)
        .map_err(|_| FixedPointError::Overflow)
}

// =============================================================================
// SignedMoney (10^6, i128)
// =============================================================================

/// Signed 10^6 amount used for PnL intermediates. Wide enough that the
/// `(mark − entry) · size` product never wraps for representable inputs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SignedMoney(i128);

impl SignedMoney {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_units(units: i128) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn units(self) -> i128 {
        self.0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    ///
    /// # Errors
    /// Returns `Overflow` on overflow.
    pub fn checked_add(self, rhs: Self) -> Result<Self, FixedPointError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(FixedPointError::Overflow)
    }

    /// `max(0, self)`, the component credited at the haircut rate.
    #[must_use]
    pub const fn positive_part(self) -> Self {
        if self.0 > 0 {
            self
        } else {
            Self::ZERO
        }
    }

    /// `min(0, self)`, the component applied in full.
    #[must_use]
    pub const fn negative_part(self) -> Self {
        if self.0 < 0 {
            self
        } else {
            Self::ZERO
        }
    }

    /// Multiplies by a basis-point fraction, truncating toward zero.
    #[must_use]
    pub const fn mul_bps(self, bps: u64) -> Self {
        Self(self.0 * bps as i128 / BPS_SCALE as i128)
    }

    /// Magnitude as unsigned `Money`.
    ///
    /// # Errors
    /// Returns `Overflow` if the magnitude exceeds `u64::MAX` units.
    pub fn abs_money(self) -> Result<Money, FixedPointError> {
        u64::try_from(self.0.unsigned_abs())
            .map(Money::from_units)
            .map_err(|_| FixedPointError::Overflow)
    }
}

impl From<Money> for SignedMoney {
    fn from(m: Money) -> Self {
        Self(i128::from(m.units()))
    }
}

impl std::ops::Neg for SignedMoney {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl std::fmt::Display for SignedMoney {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:06}",
            abs / u128::from(MONEY_SCALE),
            abs % u128::from(MONEY_SCALE)
        )
    }
}

/// Unrealized PnL for a position: `(mark − entry) · size / 10^8`, negated for
/// shorts. Inputs are 10^8 prices and a 10^6 size; the result is 10^6.
///
/// # Errors
/// Returns `Overflow` if the intermediate product does not fit `i128`.
pub fn position_pnl(
    entry: Price,
    mark: Price,
    size: Money,
    long: bool,
) -> Result<SignedMoney, FixedPointError> {
    let diff = i128::from(mark.units()) - i128::from(entry.units());
    let gross = diff
        .checked_mul(i128::from(size.units()))
        .ok_or(FixedPointError::Overflow)?;
    let pnl = gross / i128::from(PRICE_SCALE);
    Ok(SignedMoney(if long { pnl } else { -pnl }))
}
