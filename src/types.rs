//! Core data types used across the backtester

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ExecutionInvariantError;

/// Validation errors for a single price observation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObservationValidationError {
    #[error("premiums must be positive: call={call}, put={put}")]
    NonPositivePremium { call: f64, put: f64 },

    #[error("underlying price must be positive, got {0}")]
    NonPositiveUnderlying(f64),

    #[error("observation contains a non-finite value at {0}")]
    NonFinite(NaiveDateTime),

    #[error("price {value} at {timestamp} exceeds the supported maximum of {max}")]
    OutOfRange {
        timestamp: NaiveDateTime,
        value: f64,
        max: f64,
    },
}

/// Largest underlying or premium accepted. Keeps every premium × quantity
/// product well inside the decimal range used for PnL.
pub const MAX_PRICE: f64 = 1e12;

/// One priced snapshot of the straddle: underlying plus both legs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub underlying: f64,
    pub call_premium: f64,
    pub put_premium: f64,
}

impl Observation {
    /// Create a new observation with validation
    pub fn new(
        timestamp: NaiveDateTime,
        underlying: f64,
        call_premium: f64,
        put_premium: f64,
    ) -> Result<Self, ObservationValidationError> {
        let observation = Self {
            timestamp,
            underlying,
            call_premium,
            put_premium,
        };
        observation.validate()?;
        Ok(observation)
    }

    /// Create an observation without validation (for trusted sources or when validation is done separately)
    pub fn new_unchecked(
        timestamp: NaiveDateTime,
        underlying: f64,
        call_premium: f64,
        put_premium: f64,
    ) -> Self {
        Self {
            timestamp,
            underlying,
            call_premium,
            put_premium,
        }
    }

    pub fn validate(&self) -> Result<(), ObservationValidationError> {
        if !(self.underlying.is_finite()
            && self.call_premium.is_finite()
            && self.put_premium.is_finite())
        {
            return Err(ObservationValidationError::NonFinite(self.timestamp));
        }

        if let Some(&value) = [self.underlying, self.call_premium, self.put_premium]
            .iter()
            .find(|v| **v > MAX_PRICE)
        {
            return Err(ObservationValidationError::OutOfRange {
                timestamp: self.timestamp,
                value,
                max: MAX_PRICE,
            });
        }

        if self.underlying <= 0.0 {
            return Err(ObservationValidationError::NonPositiveUnderlying(
                self.underlying,
            ));
        }

        // A zero premium would make every percentage threshold degenerate
        if self.call_premium <= 0.0 || self.put_premium <= 0.0 {
            return Err(ObservationValidationError::NonPositivePremium {
                call: self.call_premium,
                put: self.put_premium,
            });
        }

        Ok(())
    }

    /// Combined premium of both legs
    pub fn straddle_premium(&self) -> f64 {
        self.call_premium + self.put_premium
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Trading symbol using Arc<str> for cheap cloning
///
/// Symbols are stamped onto every trade record of every grid combination,
/// so clones need to stay O(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a straddle position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    ClosedStop,
    ClosedTarget,
    ClosedEod,
}

impl PositionStatus {
    pub fn is_closed(self) -> bool {
        !matches!(self, PositionStatus::Open)
    }

    pub fn label(self) -> &'static str {
        match self {
            PositionStatus::Open => "Open",
            PositionStatus::ClosedStop => "StopLoss",
            PositionStatus::ClosedTarget => "TakeProfit",
            PositionStatus::ClosedEod => "EndOfDay",
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A short straddle: both legs sold at entry, bought back at exit.
///
/// Created on entry and mutated exactly once, by [`Position::close`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_time: NaiveDateTime,
    pub call_entry: Money,
    pub put_entry: Money,
    /// Sum of both legs at entry
    pub entry_premium: Money,
    pub underlying_at_entry: f64,
    pub lots: u32,
    /// lots × lot size
    pub quantity: u32,
    pub status: PositionStatus,
    pub exit_time: Option<NaiveDateTime>,
    pub call_exit: Option<Money>,
    pub put_exit: Option<Money>,
    pub exit_premium: Option<Money>,
    pub realized_pnl: Option<Money>,
}

impl Position {
    /// Sell both legs at the observation's premiums
    pub fn open(observation: &Observation, lots: u32, lot_size: u32) -> Self {
        let call_entry = Money::from_f64(observation.call_premium);
        let put_entry = Money::from_f64(observation.put_premium);

        Position {
            entry_time: observation.timestamp,
            call_entry,
            put_entry,
            entry_premium: call_entry + put_entry,
            underlying_at_entry: observation.underlying,
            lots,
            quantity: lots.saturating_mul(lot_size),
            status: PositionStatus::Open,
            exit_time: None,
            call_exit: None,
            put_exit: None,
            exit_premium: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized PnL if both legs were bought back at this observation
    pub fn mark_to_market(&self, observation: &Observation) -> Money {
        let current = Money::from_f64(observation.straddle_premium());
        (self.entry_premium - current) * Money::from(self.quantity as i64)
    }

    /// Buy back both legs and freeze the position.
    ///
    /// Returns the realized PnL: (entry_premium − exit_premium) × quantity.
    pub fn close(
        &mut self,
        observation: &Observation,
        status: PositionStatus,
    ) -> Result<Money, ExecutionInvariantError> {
        if !self.is_open() {
            return Err(ExecutionInvariantError::PositionAlreadyClosed {
                entry_time: self.entry_time,
                status: self.status,
            });
        }
        if !status.is_closed() {
            return Err(ExecutionInvariantError::InvalidExitStatus(status));
        }

        let call_exit = Money::from_f64(observation.call_premium);
        let put_exit = Money::from_f64(observation.put_premium);
        let exit_premium = call_exit + put_exit;
        let pnl = (self.entry_premium - exit_premium) * Money::from(self.quantity as i64);

        self.status = status;
        self.exit_time = Some(observation.timestamp);
        self.call_exit = Some(call_exit);
        self.put_exit = Some(put_exit);
        self.exit_premium = Some(exit_premium);
        self.realized_pnl = Some(pnl);

        Ok(pnl)
    }
}

/// Mark-to-market of an open position at one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayMark {
    /// Entry of the day the position belongs to (0 = first)
    pub reentry: u32,
    pub timestamp: NaiveDateTime,
    pub underlying: f64,
    pub call_premium: f64,
    pub put_premium: f64,
    /// Before charges
    pub pnl: Money,
}

/// Closed-position snapshot stamped with the identifiers of the run that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub expiry: NaiveDate,
    pub date: NaiveDate,
    pub fingerprint: String,
    /// 0 for the first position of the session, then 1, 2, ...
    pub reentry: u32,
    pub status: PositionStatus,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub underlying_at_entry: f64,
    pub atm_strike: i64,
    pub call_entry: Money,
    pub put_entry: Money,
    pub call_exit: Money,
    pub put_exit: Money,
    pub entry_premium: Money,
    pub exit_premium: Money,
    pub lots: u32,
    pub quantity: u32,
    /// (entry_premium − exit_premium) × quantity
    pub realized_pnl: Money,
    pub charges: Money,
    pub net_pnl: Money,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.net_pnl.is_positive()
    }

    /// Return on the premium collected, in percent
    pub fn return_pct(&self) -> f64 {
        if self.entry_premium.is_zero() {
            return 0.0;
        }
        ((self.entry_premium - self.exit_premium) / self.entry_premium).to_f64() * 100.0
    }
}

/// Aggregated metrics for one configuration over a date range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub fingerprint: String,
    pub symbol: Option<Symbol>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sessions: usize,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_pnl: Money,
    /// Percentage of trades with positive net PnL
    pub win_rate: f64,
    /// Largest peak-to-trough decline of cumulative net PnL
    pub max_drawdown: Money,
    pub avg_win: Money,
    pub avg_loss: Money,
    pub largest_win: Money,
    pub largest_loss: Money,
    pub profit_factor: f64,
    pub avg_daily_pnl: Money,
    /// Mean / std-dev of daily PnL, not annualised
    pub sharpe_ratio: f64,
    pub stop_exits: usize,
    pub target_exits: usize,
    pub eod_exits: usize,
}

// ============================================================================
// Money
// ============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Decimal amount in rupees.
///
/// Premiums are converted once, when a position opens or closes; from then
/// on PnL, charges and drawdowns are summed without float rounding.
///
/// ```
/// use straddle_backtest::Money;
/// let credit = Money::from_f64(118.5) + Money::from_f64(104.25);
/// assert_eq!(credit * Money::from(75_i64), Money::from_f64(16_706.25));
/// ```
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Non-finite values map to zero. Observations above [`MAX_PRICE`] are
    /// rejected before they reach this conversion.
    pub fn from_f64(value: f64) -> Self {
        Decimal::try_from(value).map(Money).unwrap_or(Money::ZERO)
    }

    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    /// `pct` percent of this amount (e.g. `percent(25.0)` of 200 is 50)
    pub fn percent(self, pct: f64) -> Self {
        Money(self.0 * Money::from_f64(pct).0 / dec!(100))
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Money {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Mul for Money {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Money(self.0 * rhs.0)
    }
}

/// Division by zero yields zero, which is what every average in
/// [`crate::metrics`] wants for an empty group
impl Div for Money {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        if rhs.0.is_zero() {
            Money::ZERO
        } else {
            Money(self.0 / rhs.0)
        }
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Money(Decimal::from(value))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}
