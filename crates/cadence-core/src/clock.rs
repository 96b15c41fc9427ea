//! Simulation clock values.
//!
//! # Design
//!
//! A [`SimTime`] is a signed [`Decimal`] amount tagged with a [`TimeUnit`].
//! Decimal arithmetic keeps schedules exact: adding a step of `0.1` ten
//! thousand times lands exactly on `1000`, so equality between the queue's
//! time and a scheduled task time never needs an epsilon.
//!
//! Every time unit converts to whole seconds (a month is 1/12 of a 365-day
//! year, i.e. 2 628 000 s), so comparing two clock values converts both to
//! seconds and compares the decimals directly.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::fixed::{Fixed128, decimal_to_fixed128};

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// Unit attached to a clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> Decimal {
        match self {
            TimeUnit::Seconds => Decimal::ONE,
            TimeUnit::Minutes => Decimal::from(60),
            TimeUnit::Hours => Decimal::from(3_600),
            TimeUnit::Days => Decimal::from(86_400),
            TimeUnit::Weeks => Decimal::from(604_800),
            TimeUnit::Months => Decimal::from(2_628_000),
            TimeUnit::Years => Decimal::from(31_536_000),
        }
    }

    /// Canonical plural name.
    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
            TimeUnit::Years => "years",
        }
    }

    /// Factor converting an amount in `self` into an amount in `target`.
    pub fn factor_to(self, target: TimeUnit) -> Decimal {
        if self == target {
            return Decimal::ONE;
        }
        self.seconds() / target.seconds()
    }
}

impl FromStr for TimeUnit {
    type Err = ModelError;

    /// Accepts singular or plural names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let unit = match lower.trim_end_matches('s') {
            "second" => TimeUnit::Seconds,
            "minute" => TimeUnit::Minutes,
            "hour" => TimeUnit::Hours,
            "day" => TimeUnit::Days,
            "week" => TimeUnit::Weeks,
            "month" => TimeUnit::Months,
            "year" => TimeUnit::Years,
            _ => {
                return Err(ModelError::InvalidConfig {
                    reason: format!("unknown time unit '{s}'"),
                });
            }
        };
        Ok(unit)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// SimTime
// ---------------------------------------------------------------------------

/// A point in (or span of) simulated time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimTime {
    amount: Decimal,
    unit: TimeUnit,
}

impl SimTime {
    pub fn new(amount: Decimal, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    pub fn zero(unit: TimeUnit) -> Self {
        Self::new(Decimal::ZERO, unit)
    }

    /// Whole number of units.
    pub fn from_int(amount: i64, unit: TimeUnit) -> Self {
        Self::new(Decimal::from(amount), unit)
    }

    /// Build a clock value from a binary float.
    ///
    /// Fails with [`ModelError::InvalidTaskTime`] for NaN, infinities and
    /// magnitudes a decimal cannot hold.
    pub fn from_f64(amount: f64, unit: TimeUnit) -> ModelResult<Self> {
        if !amount.is_finite() {
            return Err(ModelError::InvalidTaskTime {
                detail: format!("non-finite time {amount}"),
            });
        }
        let amount = Decimal::from_f64(amount).ok_or_else(|| ModelError::InvalidTaskTime {
            detail: format!("time {amount} out of range"),
        })?;
        Ok(Self::new(amount.normalize(), unit))
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Total length in seconds.
    pub fn in_seconds(&self) -> Decimal {
        self.amount * self.unit.seconds()
    }

    /// Force this value into `unit`, scaling the amount.
    pub fn to_unit(&self, unit: TimeUnit) -> SimTime {
        if unit == self.unit {
            return *self;
        }
        SimTime::new(self.amount * self.unit.factor_to(unit), unit)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Multiply by a whole number of steps (used to place step `index`
    /// without accumulating repeated additions).
    pub fn times(&self, n: u64) -> SimTime {
        SimTime::new(self.amount * Decimal::from(n), self.unit)
    }

    /// Divide by two. Used for the RK4 half step.
    pub fn halved(&self) -> SimTime {
        SimTime::new(self.amount / Decimal::TWO, self.unit)
    }

    /// How many times `step` fits into `self`, as an exact decimal.
    pub fn ratio(&self, step: &SimTime) -> ModelResult<Decimal> {
        let step = step.to_unit(self.unit).amount;
        self.amount
            .checked_div(step)
            .ok_or_else(|| ModelError::InvalidConfig {
                reason: "time step must be non-zero".into(),
            })
    }

    /// Amount expressed in `unit`, converted to fixed point.
    pub fn as_fixed(&self, unit: TimeUnit) -> ModelResult<Fixed128> {
        decimal_to_fixed128(self.to_unit(unit).amount).ok_or_else(|| ModelError::Overflow {
            primitive: format!("time interval {self}"),
        })
    }

    /// Larger of two clock values.
    pub fn max(self, other: SimTime) -> SimTime {
        if other > self { other } else { self }
    }

    /// Smaller of two clock values.
    pub fn min(self, other: SimTime) -> SimTime {
        if other < self { other } else { self }
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        if self.unit == other.unit {
            return self.amount == other.amount;
        }
        self.in_seconds() == other.in_seconds()
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.unit == other.unit {
            return self.amount.cmp(&other.amount);
        }
        self.in_seconds().cmp(&other.in_seconds())
    }
}

/// Sum in the left operand's unit.
impl Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimTime) -> SimTime {
        SimTime::new(self.amount + rhs.to_unit(self.unit).amount, self.unit)
    }
}

/// Difference in the left operand's unit.
impl Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime::new(self.amount - rhs.to_unit(self.unit).amount, self.unit)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.normalize(), self.unit)
    }
}

// ---------------------------------------------------------------------------
// TimeChange
// ---------------------------------------------------------------------------

/// Notification sent to time-change subscribers whenever the queue's clock
/// moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChange {
    pub old: SimTime,
    pub new: SimTime,
    /// `new - old`, negative when the queue steps backward.
    pub delta: SimTime,
}

impl TimeChange {
    pub fn new(old: SimTime, new: SimTime) -> Self {
        Self {
            old,
            new,
            delta: new - old,
        }
    }

    pub fn is_forward(&self) -> bool {
        !self.delta.is_zero() && !self.delta.is_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn years(v: i64) -> SimTime {
        SimTime::from_int(v, TimeUnit::Years)
    }

    #[test]
    fn repeated_addition_does_not_drift() {
        let step = SimTime::new(Decimal::new(1, 1), TimeUnit::Days);
        let mut t = SimTime::zero(TimeUnit::Days);
        for _ in 0..10_000 {
            t = t + step;
        }
        assert_eq!(t, SimTime::from_int(1_000, TimeUnit::Days));
        assert_eq!(step.times(10_000), t);
    }

    #[test]
    fn comparison_across_units() {
        assert_eq!(SimTime::from_int(12, TimeUnit::Months), years(1));
        assert!(SimTime::from_int(25, TimeUnit::Hours) > SimTime::from_int(1, TimeUnit::Days));
        assert_eq!(SimTime::from_int(2, TimeUnit::Weeks).to_unit(TimeUnit::Days).amount(), Decimal::from(14));
    }

    #[test]
    fn addition_keeps_left_unit() {
        let t = years(1) + SimTime::from_int(6, TimeUnit::Months);
        assert_eq!(t.unit(), TimeUnit::Years);
        assert_eq!(t.amount(), Decimal::new(15, 1));
    }

    #[test]
    fn from_f64_rejects_non_finite() {
        let err = SimTime::from_f64(f64::NAN, TimeUnit::Years).unwrap_err();
        assert_eq!(err.code(), 1001);
        assert!(SimTime::from_f64(f64::INFINITY, TimeUnit::Years).is_err());
        assert_eq!(SimTime::from_f64(2.5, TimeUnit::Years).unwrap(), SimTime::new(Decimal::new(25, 1), TimeUnit::Years));
    }

    #[test]
    fn unit_names_parse() {
        assert_eq!("Year".parse::<TimeUnit>().unwrap(), TimeUnit::Years);
        assert_eq!("days".parse::<TimeUnit>().unwrap(), TimeUnit::Days);
        assert!("fortnights".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn ratio_and_halving() {
        let length = years(10);
        let step = SimTime::new(Decimal::new(25, 2), TimeUnit::Years);
        assert_eq!(length.ratio(&step).unwrap(), Decimal::from(40));
        assert_eq!(step.halved().amount(), Decimal::new(125, 3));
        assert!(length.ratio(&years(0)).is_err());
    }

    #[test]
    fn time_change_direction() {
        let forward = TimeChange::new(years(1), years(2));
        assert!(forward.is_forward());
        assert_eq!(forward.delta, years(1));
        assert!(!TimeChange::new(years(2), years(1)).is_forward());
    }
}
