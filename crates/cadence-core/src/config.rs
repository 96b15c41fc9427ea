//! Run configuration.
//!
//! [`SimConfig`] describes the model clock and the root solver.
//! Sub-populations may override the step and algorithm with a
//! [`SolverConfig`]. Times are decimals so a step of `0.1` lands exactly on
//! every scheduled point.
//!
//! ```toml
//! time_start = 0
//! time_length = 100
//! time_step = 0.25
//! time_units = "years"
//! algorithm = "rk4"
//! pause_interval = 10
//! seed = 42
//! ```

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::{SimTime, TimeUnit};
use crate::error::{ModelError, ModelResult};

// ---------------------------------------------------------------------------
// Algorithm
// ---------------------------------------------------------------------------

/// Numerical integration scheme of a solver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// First-order Euler (RK1).
    #[default]
    Euler,
    /// Classical fourth-order Runge-Kutta.
    Rk4,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Euler => "euler",
            Algorithm::Rk4 => "rk4",
        }
    }

    pub fn order(self) -> u8 {
        match self {
            Algorithm::Euler => 1,
            Algorithm::Rk4 => 4,
        }
    }
}

impl FromStr for Algorithm {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euler" | "rk1" => Ok(Algorithm::Euler),
            "rk4" => Ok(Algorithm::Rk4),
            _ => Err(ModelError::UnknownAlgorithm { name: s.to_string() }),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Clock and root solver settings of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub time_start: Decimal,
    pub time_length: Decimal,
    pub time_step: Decimal,
    pub time_units: TimeUnit,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Return control to the host every `pause_interval` time units.
    #[serde(default)]
    pub pause_interval: Option<Decimal>,
    #[serde(default)]
    pub seed: u64,
}

impl SimConfig {
    pub fn new(time_start: Decimal, time_length: Decimal, time_step: Decimal, time_units: TimeUnit) -> Self {
        Self {
            time_start,
            time_length,
            time_step,
            time_units,
            algorithm: Algorithm::Euler,
            pause_interval: None,
            seed: 0,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_pause_interval(mut self, interval: Decimal) -> Self {
        self.pause_interval = Some(interval);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.time_step <= Decimal::ZERO {
            return Err(invalid(format!("time step must be positive, got {}", self.time_step)));
        }
        if self.time_length < Decimal::ZERO {
            return Err(invalid(format!("time length must not be negative, got {}", self.time_length)));
        }
        if let Some(interval) = self.pause_interval {
            if interval <= Decimal::ZERO {
                return Err(invalid(format!("pause interval must be positive, got {interval}")));
            }
        }
        Ok(())
    }

    pub fn start(&self) -> SimTime {
        SimTime::new(self.time_start, self.time_units)
    }

    pub fn end(&self) -> SimTime {
        SimTime::new(self.time_start + self.time_length, self.time_units)
    }

    pub fn length(&self) -> SimTime {
        SimTime::new(self.time_length, self.time_units)
    }

    pub fn step(&self) -> SimTime {
        SimTime::new(self.time_step, self.time_units)
    }

    pub fn pause_every(&self) -> Option<SimTime> {
        self.pause_interval.map(|i| SimTime::new(i, self.time_units))
    }
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Per sub-population overrides. Unset fields inherit from [`SimConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub time_step: Option<Decimal>,
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
}

impl SolverConfig {
    pub fn validate(&self) -> ModelResult<()> {
        match self.time_step {
            Some(step) if step <= Decimal::ZERO => {
                Err(invalid(format!("solver time step must be positive, got {step}")))
            }
            _ => Ok(()),
        }
    }
}

fn invalid(reason: String) -> ModelError {
    ModelError::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names() {
        assert_eq!("RK4".parse::<Algorithm>().unwrap(), Algorithm::Rk4);
        assert_eq!("rk1".parse::<Algorithm>().unwrap(), Algorithm::Euler);
        let err = "midpoint".parse::<Algorithm>().unwrap_err();
        assert_eq!(err.code(), 1002);
        assert_eq!(Algorithm::Rk4.order(), 4);
    }

    #[test]
    fn json_rejects_unknown_algorithm() {
        let ok: SimConfig = serde_json::from_str(
            r#"{"time_start":"0","time_length":"10","time_step":"0.5","time_units":"years","algorithm":"rk4"}"#,
        )
        .unwrap();
        assert_eq!(ok.algorithm, Algorithm::Rk4);
        assert_eq!(ok.seed, 0);
        assert_eq!(ok.end(), SimTime::from_int(10, TimeUnit::Years));

        let bad = serde_json::from_str::<SimConfig>(
            r#"{"time_start":"0","time_length":"10","time_step":"1","time_units":"years","algorithm":"leapfrog"}"#,
        );
        assert!(bad.unwrap_err().to_string().contains("leapfrog"));
    }

    #[test]
    fn validate_rejects_bad_steps() {
        let base = SimConfig::new(Decimal::ZERO, Decimal::TEN, Decimal::ONE, TimeUnit::Days);
        assert!(base.validate().is_ok());

        let mut zero = base.clone();
        zero.time_step = Decimal::ZERO;
        assert_eq!(zero.validate().unwrap_err().code(), 1003);

        let mut negative = base.clone();
        negative.time_length = -Decimal::ONE;
        assert!(negative.validate().is_err());

        assert!(base.with_pause_interval(Decimal::ZERO).validate().is_err());
        assert!(
            SolverConfig {
                time_step: Some(-Decimal::ONE),
                algorithm: None
            }
            .validate()
            .is_err()
        );
    }
}
