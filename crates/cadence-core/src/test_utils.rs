//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::clock::{SimTime, TimeUnit};
use crate::config::SimConfig;
use crate::error::{ModelError, ModelResult};
use crate::eval::{Evaluator, Scope};
use crate::fixed::Fixed128;
use crate::id::EquationId;
use crate::value::{Amount, Value};

// ===========================================================================
// Number helpers
// ===========================================================================

pub fn fixed(v: f64) -> Fixed128 {
    Fixed128::from_num(v)
}

pub fn dec(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default()
}

pub fn years(v: i64) -> SimTime {
    SimTime::from_int(v, TimeUnit::Years)
}

/// Scalar amount as `f64`, or the component sum of a vector.
pub fn magnitude(amount: &Amount) -> f64 {
    amount.total().to_num::<f64>()
}

/// `start = 0`, in years.
pub fn years_config(length: f64, step: f64) -> SimConfig {
    SimConfig::new(Decimal::ZERO, dec(length), dec(step), TimeUnit::Years)
}

// ===========================================================================
// Closure evaluator
// ===========================================================================

type EquationFn = Box<dyn Fn(&mut dyn Scope) -> ModelResult<Value>>;

/// Evaluator whose equations are Rust closures, registered up front.
#[derive(Default)]
pub struct FnEvaluator {
    equations: Vec<EquationFn>,
}

impl FnEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, f: impl Fn(&mut dyn Scope) -> ModelResult<Value> + 'static) -> EquationId {
        self.equations.push(Box::new(f));
        EquationId(self.equations.len() as u32 - 1)
    }

    pub fn constant(&mut self, v: f64) -> EquationId {
        let value = fixed(v);
        self.add(move |_| Ok(Value::number(value)))
    }

    pub fn boolean(&mut self, b: bool) -> EquationId {
        self.add(move |_| Ok(Value::Boolean(b)))
    }

    /// `factor * [name]`.
    pub fn scaled(&mut self, name: &str, factor: f64) -> EquationId {
        let name = name.to_string();
        let factor = fixed(factor);
        self.add(move |scope| {
            let magnitude = read(scope, &name)?;
            Ok(Value::number(magnitude * factor))
        })
    }

    /// `true` while `[name] > threshold`.
    pub fn above(&mut self, name: &str, threshold: f64) -> EquationId {
        let name = name.to_string();
        let threshold = fixed(threshold);
        self.add(move |scope| Ok(Value::Boolean(read(scope, &name)? > threshold)))
    }

    /// Set stock `name` to `level`; evaluates to `level`.
    pub fn set_to(&mut self, name: &str, level: f64) -> EquationId {
        let name = name.to_string();
        let level = Value::number(fixed(level));
        self.add(move |scope| {
            let entity = scope
                .lookup(&name)
                .ok_or_else(|| ModelError::UnknownPrimitive { name: name.clone() })?;
            scope.set_value(entity, level.clone())?;
            Ok(level.clone())
        })
    }
}

/// Scalar magnitude of a named entity.
pub fn read(scope: &mut dyn Scope, name: &str) -> ModelResult<Fixed128> {
    let entity = scope
        .lookup(name)
        .ok_or_else(|| ModelError::UnknownPrimitive { name: name.to_string() })?;
    let value = scope.value(entity)?;
    value
        .as_quantity()
        .map(|q| q.magnitude)
        .ok_or_else(|| ModelError::InvalidValue {
            primitive: name.to_string(),
            expected: "a number",
        })
}

impl Evaluator for FnEvaluator {
    fn evaluate(&self, equation: EquationId, scope: &mut dyn Scope) -> ModelResult<Value> {
        let f = self.equations.get(equation.0 as usize).ok_or_else(|| ModelError::Evaluation {
            primitive: format!("#{}", equation.0),
            message: "no such equation".into(),
        })?;
        f(scope)
    }
}
