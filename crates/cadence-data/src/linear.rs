//! A small evaluator for data-driven models.
//!
//! Every equation is linear in the values of other primitives. Conditions
//! compare a linear expression with a threshold, and actions write one into
//! a stock or variable. Names are resolved through the [`Scope`] at
//! evaluation time, so equations may be compiled before the model exists.

use cadence_core::error::{ModelError, ModelResult};
use cadence_core::eval::{Evaluator, Scope};
use cadence_core::fixed::{Fixed128, checked_f64_to_fixed128};
use cadence_core::id::EquationId;
use cadence_core::value::Value;

use crate::schema::ExprData;

#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub constant: Fixed128,
    pub terms: Vec<(String, Fixed128)>,
}

/// A number from a model file with no fixed-point representation.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("number {0} is not finite or out of range")]
pub struct OutOfRange(pub f64);

pub fn number(v: f64) -> Result<Fixed128, OutOfRange> {
    checked_f64_to_fixed128(v).ok_or(OutOfRange(v))
}

impl TryFrom<&ExprData> for Linear {
    type Error = OutOfRange;

    fn try_from(data: &ExprData) -> Result<Self, OutOfRange> {
        match data {
            ExprData::Constant(c) => Ok(Linear {
                constant: number(*c)?,
                terms: Vec::new(),
            }),
            ExprData::Linear { constant, terms } => Ok(Linear {
                constant: number(*constant)?,
                terms: terms
                    .iter()
                    .map(|(n, c)| Ok((n.clone(), number(*c)?)))
                    .collect::<Result<_, OutOfRange>>()?,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Equation {
    Linear(Linear),
    Above(Linear, Fixed128),
    Below(Linear, Fixed128),
    Set { target: String, value: Linear },
}

#[derive(Debug, Default, Clone)]
pub struct LinearEvaluator {
    equations: Vec<Equation>,
}

impl LinearEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&mut self, equation: Equation) -> EquationId {
        self.equations.push(equation);
        EquationId(self.equations.len() as u32 - 1)
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    fn linear(&self, expr: &Linear, scope: &mut dyn Scope) -> ModelResult<Fixed128> {
        let mut total = expr.constant;
        for (name, coefficient) in &expr.terms {
            let entity = scope
                .lookup(name)
                .ok_or_else(|| ModelError::UnknownPrimitive { name: name.clone() })?;
            let value = scope.value(entity)?;
            let magnitude = match &value {
                Value::Quantity(q) => q.magnitude,
                Value::Boolean(b) => Fixed128::from_num(u8::from(*b)),
                Value::Vector(v) => v
                    .iter()
                    .filter_map(|(_, item)| item.as_quantity())
                    .try_fold(Fixed128::ZERO, |acc, q| acc.checked_add(q.magnitude))
                    .ok_or_else(|| ModelError::Overflow {
                        primitive: String::new(),
                    })?,
                other => {
                    return Err(ModelError::Evaluation {
                        primitive: String::new(),
                        message: format!("'{name}' is {}, not a number", other.type_name()),
                    });
                }
            };
            let term = coefficient.checked_mul(magnitude).ok_or_else(|| ModelError::Overflow {
                primitive: String::new(),
            })?;
            total = total.checked_add(term).ok_or_else(|| ModelError::Overflow {
                primitive: String::new(),
            })?;
        }
        Ok(total)
    }
}

impl Evaluator for LinearEvaluator {
    fn evaluate(&self, equation: EquationId, scope: &mut dyn Scope) -> ModelResult<Value> {
        let eq = self.equations.get(equation.0 as usize).ok_or_else(|| ModelError::Evaluation {
            primitive: String::new(),
            message: format!("no equation #{}", equation.0),
        })?;
        match eq {
            Equation::Linear(expr) => Ok(Value::number(self.linear(expr, scope)?)),
            Equation::Above(expr, threshold) => Ok(Value::Boolean(self.linear(expr, scope)? > *threshold)),
            Equation::Below(expr, threshold) => Ok(Value::Boolean(self.linear(expr, scope)? < *threshold)),
            Equation::Set { target, value } => {
                let entity = scope
                    .lookup(target)
                    .ok_or_else(|| ModelError::UnknownPrimitive { name: target.clone() })?;
                let result = Value::number(self.linear(value, scope)?);
                scope.set_value(entity, result.clone())?;
                Ok(result)
            }
        }
    }
}
