//! Values produced by equations and the amounts stocks hold.
//!
//! # Value vs Amount
//!
//! | Type       | Used by                  | Carries units | Kinds                                  |
//! |------------|--------------------------|---------------|----------------------------------------|
//! | [`Value`]  | evaluators, result sinks | yes           | quantity, vector, boolean, text, entity |
//! | [`Amount`] | stock levels, transfers  | no (per stock)| scalar, keyed vector                   |
//!
//! Conservation works on [`Amount`]s in fixed point; a stock's unit is stored
//! once on the stock instead of on every transfer.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::TimeUnit;
use crate::error::{ModelError, ModelResult};
use crate::fixed::{Fixed128, decimal_to_fixed128};
use crate::id::EntityRef;

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// A material unit optionally divided by a time unit (`widgets/years`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub per: Option<TimeUnit>,
}

impl Unit {
    pub fn dimensionless() -> Self {
        Self::default()
    }

    pub fn of(base: impl Into<String>) -> Self {
        Self {
            base: Some(base.into()),
            per: None,
        }
    }

    /// Divide this unit by a time unit.
    pub fn per(mut self, time: TimeUnit) -> Self {
        self.per = Some(time);
        self
    }

    pub fn is_dimensionless(&self) -> bool {
        self.base.is_none() && self.per.is_none()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.base, self.per) {
            (None, None) => f.write_str("dimensionless"),
            (Some(base), None) => f.write_str(base),
            (None, Some(per)) => write!(f, "1/{per}"),
            (Some(base), Some(per)) => write!(f, "{base}/{per}"),
        }
    }
}

fn unit_mismatch(left: &Unit, right: &Unit) -> ModelError {
    ModelError::UnitMismatch {
        left: left.to_string(),
        right: right.to_string(),
    }
}

fn overflow() -> ModelError {
    ModelError::Overflow {
        primitive: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

/// A dimensioned scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub magnitude: Fixed128,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: Fixed128, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    pub fn dimensionless(magnitude: Fixed128) -> Self {
        Self::new(magnitude, Unit::dimensionless())
    }

    pub fn plus(&self, other: &Quantity) -> ModelResult<Quantity> {
        if self.unit != other.unit {
            return Err(unit_mismatch(&self.unit, &other.unit));
        }
        let magnitude = self.magnitude.checked_add(other.magnitude).ok_or_else(overflow)?;
        Ok(Quantity::new(magnitude, self.unit.clone()))
    }

    pub fn minus(&self, other: &Quantity) -> ModelResult<Quantity> {
        if self.unit != other.unit {
            return Err(unit_mismatch(&self.unit, &other.unit));
        }
        let magnitude = self.magnitude.checked_sub(other.magnitude).ok_or_else(overflow)?;
        Ok(Quantity::new(magnitude, self.unit.clone()))
    }

    /// Product. At least one side must be dimensionless.
    pub fn mul(&self, other: &Quantity) -> ModelResult<Quantity> {
        let unit = if self.unit.is_dimensionless() {
            other.unit.clone()
        } else if other.unit.is_dimensionless() {
            self.unit.clone()
        } else {
            return Err(unit_mismatch(&self.unit, &other.unit));
        };
        let magnitude = self.magnitude.checked_mul(other.magnitude).ok_or_else(overflow)?;
        Ok(Quantity::new(magnitude, unit))
    }

    /// Quotient. Dividing by a dimensionless value keeps the unit; dividing
    /// two values of the same unit yields a dimensionless ratio.
    pub fn div(&self, other: &Quantity) -> ModelResult<Quantity> {
        let unit = if other.unit.is_dimensionless() {
            self.unit.clone()
        } else if other.unit == self.unit {
            Unit::dimensionless()
        } else {
            return Err(unit_mismatch(&self.unit, &other.unit));
        };
        if other.magnitude == Fixed128::ZERO {
            return Err(ModelError::DivisionByZero {
                primitive: String::new(),
            });
        }
        let magnitude = self.magnitude.checked_div(other.magnitude).ok_or_else(overflow)?;
        Ok(Quantity::new(magnitude, unit))
    }

    pub fn scale(&self, factor: Fixed128) -> ModelResult<Quantity> {
        let magnitude = self.magnitude.checked_mul(factor).ok_or_else(overflow)?;
        Ok(Quantity::new(magnitude, self.unit.clone()))
    }

    pub fn compare(&self, other: &Quantity) -> ModelResult<Ordering> {
        if self.unit != other.unit {
            return Err(unit_mismatch(&self.unit, &other.unit));
        }
        Ok(self.magnitude.cmp(&other.magnitude))
    }

    /// Re-express a rate per `target` time unit, scaling the magnitude.
    /// Quantities without a time denominator are returned unchanged.
    pub fn per_time(&self, target: TimeUnit) -> ModelResult<Quantity> {
        let Some(per) = self.unit.per else {
            return Ok(self.clone());
        };
        if per == target {
            return Ok(self.clone());
        }
        let factor = decimal_to_fixed128(target.factor_to(per)).ok_or_else(overflow)?;
        let mut converted = self.scale(factor)?;
        converted.unit.per = Some(target);
        Ok(converted)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_dimensionless() {
            write!(f, "{}", self.magnitude)
        } else {
            write!(f, "{} {}", self.magnitude, self.unit)
        }
    }
}

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// An ordered vector of values addressed by key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vector {
    keys: Vec<String>,
    items: Vec<Value>,
}

impl Vector {
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let (keys, items) = entries.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self { keys, items }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys.iter().position(|k| k == key).map(|i| &self.items[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(String::as_str).zip(self.items.iter())
    }

    fn map(&self, f: impl Fn(&Value) -> ModelResult<Value>) -> ModelResult<Vector> {
        let items = self.items.iter().map(f).collect::<ModelResult<Vec<_>>>()?;
        Ok(Vector {
            keys: self.keys.clone(),
            items,
        })
    }

    fn zip(&self, other: &Vector, f: impl Fn(&Value, &Value) -> ModelResult<Value>) -> ModelResult<Vector> {
        if self.keys != other.keys {
            return Err(ModelError::VectorShape {
                left: self.keys.join(", "),
                right: other.keys.join(", "),
            });
        }
        let items = self
            .items
            .iter()
            .zip(&other.items)
            .map(|(a, b)| f(a, b))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Vector {
            keys: self.keys.clone(),
            items,
        })
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Result of evaluating an equation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Quantity(Quantity),
    Vector(Vector),
    Boolean(bool),
    Text(String),
    Entity(EntityRef),
}

impl Value {
    /// Dimensionless number.
    pub fn number(magnitude: Fixed128) -> Self {
        Value::Quantity(Quantity::dimensionless(magnitude))
    }

    pub fn quantity(magnitude: Fixed128, unit: Unit) -> Self {
        Value::Quantity(Quantity::new(magnitude, unit))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Quantity(_) => "number",
            Value::Vector(_) => "vector",
            Value::Boolean(_) => "boolean",
            Value::Text(_) => "text",
            Value::Entity(_) => "entity",
        }
    }

    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Value::Quantity(q) => Some(q),
            _ => None,
        }
    }

    /// Truthiness used by condition triggers: booleans as-is, numbers when
    /// non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Quantity(q) => Some(q.magnitude != Fixed128::ZERO),
            _ => None,
        }
    }

    pub fn plus(&self, other: &Value) -> ModelResult<Value> {
        self.combine(other, &Quantity::plus)
    }

    pub fn minus(&self, other: &Value) -> ModelResult<Value> {
        self.combine(other, &Quantity::minus)
    }

    pub fn mul(&self, other: &Value) -> ModelResult<Value> {
        self.combine(other, &Quantity::mul)
    }

    pub fn div(&self, other: &Value) -> ModelResult<Value> {
        self.combine(other, &Quantity::div)
    }

    pub fn scale(&self, factor: Fixed128) -> ModelResult<Value> {
        match self {
            Value::Quantity(q) => Ok(Value::Quantity(q.scale(factor)?)),
            Value::Vector(v) => Ok(Value::Vector(v.map(|item| item.scale(factor))?)),
            _ => Err(self.not_numeric()),
        }
    }

    /// Order two values. Numbers need identical units; booleans order
    /// `false < true`; text orders lexically.
    pub fn compare(&self, other: &Value) -> ModelResult<Ordering> {
        match (self, other) {
            (Value::Quantity(a), Value::Quantity(b)) => a.compare(b),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            _ => Err(ModelError::InvalidValue {
                primitive: String::new(),
                expected: "two comparable values of the same kind",
            }),
        }
    }

    /// Component-wise arithmetic with scalar broadcasting over vectors.
    fn combine(
        &self,
        other: &Value,
        op: &dyn Fn(&Quantity, &Quantity) -> ModelResult<Quantity>,
    ) -> ModelResult<Value> {
        match (self, other) {
            (Value::Quantity(a), Value::Quantity(b)) => Ok(Value::Quantity(op(a, b)?)),
            (Value::Vector(a), Value::Vector(b)) => Ok(Value::Vector(a.zip(b, |x, y| x.combine(y, op))?)),
            (Value::Vector(a), Value::Quantity(_)) => {
                Ok(Value::Vector(a.map(|x| x.combine(other, op))?))
            }
            (Value::Quantity(_), Value::Vector(b)) => {
                Ok(Value::Vector(b.map(|y| self.combine(y, op))?))
            }
            (Value::Quantity(_) | Value::Vector(_), _) => Err(other.not_numeric()),
            _ => Err(self.not_numeric()),
        }
    }

    fn not_numeric(&self) -> ModelError {
        ModelError::InvalidValue {
            primitive: String::new(),
            expected: "a number or a vector of numbers",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Quantity(q) => write!(f, "{q}"),
            Value::Vector(v) => {
                f.write_str("{")?;
                for (i, (k, item)) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {item}")?;
                }
                f.write_str("}")
            }
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Entity(e) => write!(f, "{e:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// Failure of an [`Amount`] operation. Callers attach primitive names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AmountError {
    Keys,
    Overflow,
}

/// Quantity held by a stock or moved by a flow, in the stock's unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Amount {
    Scalar(Fixed128),
    Vector(Vec<(String, Fixed128)>),
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Scalar(Fixed128::ZERO)
    }
}

impl Amount {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Zero with the same shape as `self`.
    pub fn zero_like(&self) -> Amount {
        match self {
            Amount::Scalar(_) => Amount::zero(),
            Amount::Vector(entries) => Amount::Vector(
                entries.iter().map(|(k, _)| (k.clone(), Fixed128::ZERO)).collect(),
            ),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.components().all(|c| c == Fixed128::ZERO)
    }

    pub fn has_negative(&self) -> bool {
        self.components().any(|c| c < Fixed128::ZERO)
    }

    pub fn components(&self) -> impl Iterator<Item = Fixed128> + '_ {
        let (scalar, entries) = match self {
            Amount::Scalar(v) => (Some(*v), &[][..]),
            Amount::Vector(entries) => (None, entries.as_slice()),
        };
        scalar.into_iter().chain(entries.iter().map(|(_, v)| *v))
    }

    /// Sum over all components (saturating). Used for reporting only.
    pub fn total(&self) -> Fixed128 {
        self.components().fold(Fixed128::ZERO, |acc, c| acc.saturating_add(c))
    }

    /// Keys of a vector amount, `None` for scalars.
    pub fn keys(&self) -> Option<Vec<&str>> {
        match self {
            Amount::Scalar(_) => None,
            Amount::Vector(entries) => Some(entries.iter().map(|(k, _)| k.as_str()).collect()),
        }
    }

    /// Read an amount out of an evaluated value: numbers, booleans (0/1) and
    /// vectors of those.
    pub fn from_value(value: &Value) -> Option<Amount> {
        match value {
            Value::Quantity(q) => Some(Amount::Scalar(q.magnitude)),
            Value::Boolean(b) => Some(Amount::Scalar(if *b { Fixed128::from_num(1) } else { Fixed128::ZERO })),
            Value::Vector(v) => {
                let mut entries = Vec::with_capacity(v.len());
                for (k, item) in v.iter() {
                    match Amount::from_value(item)? {
                        Amount::Scalar(c) => entries.push((k.to_string(), c)),
                        Amount::Vector(_) => return None,
                    }
                }
                Some(Amount::Vector(entries))
            }
            Value::Text(_) | Value::Entity(_) => None,
        }
    }

    pub fn to_value(&self, unit: &Unit) -> Value {
        match self {
            Amount::Scalar(v) => Value::quantity(*v, unit.clone()),
            Amount::Vector(entries) => Value::Vector(Vector::new(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::quantity(*v, unit.clone()))),
            )),
        }
    }

    pub(crate) fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.zip_with(other, |a, b| a.checked_add(b))
    }

    pub(crate) fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.zip_with(other, |a, b| a.checked_sub(b))
    }

    pub(crate) fn checked_scale(&self, factor: Fixed128) -> Result<Amount, AmountError> {
        self.map(|c| c.checked_mul(factor))
    }

    pub(crate) fn checked_div(&self, divisor: Fixed128) -> Result<Amount, AmountError> {
        self.map(|c| c.checked_div(divisor))
    }

    pub fn clamp_non_negative(&self) -> Amount {
        match self {
            Amount::Scalar(v) => Amount::Scalar((*v).max(Fixed128::ZERO)),
            Amount::Vector(entries) => Amount::Vector(
                entries.iter().map(|(k, v)| (k.clone(), (*v).max(Fixed128::ZERO))).collect(),
            ),
        }
    }

    /// Reduce positive components so none exceeds what `available` holds.
    pub(crate) fn limit_drain(&self, available: &Amount) -> Result<Amount, AmountError> {
        self.zip_with(available, |q, a| {
            Some(if q > Fixed128::ZERO { q.min(a.max(Fixed128::ZERO)) } else { q })
        })
    }

    /// Reduce negative components (reverse transfers) so none exceeds what
    /// `available` holds.
    pub(crate) fn limit_reverse(&self, available: &Amount) -> Result<Amount, AmountError> {
        self.zip_with(available, |q, a| {
            Some(if q < Fixed128::ZERO { q.max(-a.max(Fixed128::ZERO)) } else { q })
        })
    }

    fn map(&self, f: impl Fn(Fixed128) -> Option<Fixed128>) -> Result<Amount, AmountError> {
        match self {
            Amount::Scalar(v) => f(*v).map(Amount::Scalar).ok_or(AmountError::Overflow),
            Amount::Vector(entries) => entries
                .iter()
                .map(|(k, v)| f(*v).map(|c| (k.clone(), c)).ok_or(AmountError::Overflow))
                .collect::<Result<Vec<_>, _>>()
                .map(Amount::Vector),
        }
    }

    /// Component-wise combination. Scalars broadcast over vectors; two
    /// vectors must have identical keys in identical order.
    fn zip_with(
        &self,
        other: &Amount,
        f: impl Fn(Fixed128, Fixed128) -> Option<Fixed128>,
    ) -> Result<Amount, AmountError> {
        match (self, other) {
            (Amount::Scalar(a), Amount::Scalar(b)) => {
                f(*a, *b).map(Amount::Scalar).ok_or(AmountError::Overflow)
            }
            (Amount::Vector(_), Amount::Scalar(b)) => self.map(|x| f(x, *b)),
            (Amount::Scalar(a), Amount::Vector(_)) => other.map(|y| f(*a, y)),
            (Amount::Vector(a), Amount::Vector(b)) => {
                if a.len() != b.len() || a.iter().zip(b).any(|((ka, _), (kb, _))| ka != kb) {
                    return Err(AmountError::Keys);
                }
                a.iter()
                    .zip(b)
                    .map(|((k, x), (_, y))| f(*x, *y).map(|c| (k.clone(), c)).ok_or(AmountError::Overflow))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Amount::Vector)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixed;

    fn widgets(v: f64) -> Value {
        Value::quantity(fixed(v), Unit::of("widgets"))
    }

    #[test]
    fn plus_requires_matching_units() {
        let sum = widgets(2.0).plus(&widgets(3.0)).unwrap();
        assert_eq!(sum, widgets(5.0));

        let err = widgets(2.0)
            .plus(&Value::quantity(fixed(1.0), Unit::of("people")))
            .unwrap_err();
        assert_eq!(err.code(), 3004);
        assert!(err.to_string().contains("widgets") && err.to_string().contains("people"));
    }

    #[test]
    fn scalar_broadcasts_over_vector() {
        let v = Value::Vector(Vector::new([("north", widgets(1.0)), ("south", widgets(2.0))]));
        let out = v.plus(&widgets(10.0)).unwrap();
        let Value::Vector(out) = out else { panic!("expected vector") };
        assert_eq!(out.get("south"), Some(&widgets(12.0)));
    }

    #[test]
    fn vectors_with_different_keys_do_not_combine() {
        let a = Value::Vector(Vector::new([("a", widgets(1.0))]));
        let b = Value::Vector(Vector::new([("b", widgets(1.0))]));
        assert_eq!(a.minus(&b).unwrap_err().code(), 3005);
    }

    #[test]
    fn division_by_zero_is_typed() {
        let err = widgets(1.0).div(&Value::number(Fixed128::ZERO)).unwrap_err();
        assert_eq!(err.code(), 3002);
        let ratio = widgets(6.0).div(&widgets(3.0)).unwrap();
        assert_eq!(ratio, Value::number(fixed(2.0)));
    }

    #[test]
    fn rate_converts_between_time_units() {
        let monthly = Quantity::new(fixed(2.0), Unit::of("widgets").per(TimeUnit::Months));
        let yearly = monthly.per_time(TimeUnit::Years).unwrap();
        assert_eq!(yearly.magnitude, fixed(24.0));
        assert_eq!(yearly.unit.to_string(), "widgets/years");
    }

    #[test]
    fn text_and_booleans_are_not_numeric() {
        assert_eq!(Value::Text("x".into()).plus(&widgets(1.0)).unwrap_err().code(), 5002);
        assert_eq!(
            Value::Boolean(false).compare(&Value::Boolean(true)).unwrap(),
            Ordering::Less
        );
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
    }

    #[test]
    fn amount_from_boolean_value() {
        assert_eq!(Amount::from_value(&Value::Boolean(true)), Some(Amount::Scalar(Fixed128::from_num(1))));
        assert_eq!(Amount::from_value(&Value::Text("no".into())), None);
    }

    #[test]
    fn amount_limits_component_wise() {
        let q = Amount::Vector(vec![("a".into(), fixed(5.0)), ("b".into(), fixed(-3.0))]);
        let avail = Amount::Vector(vec![("a".into(), fixed(2.0)), ("b".into(), fixed(1.0))]);
        let drained = q.limit_drain(&avail).unwrap();
        assert_eq!(drained, Amount::Vector(vec![("a".into(), fixed(2.0)), ("b".into(), fixed(-3.0))]));
        let reversed = q.limit_reverse(&avail).unwrap();
        assert_eq!(reversed, Amount::Vector(vec![("a".into(), fixed(5.0)), ("b".into(), fixed(-1.0))]));
    }

    #[test]
    fn amount_key_mismatch() {
        let a = Amount::Vector(vec![("a".into(), fixed(1.0))]);
        let b = Amount::Vector(vec![("b".into(), fixed(1.0))]);
        assert_eq!(a.checked_add(&b), Err(AmountError::Keys));
        assert_eq!(Amount::Scalar(Fixed128::MAX).checked_add(&Amount::Scalar(Fixed128::from_num(1))), Err(AmountError::Overflow));
    }
}
