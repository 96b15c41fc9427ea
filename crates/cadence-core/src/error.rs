//! Typed model errors.
//!
//! Every failure the kernel can raise is a [`ModelError`]. Each variant maps
//! to a stable numeric [`code`](ModelError::code) that hosts can match on,
//! and most carry the name of the primitive that caused the failure.
//!
//! | Range | Category                                   |
//! |-------|--------------------------------------------|
//! | 1xxx  | scheduling and model integrity             |
//! | 2xxx  | conservation (units, vectors, constraints) |
//! | 3xxx  | numerical                                  |
//! | 4xxx  | circular evaluation                        |
//! | 5xxx  | evaluation                                 |
//!
//! Nothing in the kernel is retried: any error unwinds the current run, and
//! a failed simulation keeps returning the error that stopped it.

/// Errors raised while building or running a model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    // -- Scheduling / integrity --
    #[error("invalid task time: {detail}")]
    InvalidTaskTime { detail: String },

    #[error("unknown solution algorithm '{name}'")]
    UnknownAlgorithm { name: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("unknown primitive '{name}'")]
    UnknownPrimitive { name: String },

    // -- Conservation --
    #[error("incompatible units between flow '{flow}' ({flow_unit}) and stock '{stock}' ({stock_unit})")]
    IncompatibleUnits {
        flow: String,
        stock: String,
        flow_unit: String,
        stock_unit: String,
    },

    #[error("vector keys of flow '{flow}' do not match stock '{stock}'")]
    VectorKeysMismatch { flow: String, stock: String },

    #[error("flow '{flow}' drove non-negative stock '{stock}' below zero")]
    InconsistentNonNegative { flow: String, stock: String },

    // -- Numerical --
    #[error("stock '{stock}' overflowed")]
    StockOverflow { stock: String },

    #[error("division by zero in '{primitive}'")]
    DivisionByZero { primitive: String },

    #[error("arithmetic overflow in '{primitive}'")]
    Overflow { primitive: String },

    #[error("incompatible units: {left} and {right}")]
    UnitMismatch { left: String, right: String },

    #[error("vector keys do not match: [{left}] and [{right}]")]
    VectorShape { left: String, right: String },

    // -- Circular evaluation --
    #[error("circular equation: {}", cycle.join(" -> "))]
    CircularEvaluation { cycle: Vec<String> },

    // -- Evaluation --
    #[error("error evaluating '{primitive}': {message}")]
    Evaluation { primitive: String, message: String },

    #[error("'{primitive}' must evaluate to {expected}")]
    InvalidValue {
        primitive: String,
        expected: &'static str,
    },
}

impl ModelError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            ModelError::InvalidTaskTime { .. } => 1001,
            ModelError::UnknownAlgorithm { .. } => 1002,
            ModelError::InvalidConfig { .. } => 1003,
            ModelError::UnknownPrimitive { .. } => 1004,
            ModelError::IncompatibleUnits { .. } => 2001,
            ModelError::VectorKeysMismatch { .. } => 2002,
            ModelError::InconsistentNonNegative { .. } => 2003,
            ModelError::StockOverflow { .. } => 3001,
            ModelError::DivisionByZero { .. } => 3002,
            ModelError::Overflow { .. } => 3003,
            ModelError::UnitMismatch { .. } => 3004,
            ModelError::VectorShape { .. } => 3005,
            ModelError::CircularEvaluation { .. } => 4001,
            ModelError::Evaluation { .. } => 5001,
            ModelError::InvalidValue { .. } => 5002,
        }
    }

    /// Name of the offending primitive, when the error identifies one.
    ///
    /// Conservation errors name the flow; the stock is in the message.
    pub fn primitive(&self) -> Option<&str> {
        match self {
            ModelError::UnknownPrimitive { name } => Some(name),
            ModelError::IncompatibleUnits { flow, .. }
            | ModelError::VectorKeysMismatch { flow, .. }
            | ModelError::InconsistentNonNegative { flow, .. } => Some(flow),
            ModelError::StockOverflow { stock } => Some(stock),
            ModelError::DivisionByZero { primitive }
            | ModelError::Overflow { primitive }
            | ModelError::Evaluation { primitive, .. }
            | ModelError::InvalidValue { primitive, .. } => Some(primitive),
            ModelError::CircularEvaluation { cycle } => cycle.first().map(String::as_str),
            _ => None,
        }
    }

    /// Attach a primitive name to errors raised by value arithmetic, which
    /// does not know which entity it is operating on.
    pub(crate) fn within(self, name: &str) -> ModelError {
        match self {
            ModelError::Overflow { primitive } if primitive.is_empty() => ModelError::Overflow {
                primitive: name.to_string(),
            },
            ModelError::DivisionByZero { primitive } if primitive.is_empty() => {
                ModelError::DivisionByZero {
                    primitive: name.to_string(),
                }
            }
            ModelError::InvalidValue { primitive, expected } if primitive.is_empty() => {
                ModelError::InvalidValue {
                    primitive: name.to_string(),
                    expected,
                }
            }
            other => other,
        }
    }
}

/// Shorthand result type used throughout the kernel.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        let err = ModelError::IncompatibleUnits {
            flow: "hiring".into(),
            stock: "staff".into(),
            flow_unit: "widgets".into(),
            stock_unit: "people".into(),
        };
        assert_eq!(err.code() / 1000, 2);
        assert_eq!(err.primitive(), Some("hiring"));
        let msg = err.to_string();
        assert!(msg.contains("hiring") && msg.contains("staff"));
    }

    #[test]
    fn circular_message_lists_cycle() {
        let err = ModelError::CircularEvaluation {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular equation: a -> b -> a");
        assert_eq!(err.code(), 4001);
    }

    #[test]
    fn within_fills_anonymous_arithmetic_errors() {
        let err = ModelError::Overflow {
            primitive: String::new(),
        }
        .within("population");
        assert_eq!(err.primitive(), Some("population"));

        let named = ModelError::DivisionByZero {
            primitive: "ratio".into(),
        }
        .within("population");
        assert_eq!(named.primitive(), Some("ratio"));
    }
}
