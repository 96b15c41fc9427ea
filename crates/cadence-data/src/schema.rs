//! Serde data file structs for model definitions.
//!
//! A model file holds the run configuration, optional sub-solvers and the
//! primitives. Equations are written as linear expressions over other
//! primitives; the loader compiles them into a
//! [`LinearEvaluator`](crate::linear::LinearEvaluator).

use cadence_core::config::{SimConfig, SolverConfig};
use rust_decimal::Decimal;
use serde::Deserialize;

// ===========================================================================
// Model file
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ModelData {
    pub config: SimConfig,
    #[serde(default)]
    pub solvers: Vec<SolverData>,
    #[serde(default)]
    pub stocks: Vec<StockData>,
    #[serde(default)]
    pub flows: Vec<FlowData>,
    #[serde(default)]
    pub variables: Vec<VariableData>,
    #[serde(default)]
    pub triggers: Vec<TriggerData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverData {
    pub name: String,
    #[serde(flatten)]
    pub config: SolverConfig,
}

// ===========================================================================
// Primitives
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StockData {
    pub name: String,
    pub initial: ExprData,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub non_negative: bool,
    /// Conveyor delay in model time units.
    #[serde(default)]
    pub delay: Option<Decimal>,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub display: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowData {
    pub name: String,
    pub rate: ExprData,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub non_negative: bool,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub display: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariableData {
    pub name: String,
    pub value: ExprData,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub display: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerData {
    pub name: String,
    pub when: TriggerWhen,
    pub action: ActionData,
    #[serde(default)]
    pub solver: Option<String>,
}

// ===========================================================================
// Equations
// ===========================================================================

/// `constant + Σ coefficient × [primitive]`.
///
/// Written either as a bare number or as a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExprData {
    Constant(f64),
    Linear {
        #[serde(default)]
        constant: f64,
        #[serde(default)]
        terms: Vec<(String, f64)>,
    },
}

/// When a trigger fires.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerWhen {
    /// The expression rises above `threshold`.
    Above { expr: ExprData, threshold: f64 },
    /// The expression falls below `threshold`.
    Below { expr: ExprData, threshold: f64 },
    /// Per-step probability.
    Chance { probability: ExprData },
    /// After `after` model time units, repeating if set.
    Timeout {
        after: Decimal,
        #[serde(default)]
        repeat: bool,
    },
}

/// Trigger action: set `target` to `value`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionData {
    pub target: String,
    pub value: ExprData,
}
