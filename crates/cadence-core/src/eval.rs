//! The seam between the kernel and an external expression engine.
//!
//! The kernel never parses equations. Each primitive carries an opaque
//! [`EquationId`]; an [`Evaluator`] turns it into a [`Value`] given a
//! [`Scope`] through which the equation reads (and, for trigger actions,
//! writes) model state.
//!
//! Reading a variable through the scope evaluates it lazily and caches the
//! result for the current stage. The [`EvaluationStack`] records what is
//! currently being evaluated so that self-dependent equations fail with the
//! full cycle instead of recursing forever.

use crate::clock::SimTime;
use crate::error::{ModelError, ModelResult};
use crate::id::{EntityRef, EquationId};
use crate::value::Value;

/// Evaluates compiled equations. Must be deterministic for identical scope.
pub trait Evaluator {
    fn evaluate(&self, equation: EquationId, scope: &mut dyn Scope) -> ModelResult<Value>;
}

/// Model state visible to an equation.
pub trait Scope {
    /// Current simulation time.
    fn time(&self) -> SimTime;

    /// Step of the solver evaluating the equation.
    fn time_step(&self) -> SimTime;

    /// Current value of an entity, evaluating it first if needed.
    fn value(&mut self, entity: EntityRef) -> ModelResult<Value>;

    /// Overwrite an entity's value. Stocks take the new level; variables
    /// take the value until the next cache reset.
    fn set_value(&mut self, entity: EntityRef, value: Value) -> ModelResult<()>;

    /// Values recorded for an entity so far, oldest first.
    fn past_values(&self, entity: EntityRef) -> &[Value];

    /// Resolve a primitive by name.
    fn lookup(&self, name: &str) -> Option<EntityRef>;
}

/// Entities currently being evaluated, innermost last.
#[derive(Debug, Default, Clone)]
pub struct EvaluationStack {
    frames: Vec<(EntityRef, String)>,
}

impl EvaluationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `entity`. Fails with the full cycle if it is already being
    /// evaluated.
    pub fn enter(&mut self, entity: EntityRef, name: &str) -> ModelResult<()> {
        if let Some(start) = self.frames.iter().position(|(e, _)| *e == entity) {
            let mut cycle: Vec<String> = self.frames[start..].iter().map(|(_, n)| n.clone()).collect();
            cycle.push(name.to_string());
            return Err(ModelError::CircularEvaluation { cycle });
        }
        self.frames.push((entity, name.to_string()));
        Ok(())
    }

    pub fn leave(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
