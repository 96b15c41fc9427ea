//! Solvers: per time-step integration domains.
//!
//! A solver owns a partition of the model (its stocks, flows, variables and
//! triggers) and drives it through time by scheduling tasks on the shared
//! queue. Two drivers exist:
//!
//! | Algorithm | Module     | Tasks per step                          |
//! |-----------|------------|-----------------------------------------|
//! | Euler     | [`euler`]  | one step task at `start + index * h`    |
//! | RK4       | [`rk4`]    | init, stage 1, mid (x2), stage 4        |
//!
//! Material is moved between time points by the solver's time-change
//! subscriber (see [`crate::conservation`]), never by the step tasks
//! themselves.
//!
//! # Priorities
//!
//! Within one time point tasks run in this order:
//!
//! | Priority | Task                         |
//! |----------|------------------------------|
//! | -50      | conveyor arrival             |
//! | -30      | RK4 stage 4                  |
//! | -10      | RK4 init, RK4 stages 2 and 3 |
//! | -5       | RK4 stage 1                  |
//! | 0        | Euler step                   |
//! | 10       | trigger fire                 |
//! | max      | pause                        |

pub mod euler;
pub mod rk4;

use rust_decimal::prelude::ToPrimitive;

use crate::clock::SimTime;
use crate::config::Algorithm;
use crate::conservation::Applied;
use crate::error::{ModelError, ModelResult};
use crate::id::{BlockerId, EntityRef, FlowId, StockId, TriggerId, VariableId};
use crate::rng::SimRng;

pub const ARRIVAL_PRIORITY: i32 = -50;
pub const RK4_STAGE4_PRIORITY: i32 = -30;
pub const RK4_INIT_PRIORITY: i32 = -10;
pub const RK4_MID_PRIORITY: i32 = -10;
pub const RK4_STAGE1_PRIORITY: i32 = -5;
pub const EULER_PRIORITY: i32 = 0;
pub const TRIGGER_PRIORITY: i32 = 10;
pub const PAUSE_PRIORITY: i32 = i32::MAX;

/// Blockers gating the RK4 tasks of one solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rk4Gates {
    pub init: BlockerId,
    pub start: BlockerId,
    pub mid: BlockerId,
}

/// One integration domain.
#[derive(Debug, Clone)]
pub struct Solver {
    pub(crate) name: String,
    pub(crate) algorithm: Algorithm,
    /// Step as configured.
    pub(crate) user_step: SimTime,
    /// Distance between consecutive indices; half the user step for RK4.
    pub(crate) step: SimTime,
    pub(crate) rk_position: u8,
    pub(crate) index: u64,
    pub(crate) max_index: u64,
    pub(crate) stocks: Vec<StockId>,
    pub(crate) flows: Vec<FlowId>,
    pub(crate) variables: Vec<VariableId>,
    pub(crate) triggers: Vec<TriggerId>,
    pub(crate) displayed: Vec<EntityRef>,
    /// Material has been moved for every interval up to this time.
    pub(crate) applied_through: SimTime,
    pub(crate) journal: Vec<Applied>,
    /// Undone intervals to reapply, earliest last.
    pub(crate) redo: Vec<Applied>,
    pub(crate) recorded_through: Option<u64>,
    /// Frames up to this index have reached the sink.
    pub(crate) flushed_through: Option<u64>,
    /// Start of an RK4 step whose look-ahead is still running.
    pub(crate) open_since: Option<SimTime>,
    pub(crate) rng: SimRng,
    pub(crate) gates: Option<Rk4Gates>,
}

impl Solver {
    pub(crate) fn new(name: String, algorithm: Algorithm, user_step: SimTime) -> Self {
        let step = match algorithm {
            Algorithm::Euler => user_step,
            Algorithm::Rk4 => user_step.halved(),
        };
        Self {
            name,
            algorithm,
            user_step,
            step,
            rk_position: 1,
            index: 0,
            max_index: 0,
            stocks: Vec::new(),
            flows: Vec::new(),
            variables: Vec::new(),
            triggers: Vec::new(),
            displayed: Vec::new(),
            applied_through: SimTime::zero(user_step.unit()),
            journal: Vec::new(),
            redo: Vec::new(),
            recorded_through: None,
            flushed_through: None,
            open_since: None,
            rng: SimRng::new(0),
            gates: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn time_step(&self) -> SimTime {
        self.user_step
    }

    pub fn internal_step(&self) -> SimTime {
        self.step
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn max_index(&self) -> u64 {
        self.max_index
    }

    pub fn rk_position(&self) -> u8 {
        self.rk_position
    }

    pub fn stocks(&self) -> &[StockId] {
        &self.stocks
    }

    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    pub fn variables(&self) -> &[VariableId] {
        &self.variables
    }

    pub fn triggers(&self) -> &[TriggerId] {
        &self.triggers
    }

    pub fn displayed(&self) -> &[EntityRef] {
        &self.displayed
    }

    pub fn applied_through(&self) -> SimTime {
        self.applied_through
    }

    /// Index of the last frame recorded, if any.
    pub fn recorded_through(&self) -> Option<u64> {
        self.recorded_through
    }

    /// Entities evaluated and recorded at every step: stocks, flows, then
    /// variables.
    pub(crate) fn valued(&self) -> Vec<EntityRef> {
        self.stocks
            .iter()
            .map(|&s| EntityRef::Stock(s))
            .chain(self.flows.iter().map(|&f| EntityRef::Flow(f)))
            .chain(self.variables.iter().map(|&v| EntityRef::Variable(v)))
            .collect()
    }

    /// Time of step `index`, computed by multiplication so it never drifts.
    pub(crate) fn time_of(&self, start: SimTime, index: u64) -> SimTime {
        start + self.step.times(index)
    }

    /// Reset the stepping state for a run of `length` starting at `start`.
    pub(crate) fn plan(&mut self, start: SimTime, length: SimTime, rng: SimRng) -> ModelResult<()> {
        let steps = length
            .ratio(&self.user_step)?
            .floor()
            .to_u64()
            .ok_or_else(|| ModelError::InvalidConfig {
                reason: format!("solver '{}' has too many steps", self.name),
            })?;
        self.max_index = match self.algorithm {
            Algorithm::Euler => steps,
            Algorithm::Rk4 => steps.saturating_mul(2),
        };
        self.index = 0;
        self.rk_position = 1;
        self.applied_through = start;
        self.journal.clear();
        self.redo.clear();
        self.recorded_through = None;
        self.flushed_through = None;
        self.open_since = None;
        self.rng = rng;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeUnit;
    use rust_decimal::Decimal;

    #[test]
    fn rk4_halves_its_internal_step() {
        let step = SimTime::new(Decimal::new(5, 1), TimeUnit::Days);
        let mut s = Solver::new("pop".into(), Algorithm::Rk4, step);
        assert_eq!(s.internal_step(), SimTime::new(Decimal::new(25, 2), TimeUnit::Days));
        s.plan(SimTime::zero(TimeUnit::Days), SimTime::from_int(3, TimeUnit::Days), SimRng::new(1))
            .unwrap();
        assert_eq!(s.max_index(), 12);
        assert_eq!(
            s.time_of(SimTime::zero(TimeUnit::Days), 4),
            SimTime::from_int(1, TimeUnit::Days)
        );
    }

    #[test]
    fn euler_counts_whole_steps() {
        let mut s = Solver::new("root".into(), Algorithm::Euler, SimTime::from_int(3, TimeUnit::Years));
        s.plan(SimTime::zero(TimeUnit::Years), SimTime::from_int(10, TimeUnit::Years), SimRng::new(1))
            .unwrap();
        assert_eq!(s.max_index(), 3);
    }
}
