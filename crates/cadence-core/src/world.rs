//! Mutable simulation state shared by every task.
//!
//! [`World`] is the queue's action context: the model, the evaluator, the
//! result sink and the flow cluster order. Equations see it through a
//! [`WorldScope`], which evaluates flows and variables lazily, caches the
//! results for the current stage and guards against circular equations.
//!
//! Snapshots are taken per solver. A [`StockState`] holds stock levels (with
//! their conveyor backlog) and how far material has been moved; a
//! [`SolverSnapshot`] adds everything an Euler step changes so that rolling
//! it back and replaying it reproduces the same result.
//!
//! Frames are buffered until no look-ahead can roll them back. A frame at or
//! after the start of an open RK4 step may still be withdrawn, so
//! [`World::flush_frames`] only hands earlier ones to the sink.

use crate::clock::{SimTime, TimeUnit};
use crate::cluster::ClusterOrder;
use crate::error::{ModelError, ModelResult};
use crate::eval::{EvaluationStack, Evaluator, Scope};
use crate::flow::Flow;
use crate::id::{EntityRef, EquationId, FlowId, SolverId, StockId, TaskId, TriggerId, VariableId};
use crate::model::Model;
use crate::rng::SimRng;
use crate::sink::{Frame, ResultSink};
use crate::stock::StockSnapshot;
use crate::value::{Amount, Unit, Value};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Stock levels of one solver and the time material was moved up to.
#[derive(Debug, Clone, PartialEq)]
pub struct StockState {
    solver: SolverId,
    applied_through: SimTime,
    stocks: Vec<(StockId, StockSnapshot)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TriggerState {
    pending: Option<TaskId>,
    fired: u32,
}

/// Everything an Euler step mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSnapshot {
    stocks: StockState,
    index: u64,
    recorded_through: Option<u64>,
    rng: SimRng,
    histories: Vec<(EntityRef, usize)>,
    triggers: Vec<(TriggerId, TriggerState)>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Context passed to every task and time-change subscriber.
pub struct World {
    pub(crate) model: Model,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) sink: Option<Box<dyn ResultSink>>,
    pub(crate) frames: Vec<(SolverId, Frame)>,
    pub(crate) clusters: ClusterOrder,
    pub(crate) stack: EvaluationStack,
    pub(crate) paused: bool,
}

impl World {
    pub(crate) fn new(model: Model, evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            model,
            evaluator,
            sink: None,
            frames: Vec::new(),
            clusters: ClusterOrder::default(),
            stack: EvaluationStack::new(),
            paused: false,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn clusters(&self) -> &ClusterOrder {
        &self.clusters
    }

    pub(crate) fn time_unit(&self) -> TimeUnit {
        self.model.time_unit()
    }

    /// Scope for evaluating equations of `solver` at `time`.
    pub(crate) fn scope(&mut self, solver: SolverId, time: SimTime) -> WorldScope<'_> {
        WorldScope {
            model: &mut self.model,
            evaluator: self.evaluator.as_ref(),
            stack: &mut self.stack,
            time,
            solver,
        }
    }

    // -- Stage caches --

    /// Drop every cached variable value of `solver`.
    pub(crate) fn clear_variables(&mut self, solver: SolverId) -> ModelResult<()> {
        let ids = self.model.solver(solver)?.variables.clone();
        for id in ids {
            self.model.variable_mut(id)?.cache = None;
        }
        Ok(())
    }

    /// Start a new step: clear variable caches and every flow's stage rates.
    pub(crate) fn fresh_start(&mut self, solver: SolverId) -> ModelResult<()> {
        self.clear_variables(solver)?;
        let ids = self.model.solver(solver)?.flows.clone();
        for id in ids {
            self.model.flow_mut(id)?.reset_stages();
        }
        self.model.solver_mut(solver)?.redo.clear();
        Ok(())
    }

    /// Null the current stage rate of every flow of `solver`.
    pub(crate) fn clear_rates(&mut self, solver: SolverId) -> ModelResult<()> {
        let ids = self.model.solver(solver)?.flows.clone();
        for id in ids {
            self.model.flow_mut(id)?.clear_rate();
        }
        self.model.solver_mut(solver)?.redo.clear();
        Ok(())
    }

    pub(crate) fn blend(&mut self, solver: SolverId) -> ModelResult<()> {
        let ids = self.model.solver(solver)?.flows.clone();
        for id in ids {
            self.model.flow_mut(id)?.blend()?;
        }
        self.model.solver_mut(solver)?.redo.clear();
        Ok(())
    }

    // -- Evaluation --

    /// Evaluate every valued entity of `solver`. Cached values are kept.
    pub(crate) fn evaluate_solver(&mut self, solver: SolverId, time: SimTime) -> ModelResult<Vec<(EntityRef, Value)>> {
        let entities = self.model.solver(solver)?.valued();
        self.stack.clear();
        let mut scope = self.scope(solver, time);
        let mut values = Vec::with_capacity(entities.len());
        for entity in entities {
            values.push((entity, scope.value(entity)?));
        }
        Ok(values)
    }

    /// Evaluate only the flows of `solver`.
    pub(crate) fn predict_flows(&mut self, solver: SolverId, time: SimTime) -> ModelResult<()> {
        let flows = self.model.solver(solver)?.flows.clone();
        self.stack.clear();
        let mut scope = self.scope(solver, time);
        for id in flows {
            scope.value(EntityRef::Flow(id))?;
        }
        Ok(())
    }

    /// Initialize every stock that is not ready yet.
    pub(crate) fn initialize_stocks(&mut self, time: SimTime) -> ModelResult<()> {
        let ids: Vec<(StockId, SolverId)> = self.model.stocks.iter().map(|(id, s)| (id, s.solver)).collect();
        for (id, solver) in ids {
            self.stack.clear();
            self.scope(solver, time).value(EntityRef::Stock(id))?;
        }
        Ok(())
    }

    // -- Recording --

    /// Push evaluated values onto the entities' histories.
    pub(crate) fn push_history(&mut self, values: &[(EntityRef, Value)]) {
        for (entity, value) in values {
            if let Some(history) = self.model.history_mut(*entity) {
                history.push(value.clone());
            }
        }
    }

    pub(crate) fn history_lengths(&self, solver: SolverId) -> ModelResult<Vec<(EntityRef, usize)>> {
        Ok(self
            .model
            .solver(solver)?
            .valued()
            .into_iter()
            .map(|e| (e, self.model.history(e).len()))
            .collect())
    }

    pub(crate) fn truncate_history(&mut self, lengths: &[(EntityRef, usize)]) {
        for &(entity, len) in lengths {
            if let Some(history) = self.model.history_mut(entity) {
                history.truncate(len);
            }
        }
    }

    /// Buffer a frame of the displayed entities, unless this solver index
    /// has been recorded already.
    pub(crate) fn emit_frame(&mut self, solver: SolverId, time: SimTime, values: &[(EntityRef, Value)]) -> ModelResult<()> {
        let s = self.model.solver_mut(solver)?;
        if s.recorded_through.is_some_and(|r| r >= s.index) {
            return Ok(());
        }
        s.recorded_through = Some(s.index);
        if self.sink.is_none() {
            return Ok(());
        }
        let (name, index, displayed) = (s.name.clone(), s.index, s.displayed.clone());
        let values = displayed
            .iter()
            .filter_map(|d| {
                values
                    .iter()
                    .find(|(e, _)| e == d)
                    .map(|(e, v)| (self.model.name_of(*e).to_string(), v.clone()))
            })
            .collect();
        self.frames.push((
            solver,
            Frame {
                solver: name,
                index,
                time,
                values,
            },
        ));
        Ok(())
    }

    /// Drop buffered frames of `solver` recorded after `kept`.
    fn withdraw_frames(&mut self, solver: SolverId, kept: Option<u64>) {
        self.frames
            .retain(|(id, frame)| *id != solver || kept.is_some_and(|k| frame.index <= k));
    }

    /// Hand settled frames to the sink in the order they were recorded.
    /// With `complete` every buffered frame is settled.
    pub(crate) fn flush_frames(&mut self, complete: bool) {
        let horizon = if complete {
            None
        } else {
            self.model.solvers.values().filter_map(|s| s.open_since).min()
        };
        let Some(sink) = self.sink.as_mut() else {
            self.frames.clear();
            return;
        };
        let mut held = Vec::new();
        for (id, frame) in self.frames.drain(..) {
            if horizon.is_some_and(|h| frame.time >= h) {
                held.push((id, frame));
                continue;
            }
            // A frame replayed after a manual step back was delivered already.
            let Some(s) = self.model.solvers.get_mut(id) else {
                continue;
            };
            if s.flushed_through.is_some_and(|f| f >= frame.index) {
                continue;
            }
            s.flushed_through = Some(frame.index);
            sink.record(&frame);
        }
        self.frames = held;
    }

    // -- Snapshots --

    pub(crate) fn snapshot_stocks(&self, solver: SolverId) -> ModelResult<StockState> {
        let s = self.model.solver(solver)?;
        let mut stocks = Vec::with_capacity(s.stocks.len());
        for &id in &s.stocks {
            stocks.push((id, self.model.stock(id)?.snapshot()));
        }
        Ok(StockState {
            solver,
            applied_through: s.applied_through,
            stocks,
        })
    }

    /// Restore stock levels. Returns the conveyor arrival tasks posted since
    /// the snapshot, which the caller removes from the queue.
    pub(crate) fn restore_stocks(&mut self, state: &StockState) -> ModelResult<Vec<TaskId>> {
        let mut stale = Vec::new();
        for (id, snapshot) in &state.stocks {
            stale.extend(self.model.stock_mut(*id)?.restore(snapshot));
        }
        self.model.solver_mut(state.solver)?.applied_through = state.applied_through;
        Ok(stale)
    }

    pub(crate) fn snapshot_solver(&self, solver: SolverId) -> ModelResult<SolverSnapshot> {
        let s = self.model.solver(solver)?;
        let mut triggers = Vec::with_capacity(s.triggers.len());
        for &id in &s.triggers {
            let t = self.model.trigger(id)?;
            triggers.push((
                id,
                TriggerState {
                    pending: t.pending,
                    fired: t.fired,
                },
            ));
        }
        Ok(SolverSnapshot {
            stocks: self.snapshot_stocks(solver)?,
            index: s.index,
            recorded_through: s.recorded_through,
            rng: s.rng,
            histories: self.history_lengths(solver)?,
            triggers,
        })
    }

    pub(crate) fn restore_solver(&mut self, snapshot: &SolverSnapshot) -> ModelResult<Vec<TaskId>> {
        let stale = self.restore_stocks(&snapshot.stocks)?;
        let solver = snapshot.stocks.solver;
        let s = self.model.solver_mut(solver)?;
        s.index = snapshot.index;
        s.recorded_through = snapshot.recorded_through;
        s.rng = snapshot.rng;
        self.withdraw_frames(solver, snapshot.recorded_through);
        self.truncate_history(&snapshot.histories);
        for (id, state) in &snapshot.triggers {
            let t = self.model.trigger_mut(*id)?;
            t.pending = state.pending;
            t.fired = state.fired;
        }
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Model state as seen by the equations of one solver at one time.
pub struct WorldScope<'a> {
    model: &'a mut Model,
    evaluator: &'a dyn Evaluator,
    stack: &'a mut EvaluationStack,
    time: SimTime,
    solver: SolverId,
}

impl WorldScope<'_> {
    /// Evaluate an equation that does not belong to a valued entity, such as
    /// a trigger condition or action.
    pub(crate) fn evaluate(&mut self, equation: EquationId, owner: &str) -> ModelResult<Value> {
        let evaluator = self.evaluator;
        evaluator.evaluate(equation, self).map_err(|e| e.within(owner))
    }

    fn evaluate_entity(&mut self, entity: EntityRef, name: &str, equation: EquationId) -> ModelResult<Value> {
        self.stack.enter(entity, name)?;
        let evaluator = self.evaluator;
        let result = evaluator.evaluate(equation, self);
        self.stack.leave();
        result.map_err(|e| e.within(name))
    }

    fn initialize_stock(&mut self, id: StockId) -> ModelResult<()> {
        let stock = self.model.stock(id)?;
        let (name, equation) = (stock.name.clone(), stock.initial);
        let value = self.evaluate_entity(EntityRef::Stock(id), &name, equation)?;
        let amount = Amount::from_value(&value).ok_or_else(|| ModelError::InvalidValue {
            primitive: name.clone(),
            expected: "a number or a vector of numbers",
        })?;
        let start = self.model.config.start();
        let unit = self.model.time_unit();
        self.model.stock_mut(id)?.initialize(amount, start, unit)
    }

    /// Stocks a flow's rate is reconciled against: destination first.
    fn flow_ends(&self, flow: &Flow) -> Vec<(String, Unit)> {
        flow.omega
            .into_iter()
            .chain(flow.alpha)
            .filter_map(|s| self.model.stocks.get(s))
            .map(|s| (s.name.clone(), s.unit.clone()))
            .collect()
    }

    fn store_rate(&mut self, id: FlowId, value: &Value) -> ModelResult<Amount> {
        let unit = self.model.time_unit();
        let position = self.model.solver(self.solver)?.rk_position;
        let flow = self.model.flow(id)?;
        let ends = self.flow_ends(flow);
        let mut ends = ends.iter().map(|(n, u)| (n.as_str(), u));
        let amount = flow.reconcile(value, ends.next(), unit)?;
        for other in ends {
            flow.reconcile(value, Some(other), unit)?;
        }
        let owner = flow.solver;
        self.model.flow_mut(id)?.set_stage_rate(position, amount.clone());
        self.model.solver_mut(owner)?.redo.clear();
        Ok(amount)
    }

    fn rate_value(&self, id: FlowId, rate: &Amount) -> ModelResult<Value> {
        let flow = self.model.flow(id)?;
        let stock_unit = flow
            .omega
            .or(flow.alpha)
            .and_then(|s| self.model.stocks.get(s))
            .map(|s| &s.unit);
        Ok(Flow::rate_value(rate, stock_unit, self.model.time_unit()))
    }

    fn flow_value(&mut self, id: FlowId) -> ModelResult<Value> {
        if let Some(rate) = self.model.flow(id)?.rate.clone() {
            return self.rate_value(id, &rate);
        }
        let flow = self.model.flow(id)?;
        let (name, equation) = (flow.name.clone(), flow.equation);
        let value = self.evaluate_entity(EntityRef::Flow(id), &name, equation)?;
        let rate = self.store_rate(id, &value)?;
        self.rate_value(id, &rate)
    }

    fn variable_value(&mut self, id: VariableId) -> ModelResult<Value> {
        let variable = self.model.variable(id)?;
        if let Some(value) = &variable.cache {
            return Ok(value.clone());
        }
        let (name, equation) = (variable.name.clone(), variable.equation);
        let value = self.evaluate_entity(EntityRef::Variable(id), &name, equation)?;
        self.model.variable_mut(id)?.cache = Some(value.clone());
        Ok(value)
    }
}

impl Scope for WorldScope<'_> {
    fn time(&self) -> SimTime {
        self.time
    }

    fn time_step(&self) -> SimTime {
        self.model
            .solver(self.solver)
            .map(|s| s.user_step)
            .unwrap_or_else(|_| self.model.config.step())
    }

    fn value(&mut self, entity: EntityRef) -> ModelResult<Value> {
        match entity {
            EntityRef::Stock(id) => {
                if !self.model.stock(id)?.ready {
                    self.initialize_stock(id)?;
                }
                Ok(self.model.stock(id)?.value())
            }
            EntityRef::Flow(id) => self.flow_value(id),
            EntityRef::Variable(id) => self.variable_value(id),
        }
    }

    fn set_value(&mut self, entity: EntityRef, value: Value) -> ModelResult<()> {
        match entity {
            EntityRef::Stock(id) => {
                let stock = self.model.stock_mut(id)?;
                let amount = Amount::from_value(&value).ok_or_else(|| ModelError::InvalidValue {
                    primitive: stock.name.clone(),
                    expected: "a number or a vector of numbers",
                })?;
                stock.level = if stock.non_negative {
                    amount.clamp_non_negative()
                } else {
                    amount
                };
                stock.ready = true;
                Ok(())
            }
            EntityRef::Flow(id) => self.store_rate(id, &value).map(|_| ()),
            EntityRef::Variable(id) => {
                self.model.variable_mut(id)?.cache = Some(value);
                Ok(())
            }
        }
    }

    fn past_values(&self, entity: EntityRef) -> &[Value] {
        self.model.history(entity)
    }

    fn lookup(&self, name: &str) -> Option<EntityRef> {
        self.model.lookup(name)
    }
}
