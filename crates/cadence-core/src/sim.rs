//! The simulation: setup, the run loop and host-facing queries.
//!
//! # Setup
//!
//! [`Simulation::new`] validates the configuration, orders flow clusters,
//! evaluates every stock's initial value, subscribes each solver's
//! conservation to the queue's clock and queues each solver's first step.
//! Timeout triggers and pause points are queued up front.
//!
//! # Running
//!
//! [`Simulation::run`] steps the queue until it completes or a pause task
//! fires. Calling it again after a pause resumes exactly where it stopped.
//! Any error fails the simulation: the error callback runs once and every
//! later call returns the same error without stepping. Frames reach the sink
//! after each step, once no look-ahead can withdraw them.
//!
//! # Determinism
//!
//! [`StateHash`] is an FNV-1a hash over the clock and every stock level.
//! Two runs of the same model must produce identical hashes at identical
//! points.

use tracing::{info, trace, warn};

use crate::clock::{SimTime, TimeChange};
use crate::cluster::{ClusterOrder, ClusterPosition};
use crate::config::Algorithm;
use crate::error::{ModelError, ModelResult};
use crate::eval::Evaluator;
use crate::fixed::Fixed128;
use crate::id::{EntityRef, SolverId, StockId, TaskId, TriggerId};
use crate::model::Model;
use crate::queue::{Action, TaskQueue};
use crate::sink::ResultSink;
use crate::solver::rk4::StageOne;
use crate::solver::{PAUSE_PRIORITY, euler, rk4};
use crate::task::Task;
use crate::value::{Amount, Value};
use crate::world::{SolverSnapshot, StockState, World};
use crate::{conservation, trigger};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Every kind of task the kernel queues.
#[derive(Debug)]
pub enum Job {
    /// One Euler step.
    Rk1Step {
        solver: SolverId,
        index: u64,
        snapshot: Option<SolverSnapshot>,
        spawned: Vec<TaskId>,
    },
    Rk4Init {
        solver: SolverId,
        index: u64,
    },
    Rk4Stage1(StageOne),
    /// RK4 stages 2 and 3.
    Rk4Mid {
        solver: SolverId,
        back_to: SimTime,
    },
    Rk4Stage4 {
        solver: SolverId,
        back_to: SimTime,
    },
    /// Conveyor mass reaching the stock level.
    Arrival {
        stock: StockId,
    },
    TriggerFire {
        trigger: TriggerId,
        state: Option<StockState>,
        next: Option<TaskId>,
    },
    /// Return control to the host.
    Pause,
}

impl Action for Job {
    type Context = World;

    fn execute(&mut self, task: TaskId, world: &mut World, queue: &mut TaskQueue<Job>) -> ModelResult<()> {
        match self {
            Job::Rk1Step {
                solver,
                index,
                snapshot,
                spawned,
            } => euler::execute(world, queue, *solver, *index, snapshot, spawned),
            Job::Rk4Init { solver, index } => rk4::init(world, queue, *solver, *index),
            Job::Rk4Stage1(stage) => rk4::stage_one(world, queue, stage),
            Job::Rk4Mid { solver, back_to } => rk4::predict_stage(world, queue, *solver, *back_to, true),
            Job::Rk4Stage4 { solver, back_to } => rk4::predict_stage(world, queue, *solver, *back_to, false),
            Job::Arrival { stock } => conservation::arrive(world, *stock, task, true),
            Job::TriggerFire { trigger, state, next } => trigger::fire(world, queue, *trigger, state, next),
            Job::Pause => {
                world.paused = true;
                Ok(())
            }
        }
    }

    fn rollback(&mut self, task: TaskId, world: &mut World, queue: &mut TaskQueue<Job>) -> ModelResult<()> {
        match self {
            Job::Rk1Step { snapshot, spawned, .. } => euler::rollback(world, queue, snapshot, spawned),
            Job::Rk4Stage1(stage) => rk4::unstage_one(world, queue, stage),
            Job::Arrival { stock } => conservation::arrive(world, *stock, task, false),
            Job::TriggerFire { trigger, state, next } => trigger::unfire(world, queue, task, *trigger, state, next),
            Job::Rk4Init { .. } | Job::Rk4Mid { .. } | Job::Rk4Stage4 { .. } | Job::Pause => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Why [`Simulation::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Ready,
    Paused,
    Completed,
    Failed(ModelError),
}

type ErrorCallback = Box<dyn FnMut(&ModelError)>;

// ---------------------------------------------------------------------------
// StateHash
// ---------------------------------------------------------------------------

/// FNV-1a hash for determinism checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed128(&mut self, v: Fixed128) {
        self.write(&v.to_bits().to_le_bytes());
    }

    /// Feed a clock value, normalized to seconds so equal times hash alike.
    pub fn write_time(&mut self, t: SimTime) {
        self.write(&t.in_seconds().normalize().serialize());
    }

    pub fn write_amount(&mut self, amount: &Amount) {
        for c in amount.components() {
            self.write_fixed128(c);
        }
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// A model bound to an evaluator and a task queue.
pub struct Simulation {
    world: World,
    queue: TaskQueue<Job>,
    status: RunStatus,
    on_error: Option<ErrorCallback>,
}

impl Simulation {
    pub fn new(model: Model, evaluator: impl Evaluator + 'static) -> ModelResult<Self> {
        model.config.validate()?;
        let start = model.config.start();
        let end = model.config.end();
        let length = model.config.length();
        let seed = crate::rng::SimRng::new(model.config.seed);

        let mut world = World::new(model, Box::new(evaluator));
        let mut queue = TaskQueue::new(start, end);

        let clusters = ClusterOrder::compute(
            world.model.flows.iter().map(|(id, f)| (id, f.alpha, f.omega)),
            |s| world.model.stocks.get(s).is_some_and(|s| s.non_negative),
        );
        world.clusters = clusters;

        let solvers: Vec<SolverId> = world.model.solvers.keys().collect();
        for (stream, &id) in solvers.iter().enumerate() {
            world
                .model
                .solver_mut(id)?
                .plan(start, length, seed.fork(stream as u64))?;
        }

        world.initialize_stocks(start)?;

        for &id in &solvers {
            queue.subscribe(Box::new(
                move |world: &mut World, queue: &mut TaskQueue<Job>, change: &TimeChange| {
                    conservation::apply_interval(world, queue, id, change)
                },
            ));
            match world.model.solver(id)?.algorithm {
                Algorithm::Euler => {
                    let task = euler::step_task(&world, id, 0)?;
                    queue.add(task)?;
                }
                Algorithm::Rk4 => {
                    rk4::install(&mut world, &mut queue, id)?;
                    rk4::schedule_step(&world, &mut queue, id, 0)?;
                }
            }
        }

        trigger::schedule_timeouts(&mut world, &mut queue, start)?;

        if let Some(interval) = world.model.config.pause_every() {
            let mut k = 1;
            loop {
                let at = start + interval.times(k);
                if at > end {
                    break;
                }
                queue.add(Task::new(at, PAUSE_PRIORITY, Job::Pause).expires(1))?;
                k += 1;
            }
        }

        info!(
            solvers = solvers.len(),
            stocks = world.model.stocks.len(),
            flows = world.model.flows.len(),
            clusters = world.clusters.len(),
            "simulation ready"
        );
        Ok(Self {
            world,
            queue,
            status: RunStatus::Ready,
            on_error: None,
        })
    }

    /// Send recorded frames to `sink`.
    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.world.sink = Some(Box::new(sink));
        self
    }

    /// Called once with the error that fails the run.
    pub fn on_error(&mut self, callback: impl FnMut(&ModelError) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    // -- Running --

    /// Step until the run completes or pauses.
    pub fn run(&mut self) -> ModelResult<RunState> {
        match &self.status {
            RunStatus::Failed(err) => return Err(err.clone()),
            RunStatus::Completed => return Ok(RunState::Completed),
            RunStatus::Ready => info!(time = %self.queue.time(), "run started"),
            RunStatus::Paused => info!(time = %self.queue.time(), "run resumed"),
        }
        self.world.paused = false;
        loop {
            if self.queue.completed() {
                self.world.flush_frames(true);
                self.status = RunStatus::Completed;
                info!(time = %self.queue.time(), tasks = self.queue.executed(), "run completed");
                return Ok(RunState::Completed);
            }
            if let Err(err) = self.queue.step(&mut self.world) {
                return Err(self.fail(err));
            }
            self.world.flush_frames(false);
            if self.world.paused {
                self.world.paused = false;
                self.status = RunStatus::Paused;
                info!(time = %self.queue.time(), "run paused");
                return Ok(RunState::Paused);
            }
        }
    }

    /// Execute a single queue step. Returns `true` once the run is complete.
    pub fn step(&mut self) -> ModelResult<bool> {
        if let RunStatus::Failed(err) = &self.status {
            return Err(err.clone());
        }
        if !self.queue.completed() {
            if let Err(err) = self.queue.step(&mut self.world) {
                return Err(self.fail(err));
            }
            self.world.paused = false;
        }
        let done = self.queue.completed();
        self.world.flush_frames(done);
        if done {
            self.status = RunStatus::Completed;
        }
        trace!(time = %self.queue.time(), done, "manual step");
        Ok(done)
    }

    /// Roll back the previous batch of tasks.
    pub fn step_back(&mut self) -> ModelResult<()> {
        if let RunStatus::Failed(err) = &self.status {
            return Err(err.clone());
        }
        if let Err(err) = self.queue.step_back(&mut self.world) {
            return Err(self.fail(err));
        }
        self.world.flush_frames(false);
        if self.status == RunStatus::Completed {
            self.status = RunStatus::Paused;
        }
        Ok(())
    }

    fn fail(&mut self, err: ModelError) -> ModelError {
        warn!(code = err.code(), primitive = err.primitive().unwrap_or("-"), time = %self.queue.time(), "run failed: {err}");
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
        self.status = RunStatus::Failed(err.clone());
        err
    }

    /// Disable a trigger and kill its pending fire.
    pub fn kill_trigger(&mut self, name: &str) -> ModelResult<()> {
        let id = self
            .world
            .model
            .find_trigger(name)
            .ok_or_else(|| ModelError::UnknownPrimitive { name: name.to_string() })?;
        let trigger = self.world.model.trigger_mut(id)?;
        trigger.killed = true;
        if let Some(task) = trigger.pending.take() {
            self.queue.kill(task);
        }
        Ok(())
    }

    // -- Queries --

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn time(&self) -> SimTime {
        self.queue.time()
    }

    pub fn model(&self) -> &Model {
        &self.world.model
    }

    pub fn queue(&self) -> &TaskQueue<Job> {
        &self.queue
    }

    fn stock_id(&self, name: &str) -> ModelResult<StockId> {
        match self.world.model.lookup(name) {
            Some(EntityRef::Stock(id)) => Ok(id),
            _ => Err(ModelError::UnknownPrimitive { name: name.to_string() }),
        }
    }

    pub fn stock_level(&self, name: &str) -> ModelResult<Amount> {
        Ok(self.world.model.stock(self.stock_id(name)?)?.level().clone())
    }

    /// Level plus everything travelling through the stock's conveyor.
    pub fn total_contents(&self, name: &str) -> ModelResult<Amount> {
        let stock = self.world.model.stock(self.stock_id(name)?)?;
        stock.total_contents(self.end_clamped_time(), self.world.model.time_unit())
    }

    pub fn in_transit(&self, name: &str) -> ModelResult<Amount> {
        let stock = self.world.model.stock(self.stock_id(name)?)?;
        stock.in_transit(self.end_clamped_time(), self.world.model.time_unit())
    }

    /// Time material has been moved up to: the clock, or the end of the run
    /// once the clock has been pushed past it.
    fn end_clamped_time(&self) -> SimTime {
        self.queue.time().min(self.queue.end())
    }

    /// Values recorded for a primitive so far.
    pub fn history(&self, name: &str) -> ModelResult<&[Value]> {
        let entity = self
            .world
            .model
            .lookup(name)
            .ok_or_else(|| ModelError::UnknownPrimitive { name: name.to_string() })?;
        Ok(self.world.model.history(entity))
    }

    pub fn cluster_of(&self, flow: &str) -> Option<ClusterPosition> {
        match self.world.model.lookup(flow)? {
            EntityRef::Flow(id) => self.world.clusters.position(id),
            _ => None,
        }
    }

    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_time(self.queue.time());
        for (_, stock) in self.world.model.stocks() {
            h.write_amount(stock.level());
            h.write_u64(stock.pending().iter().filter(|a| !a.arrived).count() as u64);
        }
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_hash_is_order_sensitive() {
        let mut a = StateHash::new();
        a.write_u64(1);
        a.write_u64(2);
        let mut b = StateHash::new();
        b.write_u64(2);
        b.write_u64(1);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn equal_times_hash_alike() {
        use crate::clock::TimeUnit;
        use rust_decimal::Decimal;
        let mut a = StateHash::new();
        a.write_time(SimTime::from_int(1, TimeUnit::Years));
        let mut b = StateHash::new();
        b.write_time(SimTime::new(Decimal::new(1200, 2), TimeUnit::Months));
        assert_eq!(a.finish(), b.finish());
    }
}
