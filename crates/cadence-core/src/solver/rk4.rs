//! Classical fourth-order Runge-Kutta stepping.
//!
//! RK4 needs rates at the start of the step (k1), twice at the midpoint (k2,
//! k3) and at the end (k4), each evaluated on a provisional state. The queue
//! gets there by moving forward and snapping back: material is applied by
//! the ordinary conservation subscriber as the clock advances, and a time
//! shift rolls the stocks back to the step's start.
//!
//! Four tasks per step, gated by three blockers named after the solver:
//!
//! | Task    | Time    | Priority | Gate    | Uses |
//! |---------|---------|----------|---------|------|
//! | init    | t       | -10      | `init`  | 1    |
//! | stage 1 | t       | -5       | `start` | 4    |
//! | mid     | t + h/2 | -10      | `mid`   | 2    |
//! | stage 4 | t + h   | -30      | `mid`   | 1    |
//!
//! One step runs as
//!
//! ```text
//! init; stage1(k1)  -> [t, t+h/2] at k1 -> mid: k2, back to t
//! stage1            -> [t, t+h/2] at k2 -> mid: k3, back to t
//! stage1            -> [t, t+h]   at k3 -> stage4: k4, back to t
//! stage1: blend     -> [t, t+h]   at (k1 + 2k2 + 2k3 + k4) / 6
//! ```
//!
//! Each non-final stage 1 pass saves the stock levels; rolling it back (on
//! the snap back to `t`) restores them. The final pass records the step,
//! checks triggers and queues the next step. The last step of a run has only
//! init and a single-use stage 1. Between init and the final pass the solver
//! is open: frames recorded meanwhile by any solver at or after the step's
//! start are held back, since the snap back can withdraw them.
//!
//! The solver's internal step is `h/2` and its index advances by 2 per step.

use tracing::debug;

use crate::clock::SimTime;
use crate::error::{ModelError, ModelResult};
use crate::id::{EntityRef, SolverId, TaskId};
use crate::queue::TaskQueue;
use crate::sim::Job;
use crate::solver::{RK4_INIT_PRIORITY, RK4_MID_PRIORITY, RK4_STAGE1_PRIORITY, RK4_STAGE4_PRIORITY, Rk4Gates};
use crate::task::Task;
use crate::world::{StockState, World};

/// State carried by a stage 1 task across its passes.
#[derive(Debug, Clone)]
pub struct StageOne {
    pub(crate) solver: SolverId,
    pub(crate) index: u64,
    pub(crate) last: bool,
    pub(crate) passes: u32,
    pub(crate) preserved: Option<StockState>,
    pub(crate) provisional: Vec<(EntityRef, usize)>,
    pub(crate) finished: bool,
}

/// Create the solver's blockers: `init` open, `start` and `mid` closed.
pub(crate) fn install(world: &mut World, queue: &mut TaskQueue<Job>, solver: SolverId) -> ModelResult<Rk4Gates> {
    let name = world.model.solver(solver)?.name.clone();
    let gates = Rk4Gates {
        init: queue.blocker(&format!("{name} init")),
        start: queue.blocker(&format!("{name} start")),
        mid: queue.blocker(&format!("{name} mid")),
    };
    queue.unblock(gates.init);
    queue.block(gates.start);
    queue.block(gates.mid);
    world.model.solver_mut(solver)?.gates = Some(gates);
    Ok(gates)
}

fn gates(world: &World, solver: SolverId) -> ModelResult<Rk4Gates> {
    let s = world.model.solver(solver)?;
    s.gates.ok_or_else(|| ModelError::InvalidConfig {
        reason: format!("solver '{}' has no RK4 gates", s.name),
    })
}

/// Queue the tasks of the step starting at `index`.
pub(crate) fn schedule_step(
    world: &World,
    queue: &mut TaskQueue<Job>,
    solver: SolverId,
    index: u64,
) -> ModelResult<Vec<TaskId>> {
    let gates = gates(world, solver)?;
    let s = world.model.solver(solver)?;
    let t = s.time_of(world.model.config.start(), index);
    let h = s.step;
    let last = index >= s.max_index;

    let mut ids = Vec::with_capacity(4);
    ids.push(queue.add(
        Task::new(t, RK4_INIT_PRIORITY, Job::Rk4Init { solver, index })
            .expires(1)
            .gated_by(gates.init),
    )?);
    let stage = StageOne {
        solver,
        index,
        last,
        passes: 0,
        preserved: None,
        provisional: Vec::new(),
        finished: false,
    };
    ids.push(queue.add(
        Task::new(t, RK4_STAGE1_PRIORITY, Job::Rk4Stage1(stage))
            .expires(if last { 1 } else { 4 })
            .gated_by(gates.start),
    )?);
    if !last {
        ids.push(queue.add(
            Task::new(t + h, RK4_MID_PRIORITY, Job::Rk4Mid { solver, back_to: t })
                .expires(2)
                .gated_by(gates.mid),
        )?);
        ids.push(queue.add(
            Task::new(t + h.times(2), RK4_STAGE4_PRIORITY, Job::Rk4Stage4 { solver, back_to: t })
                .expires(1)
                .gated_by(gates.mid),
        )?);
    }
    Ok(ids)
}

pub(crate) fn init(world: &mut World, queue: &mut TaskQueue<Job>, solver: SolverId, index: u64) -> ModelResult<()> {
    let gates = gates(world, solver)?;
    world.fresh_start(solver)?;
    let s = world.model.solver_mut(solver)?;
    s.rk_position = 1;
    s.index = index;
    s.open_since = Some(queue.time());
    queue.unblock(gates.start);
    queue.block(gates.init);
    Ok(())
}

pub(crate) fn stage_one(world: &mut World, queue: &mut TaskQueue<Job>, stage: &mut StageOne) -> ModelResult<()> {
    let solver = stage.solver;
    let gates = gates(world, solver)?;
    let now = queue.time();
    let position = world.model.solver(solver)?.rk_position;

    if stage.passes > 0 {
        world.truncate_history(&stage.provisional);
    } else {
        stage.provisional = world.history_lengths(solver)?;
    }
    stage.passes += 1;

    if position >= 4 {
        world.blend(solver)?;
    }
    world.clear_variables(solver)?;
    let values = world.evaluate_solver(solver, now)?;
    world.push_history(&values);

    if stage.last || position >= 4 {
        world.model.solver_mut(solver)?.open_since = None;
        world.emit_frame(solver, now, &values)?;
        crate::trigger::check_triggers(world, queue, solver, now)?;
        queue.unblock(gates.init);
        stage.finished = true;
        if !stage.last {
            let next = stage.index + 2;
            world.model.solver_mut(solver)?.index = next;
            schedule_step(world, queue, solver, next)?;
        }
        debug!(solver = %world.model.solver(solver)?.name, index = stage.index, time = %now, "rk4 step");
    } else {
        stage.preserved = Some(world.snapshot_stocks(solver)?);
        queue.block(gates.start);
        queue.unblock(gates.mid);
    }
    Ok(())
}

/// Undo a non-final pass by restoring the saved levels.
///
/// A finished step is left alone. Its task is spent, so a replay never runs
/// it again: the rates stay blended and the conservation journal reapplies
/// them over the intervals the clock moves back across.
pub(crate) fn unstage_one(world: &mut World, queue: &mut TaskQueue<Job>, stage: &mut StageOne) -> ModelResult<()> {
    if stage.finished {
        return Ok(());
    }
    let Some(saved) = &stage.preserved else {
        return Ok(());
    };
    for stale in world.restore_stocks(saved)? {
        queue.remove(stale);
    }
    Ok(())
}

/// Stages 2 to 4: re-predict every flow on the provisional state, then snap
/// back to the start of the step. Stage 4 leaves `mid` open.
pub(crate) fn predict_stage(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    solver: SolverId,
    back_to: SimTime,
    close_mid: bool,
) -> ModelResult<()> {
    let gates = gates(world, solver)?;
    let now = queue.time();
    world.clear_variables(solver)?;
    let s = world.model.solver_mut(solver)?;
    s.rk_position = (s.rk_position + 1).min(4);
    world.clear_rates(solver)?;
    world.predict_flows(solver, now)?;
    queue.unblock(gates.start);
    if close_mid {
        queue.block(gates.mid);
    }
    queue.request_time_shift(back_to);
    Ok(())
}
