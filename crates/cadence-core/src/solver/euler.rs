//! First-order (Euler) stepping.
//!
//! One task per step. It evaluates the solver's entities at the step's time,
//! records them, checks triggers and queues the next step. The rates it
//! leaves behind are what the solver's conservation subscriber applies over
//! the following interval.
//!
//! Rolling a step back restores the solver snapshot taken when it ran and
//! removes every task it queued, so replaying it produces the same state.

use tracing::debug;

use crate::error::ModelResult;
use crate::id::{SolverId, TaskId};
use crate::queue::TaskQueue;
use crate::sim::Job;
use crate::solver::EULER_PRIORITY;
use crate::task::Task;
use crate::world::{SolverSnapshot, World};

/// Task running step `index` of `solver`.
pub(crate) fn step_task(world: &World, solver: SolverId, index: u64) -> ModelResult<Task<Job>> {
    let start = world.model.config.start();
    let time = world.model.solver(solver)?.time_of(start, index);
    Ok(Task::new(
        time,
        EULER_PRIORITY,
        Job::Rk1Step {
            solver,
            index,
            snapshot: None,
            spawned: Vec::new(),
        },
    ))
}

pub(crate) fn execute(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    solver: SolverId,
    index: u64,
    snapshot: &mut Option<SolverSnapshot>,
    spawned: &mut Vec<TaskId>,
) -> ModelResult<()> {
    let now = queue.time();
    *snapshot = Some(world.snapshot_solver(solver)?);
    spawned.clear();

    world.model.solver_mut(solver)?.index = index;
    world.fresh_start(solver)?;
    let values = world.evaluate_solver(solver, now)?;
    world.push_history(&values);
    world.emit_frame(solver, now, &values)?;

    spawned.extend(crate::trigger::check_triggers(world, queue, solver, now)?);

    let max_index = world.model.solver(solver)?.max_index;
    if index < max_index {
        let next = step_task(world, solver, index + 1)?;
        spawned.push(queue.add(next)?);
    }
    debug!(solver = %world.model.solver(solver)?.name, index, time = %now, "euler step");
    Ok(())
}

pub(crate) fn rollback(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    snapshot: &mut Option<SolverSnapshot>,
    spawned: &mut Vec<TaskId>,
) -> ModelResult<()> {
    let Some(saved) = snapshot.take() else {
        return Ok(());
    };
    let stale = world.restore_solver(&saved)?;
    for id in stale.into_iter().chain(spawned.drain(..)) {
        queue.remove(id);
    }
    Ok(())
}
