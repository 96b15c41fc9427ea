//! Triggers: actions fired when a condition holds, by chance, or after a
//! timeout.
//!
//! Condition and probability triggers are checked once per recorded step of
//! their solver. When one fires, a fire task is queued at the current time
//! (after the step itself) which runs the trigger's action equation. Timeout
//! triggers are queued at `start + after` when the run is set up and, if
//! repeating, queue their next fire each time they fire.
//!
//! A trigger with a fire task pending is not checked again until that task
//! has run. [`Simulation::kill_trigger`](crate::sim::Simulation::kill_trigger)
//! kills the pending task and disables the trigger.

use tracing::trace;

use crate::clock::SimTime;
use crate::error::{ModelError, ModelResult};
use crate::id::{EquationId, SolverId, TaskId, TriggerId};
use crate::queue::TaskQueue;
use crate::sim::Job;
use crate::solver::TRIGGER_PRIORITY;
use crate::task::Task;
use crate::world::{StockState, World};

/// What makes a trigger fire.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    /// Fires when the equation evaluates to `true`.
    Condition(EquationId),
    /// Fires with the probability the equation evaluates to, per step.
    Probability(EquationId),
    /// Fires `after` the start of the run, and every `after` since the last
    /// fire when `repeat` is set.
    Timeout { after: SimTime, repeat: bool },
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub(crate) name: String,
    pub(crate) solver: SolverId,
    pub(crate) kind: TriggerKind,
    pub(crate) action: EquationId,
    pub(crate) pending: Option<TaskId>,
    pub(crate) fired: u32,
    pub(crate) killed: bool,
}

impl Trigger {
    pub(crate) fn new(name: String, solver: SolverId, kind: TriggerKind, action: EquationId) -> Self {
        Self {
            name,
            solver,
            kind,
            action,
            pending: None,
            fired: 0,
            killed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    /// Number of times the action has run.
    pub fn fired(&self) -> u32 {
        self.fired
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn pending(&self) -> Option<TaskId> {
        self.pending
    }
}

fn fire_task(time: SimTime, trigger: TriggerId) -> Task<Job> {
    Task::new(
        time,
        TRIGGER_PRIORITY,
        Job::TriggerFire {
            trigger,
            state: None,
            next: None,
        },
    )
}

/// Queue the first fire of every timeout trigger.
pub(crate) fn schedule_timeouts(world: &mut World, queue: &mut TaskQueue<Job>, start: SimTime) -> ModelResult<()> {
    let timeouts: Vec<(TriggerId, SimTime)> = world
        .model
        .triggers
        .iter()
        .filter_map(|(id, t)| match t.kind {
            TriggerKind::Timeout { after, .. } => Some((id, after)),
            _ => None,
        })
        .collect();
    for (id, after) in timeouts {
        let task = queue.add(fire_task(start + after, id))?;
        world.model.trigger_mut(id)?.pending = Some(task);
    }
    Ok(())
}

/// Check the condition and probability triggers of `solver` and queue a fire
/// task for each that fires. Returns the queued tasks.
pub(crate) fn check_triggers(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    solver: SolverId,
    now: SimTime,
) -> ModelResult<Vec<TaskId>> {
    let ids = world.model.solver(solver)?.triggers.clone();
    let mut queued = Vec::new();
    for id in ids {
        let trigger = world.model.trigger(id)?;
        if trigger.killed || trigger.pending.is_some() {
            continue;
        }
        let name = trigger.name.clone();
        let fires = match trigger.kind.clone() {
            TriggerKind::Condition(eq) => {
                let value = world.scope(solver, now).evaluate(eq, &name)?;
                value.as_bool().ok_or_else(|| ModelError::InvalidValue {
                    primitive: name.clone(),
                    expected: "a boolean",
                })?
            }
            TriggerKind::Probability(eq) => {
                let value = world.scope(solver, now).evaluate(eq, &name)?;
                let p = value
                    .as_quantity()
                    .map(|q| q.magnitude)
                    .ok_or_else(|| ModelError::InvalidValue {
                        primitive: name.clone(),
                        expected: "a probability",
                    })?;
                world.model.solver_mut(solver)?.rng.chance(p)
            }
            TriggerKind::Timeout { .. } => false,
        };
        if fires {
            let task = queue.add(fire_task(now, id))?;
            world.model.trigger_mut(id)?.pending = Some(task);
            trace!(trigger = %name, time = %now, "trigger queued");
            queued.push(task);
        }
    }
    Ok(queued)
}

/// Run a trigger's action. The trigger's solver stocks are saved first so
/// that rolling the fire back undoes what the action wrote.
pub(crate) fn fire(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    trigger: TriggerId,
    state: &mut Option<StockState>,
    next: &mut Option<TaskId>,
) -> ModelResult<()> {
    let t = world.model.trigger(trigger)?;
    if t.killed {
        return Ok(());
    }
    let (solver, action, name, kind) = (t.solver, t.action, t.name.clone(), t.kind.clone());
    let now = queue.time();
    *state = Some(world.snapshot_stocks(solver)?);

    world.stack.clear();
    world.scope(solver, now).evaluate(action, &name)?;

    let t = world.model.trigger_mut(trigger)?;
    t.fired += 1;
    t.pending = None;
    if let TriggerKind::Timeout { after, repeat: true } = kind {
        let task = queue.add(fire_task(now + after, trigger))?;
        world.model.trigger_mut(trigger)?.pending = Some(task);
        *next = Some(task);
    }
    trace!(trigger = %name, time = %now, "trigger fired");
    Ok(())
}

pub(crate) fn unfire(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    task: TaskId,
    trigger: TriggerId,
    state: &mut Option<StockState>,
    next: &mut Option<TaskId>,
) -> ModelResult<()> {
    let Some(saved) = state.take() else {
        return Ok(());
    };
    for stale in world.restore_stocks(&saved)? {
        queue.remove(stale);
    }
    if let Some(next) = next.take() {
        queue.remove(next);
    }
    let t = world.model.trigger_mut(trigger)?;
    t.fired = t.fired.saturating_sub(1);
    t.pending = Some(task);
    Ok(())
}
