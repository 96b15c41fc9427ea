//! Moving material between stocks when the clock advances.
//!
//! Every solver subscribes to the queue's time changes. On a forward change
//! it moves `rate × interval` along each of its flows for the part of the
//! interval it has not covered yet (`applied_through`), capped at the end of
//! the run.
//!
//! # Journal
//!
//! Each applied interval is journaled with the stock levels it started from
//! and the rates it used. A backward change undoes every interval at or after
//! the new time by restoring the earliest one's levels. Outside a time shift
//! the undone intervals are kept for redo: moving forward over the same
//! interval again applies the rates it used the first time, unless the
//! solver's rates have changed since.
//!
//! # Order of application
//!
//! 1. Conveyors release the part of their initial contents due in the
//!    interval.
//! 2. Flows that cannot violate a non-negative constraint are applied as is.
//! 3. The remaining flows are applied in cluster order, each reduced
//!    (component-wise) so that no non-negative stock crosses zero.
//!
//! A non-negative stock still below zero afterwards is a model error.

use tracing::trace;

use crate::clock::{SimTime, TimeChange};
use crate::error::{ModelError, ModelResult};
use crate::id::{FlowId, SolverId, StockId, TaskId};
use crate::queue::TaskQueue;
use crate::sim::Job;
use crate::solver::ARRIVAL_PRIORITY;
use crate::stock::Arrival;
use crate::task::Task;
use crate::value::Amount;
use crate::world::{StockState, World};

/// One forward interval of a solver's material movement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Applied {
    from: SimTime,
    to: SimTime,
    before: StockState,
    rates: Vec<(FlowId, Amount)>,
}

struct Transfer {
    flow: FlowId,
    name: String,
    alpha: Option<StockId>,
    omega: Option<StockId>,
    quantity: Amount,
}

/// Move material for `solver` over the forward part of `change`.
pub(crate) fn apply_interval(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    solver: SolverId,
    change: &TimeChange,
) -> ModelResult<()> {
    if !change.is_forward() {
        return rewind(world, queue, solver, change.new);
    }
    let unit = world.time_unit();
    let s = world.model.solver(solver)?;
    let from = change.old.max(s.applied_through);
    let to = change.new.min(queue.end());
    if to <= from {
        return Ok(());
    }
    let span = (to - from).as_fixed(unit)?;
    let (stocks, flows) = (s.stocks.clone(), s.flows.clone());
    let before = world.snapshot_stocks(solver)?;
    let replayed = replayed_rates(world, solver, from, to)?;

    for id in stocks {
        let stock = world.model.stock(id)?;
        if let Some(released) = stock.initial_release(from, to, unit)? {
            let name = stock.name.clone();
            world.model.stock_mut(id)?.credit(&released, &name)?;
        }
    }

    let mut immediate = Vec::new();
    let mut deferred = Vec::new();
    let mut used = Vec::with_capacity(flows.len());
    for id in flows {
        let flow = world.model.flow(id)?;
        let rate = match &replayed {
            Some(rates) => rates.iter().find(|(f, _)| *f == id).map(|(_, r)| r),
            None => flow.rate_in_use(),
        };
        let Some(rate) = rate.cloned() else {
            continue;
        };
        used.push((id, rate.clone()));
        let quantity = rate.checked_scale(span).map_err(|_| ModelError::Overflow {
            primitive: flow.name.clone(),
        })?;
        if quantity.is_zero() {
            continue;
        }
        let constrained = |s: Option<StockId>| s.and_then(|s| world.model.stocks.get(s)).is_some_and(|s| s.non_negative);
        let risky = constrained(flow.alpha) || (constrained(flow.omega) && !flow.non_negative);
        let item = Transfer {
            flow: id,
            name: flow.name.clone(),
            alpha: flow.alpha,
            omega: flow.omega,
            quantity,
        };
        if risky {
            deferred.push(item);
        } else {
            immediate.push(item);
        }
    }

    for t in &immediate {
        transfer(world, queue, t, &t.quantity, to)?;
    }

    deferred.sort_by_key(|t| (world.clusters.position(t.flow), t.flow));
    for t in &deferred {
        let mut quantity = t.quantity.clone();
        if let Some(alpha) = t.alpha {
            let stock = world.model.stock(alpha)?;
            if stock.non_negative {
                quantity = quantity
                    .limit_drain(&stock.available())
                    .map_err(|e| stock.amount_error(e, &t.name))?;
            }
        }
        if let Some(omega) = t.omega {
            let stock = world.model.stock(omega)?;
            if stock.non_negative && !stock.is_conveyor() {
                quantity = quantity
                    .limit_reverse(&stock.available())
                    .map_err(|e| stock.amount_error(e, &t.name))?;
            }
        }
        transfer(world, queue, t, &quantity, to)?;
    }

    for t in &deferred {
        for id in t.alpha.into_iter().chain(t.omega) {
            let stock = world.model.stock(id)?;
            if stock.non_negative && stock.level.has_negative() {
                return Err(ModelError::InconsistentNonNegative {
                    flow: t.name.clone(),
                    stock: stock.name.clone(),
                });
            }
        }
    }

    let s = world.model.solver_mut(solver)?;
    s.applied_through = to;
    s.journal.push(Applied {
        from,
        to,
        before,
        rates: used,
    });
    trace!(solver = ?solver, %from, %to, flows = immediate.len() + deferred.len(), "interval applied");
    Ok(())
}

/// Rates journaled for exactly `[from, to]`, if that interval is next in
/// the redo list. Any other interval invalidates the list.
fn replayed_rates(
    world: &mut World,
    solver: SolverId,
    from: SimTime,
    to: SimTime,
) -> ModelResult<Option<Vec<(FlowId, Amount)>>> {
    let s = world.model.solver_mut(solver)?;
    match s.redo.pop() {
        Some(entry) if entry.from == from && entry.to == to => Ok(Some(entry.rates)),
        Some(_) => {
            s.redo.clear();
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Undo every interval of `solver` that starts at or after `to`.
fn rewind(world: &mut World, queue: &mut TaskQueue<Job>, solver: SolverId, to: SimTime) -> ModelResult<()> {
    let s = world.model.solver_mut(solver)?;
    let split = s.journal.iter().rposition(|e| e.from < to).map_or(0, |i| i + 1);
    let undone = s.journal.split_off(split);
    let Some(earliest) = undone.first() else {
        return Ok(());
    };
    for stale in world.restore_stocks(&earliest.before)? {
        queue.remove(stale);
    }
    trace!(solver = ?solver, %to, intervals = undone.len(), shift = queue.is_shifting(), "intervals undone");
    if !queue.is_shifting() {
        // Earliest interval on top.
        world.model.solver_mut(solver)?.redo.extend(undone.into_iter().rev());
    }
    Ok(())
}

/// Debit the source and credit the destination. A conveyor destination
/// receives the quantity as an arrival `delay` after `now`.
fn transfer(
    world: &mut World,
    queue: &mut TaskQueue<Job>,
    t: &Transfer,
    quantity: &Amount,
    now: SimTime,
) -> ModelResult<()> {
    if quantity.is_zero() {
        return Ok(());
    }
    if let Some(alpha) = t.alpha {
        world.model.stock_mut(alpha)?.debit(quantity, &t.name)?;
    }
    let Some(omega) = t.omega else {
        return Ok(());
    };
    let stock = world.model.stock_mut(omega)?;
    match stock.delay.filter(|d| !d.is_zero()) {
        Some(delay) => {
            // Shape check now; the level only changes on arrival.
            stock
                .level
                .checked_add(quantity)
                .map_err(|e| stock.amount_error(e, &t.name))?;
            let at = now + delay;
            let task = queue.add(Task::new(at, ARRIVAL_PRIORITY, Job::Arrival { stock: omega }))?;
            world.model.stock_mut(omega)?.pending.push(Arrival {
                task,
                at,
                amount: quantity.clone(),
                arrived: false,
            });
            Ok(())
        }
        None => stock.credit(quantity, &t.name),
    }
}

/// Post (or, rolling back, un-post) a conveyor arrival to the stock level.
pub(crate) fn arrive(world: &mut World, stock: StockId, task: TaskId, forward: bool) -> ModelResult<()> {
    let s = world.model.stock_mut(stock)?;
    let Some(index) = s.pending.iter().position(|a| a.task == task) else {
        return Ok(());
    };
    if s.pending[index].arrived == forward {
        return Ok(());
    }
    let amount = s.pending[index].amount.clone();
    if forward {
        s.credit(&amount, "")?;
    } else {
        s.debit(&amount, "")?;
    }
    s.pending[index].arrived = forward;
    Ok(())
}
