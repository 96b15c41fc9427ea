//! Stocks: accumulators, optionally non-negative and optionally delayed.
//!
//! # Conveyors
//!
//! A stock with a delay is a FIFO pipe. Mass credited at time `now` does not
//! touch `level`; it is recorded as an [`Arrival`] whose queue task posts it at
//! `now + delay`. The initial value of a conveyor is treated as spread evenly
//! along the pipe: `level` starts at zero and the initial contents are
//! released analytically at `initial / delay` per time unit during the first
//! delay window, so no sub-stepping is needed for the ramp-up.
//!
//! [`Stock::total_contents`] is therefore `level` + mass in pending arrivals +
//! whatever part of the initial contents is still in the pipe.

use crate::clock::{SimTime, TimeUnit};
use crate::error::{ModelError, ModelResult};
use crate::id::{EquationId, SolverId, TaskId};
use crate::value::{Amount, AmountError, Unit, Value};

/// Mass travelling through a conveyor, posted to `level` at `at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub task: TaskId,
    pub at: SimTime,
    pub amount: Amount,
    pub arrived: bool,
}

/// Analytic release of a conveyor's initial contents.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialRelease {
    pub start: SimTime,
    pub delay: SimTime,
    pub total: Amount,
    /// Released per model time unit.
    pub rate: Amount,
}

/// Saved stock state for rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct StockSnapshot {
    level: Amount,
    pending: usize,
}

/// An accumulator of quantity over time.
#[derive(Debug, Clone)]
pub struct Stock {
    pub(crate) name: String,
    pub(crate) solver: SolverId,
    pub(crate) initial: EquationId,
    pub(crate) unit: Unit,
    pub(crate) non_negative: bool,
    pub(crate) delay: Option<SimTime>,
    pub(crate) level: Amount,
    pub(crate) ready: bool,
    pub(crate) pending: Vec<Arrival>,
    pub(crate) release: Option<InitialRelease>,
    pub(crate) history: Vec<Value>,
}

impl Stock {
    pub(crate) fn new(name: String, solver: SolverId, initial: EquationId) -> Self {
        Self {
            name,
            solver,
            initial,
            unit: Unit::dimensionless(),
            non_negative: false,
            delay: None,
            level: Amount::zero(),
            ready: false,
            pending: Vec::new(),
            release: None,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solver(&self) -> SolverId {
        self.solver
    }

    pub fn level(&self) -> &Amount {
        &self.level
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn is_non_negative(&self) -> bool {
        self.non_negative
    }

    pub fn delay(&self) -> Option<SimTime> {
        self.delay
    }

    /// A stock with a non-zero delay.
    pub fn is_conveyor(&self) -> bool {
        self.delay.is_some_and(|d| !d.is_zero())
    }

    pub fn pending(&self) -> &[Arrival] {
        &self.pending
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    pub fn value(&self) -> Value {
        self.level.to_value(&self.unit)
    }

    /// Install the evaluated initial value. Non-negative stocks clamp it at
    /// zero; conveyors start empty and release it over the first window.
    pub(crate) fn initialize(&mut self, initial: Amount, start: SimTime, unit: TimeUnit) -> ModelResult<()> {
        let initial = if self.non_negative {
            initial.clamp_non_negative()
        } else {
            initial
        };
        self.ready = true;
        match self.delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                let window = delay.as_fixed(unit)?;
                let rate = initial.checked_div(window).map_err(|e| self.amount_error(e, ""))?;
                self.level = initial.zero_like();
                self.release = Some(InitialRelease {
                    start,
                    delay,
                    total: initial,
                    rate,
                });
            }
            None => self.level = initial,
        }
        Ok(())
    }

    /// Part of the initial contents released over `[from, to]`.
    pub(crate) fn initial_release(&self, from: SimTime, to: SimTime, unit: TimeUnit) -> ModelResult<Option<Amount>> {
        let Some(release) = &self.release else {
            return Ok(None);
        };
        let lo = from.max(release.start);
        let hi = to.min(release.start + release.delay);
        if hi <= lo {
            return Ok(None);
        }
        let span = (hi - lo).as_fixed(unit)?;
        release
            .rate
            .checked_scale(span)
            .map(Some)
            .map_err(|e| self.amount_error(e, ""))
    }

    /// Part of the initial contents still in the pipe at `now`.
    fn initial_remaining(&self, now: SimTime, unit: TimeUnit) -> ModelResult<Option<Amount>> {
        let Some(release) = &self.release else {
            return Ok(None);
        };
        if now <= release.start {
            return Ok(Some(release.total.clone()));
        }
        if now >= release.start + release.delay {
            return Ok(None);
        }
        let elapsed = (now - release.start).as_fixed(unit)?;
        let released = release
            .rate
            .checked_scale(elapsed)
            .map_err(|e| self.amount_error(e, ""))?;
        release
            .total
            .checked_sub(&released)
            .map(|r| Some(r.clamp_non_negative()))
            .map_err(|e| self.amount_error(e, ""))
    }

    /// Level plus everything still travelling through the pipe.
    pub fn total_contents(&self, now: SimTime, unit: TimeUnit) -> ModelResult<Amount> {
        let mut total = self.level.clone();
        for arrival in self.pending.iter().filter(|a| !a.arrived) {
            total = total
                .checked_add(&arrival.amount)
                .map_err(|e| self.amount_error(e, ""))?;
        }
        if let Some(remaining) = self.initial_remaining(now, unit)? {
            total = total.checked_add(&remaining).map_err(|e| self.amount_error(e, ""))?;
        }
        Ok(total)
    }

    /// Mass inside the pipe that has not reached `level` yet.
    pub fn in_transit(&self, now: SimTime, unit: TimeUnit) -> ModelResult<Amount> {
        self.total_contents(now, unit)?
            .checked_sub(&self.level)
            .map_err(|e| self.amount_error(e, ""))
    }

    pub(crate) fn credit(&mut self, amount: &Amount, flow: &str) -> ModelResult<()> {
        self.level = self
            .level
            .checked_add(amount)
            .map_err(|e| self.amount_error(e, flow))?;
        Ok(())
    }

    pub(crate) fn debit(&mut self, amount: &Amount, flow: &str) -> ModelResult<()> {
        self.level = self
            .level
            .checked_sub(amount)
            .map_err(|e| self.amount_error(e, flow))?;
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> StockSnapshot {
        StockSnapshot {
            level: self.level.clone(),
            pending: self.pending.len(),
        }
    }

    /// Restore a snapshot. Returns the arrival tasks posted after it was
    /// taken; the caller removes them from the queue.
    pub(crate) fn restore(&mut self, snapshot: &StockSnapshot) -> Vec<TaskId> {
        self.level = snapshot.level.clone();
        if self.pending.len() <= snapshot.pending {
            return Vec::new();
        }
        self.pending
            .drain(snapshot.pending..)
            .map(|a| a.task)
            .collect()
    }

    pub(crate) fn amount_error(&self, err: AmountError, flow: &str) -> ModelError {
        match err {
            AmountError::Keys => ModelError::VectorKeysMismatch {
                flow: flow.to_string(),
                stock: self.name.clone(),
            },
            AmountError::Overflow => ModelError::StockOverflow {
                stock: self.name.clone(),
            },
        }
    }

    /// Amount available to drain: the level, never less than zero.
    pub(crate) fn available(&self) -> Amount {
        self.level.clamp_non_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed128;
    use crate::test_utils::fixed;
    use slotmap::SlotMap;

    fn years(v: i64) -> SimTime {
        SimTime::from_int(v, TimeUnit::Years)
    }

    fn conveyor(delay: i64) -> Stock {
        let mut solvers: SlotMap<SolverId, ()> = SlotMap::with_key();
        let mut s = Stock::new("pipe".into(), solvers.insert(()), EquationId(0));
        s.delay = Some(years(delay));
        s
    }

    #[test]
    fn conveyor_releases_initial_contents_over_first_window() {
        let mut s = conveyor(5);
        s.initialize(Amount::Scalar(fixed(10.0)), years(0), TimeUnit::Years).unwrap();
        assert_eq!(s.level, Amount::Scalar(Fixed128::ZERO));
        assert_eq!(s.total_contents(years(0), TimeUnit::Years).unwrap(), Amount::Scalar(fixed(10.0)));

        let first = s.initial_release(years(0), years(1), TimeUnit::Years).unwrap().unwrap();
        assert_eq!(first, Amount::Scalar(fixed(2.0)));
        s.credit(&first, "").unwrap();
        assert_eq!(s.total_contents(years(1), TimeUnit::Years).unwrap(), Amount::Scalar(fixed(10.0)));

        // Window [4, 7] only overlaps the first delay window for one year.
        let tail = s.initial_release(years(4), years(7), TimeUnit::Years).unwrap().unwrap();
        assert_eq!(tail, Amount::Scalar(fixed(2.0)));
        assert!(s.initial_release(years(5), years(9), TimeUnit::Years).unwrap().is_none());
        assert!(s.initial_remaining(years(6), TimeUnit::Years).unwrap().is_none());
    }

    #[test]
    fn non_negative_initial_value_is_clamped() {
        let mut s = conveyor(0);
        s.non_negative = true;
        s.initialize(Amount::Scalar(fixed(-3.0)), years(0), TimeUnit::Years).unwrap();
        assert!(!s.is_conveyor());
        assert_eq!(s.level, Amount::Scalar(Fixed128::ZERO));
    }

    #[test]
    fn restore_returns_later_arrivals() {
        let mut s = conveyor(2);
        s.initialize(Amount::zero(), years(0), TimeUnit::Years).unwrap();
        let mut tasks: SlotMap<TaskId, ()> = SlotMap::with_key();
        let early = tasks.insert(());
        let late = tasks.insert(());
        s.pending.push(Arrival { task: early, at: years(2), amount: Amount::Scalar(fixed(1.0)), arrived: false });
        let snap = s.snapshot();
        s.pending.push(Arrival { task: late, at: years(3), amount: Amount::Scalar(fixed(1.0)), arrived: false });
        s.credit(&Amount::Scalar(fixed(4.0)), "inflow").unwrap();

        assert_eq!(s.restore(&snap), vec![late]);
        assert_eq!(s.pending.len(), 1);
        assert_eq!(s.level, Amount::Scalar(Fixed128::ZERO));
        assert_eq!(s.in_transit(years(1), TimeUnit::Years).unwrap(), Amount::Scalar(fixed(1.0)));
    }

    #[test]
    fn vector_key_mismatch_names_flow_and_stock() {
        let mut s = conveyor(0);
        s.initialize(Amount::Vector(vec![("a".into(), fixed(1.0))]), years(0), TimeUnit::Years)
            .unwrap();
        let err = s
            .credit(&Amount::Vector(vec![("b".into(), fixed(1.0))]), "inflow")
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::VectorKeysMismatch {
                flow: "inflow".into(),
                stock: "pipe".into()
            }
        );
    }
}
