//! Property-based tests for the Cadence task queue and clock.
//!
//! Uses proptest to generate random schedules, then verify ordering,
//! rollback and gating invariants hold.

use cadence_core::clock::{SimTime, TimeUnit};
use cadence_core::error::ModelResult;
use cadence_core::id::TaskId;
use cadence_core::queue::{Action, TaskQueue};
use cadence_core::task::Task;
use proptest::prelude::*;
use rust_decimal::Decimal;

// ===========================================================================
// Fixture
// ===========================================================================

#[derive(Debug, Default)]
struct Ledger {
    log: Vec<usize>,
    total: i64,
}

#[derive(Debug)]
struct Add {
    tag: usize,
    amount: i64,
}

impl Action for Add {
    type Context = Ledger;

    fn execute(&mut self, _: TaskId, ctx: &mut Ledger, _: &mut TaskQueue<Add>) -> ModelResult<()> {
        ctx.log.push(self.tag);
        ctx.total += self.amount;
        Ok(())
    }

    fn rollback(&mut self, _: TaskId, ctx: &mut Ledger, _: &mut TaskQueue<Add>) -> ModelResult<()> {
        ctx.total -= self.amount;
        Ok(())
    }
}

fn at(t: u32) -> SimTime {
    SimTime::from_int(i64::from(t), TimeUnit::Days)
}

fn queue_of(schedule: &[(u32, i32, i64)]) -> TaskQueue<Add> {
    let mut queue = TaskQueue::new(at(0), at(1000));
    for (tag, &(t, priority, amount)) in schedule.iter().enumerate() {
        queue
            .add(Task::new(at(t), priority, Add { tag, amount }))
            .unwrap();
    }
    queue
}

fn run(queue: &mut TaskQueue<Add>, ledger: &mut Ledger) {
    while !queue.completed() {
        queue.step(ledger).unwrap();
    }
}

fn arb_schedule() -> impl Strategy<Value = Vec<(u32, i32, i64)>> {
    proptest::collection::vec((0..50u32, -3..3i32, -100..100i64), 1..40)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #[test]
    fn tasks_run_in_time_priority_insertion_order(schedule in arb_schedule()) {
        let mut queue = queue_of(&schedule);
        let mut ledger = Ledger::default();
        run(&mut queue, &mut ledger);

        let mut expected: Vec<usize> = (0..schedule.len()).collect();
        expected.sort_by_key(|&i| (schedule[i].0, schedule[i].1, i));
        prop_assert_eq!(ledger.log, expected);
    }

    #[test]
    fn full_rollback_then_replay_is_identical(schedule in arb_schedule()) {
        let mut queue = queue_of(&schedule);
        let mut ledger = Ledger::default();
        run(&mut queue, &mut ledger);
        let total: i64 = schedule.iter().map(|s| s.2).sum();
        prop_assert_eq!(ledger.total, total);
        let first_pass = std::mem::take(&mut ledger.log);

        while queue.step_back(&mut ledger).is_ok() {}
        prop_assert_eq!(ledger.total, 0);
        let earliest = schedule.iter().map(|s| s.0).min().unwrap();
        prop_assert_eq!(queue.time(), at(earliest));

        run(&mut queue, &mut ledger);
        prop_assert_eq!(ledger.total, total);
        prop_assert_eq!(ledger.log, first_pass);
    }

    #[test]
    fn gated_tasks_keep_their_budget(uses in 1..5u32, t in 1..20u32) {
        let mut queue: TaskQueue<Add> = TaskQueue::new(at(0), at(1000));
        let gate = queue.blocker("gate");
        queue.block(gate);
        let gated = queue
            .add(Task::new(at(t), 0, Add { tag: 0, amount: 1 }).expires(uses).gated_by(gate))
            .unwrap();
        queue.add(Task::new(at(t + 1), 0, Add { tag: 1, amount: 10 })).unwrap();

        let mut ledger = Ledger::default();
        run(&mut queue, &mut ledger);
        prop_assert_eq!(ledger.total, 10);
        prop_assert_eq!(queue.get(gated).unwrap().remaining(), Some(uses));
        prop_assert!(!queue.get(gated).unwrap().is_dead_forward());
    }

    #[test]
    fn clock_ratio_round_trips(steps in 1..500u64, cents in 1..1000i64) {
        let step = SimTime::new(Decimal::new(cents, 2), TimeUnit::Years);
        let length = step.times(steps);
        prop_assert_eq!(length.ratio(&step).unwrap(), Decimal::from(steps));
        prop_assert_eq!(length - step.times(steps), SimTime::zero(TimeUnit::Years));
    }
}
