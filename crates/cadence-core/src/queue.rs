//! Time-ordered task queue with rollback.
//!
//! # Order
//!
//! Tasks are kept in a `BTreeMap` keyed by [`TaskKey`] `(time, priority,
//! seq)`: earlier time first, then lower priority, then insertion order. The
//! order is total, so replaying the same schedule visits tasks in exactly the
//! same sequence.
//!
//! # Cursor
//!
//! The cursor names the *next* task to execute, and the queue's `time` is the
//! cursor task's time. [`TaskQueue::step`] executes the cursor task and moves
//! the cursor forward; every change of `time` notifies the time-change
//! subscribers with the old time, the new time and their difference.
//!
//! Executed tasks stay in the map (dead or not) so that
//! [`TaskQueue::step_back`] can roll back the batch of tasks sharing the
//! previous time.
//!
//! # Time shifts
//!
//! An action may call [`TaskQueue::request_time_shift`]. After it returns the
//! cursor is *not* advanced; the queue seeks to the requested time instead,
//! stepping backward (rolling back) or forward as needed. This is how a task
//! can look at a future time and then snap back to the present. Subscribers
//! can tell the two kinds of backward change apart with
//! [`TaskQueue::is_shifting`].
//!
//! # Rollback order
//!
//! Going forward, a batch runs and then the clock moves on. Stepping back
//! undoes both in reverse: the clock returns to the batch's time first, then
//! the batch is rolled back last task first.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound::{Excluded, Included, Unbounded};

use rust_decimal::Decimal;
use slotmap::SlotMap;
use tracing::trace;

use crate::clock::{SimTime, TimeChange};
use crate::error::{ModelError, ModelResult};
use crate::id::{BlockerId, SubscriptionId, TaskId};
use crate::task::{Gate, Task, TaskKey};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Work performed by a task.
///
/// The queue is passed explicitly so actions can schedule follow-up tasks,
/// toggle blockers or request a time shift. `Context` is the mutable state
/// the actions operate on.
pub trait Action: Sized {
    type Context;

    fn execute(
        &mut self,
        task: TaskId,
        ctx: &mut Self::Context,
        queue: &mut TaskQueue<Self>,
    ) -> ModelResult<()>;

    /// Undo the effects of [`execute`](Action::execute) when the queue steps
    /// back over this task. Defaults to doing nothing.
    fn rollback(
        &mut self,
        task: TaskId,
        ctx: &mut Self::Context,
        queue: &mut TaskQueue<Self>,
    ) -> ModelResult<()> {
        let _ = (task, ctx, queue);
        Ok(())
    }
}

/// Listener fired whenever the queue's time changes.
pub type TimeListener<A> = Box<
    dyn FnMut(&mut <A as Action>::Context, &mut TaskQueue<A>, &TimeChange) -> ModelResult<()>,
>;

struct Subscriber<A: Action> {
    id: SubscriptionId,
    listener: TimeListener<A>,
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Ordered set of tasks with a movable cursor.
pub struct TaskQueue<A: Action> {
    tasks: SlotMap<TaskId, Task<A>>,
    order: BTreeMap<TaskKey, TaskId>,
    cursor: Option<TaskKey>,
    initialized: bool,
    time: SimTime,
    end: SimTime,
    next_seq: u64,

    blocker_state: Vec<bool>,
    blocker_names: Vec<String>,
    blocker_index: HashMap<String, BlockerId>,

    subscribers: Vec<Subscriber<A>>,
    next_subscription: u64,
    notifying: bool,
    dropped_subscriptions: Vec<SubscriptionId>,

    time_shift: Option<SimTime>,
    shifting: bool,
    executed: u64,
}

impl<A: Action> fmt::Debug for TaskQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("time", &self.time)
            .field("end", &self.end)
            .field("tasks", &self.order.len())
            .field("cursor", &self.cursor)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<A: Action> TaskQueue<A> {
    /// An empty queue whose clock starts at `start` and which is complete
    /// once its time passes `end`.
    pub fn new(start: SimTime, end: SimTime) -> Self {
        Self {
            tasks: SlotMap::with_key(),
            order: BTreeMap::new(),
            cursor: None,
            initialized: false,
            time: start,
            end,
            next_seq: 0,
            blocker_state: Vec::new(),
            blocker_names: Vec::new(),
            blocker_index: HashMap::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            notifying: false,
            dropped_subscriptions: Vec::new(),
            time_shift: None,
            shifting: false,
            executed: 0,
        }
    }

    // -- Accessors --

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn end(&self) -> SimTime {
        self.end
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of actions run forward so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn get(&self, id: TaskId) -> Option<&Task<A>> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task<A>> {
        self.tasks.get_mut(id)
    }

    /// The task under the cursor (next to execute).
    pub fn peek(&self) -> Option<(TaskId, &Task<A>)> {
        let id = *self.order.get(&self.cursor?)?;
        self.tasks.get(id).map(|t| (id, t))
    }

    /// All tasks in queue order, including executed and dead ones.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task<A>)> {
        self.order
            .values()
            .filter_map(|&id| self.tasks.get(id).map(|t| (id, t)))
    }

    /// True once time has passed `end` or no task is left under the cursor.
    pub fn completed(&self) -> bool {
        self.time > self.end || (self.cursor.is_none() && (self.initialized || self.order.is_empty()))
    }

    // -- Scheduling --

    /// Insert a task. Tasks may not be scheduled before the current time
    /// once stepping has begun.
    pub fn add(&mut self, mut task: Task<A>) -> ModelResult<TaskId> {
        self.check_time(task.time)?;
        task.seq = self.next_seq;
        self.next_seq += 1;
        let key = task.key();
        let id = self.tasks.insert(task);
        self.order.insert(key, id);
        if self.initialized && self.cursor.is_none() {
            self.cursor = Some(key);
        }
        Ok(id)
    }

    /// Remove a task entirely.
    pub fn remove(&mut self, id: TaskId) -> Option<Task<A>> {
        let task = self.tasks.remove(id)?;
        self.unlink(task.key());
        Some(task)
    }

    /// Move a task to a new time. It is re-added behind every task already
    /// present at that (time, priority).
    pub fn reschedule(&mut self, id: TaskId, time: SimTime) -> ModelResult<()> {
        self.check_time(time)?;
        let seq = self.next_seq;
        let Some(task) = self.tasks.get_mut(id) else {
            return Err(ModelError::InvalidTaskTime {
                detail: "cannot reschedule a task that is not queued".into(),
            });
        };
        let old = task.key();
        task.time = time;
        task.seq = seq;
        let key = task.key();
        self.next_seq += 1;
        self.unlink(old);
        self.order.insert(key, id);
        if self.initialized && self.cursor.is_none() {
            self.cursor = Some(key);
        }
        Ok(())
    }

    /// Make a task permanently inert. It keeps its slot in the order.
    pub fn kill(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) => {
                task.kill();
                true
            }
            None => false,
        }
    }

    fn check_time(&self, time: SimTime) -> ModelResult<()> {
        if self.initialized && time < self.time {
            return Err(ModelError::InvalidTaskTime {
                detail: format!("task scheduled at {time} before current time {}", self.time),
            });
        }
        Ok(())
    }

    fn unlink(&mut self, key: TaskKey) {
        self.order.remove(&key);
        if self.cursor == Some(key) {
            self.cursor = self.next_key_after(&key);
        }
    }

    fn next_key_after(&self, key: &TaskKey) -> Option<TaskKey> {
        self.order
            .range((Excluded(*key), Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    // -- Blockers --

    /// Intern a blocker name. New blockers start unblocked.
    pub fn blocker(&mut self, name: &str) -> BlockerId {
        if let Some(&id) = self.blocker_index.get(name) {
            return id;
        }
        let id = BlockerId(self.blocker_state.len() as u32);
        self.blocker_state.push(false);
        self.blocker_names.push(name.to_string());
        self.blocker_index.insert(name.to_string(), id);
        id
    }

    pub fn find_blocker(&self, name: &str) -> Option<BlockerId> {
        self.blocker_index.get(name).copied()
    }

    pub fn blocker_name(&self, id: BlockerId) -> Option<&str> {
        self.blocker_names.get(id.0 as usize).map(String::as_str)
    }

    pub fn block(&mut self, id: BlockerId) {
        if let Some(state) = self.blocker_state.get_mut(id.0 as usize) {
            *state = true;
        }
    }

    pub fn unblock(&mut self, id: BlockerId) {
        if let Some(state) = self.blocker_state.get_mut(id.0 as usize) {
            *state = false;
        }
    }

    pub fn is_blocked(&self, id: BlockerId) -> bool {
        self.blocker_state.get(id.0 as usize).copied().unwrap_or(false)
    }

    fn is_gated(&self, id: TaskId) -> bool {
        self.tasks
            .get(id)
            .and_then(|t| t.blocker)
            .is_some_and(|b| self.is_blocked(b))
    }

    // -- Subscribers --

    pub fn subscribe(&mut self, listener: TimeListener<A>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber { id, listener });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if let Some(pos) = self.subscribers.iter().position(|s| s.id == id) {
            self.subscribers.remove(pos);
            return true;
        }
        if self.notifying {
            self.dropped_subscriptions.push(id);
            return true;
        }
        false
    }

    fn set_time(&mut self, new: SimTime, ctx: &mut A::Context) -> ModelResult<()> {
        let change = TimeChange::new(self.time, new);
        self.time = new;
        if self.subscribers.is_empty() {
            return Ok(());
        }
        let mut subscribers = std::mem::take(&mut self.subscribers);
        self.notifying = true;
        let mut result = Ok(());
        for sub in subscribers.iter_mut() {
            if let Err(e) = (sub.listener)(ctx, self, &change) {
                result = Err(e);
                break;
            }
        }
        self.notifying = false;
        // Listeners registered during notification go after the existing ones.
        subscribers.append(&mut self.subscribers);
        let dropped = std::mem::take(&mut self.dropped_subscriptions);
        subscribers.retain(|s| !dropped.contains(&s.id));
        self.subscribers = subscribers;
        result
    }

    // -- Stepping --

    /// Ask the queue to seek to `time` once the running action returns,
    /// instead of advancing the cursor.
    pub fn request_time_shift(&mut self, time: SimTime) {
        self.time_shift = Some(time);
    }

    /// True while the queue is seeking to a time requested by an action.
    pub fn is_shifting(&self) -> bool {
        self.shifting
    }

    /// Execute the task under the cursor and advance.
    ///
    /// The first call only positions the cursor on the earliest task. When
    /// the last task has run, time is pushed past `end` (ten times the last
    /// task's time, at least `end + 1`) without notifying subscribers.
    pub fn step(&mut self, ctx: &mut A::Context) -> ModelResult<()> {
        if !self.initialized {
            self.initialized = true;
            self.cursor = self.order.keys().next().copied();
            if let Some((time, _, _)) = self.cursor {
                self.time = time;
            }
            trace!(time = %self.time, tasks = self.order.len(), "queue initialized");
            return Ok(());
        }
        let Some(key) = self.cursor else {
            self.push_past_end(self.time);
            return Ok(());
        };
        if let Some(&id) = self.order.get(&key) {
            self.execute(id, ctx)?;
        }
        if let Some(target) = self.time_shift.take() {
            trace!(from = %self.time, to = %target, "time shift");
            let outer = std::mem::replace(&mut self.shifting, true);
            let result = self.move_to(target, ctx);
            self.shifting = outer;
            return result;
        }
        self.cursor = self.next_key_after(&key);
        match self.cursor {
            Some((time, _, _)) if time != self.time => self.set_time(time, ctx)?,
            Some(_) => {}
            None => self.push_past_end(key.0),
        }
        Ok(())
    }

    /// Move the clock back to the time of the previous batch, roll that
    /// batch back in reverse order, and put the cursor on its first task.
    pub fn step_back(&mut self, ctx: &mut A::Context) -> ModelResult<()> {
        let upper = match self.cursor {
            Some(key) => Excluded(key),
            None => Unbounded,
        };
        let Some((&prev, _)) = self.order.range((Unbounded, upper)).next_back() else {
            return Err(ModelError::InvalidTaskTime {
                detail: format!("nothing to roll back before {}", self.time),
            });
        };
        let batch_time = prev.0;
        let batch_start: TaskKey = (batch_time, i32::MIN, 0);
        let batch: Vec<TaskId> = self
            .order
            .range((Included(batch_start), upper))
            .rev()
            .map(|(_, &id)| id)
            .collect();
        trace!(time = %batch_time, tasks = batch.len(), "rolling back batch");
        if batch_time != self.time {
            self.set_time(batch_time, ctx)?;
        }
        for id in batch {
            self.rollback(id, ctx)?;
        }
        self.cursor = self
            .order
            .range((Included(batch_start), Unbounded))
            .next()
            .map(|(k, _)| *k);
        Ok(())
    }

    /// Step forward or backward until the queue's time equals `target`.
    ///
    /// Fails if `target` is not the time of any batch on the way.
    pub fn move_to(&mut self, target: SimTime, ctx: &mut A::Context) -> ModelResult<()> {
        while self.time != target {
            if self.time < target {
                if self.completed() {
                    return Err(self.unreachable(target));
                }
                self.step(ctx)?;
                if self.time > target {
                    return Err(self.unreachable(target));
                }
            } else {
                self.step_back(ctx)?;
                if self.time < target {
                    return Err(self.unreachable(target));
                }
            }
        }
        Ok(())
    }

    fn unreachable(&self, target: SimTime) -> ModelError {
        ModelError::InvalidTaskTime {
            detail: format!("no task at {target} to seek to (queue at {})", self.time),
        }
    }

    fn push_past_end(&mut self, last: SimTime) {
        let floor = self.end + SimTime::new(Decimal::ONE, self.end.unit());
        self.time = last.times(10).max(floor);
        self.cursor = None;
    }

    fn execute(&mut self, id: TaskId, ctx: &mut A::Context) -> ModelResult<()> {
        let gated = self.is_gated(id);
        let Some(task) = self.tasks.get_mut(id) else {
            return Ok(());
        };
        if task.admit_forward(gated) != Gate::Run {
            return Ok(());
        }
        let Some(mut action) = task.action.take() else {
            return Ok(());
        };
        let result = action.execute(id, ctx, self);
        if let Some(task) = self.tasks.get_mut(id) {
            task.action = Some(action);
        }
        self.executed += 1;
        result
    }

    fn rollback(&mut self, id: TaskId, ctx: &mut A::Context) -> ModelResult<()> {
        let gated = self.is_gated(id);
        let Some(task) = self.tasks.get_mut(id) else {
            return Ok(());
        };
        if task.admit_reverse(gated) != Gate::Run {
            return Ok(());
        }
        let Some(mut action) = task.action.take() else {
            return Ok(());
        };
        let result = action.rollback(id, ctx, self);
        if let Some(task) = self.tasks.get_mut(id) {
            task.action = Some(action);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeUnit;

    fn at(t: i64) -> SimTime {
        SimTime::from_int(t, TimeUnit::Years)
    }

    #[derive(Debug, Default)]
    struct Ledger {
        log: Vec<String>,
        total: i64,
    }

    #[derive(Debug)]
    enum Op {
        Add(&'static str, i64),
        Shift(SimTime),
        Block(BlockerId),
    }

    impl Action for Op {
        type Context = Ledger;

        fn execute(&mut self, _: TaskId, ctx: &mut Ledger, queue: &mut TaskQueue<Op>) -> ModelResult<()> {
            match self {
                Op::Add(name, n) => {
                    ctx.total += *n;
                    ctx.log.push(format!("+{name}"));
                }
                Op::Shift(t) => {
                    ctx.log.push("shift".into());
                    queue.request_time_shift(*t);
                }
                Op::Block(b) => queue.block(*b),
            }
            Ok(())
        }

        fn rollback(&mut self, _: TaskId, ctx: &mut Ledger, _: &mut TaskQueue<Op>) -> ModelResult<()> {
            if let Op::Add(name, n) = self {
                ctx.total -= *n;
                ctx.log.push(format!("-{name}"));
            }
            Ok(())
        }
    }

    fn run_all(queue: &mut TaskQueue<Op>, ledger: &mut Ledger) {
        while !queue.completed() {
            queue.step(ledger).unwrap();
        }
    }

    #[test]
    fn executes_in_time_then_priority_then_insertion_order() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(2), 0, Op::Add("c", 1))).unwrap();
        q.add(Task::new(at(1), 5, Op::Add("b", 1))).unwrap();
        q.add(Task::new(at(1), -5, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(2), 0, Op::Add("d", 1))).unwrap();
        run_all(&mut q, &mut l);
        assert_eq!(l.log, ["+a", "+b", "+c", "+d"]);
    }

    #[test]
    fn first_step_only_positions_cursor() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(3), 0, Op::Add("a", 1))).unwrap();
        q.step(&mut l).unwrap();
        assert_eq!(q.time(), at(3));
        assert!(l.log.is_empty());
        assert!(q.peek().is_some());
    }

    #[test]
    fn exhaustion_pushes_time_past_end() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(2), 0, Op::Add("a", 1))).unwrap();
        run_all(&mut q, &mut l);
        assert!(q.completed());
        assert_eq!(q.time(), at(20));

        let mut q = TaskQueue::new(at(0), at(100));
        q.add(Task::new(at(2), 0, Op::Add("a", 1))).unwrap();
        run_all(&mut q, &mut l);
        assert_eq!(q.time(), at(101));
    }

    #[test]
    fn step_back_rolls_back_whole_batch() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(1), 1, Op::Add("b", 10))).unwrap();
        q.add(Task::new(at(2), 0, Op::Add("c", 100))).unwrap();
        for _ in 0..3 {
            q.step(&mut l).unwrap();
        }
        assert_eq!(q.time(), at(2));
        assert_eq!(l.total, 11);

        q.step_back(&mut l).unwrap();
        assert_eq!(q.time(), at(1));
        assert_eq!(l.total, 0);
        assert_eq!(l.log[2..], ["-b", "-a"]);
        assert!(q.step_back(&mut l).is_err());
    }

    #[test]
    fn gated_tasks_neither_run_nor_roll_back() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        let gate = q.blocker("gate");
        let id = q
            .add(Task::new(at(1), 0, Op::Add("a", 1)).gated_by(gate).expires(1))
            .unwrap();
        q.add(Task::new(at(2), 0, Op::Add("b", 1))).unwrap();
        q.block(gate);
        q.step(&mut l).unwrap();
        q.step(&mut l).unwrap();
        assert!(l.log.is_empty());
        assert_eq!(q.get(id).unwrap().remaining(), Some(1));

        q.step_back(&mut l).unwrap();
        assert!(l.log.is_empty());
        q.unblock(gate);
        q.step(&mut l).unwrap();
        assert_eq!(l.log, ["+a"]);
        assert!(q.get(id).unwrap().is_dead_forward());
    }

    #[test]
    fn time_shift_seeks_back_and_replays() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(2), 0, Op::Shift(at(1))).expires(1)).unwrap();
        run_all(&mut q, &mut l);
        assert_eq!(l.log, ["+a", "shift", "-a", "+a"]);
        assert_eq!(l.total, 1);
    }

    #[test]
    fn subscribers_see_every_time_change() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        let sink = Rc::clone(&seen);
        let sub = q.subscribe(Box::new(move |_, _, change| {
            sink.borrow_mut().push((change.old, change.new, change.delta));
            Ok(())
        }));
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(3), 0, Op::Add("b", 1))).unwrap();
        run_all(&mut q, &mut l);
        // Initialization and exhaustion do not notify.
        assert_eq!(*seen.borrow(), vec![(at(1), at(3), at(2))]);

        assert!(q.unsubscribe(sub));
        assert!(!q.unsubscribe(sub));
    }

    #[test]
    fn step_back_moves_the_clock_before_rolling_back() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.subscribe(Box::new(|ctx: &mut Ledger, _, change| {
            ctx.log.push(format!("clock {}", change.new));
            Ok(())
        }));
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(2), 0, Op::Add("b", 1))).unwrap();
        for _ in 0..2 {
            q.step(&mut l).unwrap();
        }
        l.log.clear();

        q.step_back(&mut l).unwrap();
        assert_eq!(l.log, [format!("clock {}", at(1)), "-a".to_string()]);
    }

    #[test]
    fn backward_changes_report_whether_they_are_shifts() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        let sink = Rc::clone(&seen);
        q.subscribe(Box::new(move |_, queue: &mut TaskQueue<Op>, change| {
            if !change.is_forward() {
                sink.borrow_mut().push(queue.is_shifting());
            }
            Ok(())
        }));
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(2), 0, Op::Shift(at(1))).expires(1)).unwrap();
        q.add(Task::new(at(3), 0, Op::Add("b", 1))).unwrap();
        run_all(&mut q, &mut l);
        assert!(!q.is_shifting());

        q.step_back(&mut l).unwrap();
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn listener_errors_propagate() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.subscribe(Box::new(|_, _, _| {
            Err(ModelError::StockOverflow { stock: "s".into() })
        }));
        q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        q.add(Task::new(at(2), 0, Op::Add("b", 1))).unwrap();
        q.step(&mut l).unwrap();
        assert_eq!(q.step(&mut l).unwrap_err().code(), 3001);
    }

    #[test]
    fn remove_reschedule_and_kill() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        let a = q.add(Task::new(at(1), 0, Op::Add("a", 1))).unwrap();
        let b = q.add(Task::new(at(2), 0, Op::Add("b", 1))).unwrap();
        let c = q.add(Task::new(at(3), 0, Op::Add("c", 1))).unwrap();
        q.reschedule(a, at(4)).unwrap();
        assert!(q.kill(b));
        assert!(q.remove(c).is_some());
        assert!(q.remove(c).is_none());
        run_all(&mut q, &mut l);
        assert_eq!(l.log, ["+a"]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn scheduling_in_the_past_is_rejected() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        q.add(Task::new(at(5), 0, Op::Add("a", 1))).unwrap();
        q.step(&mut l).unwrap();
        let err = q.add(Task::new(at(4), 0, Op::Add("late", 1))).unwrap_err();
        assert_eq!(err.code(), 1001);
    }

    #[test]
    fn actions_can_toggle_blockers() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        let gate = q.blocker("late");
        assert_eq!(q.blocker("late"), gate);
        assert_eq!(q.blocker_name(gate), Some("late"));
        q.add(Task::new(at(1), 0, Op::Block(gate))).unwrap();
        q.add(Task::new(at(2), 0, Op::Add("x", 1)).gated_by(gate)).unwrap();
        run_all(&mut q, &mut l);
        assert!(l.log.is_empty());
        assert!(q.is_blocked(gate));
    }

    #[test]
    fn move_to_walks_both_directions() {
        let mut q = TaskQueue::new(at(0), at(10));
        let mut l = Ledger::default();
        for t in 1..=4 {
            q.add(Task::new(at(t), 0, Op::Add("n", t))).unwrap();
        }
        q.move_to(at(3), &mut l).unwrap();
        assert_eq!(l.total, 1 + 2);
        q.move_to(at(1), &mut l).unwrap();
        assert_eq!(l.total, 0);
        assert!(q.move_to(SimTime::new(Decimal::new(15, 1), TimeUnit::Years), &mut l).is_err());
    }
}
