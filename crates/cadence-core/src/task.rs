//! Deferred units of work owned by a [`TaskQueue`](crate::queue::TaskQueue).
//!
//! A task carries its position in the queue order (`time`, `priority`,
//! sequence id), a payload action, and the bookkeeping that decides whether a
//! forward execution or a rollback actually reaches the action:
//!
//! 1. **Dead** -- a dead direction is inert forever.
//! 2. **Gate** -- while the task's blocker is set, nothing happens and no
//!    budget is consumed.
//! 3. **Skip** -- forward executions swallowed before the action first runs.
//! 4. **Expiry** -- remaining runs; the direction dies when it hits zero.

use crate::clock::SimTime;
use crate::id::BlockerId;

/// Ordering key of a task: time, then priority (lower first), then sequence.
pub type TaskKey = (SimTime, i32, u64);

/// Outcome of asking a task to run in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Run the action.
    Run,
    /// Consumed a skip; do nothing else.
    Skipped,
    /// Dead or blocked; nothing consumed.
    Inert,
}

/// A scheduled unit of work.
#[derive(Debug)]
pub struct Task<A> {
    pub(crate) seq: u64,
    pub(crate) time: SimTime,
    pub(crate) priority: i32,
    /// Taken out while the action runs so it can borrow the queue mutably.
    pub(crate) action: Option<A>,
    pub(crate) expires: Option<u32>,
    pub(crate) reverse_expires: Option<u32>,
    pub(crate) skip: u32,
    pub(crate) blocker: Option<BlockerId>,
    pub(crate) dead_forward: bool,
    pub(crate) dead_reverse: bool,
}

impl<A> Task<A> {
    /// A task running `action` at `time` with the given priority. Sequence
    /// ids are assigned when the task is added to a queue.
    pub fn new(time: SimTime, priority: i32, action: A) -> Self {
        Self {
            seq: 0,
            time,
            priority,
            action: Some(action),
            expires: None,
            reverse_expires: None,
            skip: 0,
            blocker: None,
            dead_forward: false,
            dead_reverse: false,
        }
    }

    /// Die after `n` forward executions.
    pub fn expires(mut self, n: u32) -> Self {
        self.expires = Some(n);
        self
    }

    /// Die after `n` rollbacks.
    pub fn reverse_expires(mut self, n: u32) -> Self {
        self.reverse_expires = Some(n);
        self
    }

    /// Swallow the first `n` forward executions.
    pub fn skip(mut self, n: u32) -> Self {
        self.skip = n;
        self
    }

    /// Gate both directions on `blocker`.
    pub fn gated_by(mut self, blocker: BlockerId) -> Self {
        self.blocker = Some(blocker);
        self
    }

    pub fn key(&self) -> TaskKey {
        (self.time, self.priority, self.seq)
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn action(&self) -> Option<&A> {
        self.action.as_ref()
    }

    pub fn action_mut(&mut self) -> Option<&mut A> {
        self.action.as_mut()
    }

    pub fn remaining(&self) -> Option<u32> {
        self.expires
    }

    pub fn is_dead(&self) -> bool {
        self.dead_forward && self.dead_reverse
    }

    pub fn is_dead_forward(&self) -> bool {
        self.dead_forward
    }

    pub fn is_dead_reverse(&self) -> bool {
        self.dead_reverse
    }

    /// Mark both directions dead.
    pub fn kill(&mut self) {
        self.dead_forward = true;
        self.dead_reverse = true;
    }

    /// Decide whether a forward execution reaches the action, consuming
    /// skip or expiry budget accordingly.
    pub(crate) fn admit_forward(&mut self, gated: bool) -> Gate {
        if self.dead_forward || gated {
            return Gate::Inert;
        }
        if self.skip > 0 {
            self.skip -= 1;
            return Gate::Skipped;
        }
        if let Some(left) = self.expires.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.dead_forward = true;
            }
        }
        Gate::Run
    }

    /// Reverse counterpart of [`admit_forward`](Self::admit_forward).
    /// Skips only apply forward.
    pub(crate) fn admit_reverse(&mut self, gated: bool) -> Gate {
        if self.dead_reverse || gated {
            return Gate::Inert;
        }
        if let Some(left) = self.reverse_expires.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.dead_reverse = true;
            }
        }
        Gate::Run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeUnit;

    fn task() -> Task<()> {
        Task::new(SimTime::from_int(1, TimeUnit::Years), 0, ())
    }

    #[test]
    fn expiry_kills_forward_only() {
        let mut t = task().expires(2);
        assert_eq!(t.admit_forward(false), Gate::Run);
        assert!(!t.is_dead_forward());
        assert_eq!(t.admit_forward(false), Gate::Run);
        assert!(t.is_dead_forward());
        assert!(!t.is_dead_reverse());
        assert_eq!(t.admit_forward(false), Gate::Inert);
        assert_eq!(t.admit_reverse(false), Gate::Run);
    }

    #[test]
    fn gating_consumes_nothing() {
        let mut t = task().expires(1).skip(1);
        assert_eq!(t.admit_forward(true), Gate::Inert);
        assert_eq!(t.admit_reverse(true), Gate::Inert);
        assert_eq!(t.remaining(), Some(1));
        assert_eq!(t.admit_forward(false), Gate::Skipped);
        assert_eq!(t.remaining(), Some(1));
        assert_eq!(t.admit_forward(false), Gate::Run);
        assert!(t.is_dead_forward());
    }

    #[test]
    fn kill_marks_both_directions() {
        let mut t = task();
        t.kill();
        assert!(t.is_dead());
        assert_eq!(t.admit_forward(false), Gate::Inert);
        assert_eq!(t.admit_reverse(false), Gate::Inert);
    }

    #[test]
    fn reverse_budget_is_separate() {
        let mut t = task().reverse_expires(1);
        assert_eq!(t.admit_reverse(false), Gate::Run);
        assert!(t.is_dead_reverse());
        assert!(!t.is_dead_forward());
    }
}
