//! Cadence Core -- a hybrid discrete-event / continuous simulation kernel.
//!
//! A model is a set of stocks (accumulators), flows between them, auxiliary
//! variables and triggers, partitioned into solvers that each step on their
//! own time step. Everything that happens is a task on one totally ordered
//! [`queue::TaskQueue`] that can be stepped backwards as well as forwards.
//!
//! # Stepping
//!
//! Each solver queues its own steps:
//!
//! 1. **Evaluate** -- stocks, flows and variables are evaluated at the step
//!    time through the external [`eval::Evaluator`], and recorded.
//! 2. **Triggers** -- condition and probability triggers are checked and
//!    their actions queued.
//! 3. **Advance** -- when the clock moves forward, every solver's
//!    conservation subscriber moves `rate × interval` along its flows,
//!    respecting non-negative stocks and conveyor delays.
//!
//! Euler (RK1) solvers use one task per step. RK4 solvers evaluate four
//! stages by advancing the clock provisionally and rolling it back; see
//! [`solver::rk4`].
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`sim::Simulation`] | Setup, run loop, pausing, queries |
//! | [`model::Model`] | Primitives and solvers, built with `*Def` builders |
//! | [`queue::TaskQueue`] | Ordered, gated, reversible task scheduler |
//! | [`clock::SimTime`] | Exact decimal clock value with a time unit |
//! | [`value::Amount`] | Stock contents: a scalar or a keyed vector |
//! | [`cluster::ClusterOrder`] | Order for applying constrained flows |
//! | [`error::ModelError`] | Typed errors with stable codes |

pub mod clock;
pub mod cluster;
pub mod config;
pub mod conservation;
pub mod error;
pub mod eval;
pub mod fixed;
pub mod flow;
pub mod id;
pub mod model;
pub mod queue;
pub mod rng;
pub mod sim;
pub mod sink;
pub mod solver;
pub mod stock;
pub mod task;
pub mod trigger;
pub mod value;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
