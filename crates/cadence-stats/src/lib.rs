//! Result statistics for the Cadence kernel.
//!
//! [`SeriesStats`] is a [`ResultSink`]: hand it to a simulation and it keeps,
//! for every displayed entity of every solver, the running minimum, maximum
//! and mean plus a bounded history of recent values. Vectors are tracked by
//! the sum of their components; booleans, text and entity references are
//! skipped.
//!
//! # Usage
//!
//! ```ignore
//! let stats = Rc::new(RefCell::new(SeriesStats::new(StatsConfig::default())));
//! let mut sim = Simulation::new(model, evaluator)?.with_sink(stats.clone());
//! sim.run()?;
//! let mean = stats.borrow().series("root", "population").unwrap().mean();
//! ```

use std::collections::HashMap;

use cadence_core::clock::SimTime;
use cadence_core::fixed::Fixed128;
use cadence_core::sink::{Frame, ResultSink};
use cadence_core::value::Value;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Number of recent values kept per series.
    pub history_capacity: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { history_capacity: 256 }
    }
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer of [`Fixed128`] values.
///
/// When full, the oldest entry is overwritten. Iterates oldest-to-newest.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<Fixed128>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![Fixed128::ZERO; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: Fixed128) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn latest(&self) -> Option<Fixed128> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.capacity() - 1) % self.capacity();
        Some(self.data[idx])
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Fixed128> + '_ {
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).map(move |i| self.data[(start + i) % self.capacity()])
    }

    pub fn to_vec(&self) -> Vec<Fixed128> {
        self.iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Running statistics of one entity.
#[derive(Debug, Clone)]
pub struct Series {
    count: u64,
    min: Fixed128,
    max: Fixed128,
    /// Saturating sum of every recorded value.
    sum: Fixed128,
    first: Option<SimTime>,
    last: Option<SimTime>,
    history: RingBuffer,
}

impl Series {
    fn new(capacity: usize) -> Self {
        Self {
            count: 0,
            min: Fixed128::MAX,
            max: Fixed128::MIN,
            sum: Fixed128::ZERO,
            first: None,
            last: None,
            history: RingBuffer::new(capacity),
        }
    }

    fn push(&mut self, time: SimTime, value: Fixed128) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum = self.sum.saturating_add(value);
        self.first.get_or_insert(time);
        self.last = Some(time);
        self.history.push(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<Fixed128> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<Fixed128> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<Fixed128> {
        if self.count == 0 {
            return None;
        }
        let count = Fixed128::checked_from_num(self.count)?;
        self.sum.checked_div(count)
    }

    pub fn latest(&self) -> Option<Fixed128> {
        self.history.latest()
    }

    /// Time of the first and last recorded value.
    pub fn span(&self) -> Option<(SimTime, SimTime)> {
        Some((self.first?, self.last?))
    }

    pub fn history(&self) -> &RingBuffer {
        &self.history
    }
}

fn magnitude(value: &Value) -> Option<Fixed128> {
    match value {
        Value::Quantity(q) => Some(q.magnitude),
        Value::Vector(v) => v
            .iter()
            .filter_map(|(_, item)| item.as_quantity())
            .try_fold(Fixed128::ZERO, |acc, q| acc.checked_add(q.magnitude)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SeriesStats
// ---------------------------------------------------------------------------

/// Statistics for every displayed entity, keyed by solver and entity name.
#[derive(Debug, Clone, Default)]
pub struct SeriesStats {
    config: StatsConfig,
    series: HashMap<(String, String), Series>,
    frames: u64,
}

impl SeriesStats {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            series: HashMap::new(),
            frames: 0,
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Frames received so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn series(&self, solver: &str, entity: &str) -> Option<&Series> {
        self.series.get(&(solver.to_string(), entity.to_string()))
    }

    pub fn tracked(&self) -> usize {
        self.series.len()
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.frames = 0;
    }
}

impl ResultSink for SeriesStats {
    fn record(&mut self, frame: &Frame) {
        self.frames += 1;
        let capacity = self.config.history_capacity;
        for (name, value) in &frame.values {
            let Some(m) = magnitude(value) else {
                continue;
            };
            self.series
                .entry((frame.solver.clone(), name.clone()))
                .or_insert_with(|| Series::new(capacity))
                .push(frame.time, m);
        }
    }
}
