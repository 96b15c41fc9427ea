//! Where recorded values go.
//!
//! Each solver records one [`Frame`] per time point it steps through, holding
//! the values of its displayed entities. A step that is rolled back and
//! replayed is recorded only once.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::value::Value;

/// Values of displayed entities at one recorded time point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub solver: String,
    pub index: u64,
    pub time: SimTime,
    pub values: Vec<(String, Value)>,
}

impl Frame {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Receives frames as the run progresses.
pub trait ResultSink {
    fn record(&mut self, frame: &Frame);
}

/// Keeps every frame in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames recorded by one solver, in order.
    pub fn solver<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Frame> + 'a {
        self.frames.iter().filter(move |f| f.solver == name)
    }
}

impl ResultSink for MemorySink {
    fn record(&mut self, frame: &Frame) {
        self.frames.push(frame.clone());
    }
}

/// Lets the host keep a handle on a sink it has given to a simulation.
impl<S: ResultSink> ResultSink for Rc<RefCell<S>> {
    fn record(&mut self, frame: &Frame) {
        self.borrow_mut().record(frame);
    }
}
