//! Cross-crate tests: model files loaded by `cadence-data`, run by
//! `cadence-core`, summarised by `cadence-stats`.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use cadence_core::sim::{RunState, Simulation};
use cadence_core::test_utils::{fixed, magnitude};
use cadence_data::load_model;
use cadence_stats::{SeriesStats, StatsConfig};

fn write_model(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cadence_e2e_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn simulate(path: &PathBuf) -> (Simulation, Rc<RefCell<SeriesStats>>) {
    let loaded = load_model(path).unwrap();
    let stats = Rc::new(RefCell::new(SeriesStats::new(StatsConfig::default())));
    let sim = Simulation::new(loaded.model, loaded.evaluator)
        .unwrap()
        .with_sink(stats.clone());
    (sim, stats)
}

// ===========================================================================
// Reservoir: TOML, Euler, non-negative drain
// ===========================================================================

const RESERVOIR: &str = r#"
[config]
time_start = 0
time_length = 10
time_step = 1
time_units = "years"

[[stocks]]
name = "reservoir"
initial = 50
non_negative = true
display = true

[[stocks]]
name = "town"
initial = 0
display = true

[[flows]]
name = "supply"
from = "reservoir"
to = "town"
rate = 8
"#;

#[test]
fn reservoir_runs_dry_without_going_negative() {
    let path = write_model("reservoir.toml", RESERVOIR);
    let (mut sim, stats) = simulate(&path);
    assert_eq!(sim.run().unwrap(), RunState::Completed);

    assert_eq!(magnitude(&sim.stock_level("reservoir").unwrap()), 0.0);
    assert_eq!(magnitude(&sim.stock_level("town").unwrap()), 50.0);

    let stats = stats.borrow();
    let reservoir = stats.series("root", "reservoir").unwrap();
    assert_eq!(reservoir.count(), 11);
    assert_eq!(reservoir.max(), Some(fixed(50.0)));
    assert_eq!(reservoir.min(), Some(fixed(0.0)));
    assert_eq!(stats.series("root", "town").unwrap().latest(), Some(fixed(50.0)));
}

// ===========================================================================
// Exponential growth: RON, RK4, pausing
// ===========================================================================

const GROWTH: &str = r#"(
    config: (
        time_start: 0,
        time_length: 10,
        time_step: 1,
        time_units: years,
        algorithm: "rk4",
        pause_interval: Some(5),
    ),
    stocks: [
        (name: "population", initial: 10, display: true),
    ],
    flows: [
        (name: "births", to: Some("population"), rate: (terms: [("population", 0.2)])),
    ],
)"#;

#[test]
fn rk4_growth_pauses_and_resumes() {
    let path = write_model("growth.ron", GROWTH);
    let (mut sim, stats) = simulate(&path);

    assert_eq!(sim.run().unwrap(), RunState::Paused);
    let halfway = magnitude(&sim.stock_level("population").unwrap());
    assert!(halfway > 10.0);

    let mut state = sim.run().unwrap();
    while state == RunState::Paused {
        state = sim.run().unwrap();
    }

    // 10 * e^(0.2 * 10)
    let end = magnitude(&sim.stock_level("population").unwrap());
    let exact = 10.0 * 2.0f64.exp();
    assert!((end - exact).abs() < 0.05, "rk4 gave {end}");

    let stats = stats.borrow();
    let population = stats.series("root", "population").unwrap();
    assert_eq!(population.count(), 11);
    assert_eq!(population.min(), Some(fixed(10.0)));
}

// ===========================================================================
// Timeout trigger: JSON, sub-solver
// ===========================================================================

#[test]
fn json_timeout_trigger_restocks_warehouse() {
    let path = write_model(
        "warehouse.json",
        r#"{
  "config": {"time_start": 0, "time_length": 12, "time_step": 1, "time_units": "months"},
  "solvers": [{"name": "shop", "time_step": 1}],
  "stocks": [{"name": "warehouse", "initial": 30, "non_negative": true, "solver": "shop", "display": true}],
  "flows": [{"name": "sales", "from": "warehouse", "rate": 10}],
  "triggers": [{
    "name": "restock",
    "solver": "shop",
    "when": {"timeout": {"after": 4, "repeat": true}},
    "action": {"target": "warehouse", "value": 30}
  }]
}"#,
    );
    let (mut sim, stats) = simulate(&path);
    sim.run().unwrap();

    let id = sim.model().find_trigger("restock").unwrap();
    assert_eq!(sim.model().trigger(id).unwrap().fired(), 3);
    // Restocked at 12, then nothing more moves.
    assert_eq!(magnitude(&sim.stock_level("warehouse").unwrap()), 30.0);
    assert_eq!(stats.borrow().series("shop", "warehouse").unwrap().count(), 13);
}
