//! Reads model files and builds a [`Model`] with its evaluator.
//!
//! Provides format detection (RON/JSON/TOML), deserialization and the
//! resolution of solver references used by [`load_model`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cadence_core::clock::SimTime;
use cadence_core::error::ModelError;
use cadence_core::fixed::Fixed128;
use cadence_core::id::SolverId;
use cadence_core::model::{FlowDef, Model, ROOT_SOLVER, StockDef, TriggerDef, VariableDef};
use cadence_core::trigger::TriggerKind;
use cadence_core::value::Unit;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::linear::{Equation, Linear, LinearEvaluator, OutOfRange, number};
use crate::schema::{ExprData, ModelData, TriggerWhen};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during model loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A solver name could not be resolved.
    #[error("unresolved solver '{name}' in {file}")]
    UnresolvedSolver { file: PathBuf, name: String },

    /// A number has no fixed-point representation (NaN, infinite or too large).
    #[error("invalid number for '{primitive}' in {file}: {source}")]
    InvalidNumber {
        file: PathBuf,
        primitive: String,
        #[source]
        source: OutOfRange,
    },

    /// The definitions were read but do not form a valid model.
    #[error("invalid model in {file}: {source}")]
    Model {
        file: PathBuf,
        #[source]
        source: ModelError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `path` is only used for errors.
pub fn deserialize_str<T: DeserializeOwned>(content: &str, format: Format, path: &Path) -> Result<T, DataLoadError> {
    let parse = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Building
// ===========================================================================

/// A model ready to hand to [`Simulation::new`](cadence_core::sim::Simulation::new).
pub struct LoadedModel {
    pub model: Model,
    pub evaluator: LinearEvaluator,
}

/// Load and build the model defined in `path`.
pub fn load_model(path: &Path) -> Result<LoadedModel, DataLoadError> {
    let data: ModelData = deserialize_file(path)?;
    let loaded = build_model(data, path)?;
    info!(
        file = %path.display(),
        stocks = loaded.model.stocks().count(),
        flows = loaded.model.flows().count(),
        equations = loaded.evaluator.len(),
        "model loaded"
    );
    Ok(loaded)
}

/// Turn deserialized definitions into a model. `file` is only used for errors.
pub fn build_model(data: ModelData, file: &Path) -> Result<LoadedModel, DataLoadError> {
    let invalid = |source: ModelError| DataLoadError::Model {
        file: file.to_path_buf(),
        source,
    };
    let mut model = Model::new(data.config).map_err(invalid)?;
    let units = model.time_unit();
    let mut ev = LinearEvaluator::new();

    let mut solvers: HashMap<String, SolverId> = HashMap::new();
    solvers.insert(ROOT_SOLVER.to_string(), model.root());
    for solver in data.solvers {
        let id = model.add_solver(solver.name.clone(), solver.config).map_err(invalid)?;
        solvers.insert(solver.name, id);
    }
    let resolve = |name: &Option<String>| -> Result<Option<SolverId>, DataLoadError> {
        match name {
            None => Ok(None),
            Some(name) => solvers
                .get(name)
                .copied()
                .map(Some)
                .ok_or_else(|| DataLoadError::UnresolvedSolver {
                    file: file.to_path_buf(),
                    name: name.clone(),
                }),
        }
    };

    for stock in data.stocks {
        let initial = ev.compile(Equation::Linear(linear(&stock.initial, &stock.name, file)?));
        let mut def = StockDef::new(stock.name, initial);
        if let Some(unit) = stock.unit {
            def = def.unit(Unit::of(unit));
        }
        if stock.non_negative {
            def = def.non_negative();
        }
        if let Some(delay) = stock.delay {
            def = def.delay(SimTime::new(delay, units));
        }
        if let Some(solver) = resolve(&stock.solver)? {
            def = def.in_solver(solver);
        }
        if stock.display {
            def = def.displayed();
        }
        model.add_stock(def).map_err(invalid)?;
    }

    for flow in data.flows {
        let rate = ev.compile(Equation::Linear(linear(&flow.rate, &flow.name, file)?));
        let mut def = FlowDef::new(flow.name, rate);
        if let Some(from) = flow.from {
            def = def.from(from);
        }
        if let Some(to) = flow.to {
            def = def.to(to);
        }
        if flow.non_negative {
            def = def.non_negative();
        }
        if let Some(solver) = resolve(&flow.solver)? {
            def = def.in_solver(solver);
        }
        if flow.display {
            def = def.displayed();
        }
        model.add_flow(def).map_err(invalid)?;
    }

    for variable in data.variables {
        let value = ev.compile(Equation::Linear(linear(&variable.value, &variable.name, file)?));
        let mut def = VariableDef::new(variable.name, value);
        if let Some(solver) = resolve(&variable.solver)? {
            def = def.in_solver(solver);
        }
        if variable.display {
            def = def.displayed();
        }
        model.add_variable(def).map_err(invalid)?;
    }

    for trigger in data.triggers {
        let kind = match &trigger.when {
            TriggerWhen::Above { expr, threshold } => {
                let condition = Equation::Above(
                    linear(expr, &trigger.name, file)?,
                    fixed(*threshold, &trigger.name, file)?,
                );
                TriggerKind::Condition(ev.compile(condition))
            }
            TriggerWhen::Below { expr, threshold } => {
                let condition = Equation::Below(
                    linear(expr, &trigger.name, file)?,
                    fixed(*threshold, &trigger.name, file)?,
                );
                TriggerKind::Condition(ev.compile(condition))
            }
            TriggerWhen::Chance { probability } => {
                TriggerKind::Probability(ev.compile(Equation::Linear(linear(probability, &trigger.name, file)?)))
            }
            TriggerWhen::Timeout { after, repeat } => TriggerKind::Timeout {
                after: SimTime::new(*after, units),
                repeat: *repeat,
            },
        };
        let action = ev.compile(Equation::Set {
            target: trigger.action.target.clone(),
            value: linear(&trigger.action.value, &trigger.name, file)?,
        });
        let mut def = TriggerDef::new(trigger.name, kind, action);
        if let Some(solver) = resolve(&trigger.solver)? {
            def = def.in_solver(solver);
        }
        model.add_trigger(def).map_err(invalid)?;
    }

    Ok(LoadedModel { model, evaluator: ev })
}

fn out_of_range(primitive: &str, file: &Path) -> impl FnOnce(OutOfRange) -> DataLoadError {
    let (primitive, file) = (primitive.to_string(), file.to_path_buf());
    move |source| DataLoadError::InvalidNumber { file, primitive, source }
}

fn linear(expr: &ExprData, primitive: &str, file: &Path) -> Result<Linear, DataLoadError> {
    Linear::try_from(expr).map_err(out_of_range(primitive, file))
}

fn fixed(value: f64, primitive: &str, file: &Path) -> Result<Fixed128, DataLoadError> {
    number(value).map_err(out_of_range(primitive, file))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cadence_data_test_{suffix}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const DECAY_TOML: &str = r#"
[config]
time_start = 0
time_length = 4
time_step = 1
time_units = "years"
algorithm = "euler"

[[stocks]]
name = "S"
initial = 100
non_negative = true
display = true

[[flows]]
name = "F"
from = "S"
rate = { terms = [["S", 0.5]] }
"#;

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("model.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("model.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("model.json")).unwrap(), Format::Json);
    }

    #[test]
    fn detect_format_unsupported() {
        assert!(matches!(
            detect_format(Path::new("model.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("model")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // load_model
    // -----------------------------------------------------------------------

    #[test]
    fn load_toml_model() {
        let dir = make_test_dir("toml");
        let path = dir.join("decay.toml");
        fs::write(&path, DECAY_TOML).unwrap();

        let loaded = load_model(&path).unwrap();
        assert_eq!(loaded.model.stocks().count(), 1);
        assert_eq!(loaded.model.flows().count(), 1);
        assert_eq!(loaded.evaluator.len(), 2);

        cleanup(&dir);
    }

    #[test]
    fn load_json_model_with_solver_and_trigger() {
        let dir = make_test_dir("json");
        let path = dir.join("model.json");
        fs::write(
            &path,
            r#"{
  "config": {"time_start": 0, "time_length": 10, "time_step": 1, "time_units": "months", "algorithm": "rk4"},
  "solvers": [{"name": "agents", "time_step": 0.5, "algorithm": "euler"}],
  "stocks": [{"name": "pop", "initial": 5, "solver": "agents"}],
  "triggers": [{"name": "reset", "when": {"timeout": {"after": 3, "repeat": true}}, "action": {"target": "pop", "value": 5}}]
}"#,
        )
        .unwrap();

        let loaded = load_model(&path).unwrap();
        let agents = loaded.model.find_solver("agents").unwrap();
        let (_, pop) = loaded.model.stocks().next().unwrap();
        assert_eq!(pop.solver(), agents);
        assert!(loaded.model.find_trigger("reset").is_some());

        cleanup(&dir);
    }

    #[test]
    fn unknown_solver_is_unresolved() {
        let data: ModelData = deserialize_str(
            r#"(
    config: (time_start: 0, time_length: 1, time_step: 1, time_units: years),
    stocks: [(name: "x", initial: 1, solver: Some("nowhere"))],
)"#,
            Format::Ron,
            Path::new("bad.ron"),
        )
        .unwrap();
        let err = build_model(data, Path::new("bad.ron")).err().unwrap();
        assert!(matches!(err, DataLoadError::UnresolvedSolver { ref name, .. } if name == "nowhere"));
    }

    #[test]
    fn unknown_algorithm_is_a_parse_error() {
        let result: Result<ModelData, _> = deserialize_str(
            r#"{"config": {"time_start": 0, "time_length": 1, "time_step": 1, "time_units": "years", "algorithm": "rk2"}}"#,
            Format::Json,
            Path::new("bad.json"),
        );
        let err = result.err().unwrap();
        assert!(matches!(err, DataLoadError::Parse { .. }));
        assert!(err.to_string().contains("rk2"));
    }

    #[test]
    fn flow_to_missing_stock_is_a_model_error() {
        let data: ModelData = deserialize_str(
            r#"{"config": {"time_start": 0, "time_length": 1, "time_step": 1, "time_units": "years"},
                "flows": [{"name": "f", "rate": 1, "to": "ghost"}]}"#,
            Format::Json,
            Path::new("bad.json"),
        )
        .unwrap();
        let err = build_model(data, Path::new("bad.json")).err().unwrap();
        match err {
            DataLoadError::Model { source, .. } => assert_eq!(source.code(), 1004),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_numbers_are_load_errors() {
        let dir = make_test_dir("range");
        let path = dir.join("huge.toml");
        fs::write(
            &path,
            r#"
[config]
time_start = 0
time_length = 1
time_step = 1
time_units = "years"

[[stocks]]
name = "galaxy"
initial = 1e30
"#,
        )
        .unwrap();
        let err = load_model(&path).err().unwrap();
        match err {
            DataLoadError::InvalidNumber { primitive, source, .. } => {
                assert_eq!(primitive, "galaxy");
                assert_eq!(source, OutOfRange(1e30));
            }
            other => panic!("unexpected error: {other}"),
        }
        cleanup(&dir);
    }

    #[test]
    fn billions_load_and_run() {
        let dir = make_test_dir("billions");
        let path = dir.join("people.toml");
        fs::write(
            &path,
            r#"
[config]
time_start = 0
time_length = 1
time_step = 1
time_units = "years"

[[stocks]]
name = "people"
initial = 8000000000

[[flows]]
name = "births"
to = "people"
rate = { terms = [["people", 0.5]] }
"#,
        )
        .unwrap();
        let loaded = load_model(&path).unwrap();
        let mut sim = cadence_core::sim::Simulation::new(loaded.model, loaded.evaluator).unwrap();
        sim.run().unwrap();
        let level = sim.stock_level("people").unwrap().total().to_num::<f64>();
        assert_eq!(level, 12_000_000_000.0);
        cleanup(&dir);
    }
}
