//! The model: arenas of solvers, stocks, flows, variables and triggers.
//!
//! Entities are created through builder-style definitions and addressed by
//! typed slotmap keys. Names are unique across stocks, flows, variables and
//! triggers; equations look primitives up by name through their scope.
//!
//! Every entity belongs to a solver. The root solver runs with the step and
//! algorithm of [`SimConfig`]; sub-populations get their own solver through
//! [`Model::add_solver`].

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::clock::{SimTime, TimeUnit};
use crate::config::{SimConfig, SolverConfig};
use crate::error::{ModelError, ModelResult};
use crate::flow::Flow;
use crate::id::{EntityRef, EquationId, FlowId, SolverId, StockId, TriggerId, VariableId};
use crate::solver::Solver;
use crate::stock::Stock;
use crate::trigger::{Trigger, TriggerKind};
use crate::value::{Unit, Value};

/// Name of the solver created with every model.
pub const ROOT_SOLVER: &str = "root";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Definition of a stock.
#[derive(Debug, Clone)]
pub struct StockDef {
    pub name: String,
    pub initial: EquationId,
    pub unit: Unit,
    pub non_negative: bool,
    pub delay: Option<SimTime>,
    pub solver: Option<SolverId>,
    pub displayed: bool,
}

impl StockDef {
    pub fn new(name: impl Into<String>, initial: EquationId) -> Self {
        Self {
            name: name.into(),
            initial,
            unit: Unit::dimensionless(),
            non_negative: false,
            delay: None,
            solver: None,
            displayed: false,
        }
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    /// Make the stock a conveyor with the given transit time.
    pub fn delay(mut self, delay: SimTime) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn in_solver(mut self, solver: SolverId) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn displayed(mut self) -> Self {
        self.displayed = true;
        self
    }
}

/// Definition of a flow. Ends are named stocks; either may be absent.
#[derive(Debug, Clone)]
pub struct FlowDef {
    pub name: String,
    pub equation: EquationId,
    pub from: Option<String>,
    pub to: Option<String>,
    pub non_negative: bool,
    pub unit: Option<Unit>,
    pub solver: Option<SolverId>,
    pub displayed: bool,
}

impl FlowDef {
    pub fn new(name: impl Into<String>, equation: EquationId) -> Self {
        Self {
            name: name.into(),
            equation,
            from: None,
            to: None,
            non_negative: false,
            unit: None,
            solver: None,
            displayed: false,
        }
    }

    pub fn from(mut self, stock: impl Into<String>) -> Self {
        self.from = Some(stock.into());
        self
    }

    pub fn to(mut self, stock: impl Into<String>) -> Self {
        self.to = Some(stock.into());
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn in_solver(mut self, solver: SolverId) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn displayed(mut self) -> Self {
        self.displayed = true;
        self
    }
}

/// Definition of an auxiliary variable.
#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: String,
    pub equation: EquationId,
    pub solver: Option<SolverId>,
    pub displayed: bool,
}

impl VariableDef {
    pub fn new(name: impl Into<String>, equation: EquationId) -> Self {
        Self {
            name: name.into(),
            equation,
            solver: None,
            displayed: false,
        }
    }

    pub fn in_solver(mut self, solver: SolverId) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn displayed(mut self) -> Self {
        self.displayed = true;
        self
    }
}

/// Definition of a trigger.
#[derive(Debug, Clone)]
pub struct TriggerDef {
    pub name: String,
    pub kind: TriggerKind,
    pub action: EquationId,
    pub solver: Option<SolverId>,
}

impl TriggerDef {
    pub fn new(name: impl Into<String>, kind: TriggerKind, action: EquationId) -> Self {
        Self {
            name: name.into(),
            kind,
            action,
            solver: None,
        }
    }

    pub fn in_solver(mut self, solver: SolverId) -> Self {
        self.solver = Some(solver);
        self
    }
}

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// An auxiliary value, evaluated lazily and cached for the current stage.
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) name: String,
    pub(crate) solver: SolverId,
    pub(crate) equation: EquationId,
    pub(crate) cache: Option<Value>,
    pub(crate) history: Vec<Value>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solver(&self) -> SolverId {
        self.solver
    }

    pub fn cached(&self) -> Option<&Value> {
        self.cache.as_ref()
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// All entities of a simulation and the configuration they run under.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) config: SimConfig,
    pub(crate) root: SolverId,
    pub(crate) solvers: SlotMap<SolverId, Solver>,
    pub(crate) stocks: SlotMap<StockId, Stock>,
    pub(crate) flows: SlotMap<FlowId, Flow>,
    pub(crate) variables: SlotMap<VariableId, Variable>,
    pub(crate) triggers: SlotMap<TriggerId, Trigger>,
    names: HashMap<String, EntityRef>,
    trigger_names: HashMap<String, TriggerId>,
    solver_names: HashMap<String, SolverId>,
}

impl Model {
    pub fn new(config: SimConfig) -> ModelResult<Self> {
        config.validate()?;
        let mut solvers = SlotMap::with_key();
        let root = solvers.insert(Solver::new(ROOT_SOLVER.to_string(), config.algorithm, config.step()));
        Ok(Self {
            config,
            root,
            solvers,
            stocks: SlotMap::with_key(),
            flows: SlotMap::with_key(),
            variables: SlotMap::with_key(),
            triggers: SlotMap::with_key(),
            names: HashMap::new(),
            trigger_names: HashMap::new(),
            solver_names: HashMap::from([(ROOT_SOLVER.to_string(), root)]),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.config.time_units
    }

    pub fn root(&self) -> SolverId {
        self.root
    }

    // -- Building --

    /// Add a solver for a sub-population. Unset fields inherit from the run
    /// configuration.
    pub fn add_solver(&mut self, name: impl Into<String>, config: SolverConfig) -> ModelResult<SolverId> {
        let name = name.into();
        config.validate()?;
        if self.solver_names.contains_key(&name) {
            return Err(duplicate("solver", &name));
        }
        let step = config
            .time_step
            .map(|s| SimTime::new(s, self.config.time_units))
            .unwrap_or_else(|| self.config.step());
        let algorithm = config.algorithm.unwrap_or(self.config.algorithm);
        let id = self.solvers.insert(Solver::new(name.clone(), algorithm, step));
        self.solver_names.insert(name, id);
        Ok(id)
    }

    pub fn add_stock(&mut self, def: StockDef) -> ModelResult<StockId> {
        self.check_name(&def.name)?;
        let solver = self.resolve_solver(def.solver)?;
        let mut stock = Stock::new(def.name.clone(), solver, def.initial);
        stock.unit = def.unit;
        stock.non_negative = def.non_negative;
        stock.delay = def.delay.filter(|d| !d.is_zero());
        if stock.delay.is_some_and(|d| d.is_negative()) {
            return Err(ModelError::InvalidConfig {
                reason: format!("stock '{}' has a negative delay", def.name),
            });
        }
        let id = self.stocks.insert(stock);
        self.register(def.name, id.into(), solver, def.displayed)?;
        if let Some(s) = self.solvers.get_mut(solver) {
            s.stocks.push(id);
        }
        Ok(id)
    }

    /// Add a flow. Its ends must already exist. Without an explicit solver
    /// the flow runs in the solver of its destination (or source).
    pub fn add_flow(&mut self, def: FlowDef) -> ModelResult<FlowId> {
        self.check_name(&def.name)?;
        let alpha = def.from.as_deref().map(|n| self.stock_named(n)).transpose()?;
        let omega = def.to.as_deref().map(|n| self.stock_named(n)).transpose()?;
        let inherited = omega
            .or(alpha)
            .and_then(|s| self.stocks.get(s))
            .map(|s| s.solver);
        let solver = self.resolve_solver(def.solver.or(inherited))?;
        let mut flow = Flow::new(def.name.clone(), solver, def.equation);
        flow.alpha = alpha;
        flow.omega = omega;
        flow.non_negative = def.non_negative;
        flow.unit = def.unit;
        let id = self.flows.insert(flow);
        self.register(def.name, id.into(), solver, def.displayed)?;
        if let Some(s) = self.solvers.get_mut(solver) {
            s.flows.push(id);
        }
        Ok(id)
    }

    pub fn add_variable(&mut self, def: VariableDef) -> ModelResult<VariableId> {
        self.check_name(&def.name)?;
        let solver = self.resolve_solver(def.solver)?;
        let id = self.variables.insert(Variable {
            name: def.name.clone(),
            solver,
            equation: def.equation,
            cache: None,
            history: Vec::new(),
        });
        self.register(def.name, id.into(), solver, def.displayed)?;
        if let Some(s) = self.solvers.get_mut(solver) {
            s.variables.push(id);
        }
        Ok(id)
    }

    pub fn add_trigger(&mut self, def: TriggerDef) -> ModelResult<TriggerId> {
        self.check_name(&def.name)?;
        if let TriggerKind::Timeout { after, .. } = &def.kind {
            if after.is_zero() || after.is_negative() {
                return Err(ModelError::InvalidConfig {
                    reason: format!("timeout of trigger '{}' must be positive", def.name),
                });
            }
        }
        let solver = self.resolve_solver(def.solver)?;
        let id = self.triggers.insert(Trigger::new(def.name.clone(), solver, def.kind, def.action));
        self.trigger_names.insert(def.name, id);
        if let Some(s) = self.solvers.get_mut(solver) {
            s.triggers.push(id);
        }
        Ok(id)
    }

    fn check_name(&self, name: &str) -> ModelResult<()> {
        if name.is_empty() {
            return Err(ModelError::InvalidConfig {
                reason: "primitive names must not be empty".into(),
            });
        }
        if self.names.contains_key(name) || self.trigger_names.contains_key(name) {
            return Err(duplicate("primitive", name));
        }
        Ok(())
    }

    fn register(&mut self, name: String, entity: EntityRef, solver: SolverId, displayed: bool) -> ModelResult<()> {
        self.names.insert(name, entity);
        if displayed {
            self.solver_mut(solver)?.displayed.push(entity);
        }
        Ok(())
    }

    fn resolve_solver(&self, solver: Option<SolverId>) -> ModelResult<SolverId> {
        let id = solver.unwrap_or(self.root);
        if !self.solvers.contains_key(id) {
            return Err(unknown(format!("{id:?}")));
        }
        Ok(id)
    }

    fn stock_named(&self, name: &str) -> ModelResult<StockId> {
        match self.names.get(name) {
            Some(EntityRef::Stock(id)) => Ok(*id),
            _ => Err(unknown(name.to_string())),
        }
    }

    // -- Lookup --

    pub fn lookup(&self, name: &str) -> Option<EntityRef> {
        self.names.get(name).copied()
    }

    pub fn find_trigger(&self, name: &str) -> Option<TriggerId> {
        self.trigger_names.get(name).copied()
    }

    pub fn find_solver(&self, name: &str) -> Option<SolverId> {
        self.solver_names.get(name).copied()
    }

    pub fn name_of(&self, entity: EntityRef) -> &str {
        match entity {
            EntityRef::Stock(id) => self.stocks.get(id).map(|s| s.name()),
            EntityRef::Flow(id) => self.flows.get(id).map(|f| f.name()),
            EntityRef::Variable(id) => self.variables.get(id).map(|v| v.name()),
        }
        .unwrap_or("<removed>")
    }

    pub fn solver(&self, id: SolverId) -> ModelResult<&Solver> {
        self.solvers.get(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub(crate) fn solver_mut(&mut self, id: SolverId) -> ModelResult<&mut Solver> {
        self.solvers.get_mut(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub fn stock(&self, id: StockId) -> ModelResult<&Stock> {
        self.stocks.get(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub(crate) fn stock_mut(&mut self, id: StockId) -> ModelResult<&mut Stock> {
        self.stocks.get_mut(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub fn flow(&self, id: FlowId) -> ModelResult<&Flow> {
        self.flows.get(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub(crate) fn flow_mut(&mut self, id: FlowId) -> ModelResult<&mut Flow> {
        self.flows.get_mut(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub fn variable(&self, id: VariableId) -> ModelResult<&Variable> {
        self.variables.get(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub(crate) fn variable_mut(&mut self, id: VariableId) -> ModelResult<&mut Variable> {
        self.variables.get_mut(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub fn trigger(&self, id: TriggerId) -> ModelResult<&Trigger> {
        self.triggers.get(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub(crate) fn trigger_mut(&mut self, id: TriggerId) -> ModelResult<&mut Trigger> {
        self.triggers.get_mut(id).ok_or_else(|| unknown(format!("{id:?}")))
    }

    pub fn stocks(&self) -> impl Iterator<Item = (StockId, &Stock)> {
        self.stocks.iter()
    }

    pub fn flows(&self) -> impl Iterator<Item = (FlowId, &Flow)> {
        self.flows.iter()
    }

    pub fn solvers(&self) -> impl Iterator<Item = (SolverId, &Solver)> {
        self.solvers.iter()
    }

    // -- History --

    /// Recorded values of an entity, oldest first.
    pub fn history(&self, entity: EntityRef) -> &[Value] {
        match entity {
            EntityRef::Stock(id) => self.stocks.get(id).map(|s| s.history()),
            EntityRef::Flow(id) => self.flows.get(id).map(|f| f.history()),
            EntityRef::Variable(id) => self.variables.get(id).map(|v| v.history()),
        }
        .unwrap_or(&[])
    }

    pub(crate) fn history_mut(&mut self, entity: EntityRef) -> Option<&mut Vec<Value>> {
        match entity {
            EntityRef::Stock(id) => self.stocks.get_mut(id).map(|s| &mut s.history),
            EntityRef::Flow(id) => self.flows.get_mut(id).map(|f| &mut f.history),
            EntityRef::Variable(id) => self.variables.get_mut(id).map(|v| &mut v.history),
        }
    }
}

fn unknown(name: String) -> ModelError {
    ModelError::UnknownPrimitive { name }
}

fn duplicate(what: &str, name: &str) -> ModelError {
    ModelError::InvalidConfig {
        reason: format!("duplicate {what} name '{name}'"),
    }
}
