use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a stock (accumulator) in the model.
    pub struct StockId;

    /// Identifies a flow between two stocks.
    pub struct FlowId;

    /// Identifies an auxiliary variable.
    pub struct VariableId;

    /// Identifies a trigger (action or transition).
    pub struct TriggerId;

    /// Identifies a solver (independent time-step domain).
    pub struct SolverId;

    /// Identifies a task owned by a [`TaskQueue`](crate::queue::TaskQueue).
    pub struct TaskId;
}

/// Opaque handle to a compiled equation owned by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EquationId(pub u32);

/// Interned blocker gate name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockerId(pub u32);

/// Handle returned by [`TaskQueue::subscribe`](crate::queue::TaskQueue::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A valued model entity that equations can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityRef {
    Stock(StockId),
    Flow(FlowId),
    Variable(VariableId),
}

impl From<StockId> for EntityRef {
    fn from(id: StockId) -> Self {
        EntityRef::Stock(id)
    }
}

impl From<FlowId> for EntityRef {
    fn from(id: FlowId) -> Self {
        EntityRef::Flow(id)
    }
}

impl From<VariableId> for EntityRef {
    fn from(id: VariableId) -> Self {
        EntityRef::Variable(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn keys_order_by_insertion() {
        let mut flows: SlotMap<FlowId, ()> = SlotMap::with_key();
        let a = flows.insert(());
        let b = flows.insert(());
        assert!(a < b);
    }

    #[test]
    fn entity_refs_convert_from_keys() {
        let mut stocks: SlotMap<StockId, ()> = SlotMap::with_key();
        let s = stocks.insert(());
        assert_eq!(EntityRef::from(s), EntityRef::Stock(s));
    }
}
