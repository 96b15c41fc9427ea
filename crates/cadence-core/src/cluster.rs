//! Application order for flows that share non-negative stocks.
//!
//! Flows that could drive a non-negative stock below zero are applied one at
//! a time, each reduced to what its stocks can still give. The order matters:
//! a flow feeding a constrained stock should land before the flow draining
//! it. Flows are grouped into clusters (connected through non-negative
//! stocks) and each cluster is ordered once, at setup, with Kahn's algorithm
//! over the graph
//!
//! ```text
//! flow -> omega (non-negative)      alpha (non-negative) -> flow
//! ```
//!
//! A cluster containing a cycle falls back to flow key order. Flows touching
//! no non-negative stock get a cluster of their own.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use tracing::debug;

use crate::id::{FlowId, StockId};

/// Where a flow sits in the application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterPosition {
    pub cluster: u32,
    pub order: u32,
}

/// Cluster and order of every flow, computed once per run.
#[derive(Debug, Clone, Default)]
pub struct ClusterOrder {
    positions: SecondaryMap<FlowId, ClusterPosition>,
    clusters: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Flow(FlowId),
    Stock(StockId),
}

impl ClusterOrder {
    /// Compute clusters from `(flow, alpha, omega)` triples.
    pub fn compute(
        flows: impl IntoIterator<Item = (FlowId, Option<StockId>, Option<StockId>)>,
        is_non_negative: impl Fn(StockId) -> bool,
    ) -> Self {
        let mut ends: Vec<(FlowId, Option<StockId>, Option<StockId>)> = flows.into_iter().collect();
        ends.sort_by_key(|(id, _, _)| *id);

        let constrained = |s: Option<StockId>| s.filter(|&s| is_non_negative(s));

        // Flows touching each non-negative stock.
        let mut touching: HashMap<StockId, Vec<FlowId>> = HashMap::new();
        let mut flow_ends: HashMap<FlowId, (Option<StockId>, Option<StockId>)> = HashMap::new();
        for &(id, alpha, omega) in &ends {
            let (alpha, omega) = (constrained(alpha), constrained(omega));
            for stock in alpha.into_iter().chain(omega) {
                touching.entry(stock).or_default().push(id);
            }
            flow_ends.insert(id, (alpha, omega));
        }

        let mut result = ClusterOrder::default();
        for &(seed, _, _) in &ends {
            if result.positions.contains_key(seed) {
                continue;
            }
            let cluster = result.clusters;
            result.clusters += 1;

            let (members, stocks) = component(seed, &flow_ends, &touching);
            let order = kahn(&members, &stocks, &flow_ends).unwrap_or_else(|| members.clone());
            debug!(cluster, flows = order.len(), stocks = stocks.len(), "flow cluster ordered");
            for (i, flow) in order.into_iter().enumerate() {
                result.positions.insert(
                    flow,
                    ClusterPosition {
                        cluster,
                        order: i as u32,
                    },
                );
            }
        }
        result
    }

    pub fn position(&self, flow: FlowId) -> Option<ClusterPosition> {
        self.positions.get(flow).copied()
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters as usize
    }

    pub fn is_empty(&self) -> bool {
        self.clusters == 0
    }
}

/// Flows and non-negative stocks reachable from `seed`, both in key order.
fn component(
    seed: FlowId,
    flow_ends: &HashMap<FlowId, (Option<StockId>, Option<StockId>)>,
    touching: &HashMap<StockId, Vec<FlowId>>,
) -> (Vec<FlowId>, Vec<StockId>) {
    let mut flows = BTreeSet::from([seed]);
    let mut stocks = BTreeSet::new();
    let mut frontier = VecDeque::from([seed]);
    while let Some(flow) = frontier.pop_front() {
        let Some(&(alpha, omega)) = flow_ends.get(&flow) else {
            continue;
        };
        for stock in alpha.into_iter().chain(omega) {
            if !stocks.insert(stock) {
                continue;
            }
            for &next in touching.get(&stock).map(Vec::as_slice).unwrap_or_default() {
                if flows.insert(next) {
                    frontier.push_back(next);
                }
            }
        }
    }
    (flows.into_iter().collect(), stocks.into_iter().collect())
}

/// Topological order of the component's flows, or `None` if it has a cycle.
fn kahn(
    flows: &[FlowId],
    stocks: &[StockId],
    flow_ends: &HashMap<FlowId, (Option<StockId>, Option<StockId>)>,
) -> Option<Vec<FlowId>> {
    let nodes: Vec<Node> = flows
        .iter()
        .map(|&f| Node::Flow(f))
        .chain(stocks.iter().map(|&s| Node::Stock(s)))
        .collect();
    let index: HashMap<Node, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    let mut outputs: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    let mut connect = |from: Node, to: Node| {
        if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) {
            outputs[a].push(b);
            in_degree[b] += 1;
        }
    };
    for &flow in flows {
        let Some(&(alpha, omega)) = flow_ends.get(&flow) else {
            continue;
        };
        if let Some(omega) = omega {
            connect(Node::Flow(flow), Node::Stock(omega));
        }
        if let Some(alpha) = alpha {
            connect(Node::Stock(alpha), Node::Flow(flow));
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    let mut order = Vec::with_capacity(flows.len());
    while let Some(i) = queue.pop_front() {
        visited += 1;
        if let Node::Flow(f) = nodes[i] {
            order.push(f);
        }
        for &dest in &outputs[i] {
            in_degree[dest] -= 1;
            if in_degree[dest] == 0 {
                queue.push_back(dest);
            }
        }
    }
    (visited == nodes.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn chain_is_ordered_upstream_first() {
        let mut flow_keys: SlotMap<FlowId, ()> = SlotMap::with_key();
        let mut stock_keys: SlotMap<StockId, ()> = SlotMap::with_key();
        // Declared downstream first so key order is the reverse of flow order.
        let c = flow_keys.insert(());
        let b = flow_keys.insert(());
        let a = flow_keys.insert(());
        let x = stock_keys.insert(());
        let y = stock_keys.insert(());

        let order = ClusterOrder::compute(
            [(c, Some(y), None), (b, Some(x), Some(y)), (a, None, Some(x))],
            |_| true,
        );
        let pa = order.position(a).unwrap();
        let pb = order.position(b).unwrap();
        let pc = order.position(c).unwrap();
        assert_eq!(pa.cluster, pb.cluster);
        assert_eq!(pb.cluster, pc.cluster);
        assert!(pa.order < pb.order && pb.order < pc.order);
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn cycle_falls_back_to_key_order() {
        let mut flow_keys: SlotMap<FlowId, ()> = SlotMap::with_key();
        let mut stock_keys: SlotMap<StockId, ()> = SlotMap::with_key();
        let f1 = flow_keys.insert(());
        let f2 = flow_keys.insert(());
        let x = stock_keys.insert(());
        let y = stock_keys.insert(());

        let order = ClusterOrder::compute([(f2, Some(y), Some(x)), (f1, Some(x), Some(y))], |_| true);
        assert_eq!(order.position(f1).unwrap().order, 0);
        assert_eq!(order.position(f2).unwrap().order, 1);
    }

    #[test]
    fn unconstrained_flows_are_singletons() {
        let mut flow_keys: SlotMap<FlowId, ()> = SlotMap::with_key();
        let mut stock_keys: SlotMap<StockId, ()> = SlotMap::with_key();
        let f1 = flow_keys.insert(());
        let f2 = flow_keys.insert(());
        let x = stock_keys.insert(());

        let order = ClusterOrder::compute([(f1, None, Some(x)), (f2, Some(x), None)], |_| false);
        assert_eq!(order.len(), 2);
        assert_ne!(order.position(f1).unwrap().cluster, order.position(f2).unwrap().cluster);
    }
}
