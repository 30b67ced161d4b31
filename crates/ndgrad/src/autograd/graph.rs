//! Read-only snapshots of the backward graph.
//!
//! Walks `next_edges` from a starting edge and records what it finds in a
//! petgraph `DiGraph`. Nothing is executed; the snapshot only describes the
//! wiring at the time it was taken.

use super::edge::Edge;
use super::node::Node;
use super::variable::gradient_edge;
use crate::error::AutogradError;
use crate::tensor::Tensor;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// What a snapshot records about one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: &'static str,
    pub sequence_nr: u64,
    pub num_inputs: usize,
}

impl NodeInfo {
    fn of(node: &dyn Node) -> Self {
        Self {
            name: node.name(),
            sequence_nr: node.sequence_nr(),
            num_inputs: node.num_inputs(),
        }
    }
}

/// Backward graph reachable from one edge.
///
/// Graph edges point from a node to the nodes its gradients flow into and
/// are weighted with the receiving input slot.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    graph: DiGraph<NodeInfo, u32>,
    root: Option<NodeIndex>,
}

impl GraphSnapshot {
    /// Snapshot everything reachable from `edge`.
    pub fn from_edge(edge: &Edge) -> Self {
        let mut graph = DiGraph::new();
        let mut seen: HashMap<*const (), NodeIndex> = HashMap::new();
        let mut queue: VecDeque<(Arc<dyn Node>, NodeIndex)> = VecDeque::new();

        let root = edge.function.as_ref().map(|function| {
            let index = graph.add_node(NodeInfo::of(function.as_ref()));
            seen.insert(node_key(function), index);
            queue.push_back((function.clone(), index));
            index
        });

        while let Some((node, from)) = queue.pop_front() {
            for next in node.next_edges() {
                let Some(function) = next.function else {
                    continue;
                };
                let to = match seen.get(&node_key(&function)) {
                    Some(&index) => index,
                    None => {
                        let index = graph.add_node(NodeInfo::of(function.as_ref()));
                        seen.insert(node_key(&function), index);
                        queue.push_back((function, index));
                        index
                    }
                };
                graph.add_edge(from, to, next.input_nr);
            }
        }

        Self { graph, root }
    }

    /// Snapshot everything reachable from `tensor`'s gradient edge.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self, AutogradError> {
        Ok(Self::from_edge(&gradient_edge(tensor)?))
    }

    pub fn graph(&self) -> &DiGraph<NodeInfo, u32> {
        &self.graph
    }

    /// Node the walk started from.
    pub fn root(&self) -> Option<&NodeInfo> {
        self.root.map(|index| &self.graph[index])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graph.node_weights().any(|info| info.name == name)
    }

    /// Node names with every consumer before the nodes it feeds.
    ///
    /// # Errors
    ///
    /// Returns error if the wiring contains a cycle.
    pub fn topological_names(&self) -> Result<Vec<&'static str>, AutogradError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            AutogradError::internal(format!(
                "backward graph has a cycle through {}",
                self.graph[cycle.node_id()].name
            ))
        })?;
        Ok(order.into_iter().map(|index| self.graph[index].name).collect())
    }
}

fn node_key(node: &Arc<dyn Node>) -> *const () {
    Arc::as_ptr(node) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_edge() {
        let snapshot = GraphSnapshot::from_edge(&Edge::empty());
        assert_eq!(snapshot.node_count(), 0);
        assert!(snapshot.root().is_none());
        assert!(snapshot.topological_names().unwrap().is_empty());
    }

    #[test]
    fn test_view_of_leaf() {
        let leaf = Tensor::new(&[3, 3]);
        leaf.set_requires_grad(true).unwrap();
        let view = leaf.slice(&[0..2, 0..2]).unwrap();

        let snapshot = GraphSnapshot::from_tensor(&view).unwrap();
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.edge_count(), 1);
        assert_eq!(snapshot.root().unwrap().name, "AsStridedBackward");
        assert_eq!(
            snapshot.topological_names().unwrap(),
            vec!["AsStridedBackward", "AccumulateGrad"]
        );
    }
}
