//! Dependency-graph construction.
//!
//! [`build_graph`] turns a flow's node and edge lists into an adjacency map
//! plus per-node dependency counts in a single O(V + E) pass. Cycle detection
//! is deliberately not done here; the scheduler in [`depth`] discovers cycles
//! as a side effect of tier assignment.

pub mod depth;

use std::collections::HashMap;

use crate::types::{FlowEdge, FlowNode};

/// Adjacency map: node id to the ids it points at.
pub type Adjacency = HashMap<String, Vec<String>>;

/// A compiled view of the flow graph.
///
/// With `reversed = false`, `graph[a]` lists the nodes downstream of `a` and
/// `dependency_counts[a]` is `a`'s in-degree. With `reversed = true` both are
/// mirrored, which is what upstream traversal from an ending node wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltGraph {
    pub graph: Adjacency,
    pub dependency_counts: HashMap<String, usize>,
}

impl BuiltGraph {
    /// Ids with no dependencies in this orientation.
    pub fn roots(&self) -> Vec<&str> {
        self.dependency_counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Builds the adjacency map and dependency counts for a flow.
///
/// Every declared node appears in both maps even when no edge touches it, so
/// isolated nodes still schedule. Duplicate edges are kept as authored;
/// counts reflect them.
pub fn build_graph(nodes: &[FlowNode], edges: &[FlowEdge], reversed: bool) -> BuiltGraph {
    let mut graph: Adjacency = HashMap::with_capacity(nodes.len());
    let mut dependency_counts: HashMap<String, usize> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        graph.entry(node.id.clone()).or_default();
        dependency_counts.entry(node.id.clone()).or_insert(0);
    }

    for edge in edges {
        let (from, to) = if reversed {
            (&edge.target, &edge.source)
        } else {
            (&edge.source, &edge.target)
        };
        graph.entry(from.clone()).or_default().push(to.clone());
        *dependency_counts.entry(to.clone()).or_insert(0) += 1;
    }

    BuiltGraph {
        graph,
        dependency_counts,
    }
}
