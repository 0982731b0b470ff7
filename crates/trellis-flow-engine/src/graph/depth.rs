//! Ending-node discovery and tier assignment.
//!
//! A flow executes tier by tier: tier 0 holds the starting nodes, and every
//! other node lands one past its deepest predecessor. Tiers are derived per
//! ending node by walking the reversed graph, then merged so shared ancestors
//! keep their deepest assignment.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::FlowError;
use crate::graph::{build_graph, BuiltGraph};
use crate::types::{FlowEdge, FlowNode};

/// Node id to execution tier.
pub type DepthQueue = HashMap<String, u32>;

/// Starting nodes and tier assignments for the ancestry of one or more
/// ending nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingNodes {
    /// Tier-0 node ids, sorted for determinism.
    pub starting_node_ids: Vec<String>,
    pub depth_queue: DepthQueue,
}

/// Ending nodes of a flow: nodes with no outgoing edges, annotations
/// excluded.
///
/// `forward` must be the forward-orientation graph. Returns ids in flow
/// declaration order.
pub fn ending_nodes(forward: &BuiltGraph, nodes: &[FlowNode]) -> Result<Vec<String>, FlowError> {
    let endings: Vec<String> = nodes
        .iter()
        .filter(|n| !n.is_annotation())
        .filter(|n| forward.graph.get(&n.id).map_or(true, Vec::is_empty))
        .map(|n| n.id.clone())
        .collect();

    if endings.is_empty() {
        return Err(FlowError::Resolution {
            message: "flow has no ending node".into(),
        });
    }
    Ok(endings)
}

/// Computes the starting nodes and tier assignments for everything upstream
/// of `ending_node_id`, walking `reversed` (the reversed-orientation graph).
///
/// Tier assignment is longest-path: a node's tier is one past the maximum
/// tier of its in-ancestry predecessors, so joins always run after every
/// branch feeding them. Fails with [`FlowError::Cycle`] when the ancestry
/// contains a cycle, since no processing order can make progress through it.
pub fn starting_nodes(
    reversed: &BuiltGraph,
    ending_node_id: &str,
) -> Result<StartingNodes, FlowError> {
    if !reversed.graph.contains_key(ending_node_id) {
        return Err(FlowError::Resolution {
            message: format!("ending node '{ending_node_id}' is not in the graph"),
        });
    }

    // Collect the ancestry of the ending node by flooding the reversed
    // adjacency.
    let mut members: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    members.insert(ending_node_id.to_owned());
    queue.push_back(ending_node_id);
    while let Some(id) = queue.pop_front() {
        if let Some(upstream) = reversed.graph.get(id) {
            for pred in upstream {
                if members.insert(pred.clone()) {
                    queue.push_back(pred);
                }
            }
        }
    }

    // Re-derive forward edges restricted to the ancestry, then Kahn with
    // longest-path depths.
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::with_capacity(members.len());
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(members.len());
    for id in &members {
        forward.entry(id.as_str()).or_default();
        in_degree.entry(id.as_str()).or_insert(0);
    }
    for (target, sources) in &reversed.graph {
        if !members.contains(target) {
            continue;
        }
        for source in sources {
            if !members.contains(source) {
                continue;
            }
            forward.entry(source.as_str()).or_default().push(target.as_str());
            *in_degree.entry(target.as_str()).or_insert(0) += 1;
        }
    }

    let mut depth_queue: DepthQueue = HashMap::with_capacity(members.len());
    let mut ready: VecDeque<&str> = VecDeque::new();
    let mut starting: Vec<String> = Vec::new();
    for (id, degree) in &in_degree {
        if *degree == 0 {
            depth_queue.insert((*id).to_owned(), 0);
            starting.push((*id).to_owned());
            ready.push_back(*id);
        }
    }

    let mut processed = 0usize;
    while let Some(id) = ready.pop_front() {
        processed += 1;
        let depth = depth_queue[id];
        for &next in &forward[id] {
            let entry = depth_queue.entry(next.to_owned()).or_insert(0);
            if *entry < depth + 1 {
                *entry = depth + 1;
            }
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next);
                }
            }
        }
    }

    if processed < members.len() {
        return Err(FlowError::Cycle {
            message: format!(
                "no progress possible upstream of '{ending_node_id}': {} of {} nodes unreachable",
                members.len() - processed,
                members.len()
            ),
        });
    }

    starting.sort_unstable();
    Ok(StartingNodes {
        starting_node_ids: starting,
        depth_queue,
    })
}

/// A fully-compiled execution plan for one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub ending_node_ids: Vec<String>,
    pub starting_node_ids: Vec<String>,
    pub depth_queue: DepthQueue,
    /// Node ids grouped by tier, ascending. Within a tier, ids keep flow
    /// declaration order.
    pub tiers: Vec<Vec<String>>,
}

/// Compiles a flow into a [`Schedule`].
///
/// Validates edge endpoints, finds the ending nodes, computes tiers per
/// ending node, and merges them: the union of reachable nodes, each at its
/// maximum tier across endings. Nodes not upstream of any ending node are
/// left out of the schedule entirely.
pub fn build_schedule(nodes: &[FlowNode], edges: &[FlowEdge]) -> Result<Schedule, FlowError> {
    let declared: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in edges {
        for endpoint in [&edge.source, &edge.target] {
            if !declared.contains(endpoint.as_str()) {
                return Err(FlowError::Configuration {
                    message: format!("edge references undeclared node '{endpoint}'"),
                });
            }
        }
    }

    let forward = build_graph(nodes, edges, false);
    let reversed = build_graph(nodes, edges, true);
    let ending_node_ids = ending_nodes(&forward, nodes)?;

    let mut depth_queue: DepthQueue = HashMap::new();
    let mut starting: HashSet<String> = HashSet::new();
    for ending in &ending_node_ids {
        let part = starting_nodes(&reversed, ending)?;
        starting.extend(part.starting_node_ids);
        for (id, depth) in part.depth_queue {
            let entry = depth_queue.entry(id).or_insert(depth);
            if *entry < depth {
                *entry = depth;
            }
        }
    }

    let mut starting_node_ids: Vec<String> = starting.into_iter().collect();
    starting_node_ids.sort_unstable();

    let max_tier = depth_queue.values().copied().max().unwrap_or(0);
    let mut tiers: Vec<Vec<String>> = vec![Vec::new(); max_tier as usize + 1];
    for node in nodes {
        if let Some(depth) = depth_queue.get(&node.id) {
            tiers[*depth as usize].push(node.id.clone());
        }
    }

    Ok(Schedule {
        ending_node_ids,
        starting_node_ids,
        depth_queue,
        tiers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ANNOTATION_CATEGORY;

    fn node(id: &str) -> FlowNode {
        FlowNode::new(id, "echo")
    }

    fn edge(from: &str, to: &str) -> FlowEdge {
        FlowEdge::new(from, to)
    }

    // -----------------------------------------------------------------------
    // Ending nodes
    // -----------------------------------------------------------------------

    #[test]
    fn ending_nodes_finds_sinks() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("a", "c")];
        let forward = build_graph(&nodes, &edges, false);
        assert_eq!(ending_nodes(&forward, &nodes).unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn ending_nodes_skips_annotations() {
        let nodes = vec![
            node("a"),
            node("b"),
            FlowNode::new("note", "sticky").with_category(ANNOTATION_CATEGORY),
        ];
        let edges = vec![edge("a", "b")];
        let forward = build_graph(&nodes, &edges, false);
        assert_eq!(ending_nodes(&forward, &nodes).unwrap(), vec!["b"]);
    }

    #[test]
    fn ending_nodes_errors_when_only_annotations_remain() {
        let nodes = vec![FlowNode::new("note", "sticky").with_category(ANNOTATION_CATEGORY)];
        let forward = build_graph(&nodes, &[], false);
        let err = ending_nodes(&forward, &nodes).unwrap_err();
        assert!(matches!(err, FlowError::Resolution { .. }));
    }

    // -----------------------------------------------------------------------
    // Starting nodes and depths
    // -----------------------------------------------------------------------

    #[test]
    fn linear_chain_depths() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let reversed = build_graph(&nodes, &edges, true);
        let result = starting_nodes(&reversed, "c").unwrap();

        assert_eq!(result.starting_node_ids, vec!["a"]);
        assert_eq!(result.depth_queue["a"], 0);
        assert_eq!(result.depth_queue["b"], 1);
        assert_eq!(result.depth_queue["c"], 2);
    }

    #[test]
    fn join_lands_past_deepest_branch() {
        // a -> b -> d and a -> c -> e -> d: d must wait for the longer arm.
        let nodes = vec![node("a"), node("b"), node("c"), node("d"), node("e")];
        let edges = vec![
            edge("a", "b"),
            edge("a", "c"),
            edge("b", "d"),
            edge("c", "e"),
            edge("e", "d"),
        ];
        let reversed = build_graph(&nodes, &edges, true);
        let result = starting_nodes(&reversed, "d").unwrap();

        assert_eq!(result.depth_queue["b"], 1);
        assert_eq!(result.depth_queue["e"], 2);
        assert_eq!(result.depth_queue["d"], 3);
    }

    #[test]
    fn ancestry_excludes_unrelated_branches() {
        let nodes = vec![node("a"), node("b"), node("x"), node("y")];
        let edges = vec![edge("a", "b"), edge("x", "y")];
        let reversed = build_graph(&nodes, &edges, true);
        let result = starting_nodes(&reversed, "b").unwrap();

        assert_eq!(result.starting_node_ids, vec!["a"]);
        assert!(!result.depth_queue.contains_key("x"));
        assert!(!result.depth_queue.contains_key("y"));
    }

    #[test]
    fn cycle_in_ancestry_is_detected() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("b", "a"), edge("b", "c")];
        let reversed = build_graph(&nodes, &edges, true);
        let err = starting_nodes(&reversed, "c").unwrap_err();
        assert!(matches!(err, FlowError::Cycle { .. }));
    }

    #[test]
    fn unknown_ending_node_is_rejected() {
        let nodes = vec![node("a")];
        let reversed = build_graph(&nodes, &[], true);
        let err = starting_nodes(&reversed, "ghost").unwrap_err();
        assert!(matches!(err, FlowError::Resolution { .. }));
    }

    // -----------------------------------------------------------------------
    // Full schedule
    // -----------------------------------------------------------------------

    #[test]
    fn schedule_merges_multiple_endings_with_max_depth() {
        // a -> b (ending) and a -> c -> d (ending); shared ancestor a stays
        // at tier 0, each ending keeps its own depth.
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("c", "d")];
        let schedule = build_schedule(&nodes, &edges).unwrap();

        assert_eq!(schedule.ending_node_ids, vec!["b", "d"]);
        assert_eq!(schedule.starting_node_ids, vec!["a"]);
        assert_eq!(schedule.depth_queue["b"], 1);
        assert_eq!(schedule.depth_queue["d"], 2);
        assert_eq!(schedule.tiers[0], vec!["a"]);
        assert_eq!(schedule.tiers[1], vec!["b", "c"]);
        assert_eq!(schedule.tiers[2], vec!["d"]);
    }

    #[test]
    fn roots_shared_across_endings_stay_at_tier_zero() {
        // r1 feeds both endings through arms of different length; ancestry
        // sets are predecessor-closed, so a root is a root in every merge.
        let nodes = vec![node("r1"), node("r2"), node("mid"), node("e1"), node("e2")];
        let edges = vec![
            edge("r1", "mid"),
            edge("r2", "mid"),
            edge("mid", "e1"),
            edge("r1", "e2"),
        ];
        let schedule = build_schedule(&nodes, &edges).unwrap();

        assert_eq!(schedule.starting_node_ids, vec!["r1", "r2"]);
        assert_eq!(schedule.depth_queue["r1"], 0);
        assert_eq!(schedule.depth_queue["r2"], 0);
        assert_eq!(schedule.tiers[0], vec!["r1", "r2"]);
        assert_eq!(schedule.tiers[1], vec!["mid", "e2"]);
        assert_eq!(schedule.tiers[2], vec!["e1"]);
    }

    #[test]
    fn shared_ancestor_keeps_deepest_tier() {
        // m is a direct ending and also feeds the chain to ending p. Its
        // dependents only see it once, at the merged (deeper) position when
        // viewed from p even though m itself ends one branch.
        let nodes = vec![node("s"), node("m"), node("n"), node("p")];
        let edges = vec![edge("s", "m"), edge("s", "n"), edge("n", "p"), edge("m", "p")];
        let schedule = build_schedule(&nodes, &edges).unwrap();

        assert_eq!(schedule.ending_node_ids, vec!["p"]);
        assert_eq!(schedule.depth_queue["m"], 1);
        assert_eq!(schedule.depth_queue["n"], 1);
        assert_eq!(schedule.depth_queue["p"], 2);
    }

    #[test]
    fn schedule_rejects_edges_to_undeclared_nodes() {
        let nodes = vec![node("a")];
        let edges = vec![edge("a", "ghost")];
        let err = build_schedule(&nodes, &edges).unwrap_err();
        assert!(matches!(err, FlowError::Configuration { .. }));
    }

    #[test]
    fn schedule_rejects_cycles() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("b", "a"), edge("b", "c")];
        let err = build_schedule(&nodes, &edges).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { .. }));
    }

    #[test]
    fn tiers_preserve_declaration_order() {
        let nodes = vec![node("s"), node("z"), node("a"), node("sink")];
        let edges = vec![
            edge("s", "z"),
            edge("s", "a"),
            edge("z", "sink"),
            edge("a", "sink"),
        ];
        let schedule = build_schedule(&nodes, &edges).unwrap();
        // "z" was declared before "a", so it runs first within the tier.
        assert_eq!(schedule.tiers[1], vec!["z", "a"]);
    }

    #[test]
    fn single_node_flow_schedules_alone() {
        let nodes = vec![node("only")];
        let schedule = build_schedule(&nodes, &[]).unwrap();
        assert_eq!(schedule.ending_node_ids, vec!["only"]);
        assert_eq!(schedule.starting_node_ids, vec!["only"]);
        assert_eq!(schedule.tiers, vec![vec!["only".to_owned()]]);
    }

    #[test]
    fn deep_chain_tier_invariant_holds() {
        // Every node's tier must exceed the tiers of all its predecessors.
        let ids: Vec<String> = (0..12).map(|i| format!("n{i}")).collect();
        let nodes: Vec<FlowNode> = ids.iter().map(|id| node(id)).collect();
        let mut edges: Vec<FlowEdge> = ids.windows(2).map(|w| edge(&w[0], &w[1])).collect();
        // A shortcut edge should not pull n6 earlier than its chain position.
        edges.push(edge("n0", "n6"));
        let schedule = build_schedule(&nodes, &edges).unwrap();

        for e in &edges {
            assert!(
                schedule.depth_queue[&e.target] > schedule.depth_queue[&e.source],
                "edge {} -> {} violates tier ordering",
                e.source,
                e.target
            );
        }
        assert_eq!(schedule.depth_queue["n6"], 6);
    }
}
