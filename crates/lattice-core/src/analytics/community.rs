//! Community detection with the Louvain method.
//!
//! Communities represent cohesive architectural modules; they are
//! stored on entities as `community_id` and labeled later by the
//! justification engine. The graph is treated as undirected.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::types::EdgeKind;

use super::arena::GraphArena;

/// Iteration cap for the local-move phase.
const MAX_ITERATIONS: usize = 100;

/// A detected community.
#[derive(Debug, Clone)]
pub struct Community {
    /// Community ID (0 = largest).
    pub id: u32,
    /// Arena indices of the members.
    pub members: Vec<usize>,
}

/// Result of community detection.
#[derive(Debug, Clone)]
pub struct CommunityResult {
    /// Communities, largest first.
    pub communities: Vec<Community>,
    /// Per-arena-index community assignment.
    pub assignment: Vec<u32>,
    /// Modularity of the partition.
    pub modularity: f64,
}

/// Detect communities over the combined typed graph.
pub fn detect_communities(arena: &GraphArena) -> CommunityResult {
    // petgraph holds the working graph; node weights are arena indices.
    let mut graph: DiGraph<usize, EdgeKind> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..arena.len()).map(|i| graph.add_node(i)).collect();
    for edge in &arena.edges {
        // Containment says nothing about cohesion between code units.
        if edge.kind == EdgeKind::Contains {
            continue;
        }
        graph.add_edge(nodes[edge.from], nodes[edge.to], edge.kind);
    }

    if graph.node_count() == 0 {
        return CommunityResult {
            communities: Vec::new(),
            assignment: Vec::new(),
            modularity: 0.0,
        };
    }

    // Phase 1: every node in its own community.
    let mut node_to_community: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .enumerate()
        .map(|(i, node)| (node, i))
        .collect();

    // Phase 2: local moves until no improvement.
    let mut improved = true;
    let mut iteration = 0;
    while improved && iteration < MAX_ITERATIONS {
        improved = false;
        iteration += 1;
        for node in graph.node_indices() {
            let current = node_to_community[&node];
            let best = best_community(node, &node_to_community, &graph);
            if best != current {
                node_to_community.insert(node, best);
                improved = true;
            }
        }
    }

    // Phase 3: aggregate.
    let modularity = modularity_of(&node_to_community, &graph);
    let mut members_by_community: HashMap<usize, Vec<usize>> = HashMap::new();
    for (node, community) in &node_to_community {
        members_by_community
            .entry(*community)
            .or_default()
            .push(graph[*node]);
    }

    let mut communities: Vec<Community> = members_by_community
        .into_values()
        .map(|mut members| {
            members.sort_unstable();
            Community { id: 0, members }
        })
        .collect();
    communities.sort_by(|a, b| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.members.cmp(&b.members))
    });
    for (id, community) in communities.iter_mut().enumerate() {
        community.id = id as u32;
    }

    let mut assignment = vec![0u32; arena.len()];
    for community in &communities {
        for &member in &community.members {
            assignment[member] = community.id;
        }
    }

    CommunityResult {
        communities,
        assignment,
        modularity,
    }
}

/// Community with the most connections to `node` (undirected).
fn best_community(
    node: NodeIndex,
    node_to_community: &HashMap<NodeIndex, usize>,
    graph: &DiGraph<usize, EdgeKind>,
) -> usize {
    let current = node_to_community[&node];
    let mut connection_counts: HashMap<usize, usize> = HashMap::new();
    for direction in [petgraph::Direction::Outgoing, petgraph::Direction::Incoming] {
        for neighbor in graph.neighbors_directed(node, direction) {
            if let Some(&community) = node_to_community.get(&neighbor) {
                *connection_counts.entry(community).or_insert(0) += 1;
            }
        }
    }
    connection_counts
        .into_iter()
        // Deterministic tie-break: highest count, then lowest ID.
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.cmp(ca)))
        .map(|(community, _)| community)
        .unwrap_or(current)
}

/// Modularity of a partition; > 0.3 is considered good structure.
fn modularity_of(
    node_to_community: &HashMap<NodeIndex, usize>,
    graph: &DiGraph<usize, EdgeKind>,
) -> f64 {
    let m = graph.edge_count() as f64;
    if m == 0.0 {
        return 0.0;
    }
    let mut q = 0.0;
    for edge in graph.edge_indices() {
        if let Some((src, dst)) = graph.edge_endpoints(edge) {
            if node_to_community.get(&src) == node_to_community.get(&dst) {
                let k_i = graph.neighbors_undirected(src).count() as f64;
                let k_j = graph.neighbors_undirected(dst).count() as f64;
                q += 1.0 - (k_i * k_j) / (2.0 * m * m);
            }
        }
    }
    q / m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::arena::ArenaEdge;
    use crate::types::EntityKind;

    fn arena_with(n: usize, edges: Vec<(usize, usize)>) -> GraphArena {
        GraphArena {
            keys: (0..n).map(|i| format!("k{i}")).collect(),
            kinds: vec![EntityKind::Function; n],
            index_of: (0..n).map(|i| (format!("k{i}"), i)).collect(),
            edges: edges
                .into_iter()
                .map(|(from, to)| ArenaEdge {
                    from,
                    to,
                    kind: EdgeKind::Calls,
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_arena() {
        let result = detect_communities(&GraphArena::default());
        assert!(result.communities.is_empty());
    }

    #[test]
    fn test_two_clusters_with_bridge() {
        // Triangle 0-1-2 and triangle 3-4-5 with one bridge edge.
        let result = detect_communities(&arena_with(
            6,
            vec![(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)],
        ));
        let total: usize = result.communities.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, 6, "every node assigned");
        assert_eq!(result.assignment.len(), 6);
        assert_eq!(result.assignment[0], result.assignment[1]);
        assert_eq!(result.assignment[3], result.assignment[4]);
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let edges = vec![(0, 1), (1, 2), (2, 0), (3, 4)];
        let a = detect_communities(&arena_with(5, edges.clone()));
        let b = detect_communities(&arena_with(5, edges));
        assert_eq!(a.assignment, b.assignment);
    }
}
