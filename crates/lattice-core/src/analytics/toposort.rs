//! Topological sort with deterministic cycle breaking.
//!
//! The justification engine processes entities bottom-up: level `L0`
//! holds leaves (no outgoing semantic edges), and every entity appears
//! in a level after all entities it depends on. Kahn's algorithm runs
//! over `calls`, `references`, and event edges; when a cycle blocks
//! progress, the edge into the highest-in-degree node is dropped, tie
//! broken by the lowest `(from_key, to_key)` pair so runs are
//! reproducible.

use super::arena::GraphArena;

/// A dependency edge dropped to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenEdge {
    /// Key of the source entity.
    pub from_key: String,
    /// Key of the target entity.
    pub to_key: String,
}

/// Result of the levelled sort.
#[derive(Debug, Clone, Default)]
pub struct TopoLevels {
    /// Levels of arena indices; `levels[0]` holds the leaves.
    pub levels: Vec<Vec<usize>>,
    /// Edges dropped to break cycles (logged by the caller).
    pub broken_edges: Vec<BrokenEdge>,
}

/// Sort the arena's semantic-dependency graph into levels.
pub fn topo_levels(arena: &GraphArena) -> TopoLevels {
    let n = arena.len();
    let mut result = TopoLevels::default();
    if n == 0 {
        return result;
    }

    // Dependency adjacency over semantic edges only: `from` depends on
    // `to`, so `to` must be justified first.
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n]; // from -> [to]
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n]; // to -> [from]
    let mut out_degree = vec![0usize; n];
    for edge in &arena.edges {
        if !edge.kind.is_semantic_dependency() || edge.from == edge.to {
            continue;
        }
        dependencies[edge.from].push(edge.to);
        dependents[edge.to].push(edge.from);
        out_degree[edge.from] += 1;
    }

    let mut placed = vec![false; n];
    let mut remaining = n;

    while remaining > 0 {
        // Every unplaced node with no unresolved dependencies forms the
        // next level.
        let mut level: Vec<usize> = (0..n)
            .filter(|&i| !placed[i] && out_degree[i] == 0)
            .collect();

        if level.is_empty() {
            // A cycle blocks progress. Drop the edge into the
            // highest-in-degree remaining node; lowest key pair wins
            // ties.
            let Some(broken) = pick_cycle_edge(arena, &placed, &dependencies) else {
                // No droppable edge found; place everything left to
                // guarantee termination.
                level = (0..n).filter(|&i| !placed[i]).collect();
                for &index in &level {
                    placed[index] = true;
                }
                remaining -= level.len();
                result.levels.push(level);
                continue;
            };

            let (from, to) = broken;
            dependencies[from].retain(|&t| t != to);
            dependents[to].retain(|&f| f != from);
            out_degree[from] -= 1;
            result.broken_edges.push(BrokenEdge {
                from_key: arena.keys[from].clone(),
                to_key: arena.keys[to].clone(),
            });
            continue;
        }

        // Deterministic order within a level.
        level.sort_by(|&a, &b| arena.keys[a].cmp(&arena.keys[b]));

        for &index in &level {
            placed[index] = true;
            for &dependent in &dependents[index] {
                if !placed[dependent] {
                    out_degree[dependent] -= 1;
                }
            }
        }
        remaining -= level.len();
        result.levels.push(level);
    }

    result
}

/// Pick the cycle-breaking edge: an edge `from -> to` where `to` has
/// the highest in-degree among remaining nodes; ties resolve to the
/// lowest `(from_key, to_key)` pair.
fn pick_cycle_edge(
    arena: &GraphArena,
    placed: &[bool],
    dependencies: &[Vec<usize>],
) -> Option<(usize, usize)> {
    let n = arena.len();
    let mut in_degree = vec![0usize; n];
    for (from, targets) in dependencies.iter().enumerate() {
        if placed[from] {
            continue;
        }
        for &to in targets {
            if !placed[to] {
                in_degree[to] += 1;
            }
        }
    }

    let mut best: Option<(usize, usize)> = None;
    let mut best_degree = 0usize;
    for (from, targets) in dependencies.iter().enumerate() {
        if placed[from] {
            continue;
        }
        for &to in targets {
            if placed[to] {
                continue;
            }
            let degree = in_degree[to];
            let candidate = (from, to);
            let better = match best {
                None => true,
                Some(current) => {
                    degree > best_degree
                        || (degree == best_degree
                            && (arena.keys[candidate.0].as_str(), arena.keys[candidate.1].as_str())
                                < (arena.keys[current.0].as_str(), arena.keys[current.1].as_str()))
                }
            };
            if better {
                best = Some(candidate);
                best_degree = degree;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::arena::ArenaEdge;
    use crate::types::{EdgeKind, EntityKind};

    fn arena_with(n: usize, edges: Vec<(usize, usize, EdgeKind)>) -> GraphArena {
        GraphArena {
            keys: (0..n).map(|i| format!("k{i}")).collect(),
            kinds: vec![EntityKind::Function; n],
            index_of: (0..n).map(|i| (format!("k{i}"), i)).collect(),
            edges: edges
                .into_iter()
                .map(|(from, to, kind)| ArenaEdge { from, to, kind })
                .collect(),
        }
    }

    fn level_of(levels: &TopoLevels, index: usize) -> usize {
        levels
            .levels
            .iter()
            .position(|level| level.contains(&index))
            .expect("placed")
    }

    #[test]
    fn test_chain_levels_bottom_up() {
        // 0 calls 1 calls 2: leaves first, so 2 in L0, 1 in L1, 0 in L2.
        let result = topo_levels(&arena_with(
            3,
            vec![(0, 1, EdgeKind::Calls), (1, 2, EdgeKind::Calls)],
        ));
        assert!(result.broken_edges.is_empty());
        assert_eq!(level_of(&result, 2), 0);
        assert_eq!(level_of(&result, 1), 1);
        assert_eq!(level_of(&result, 0), 2);
    }

    #[test]
    fn test_callee_never_after_caller() {
        let result = topo_levels(&arena_with(
            4,
            vec![
                (0, 2, EdgeKind::Calls),
                (1, 2, EdgeKind::References),
                (2, 3, EdgeKind::Calls),
            ],
        ));
        assert!(level_of(&result, 3) < level_of(&result, 2));
        assert!(level_of(&result, 2) < level_of(&result, 0));
        assert!(level_of(&result, 2) < level_of(&result, 1));
    }

    #[test]
    fn test_non_semantic_edges_ignored() {
        let result = topo_levels(&arena_with(
            2,
            vec![(0, 1, EdgeKind::Contains), (0, 1, EdgeKind::Imports)],
        ));
        assert_eq!(result.levels.len(), 1, "no dependencies, one level");
        assert_eq!(result.levels[0].len(), 2);
    }

    #[test]
    fn test_cycle_is_broken_deterministically() {
        // 0 -> 1 -> 0 plus 2 -> 0: in-degrees 0:2, 1:1; the edge into 0
        // breaks, tie-broken to the lowest pair ("k1","k0").
        let edges = vec![
            (0, 1, EdgeKind::Calls),
            (1, 0, EdgeKind::Calls),
            (2, 0, EdgeKind::Calls),
        ];
        let a = topo_levels(&arena_with(3, edges.clone()));
        let b = topo_levels(&arena_with(3, edges));

        assert_eq!(a.broken_edges.len(), 1);
        assert_eq!(a.broken_edges, b.broken_edges, "deterministic break");
        assert_eq!(a.broken_edges[0].to_key, "k0");

        let placed: usize = a.levels.iter().map(Vec::len).sum();
        assert_eq!(placed, 3, "every node still placed");
    }

    #[test]
    fn test_empty() {
        let result = topo_levels(&GraphArena::default());
        assert!(result.levels.is_empty());
    }
}
