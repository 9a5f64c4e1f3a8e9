//! Weighted PageRank by power iteration.
//!
//! Edge weights come from [`crate::types::EdgeKind::pagerank_weight`];
//! zero-weight kinds (`contains`, coupling, tests) do not transfer
//! rank. Damping 0.85, convergence epsilon 1e-4, at most 100
//! iterations.

use super::arena::GraphArena;

/// Damping factor.
const DAMPING: f64 = 0.85;
/// L1 convergence threshold.
const EPSILON: f64 = 1e-4;
/// Iteration cap.
const MAX_ITERATIONS: usize = 100;

/// Raw scores and percentile ranks, indexed like the arena.
#[derive(Debug, Clone)]
pub struct PageRankResult {
    /// Raw PageRank score per entity.
    pub scores: Vec<f64>,
    /// Percentile rank in [0, 1] per entity.
    pub percentiles: Vec<f64>,
}

/// Run weighted PageRank over every typed edge in the arena.
pub fn weighted_pagerank(arena: &GraphArena) -> PageRankResult {
    let n = arena.len();
    if n == 0 {
        return PageRankResult {
            scores: Vec::new(),
            percentiles: Vec::new(),
        };
    }

    // Outbound weight totals for normalization.
    let mut out_weight = vec![0.0f64; n];
    for edge in &arena.edges {
        out_weight[edge.from] += edge.kind.pagerank_weight();
    }

    let uniform = 1.0 / n as f64;
    let mut scores = vec![uniform; n];
    let mut next = vec![0.0f64; n];

    for iteration in 0..MAX_ITERATIONS {
        let base = (1.0 - DAMPING) / n as f64;

        // Rank from dangling nodes (no weighted out-edges) is spread
        // uniformly so the total stays 1.
        let dangling: f64 = (0..n)
            .filter(|&i| out_weight[i] == 0.0)
            .map(|i| scores[i])
            .sum();
        let dangling_share = DAMPING * dangling / n as f64;

        for slot in next.iter_mut() {
            *slot = base + dangling_share;
        }
        for edge in &arena.edges {
            let weight = edge.kind.pagerank_weight();
            if weight == 0.0 || out_weight[edge.from] == 0.0 {
                continue;
            }
            next[edge.to] += DAMPING * scores[edge.from] * weight / out_weight[edge.from];
        }

        let delta: f64 = scores
            .iter()
            .zip(&next)
            .map(|(old, new)| (old - new).abs())
            .sum();
        std::mem::swap(&mut scores, &mut next);

        if delta < EPSILON {
            tracing::debug!(iteration, delta, "pagerank converged");
            break;
        }
    }

    let percentiles = percentile_ranks(&scores);
    PageRankResult { scores, percentiles }
}

/// Percentile rank of each score within the score set.
fn percentile_ranks(scores: &[f64]) -> Vec<f64> {
    let n = scores.len();
    if n <= 1 {
        return vec![1.0; n];
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut percentiles = vec![0.0; n];
    for (rank, &index) in order.iter().enumerate() {
        percentiles[index] = rank as f64 / (n - 1) as f64;
    }
    percentiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::arena::ArenaEdge;
    use crate::types::{EdgeKind, EntityKind};

    fn arena_with(n: usize, edges: Vec<ArenaEdge>) -> GraphArena {
        GraphArena {
            keys: (0..n).map(|i| format!("k{i}")).collect(),
            kinds: vec![EntityKind::Function; n],
            index_of: (0..n).map(|i| (format!("k{i}"), i)).collect(),
            edges,
        }
    }

    #[test]
    fn test_empty_graph() {
        let result = weighted_pagerank(&GraphArena::default());
        assert!(result.scores.is_empty());
    }

    #[test]
    fn test_hub_scores_highest() {
        // 0 and 1 both call 2; 2 calls nothing.
        let arena = arena_with(
            3,
            vec![
                ArenaEdge { from: 0, to: 2, kind: EdgeKind::Calls },
                ArenaEdge { from: 1, to: 2, kind: EdgeKind::Calls },
            ],
        );
        let result = weighted_pagerank(&arena);
        assert!(result.scores[2] > result.scores[0]);
        assert!(result.scores[2] > result.scores[1]);
        assert_eq!(result.percentiles[2], 1.0);
    }

    #[test]
    fn test_scores_sum_to_one() {
        let arena = arena_with(
            4,
            vec![
                ArenaEdge { from: 0, to: 1, kind: EdgeKind::Calls },
                ArenaEdge { from: 1, to: 2, kind: EdgeKind::MutatesState },
                ArenaEdge { from: 2, to: 3, kind: EdgeKind::Imports },
            ],
        );
        let result = weighted_pagerank(&arena);
        let total: f64 = result.scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-6, "total was {total}");
    }

    #[test]
    fn test_zero_weight_edges_transfer_nothing() {
        // Only a contains edge: rank stays uniform.
        let arena = arena_with(
            2,
            vec![ArenaEdge { from: 0, to: 1, kind: EdgeKind::Contains }],
        );
        let result = weighted_pagerank(&arena);
        assert!((result.scores[0] - result.scores[1]).abs() < 1e-9);
    }

    #[test]
    fn test_heavier_kind_transfers_more() {
        // 0 -> 1 via mutates_state (0.9), 0 -> 2 via imports (0.1).
        let arena = arena_with(
            3,
            vec![
                ArenaEdge { from: 0, to: 1, kind: EdgeKind::MutatesState },
                ArenaEdge { from: 0, to: 2, kind: EdgeKind::Imports },
            ],
        );
        let result = weighted_pagerank(&arena);
        assert!(result.scores[1] > result.scores[2]);
    }
}
