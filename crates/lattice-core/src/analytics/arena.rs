//! Flat graph arena.
//!
//! Entities and edges are held as flat vectors with integer indices and
//! a `key -> index` side table. All traversals operate on indices, so
//! cycles in the call graph never become ownership cycles.

use std::collections::HashMap;

use crate::types::{CodeEdge, CodeEntity, EdgeKind, EntityKind};

/// One edge in arena form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaEdge {
    /// Index of the source entity.
    pub from: usize,
    /// Index of the target entity.
    pub to: usize,
    /// Semantic label.
    pub kind: EdgeKind,
}

/// Flat graph over one repo's entities and edges.
#[derive(Debug, Default)]
pub struct GraphArena {
    /// Entity keys by index.
    pub keys: Vec<String>,
    /// Entity kinds by index.
    pub kinds: Vec<EntityKind>,
    /// Key -> index side table.
    pub index_of: HashMap<String, usize>,
    /// All edges whose endpoints are both present.
    pub edges: Vec<ArenaEdge>,
}

impl GraphArena {
    /// Build an arena from store documents. Edges referencing unknown
    /// keys (external targets, healed files) are dropped.
    pub fn build(entities: &[CodeEntity], edges: &[CodeEdge]) -> Self {
        let mut arena = Self {
            keys: Vec::with_capacity(entities.len()),
            kinds: Vec::with_capacity(entities.len()),
            index_of: HashMap::with_capacity(entities.len()),
            edges: Vec::with_capacity(edges.len()),
        };
        for entity in entities {
            let index = arena.keys.len();
            arena.keys.push(entity.key.clone());
            arena.kinds.push(entity.kind);
            arena.index_of.insert(entity.key.clone(), index);
        }
        for edge in edges {
            let (Some(&from), Some(&to)) = (
                arena.index_of.get(&edge.from_key),
                arena.index_of.get(&edge.to_key),
            ) else {
                continue;
            };
            arena.edges.push(ArenaEdge {
                from,
                to,
                kind: edge.kind,
            });
        }
        arena
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Per-index inbound and outbound counts over one edge kind.
    pub fn fan_counts(&self, kind: EdgeKind) -> (Vec<u32>, Vec<u32>) {
        let mut fan_in = vec![0u32; self.len()];
        let mut fan_out = vec![0u32; self.len()];
        for edge in &self.edges {
            if edge.kind == kind {
                fan_out[edge.from] += 1;
                fan_in[edge.to] += 1;
            }
        }
        (fan_in, fan_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, Tenant};

    pub(crate) fn entity(tenant: &Tenant, name: &str) -> CodeEntity {
        CodeEntity {
            key: crate::keys::entity_key(&tenant.repo_id, "a.rs", EntityKind::Function, name, name),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Function,
            name: name.into(),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 1,
            signature: name.into(),
            body: String::new(),
            documentation: None,
            language: Language::Rust,
            index_version: "v1".into(),
            fan_in: None,
            fan_out: None,
            risk_level: None,
            community_id: None,
            community_label: None,
            pagerank: None,
            pagerank_percentile: None,
            original_kind: None,
            quarantine_error: None,
        }
    }

    #[test]
    fn test_build_drops_dangling_edges() {
        let tenant = Tenant::new("o", "r");
        let a = entity(&tenant, "a");
        let b = entity(&tenant, "b");
        let edges = vec![
            crate::indexer::edge(
                &crate::indexer::RunScope::new(tenant.clone(), "v1"),
                &a.key,
                &b.key,
                EdgeKind::Calls,
            ),
            crate::indexer::edge(
                &crate::indexer::RunScope::new(tenant.clone(), "v1"),
                &a.key,
                "missing",
                EdgeKind::Calls,
            ),
        ];
        let arena = GraphArena::build(&[a, b], &edges);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.edges.len(), 1);
    }

    #[test]
    fn test_fan_counts() {
        let tenant = Tenant::new("o", "r");
        let scope = crate::indexer::RunScope::new(tenant.clone(), "v1");
        let a = entity(&tenant, "a");
        let b = entity(&tenant, "b");
        let c = entity(&tenant, "c");
        let edges = vec![
            crate::indexer::edge(&scope, &a.key, &c.key, EdgeKind::Calls),
            crate::indexer::edge(&scope, &b.key, &c.key, EdgeKind::Calls),
            crate::indexer::edge(&scope, &a.key, &b.key, EdgeKind::References),
        ];
        let arena = GraphArena::build(&[a.clone(), b, c.clone()], &edges);
        let (fan_in, fan_out) = arena.fan_counts(EdgeKind::Calls);
        let c_idx = arena.index_of[&c.key];
        let a_idx = arena.index_of[&a.key];
        assert_eq!(fan_in[c_idx], 2);
        assert_eq!(fan_out[a_idx], 1, "references edge not counted");
    }
}
