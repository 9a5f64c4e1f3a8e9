//! Graph analytics: fan-in/out pre-compute, weighted PageRank, Louvain
//! community detection, and the topological sort the justification
//! engine plans from.
//!
//! Fan counts and `risk_level` are computed over `calls` edges only;
//! PageRank runs over all typed edges with per-kind weights.

pub mod arena;
pub mod community;
pub mod pagerank;
pub mod toposort;

use std::sync::Arc;
use std::time::Duration;

use crate::config::IndexingConfig;
use crate::error::LatticeResult;
use crate::stores::{CacheStore, GraphStore};
use crate::types::{EdgeKind, RiskLevel, Tenant};

pub use arena::GraphArena;
pub use community::{detect_communities, CommunityResult};
pub use pagerank::{weighted_pagerank, PageRankResult};
pub use toposort::{topo_levels, TopoLevels};

/// TTL for cached community assignments.
const COMMUNITY_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Outcome of the analytics stage.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsOutcome {
    /// Entities updated with fan/risk/rank/community fields.
    pub entities_updated: usize,
    /// Communities detected.
    pub communities: usize,
    /// Modularity of the partition.
    pub modularity: f64,
    /// Entities bucketed high-risk.
    pub high_risk: usize,
}

/// Run the full analytics pass: fan counts, risk levels, PageRank,
/// communities. Updated entities are written back in batches and
/// community assignments cached under
/// `community:{org}:{repo}:{entity}`.
pub async fn run_analytics(
    graph: &Arc<dyn GraphStore>,
    cache: &Arc<dyn CacheStore>,
    config: &IndexingConfig,
    tenant: &Tenant,
) -> LatticeResult<AnalyticsOutcome> {
    let mut entities = graph.get_all_entities(tenant).await?;
    let edges = graph.get_all_edges(tenant).await?;
    let graph_arena = GraphArena::build(&entities, &edges);

    let (fan_in, fan_out) = graph_arena.fan_counts(EdgeKind::Calls);
    let rank = weighted_pagerank(&graph_arena);
    let communities = detect_communities(&graph_arena);

    let mut outcome = AnalyticsOutcome {
        communities: communities.communities.len(),
        modularity: communities.modularity,
        ..AnalyticsOutcome::default()
    };

    for entity in &mut entities {
        let Some(&index) = graph_arena.index_of.get(&entity.key) else {
            continue;
        };
        let risk = RiskLevel::from_fan(fan_in[index], fan_out[index]);
        if risk == RiskLevel::High {
            outcome.high_risk += 1;
        }
        entity.fan_in = Some(fan_in[index]);
        entity.fan_out = Some(fan_out[index]);
        entity.risk_level = Some(risk);
        entity.pagerank = Some(rank.scores[index]);
        entity.pagerank_percentile = Some(rank.percentiles[index]);
        entity.community_id = Some(communities.assignment[index]);
    }

    for batch in entities.chunks(config.write_batch) {
        graph.bulk_upsert_entities(tenant, batch).await?;
        outcome.entities_updated += batch.len();
    }

    for entity in &entities {
        if let Some(community_id) = entity.community_id {
            let key = format!(
                "community:{}:{}:{}",
                tenant.org_id, tenant.repo_id, entity.key
            );
            cache
                .set(&key, &community_id.to_string(), COMMUNITY_CACHE_TTL)
                .await?;
        }
    }

    tracing::info!(
        tenant = %tenant,
        entities = outcome.entities_updated,
        communities = outcome.communities,
        modularity = outcome.modularity,
        high_risk = outcome.high_risk,
        "analytics pre-compute complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{edge, RunScope};
    use crate::stores::{MemoryCacheStore, MemoryGraphStore};
    use crate::types::{CodeEntity, EntityKind, Language};

    fn entity(tenant: &Tenant, name: &str) -> CodeEntity {
        CodeEntity {
            key: crate::keys::entity_key(&tenant.repo_id, "a.ts", EntityKind::Function, name, name),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Function,
            name: name.into(),
            file_path: "a.ts".into(),
            start_line: 1,
            end_line: 1,
            signature: name.into(),
            body: String::new(),
            documentation: None,
            language: Language::TypeScript,
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

    #[tokio::test]
    async fn test_analytics_writes_fan_and_risk() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let tenant = Tenant::new("o", "r");
        let scope = RunScope::new(tenant.clone(), "v1");

        // hub is called by ten callers: fan_in 10 -> high risk.
        let hub = entity(&tenant, "hub");
        let mut all = vec![hub.clone()];
        let mut edges = Vec::new();
        for i in 0..10 {
            let caller = entity(&tenant, &format!("caller{i}"));
            edges.push(edge(&scope, &caller.key, &hub.key, EdgeKind::Calls));
            all.push(caller);
        }
        graph.bulk_upsert_entities(&tenant, &all).await.expect("entities");
        graph.bulk_upsert_edges(&tenant, &edges).await.expect("edges");

        let outcome = run_analytics(&graph, &cache, &IndexingConfig::default(), &tenant)
            .await
            .expect("analytics");
        assert_eq!(outcome.entities_updated, 11);
        assert_eq!(outcome.high_risk, 1);

        let stored = graph
            .get_entity(&tenant, &hub.key)
            .await
            .expect("get")
            .expect("some");
        assert_eq!(stored.fan_in, Some(10));
        assert_eq!(stored.risk_level, Some(RiskLevel::High));
        assert!(stored.pagerank.is_some());
        assert!(stored.community_id.is_some());

        let cached = cache
            .get(&format!("community:o:r:{}", hub.key))
            .await
            .expect("cache");
        assert!(cached.is_some());
    }
}
