//! Finalization: the shadow swap.
//!
//! Deletes every entity and edge whose `index_version` differs from the
//! current run's. All writes to the new version must complete before
//! this runs; the single delete is the atomic cutover, so a reader
//! observes either the full previous version or the full new one.

use std::sync::Arc;

use crate::error::LatticeResult;
use crate::stores::{GraphStore, RelationalStore};
use crate::types::RepoStatus;

use super::{IndexTally, RunScope};

/// Divergence ratio between tally and store counts that triggers a
/// warning.
const DIVERGENCE_WARN_RATIO: f64 = 0.10;

/// Outcome of the shadow swap.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    /// Stale entities removed.
    pub entities_deleted: usize,
    /// Stale edges removed.
    pub edges_deleted: usize,
    /// Entities surviving the swap.
    pub entities_live: usize,
    /// Edges surviving the swap.
    pub edges_live: usize,
}

/// Run the shadow swap and verify counts against the in-memory tally.
///
/// Divergence above 10% logs a warning; the store is always trusted.
/// On success the repo record is stamped with the run's HEAD SHA and
/// index version and its status returns to `ready`.
pub async fn finalize(
    graph: &Arc<dyn GraphStore>,
    relational: &Arc<dyn RelationalStore>,
    scope: &RunScope,
    head_sha: &str,
    tally: &IndexTally,
) -> LatticeResult<FinalizeOutcome> {
    let (entities_deleted, edges_deleted) = graph
        .delete_by_index_version(&scope.tenant, &scope.index_version)
        .await?;

    let store_counts = graph.count_entities_by_kind(&scope.tenant).await?;
    let entities_live: usize = store_counts.values().sum();
    let edges_live = graph.get_all_edges(&scope.tenant).await?.len();

    // Verify per-kind counts against the tally. The tally counts every
    // write attempt; idempotent re-upserts make it an upper bound.
    for (kind, tallied) in &tally.entities_by_kind {
        let stored = store_counts.get(kind).copied().unwrap_or(0);
        let divergence = (*tallied as f64 - stored as f64).abs() / (*tallied).max(1) as f64;
        if divergence > DIVERGENCE_WARN_RATIO {
            tracing::warn!(
                kind = %kind,
                tallied,
                stored,
                "entity count divergence above 10%, trusting the store"
            );
        }
    }

    relational
        .record_finalized_index(
            &scope.tenant,
            head_sha,
            &scope.index_version,
            entities_live,
            edges_live,
        )
        .await?;
    relational
        .update_repo_status(&scope.tenant, RepoStatus::Ready)
        .await?;

    tracing::info!(
        tenant = %scope.tenant,
        entities_deleted,
        edges_deleted,
        entities_live,
        edges_live,
        head = %head_sha,
        "shadow swap complete"
    );

    Ok(FinalizeOutcome {
        entities_deleted,
        edges_deleted,
        entities_live,
        edges_live,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryGraphStore, MemoryRelationalStore};
    use crate::types::{
        CodeEntity, EntityKind, Language, ManifestData, RepoRecord, Tenant,
    };
    use chrono::Utc;

    fn entity(tenant: &Tenant, name: &str, version: &str) -> CodeEntity {
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
            index_version: version.into(),
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
    async fn test_finalize_swaps_and_stamps_repo() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(MemoryRelationalStore::new());
        let tenant = Tenant::new("o1", "r1");
        let scope = super::super::RunScope::new(tenant.clone(), "v2");

        relational
            .upsert_repo(&RepoRecord {
                org_id: "o1".into(),
                repo_id: "r1".into(),
                provider: "github".into(),
                clone_url: None,
                default_branch: "main".into(),
                last_indexed_sha: Some("old".into()),
                index_version: Some("v1".into()),
                status: RepoStatus::Indexing,
                entity_count: 1,
                edge_count: 0,
                manifest_data: ManifestData::default(),
                context_documents: vec![],
                updated_at: Utc::now(),
            })
            .await
            .expect("repo");

        graph
            .bulk_upsert_entities(
                &tenant,
                &[entity(&tenant, "old_fn", "v1"), entity(&tenant, "new_fn", "v2")],
            )
            .await
            .expect("entities");

        let mut tally = IndexTally::default();
        tally.entities_by_kind.insert("function".into(), 1);

        let outcome = finalize(&graph, &relational, &scope, "newsha", &tally)
            .await
            .expect("finalize");
        assert_eq!(outcome.entities_deleted, 1);
        assert_eq!(outcome.entities_live, 1);

        let repo = relational
            .get_repo(&tenant)
            .await
            .expect("get")
            .expect("some");
        assert_eq!(repo.status, RepoStatus::Ready);
        assert_eq!(repo.last_indexed_sha.as_deref(), Some("newsha"));
        assert_eq!(repo.index_version.as_deref(), Some("v2"));
        assert_eq!(repo.entity_count, 1);
    }
}
