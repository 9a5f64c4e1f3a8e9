//! Graph-context building for justification prompts.
//!
//! For batches of 50 entities, fetch the structural neighborhood each
//! prompt needs: callers, callees, containing file, same-file siblings,
//! imports, centrality (PageRank percentile with a degree-based
//! fallback), community label, and the already-written justifications
//! of callees.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LatticeResult;
use crate::stores::GraphStore;
use crate::types::{CodeEntity, EdgeKind, Justification, ModelTier, Tenant};

/// Everything the prompt builder needs for one entity.
#[derive(Debug, Clone)]
pub struct EntityContext {
    /// The entity itself.
    pub entity: CodeEntity,
    /// Names of entities calling this one.
    pub caller_names: Vec<String>,
    /// Callees: (name, key).
    pub callees: Vec<(String, String)>,
    /// Names of other declarations in the same file.
    pub siblings: Vec<String>,
    /// Modules imported by the containing file.
    pub imports: Vec<String>,
    /// Centrality in [0, 1].
    pub centrality: f64,
    /// Community label, when assigned.
    pub community_label: Option<String>,
    /// Current justifications of callees.
    pub callee_justifications: Vec<Justification>,
    /// Routed model tier.
    pub tier: ModelTier,
    /// Commit subjects touching the file, newest first.
    pub commit_subjects: Vec<String>,
}

/// Build contexts for a batch of entities (the caller slices into
/// batches of [`crate::config::JustifyConfig::context_batch`]).
pub async fn build_contexts(
    graph: &Arc<dyn GraphStore>,
    tenant: &Tenant,
    entities: &[CodeEntity],
    commit_subjects_by_file: &HashMap<String, Vec<String>>,
) -> LatticeResult<Vec<EntityContext>> {
    let mut contexts = Vec::with_capacity(entities.len());

    for entity in entities {
        let callers = graph.get_callers_of(tenant, &entity.key).await?;
        let callees = graph.get_callees_of(tenant, &entity.key).await?;

        let siblings: Vec<String> = graph
            .get_entities_by_file(tenant, &entity.file_path)
            .await?
            .into_iter()
            .filter(|sibling| sibling.key != entity.key && sibling.kind.is_semantic())
            .map(|sibling| sibling.name)
            .collect();

        // Imports of the containing file: follow its outgoing imports
        // edges to package names.
        let file_key = crate::keys::file_entity_key(&tenant.repo_id, &entity.file_path);
        let imports: Vec<String> = graph
            .get_all_edges(tenant)
            .await?
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Imports && e.from_key == file_key)
            .filter_map(|e| e.package_name)
            .collect();

        // Centrality: precomputed PageRank percentile; degree-based
        // fallback when analytics has not run.
        let centrality = entity.pagerank_percentile.unwrap_or_else(|| {
            let degree = callers.len() + callees.len();
            (degree as f64 / 20.0).min(1.0)
        });

        let mut callee_justifications = Vec::new();
        for callee in &callees {
            if let Some(justification) = graph.get_justification(tenant, &callee.key).await? {
                callee_justifications.push(justification);
            }
        }

        let tier = super::router::route_tier(entity, callers.len());

        contexts.push(EntityContext {
            caller_names: callers.into_iter().map(|c| c.name).collect(),
            callees: callees.into_iter().map(|c| (c.name, c.key)).collect(),
            siblings,
            imports,
            centrality,
            community_label: entity.community_label.clone(),
            callee_justifications,
            tier,
            commit_subjects: commit_subjects_by_file
                .get(&entity.file_path)
                .cloned()
                .unwrap_or_default(),
            entity: entity.clone(),
        });
    }

    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{edge, RunScope};
    use crate::stores::MemoryGraphStore;
    use crate::types::{EntityKind, Language};

    fn entity(tenant: &Tenant, file: &str, name: &str) -> CodeEntity {
        CodeEntity {
            key: crate::keys::entity_key(&tenant.repo_id, file, EntityKind::Function, name, name),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Function,
            name: name.into(),
            file_path: file.into(),
            start_line: 1,
            end_line: 2,
            signature: name.into(),
            body: format!("fn {name}() {{}}"),
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

    #[tokio::test]
    async fn test_context_includes_neighborhood() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let tenant = Tenant::new("o", "r");
        let scope = RunScope::new(tenant.clone(), "v1");

        let target = entity(&tenant, "src/a.rs", "target");
        let caller = entity(&tenant, "src/b.rs", "caller");
        let callee = entity(&tenant, "src/c.rs", "callee");
        let sibling = entity(&tenant, "src/a.rs", "sibling");

        graph
            .bulk_upsert_entities(
                &tenant,
                &[target.clone(), caller.clone(), callee.clone(), sibling],
            )
            .await
            .expect("entities");
        graph
            .bulk_upsert_edges(
                &tenant,
                &[
                    edge(&scope, &caller.key, &target.key, EdgeKind::Calls),
                    edge(&scope, &target.key, &callee.key, EdgeKind::Calls),
                ],
            )
            .await
            .expect("edges");

        let mut subjects = HashMap::new();
        subjects.insert(
            "src/a.rs".to_string(),
            vec!["fix rounding in totals".to_string()],
        );

        let contexts = build_contexts(&graph, &tenant, &[target.clone()], &subjects)
            .await
            .expect("contexts");
        assert_eq!(contexts.len(), 1);
        let context = &contexts[0];
        assert_eq!(context.caller_names, vec!["caller"]);
        assert_eq!(context.callees.len(), 1);
        assert_eq!(context.callees[0].0, "callee");
        assert_eq!(context.siblings, vec!["sibling"]);
        assert_eq!(context.commit_subjects, vec!["fix rounding in totals"]);
        assert!(context.centrality > 0.0, "degree fallback applies");
    }
}
