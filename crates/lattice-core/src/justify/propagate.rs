//! Context propagation after the levelled pass.
//!
//! Bi-directional: bottom-up, a parent whose feature tag is
//! unclassified adopts the most common tag among its callees
//! (frequency-based, mechanism); top-down, entry points (high fan-in,
//! justified as VERTICAL) push their feature tag back to unclassified
//! descendants, weighted by graph distance so nearer descendants adopt
//! first (intent).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::LatticeResult;
use crate::stores::GraphStore;
use crate::types::{EdgeKind, Justification, Taxonomy, Tenant};

/// Tag meaning "no classification yet".
pub const UNCLASSIFIED: &str = "unclassified";

/// Maximum hops for top-down intent propagation.
const INTENT_MAX_HOPS: usize = 3;

/// Outcome of the propagation pass.
#[derive(Debug, Clone, Default)]
pub struct PropagationOutcome {
    /// Entities whose tag was filled bottom-up from callees.
    pub mechanism_filled: usize,
    /// Entities whose tag was filled top-down from entry points.
    pub intent_filled: usize,
}

/// Run context propagation over the current justifications.
pub async fn propagate(
    graph: &Arc<dyn GraphStore>,
    tenant: &Tenant,
) -> LatticeResult<PropagationOutcome> {
    let justifications = graph.get_current_justifications(tenant).await?;
    let edges = graph.get_all_edges(tenant).await?;

    let mut by_entity: HashMap<String, Justification> = justifications
        .into_iter()
        .map(|j| (j.entity_id.clone(), j))
        .collect();

    // Call adjacency: caller -> callees, callee -> callers.
    let mut callees_of: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut callers_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &edges {
        if edge.kind != EdgeKind::Calls {
            continue;
        }
        callees_of
            .entry(edge.from_key.as_str())
            .or_default()
            .push(edge.to_key.as_str());
        callers_of
            .entry(edge.to_key.as_str())
            .or_default()
            .push(edge.from_key.as_str());
    }

    let mut outcome = PropagationOutcome::default();
    let mut updates: Vec<Justification> = Vec::new();

    // Bottom-up mechanism pass: adopt the majority callee tag.
    let unclassified_keys: Vec<String> = by_entity
        .values()
        .filter(|j| j.feature_tag == UNCLASSIFIED)
        .map(|j| j.entity_id.clone())
        .collect();
    for entity_key in &unclassified_keys {
        let Some(callees) = callees_of.get(entity_key.as_str()) else {
            continue;
        };
        let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for callee in callees {
            if let Some(callee_just) = by_entity.get(*callee) {
                if callee_just.feature_tag != UNCLASSIFIED {
                    *tag_counts.entry(callee_just.feature_tag.as_str()).or_insert(0) += 1;
                }
            }
        }
        let Some((tag, _)) = tag_counts.into_iter().max_by_key(|(_, count)| *count) else {
            continue;
        };
        let tag = tag.to_string();
        if let Some(justification) = by_entity.get_mut(entity_key) {
            justification.feature_tag = tag;
            outcome.mechanism_filled += 1;
            updates.push(justification.clone());
        }
    }

    // Top-down intent pass: entry points push their tag to descendants,
    // nearest first.
    let entry_points: Vec<(String, String)> = by_entity
        .values()
        .filter(|j| j.taxonomy == Taxonomy::Vertical && j.feature_tag != UNCLASSIFIED)
        .filter(|j| callers_of.get(j.entity_id.as_str()).map_or(0, Vec::len) >= 3)
        .map(|j| (j.entity_id.clone(), j.feature_tag.clone()))
        .collect();

    let mut claimed: HashSet<String> = HashSet::new();
    for (entry_key, tag) in &entry_points {
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((entry_key.clone(), 0));
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entry_key.clone());

        while let Some((key, distance)) = queue.pop_front() {
            if distance >= INTENT_MAX_HOPS {
                continue;
            }
            for callee in callees_of.get(key.as_str()).into_iter().flatten() {
                if !visited.insert((*callee).to_string()) {
                    continue;
                }
                queue.push_back(((*callee).to_string(), distance + 1));
                if claimed.contains(*callee) {
                    continue;
                }
                if let Some(justification) = by_entity.get_mut(*callee) {
                    if justification.feature_tag == UNCLASSIFIED {
                        justification.feature_tag = tag.clone();
                        claimed.insert((*callee).to_string());
                        outcome.intent_filled += 1;
                        updates.push(justification.clone());
                    }
                }
            }
        }
    }

    if !updates.is_empty() {
        graph.bulk_upsert_justifications(tenant, &updates).await?;
    }

    tracing::info!(
        tenant = %tenant,
        mechanism = outcome.mechanism_filled,
        intent = outcome.intent_filled,
        "context propagation complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{edge, RunScope};
    use crate::stores::MemoryGraphStore;
    use crate::types::{ConfidenceBreakdown, ModelTier, valid_to_infinity};
    use chrono::Utc;

    fn justification(tenant: &Tenant, key: &str, tag: &str, taxonomy: Taxonomy) -> Justification {
        Justification {
            entity_id: key.into(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            taxonomy,
            feature_tag: tag.into(),
            business_purpose: String::new(),
            domain_concepts: vec![],
            semantic_triples: vec![],
            confidence: 0.7,
            calibrated_confidence: 0.7,
            confidence_breakdown: ConfidenceBreakdown::default(),
            reasoning: String::new(),
            model_used: "m".into(),
            model_tier: ModelTier::Standard,
            body_hash: "h".into(),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        }
    }

    #[tokio::test]
    async fn test_mechanism_fill_from_callees() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let tenant = Tenant::new("o", "r");
        let scope = RunScope::new(tenant.clone(), "v1");

        graph
            .bulk_upsert_justifications(
                &tenant,
                &[
                    justification(&tenant, "parent", UNCLASSIFIED, Taxonomy::Horizontal),
                    justification(&tenant, "child_a", "checkout", Taxonomy::Vertical),
                    justification(&tenant, "child_b", "checkout", Taxonomy::Vertical),
                    justification(&tenant, "child_c", "search", Taxonomy::Vertical),
                ],
            )
            .await
            .expect("seed");
        graph
            .bulk_upsert_edges(
                &tenant,
                &[
                    edge(&scope, "parent", "child_a", EdgeKind::Calls),
                    edge(&scope, "parent", "child_b", EdgeKind::Calls),
                    edge(&scope, "parent", "child_c", EdgeKind::Calls),
                ],
            )
            .await
            .expect("edges");

        let outcome = propagate(&graph, &tenant).await.expect("propagate");
        assert_eq!(outcome.mechanism_filled, 1);

        let parent = graph
            .get_justification(&tenant, "parent")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(parent.feature_tag, "checkout", "majority tag wins");
    }

    #[tokio::test]
    async fn test_intent_fill_from_entry_point() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let tenant = Tenant::new("o", "r");
        let scope = RunScope::new(tenant.clone(), "v1");

        let mut seed = vec![
            justification(&tenant, "entry", "payments", Taxonomy::Vertical),
            justification(&tenant, "leaf", UNCLASSIFIED, Taxonomy::Utility),
        ];
        // Three callers make `entry` an entry point.
        for i in 0..3 {
            seed.push(justification(
                &tenant,
                &format!("caller{i}"),
                "payments",
                Taxonomy::Vertical,
            ));
        }
        graph
            .bulk_upsert_justifications(&tenant, &seed)
            .await
            .expect("seed");

        let mut edges = vec![edge(&scope, "entry", "leaf", EdgeKind::Calls)];
        for i in 0..3 {
            edges.push(edge(&scope, &format!("caller{i}"), "entry", EdgeKind::Calls));
        }
        graph.bulk_upsert_edges(&tenant, &edges).await.expect("edges");

        let outcome = propagate(&graph, &tenant).await.expect("propagate");
        assert_eq!(outcome.intent_filled, 1);

        let leaf = graph
            .get_justification(&tenant, "leaf")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(leaf.feature_tag, "payments");
    }
}
