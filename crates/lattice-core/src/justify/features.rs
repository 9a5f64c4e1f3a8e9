//! Feature aggregation and justification embeddings.
//!
//! After the levelled pass, entities group by `feature_tag` into
//! rollups (entity count, entry points, taxonomy breakdown, mean
//! confidence), and each justification's synthesis text embeds into
//! the `synthesis` vector variant in chunks of 20.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::embedding::document::build_synthesis_document;
use crate::error::LatticeResult;
use crate::stores::{GraphStore, VectorSearch};
use crate::types::{
    CodeEntity, EmbeddingRecord, EmbeddingVariant, FeatureAggregation, Justification, Tenant,
};

/// Chunk size for synthesis embedding.
const SYNTHESIS_CHUNK: usize = 20;
/// Fan-in at or above which an entity counts as an entry point.
const ENTRY_POINT_FAN_IN: u32 = 5;

/// Group current justifications into per-feature rollups.
pub fn aggregate_features(
    tenant: &Tenant,
    entities: &[CodeEntity],
    justifications: &[Justification],
) -> Vec<FeatureAggregation> {
    let entity_by_key: HashMap<&str, &CodeEntity> =
        entities.iter().map(|e| (e.key.as_str(), e)).collect();

    let mut groups: BTreeMap<&str, Vec<&Justification>> = BTreeMap::new();
    for justification in justifications {
        groups
            .entry(justification.feature_tag.as_str())
            .or_default()
            .push(justification);
    }

    groups
        .into_iter()
        .map(|(feature_tag, members)| {
            let mut taxonomy_breakdown: BTreeMap<String, usize> = BTreeMap::new();
            let mut entry_points = Vec::new();
            let mut confidence_sum = 0.0;
            for justification in &members {
                *taxonomy_breakdown
                    .entry(justification.taxonomy.as_str().to_string())
                    .or_insert(0) += 1;
                confidence_sum += justification.calibrated_confidence;
                if let Some(entity) = entity_by_key.get(justification.entity_id.as_str()) {
                    // Entry point: heavily called and visible outside its
                    // file (exported surface approximated by fan-in).
                    if entity.fan_in.unwrap_or(0) >= ENTRY_POINT_FAN_IN {
                        entry_points.push(entity.key.clone());
                    }
                }
            }
            entry_points.sort();
            FeatureAggregation {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
                feature_tag: feature_tag.to_string(),
                entity_count: members.len(),
                entry_points,
                taxonomy_breakdown,
                average_confidence: confidence_sum / members.len().max(1) as f64,
            }
        })
        .collect()
}

/// Embed justification syntheses into the `synthesis` variant.
/// Returns the number of vectors written.
pub async fn embed_justifications(
    graph: &Arc<dyn GraphStore>,
    vectors: &Arc<dyn VectorSearch>,
    tenant: &Tenant,
) -> LatticeResult<usize> {
    let justifications = graph.get_current_justifications(tenant).await?;
    let mut written = 0;

    for chunk in justifications.chunks(SYNTHESIS_CHUNK) {
        let mut texts = Vec::with_capacity(chunk.len());
        let mut chunk_keys = Vec::with_capacity(chunk.len());
        for justification in chunk {
            let Some(entity) = graph.get_entity(tenant, &justification.entity_id).await? else {
                continue;
            };
            texts.push(build_synthesis_document(&entity, justification));
            chunk_keys.push(justification.entity_id.clone());
        }
        if texts.is_empty() {
            continue;
        }
        let embedded = vectors.embed_documents(&texts).await?;
        let records: Vec<EmbeddingRecord> = embedded
            .into_iter()
            .zip(&chunk_keys)
            .filter(|(vector, _)| crate::embedding::validate_vector(vector))
            .map(|(vector, key)| EmbeddingRecord {
                entity_key: key.clone(),
                variant: EmbeddingVariant::Synthesis,
                vector,
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
            })
            .collect();
        written += vectors.upsert(tenant, &records).await?;
    }

    tracing::debug!(written, "justification embeddings stored");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConfidenceBreakdown, EntityKind, Language, ModelTier, Taxonomy, valid_to_infinity,
    };
    use chrono::Utc;

    fn entity(tenant: &Tenant, key: &str, fan_in: u32) -> CodeEntity {
        CodeEntity {
            key: key.into(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Function,
            name: key.into(),
            file_path: "a.ts".into(),
            start_line: 1,
            end_line: 2,
            signature: key.into(),
            body: String::new(),
            documentation: None,
            language: Language::TypeScript,
            index_version: "v1".into(),
            fan_in: Some(fan_in),
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

    fn justification(
        tenant: &Tenant,
        key: &str,
        tag: &str,
        taxonomy: Taxonomy,
        confidence: f64,
    ) -> Justification {
        Justification {
            entity_id: key.into(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            taxonomy,
            feature_tag: tag.into(),
            business_purpose: format!("{key} purpose"),
            domain_concepts: vec![],
            semantic_triples: vec![],
            confidence,
            calibrated_confidence: confidence,
            confidence_breakdown: ConfidenceBreakdown::default(),
            reasoning: String::new(),
            model_used: "m".into(),
            model_tier: ModelTier::Standard,
            body_hash: "h".into(),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        }
    }

    #[test]
    fn test_aggregation_rollups() {
        let tenant = Tenant::new("o", "r");
        let entities = vec![
            entity(&tenant, "hub", 8),
            entity(&tenant, "leaf", 0),
            entity(&tenant, "util", 1),
        ];
        let justifications = vec![
            justification(&tenant, "hub", "checkout", Taxonomy::Vertical, 0.8),
            justification(&tenant, "leaf", "checkout", Taxonomy::Horizontal, 0.6),
            justification(&tenant, "util", "infrastructure", Taxonomy::Utility, 0.4),
        ];

        let aggregations = aggregate_features(&tenant, &entities, &justifications);
        assert_eq!(aggregations.len(), 2);

        let checkout = aggregations
            .iter()
            .find(|a| a.feature_tag == "checkout")
            .expect("checkout");
        assert_eq!(checkout.entity_count, 2);
        assert_eq!(checkout.entry_points, vec!["hub"]);
        assert_eq!(checkout.taxonomy_breakdown["VERTICAL"], 1);
        assert_eq!(checkout.taxonomy_breakdown["HORIZONTAL"], 1);
        assert!((checkout.average_confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_embed_justifications_writes_synthesis_variant() {
        use crate::stores::{MemoryGraphStore, MemoryVectorSearch};

        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let vectors: Arc<dyn VectorSearch> = Arc::new(MemoryVectorSearch::new());
        let tenant = Tenant::new("o", "r");

        graph
            .bulk_upsert_entities(&tenant, &[entity(&tenant, "hub", 5)])
            .await
            .expect("entity");
        graph
            .bulk_upsert_justifications(
                &tenant,
                &[justification(&tenant, "hub", "checkout", Taxonomy::Vertical, 0.8)],
            )
            .await
            .expect("just");

        let written = embed_justifications(&graph, &vectors, &tenant)
            .await
            .expect("embed");
        assert_eq!(written, 1);

        let hits = vectors
            .search_justification_embeddings(&tenant, "checkout purpose", 5)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_key, "hub");
    }
}
