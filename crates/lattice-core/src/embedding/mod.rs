//! Embedding stage: batched, bounded, validated 768-d vector
//! production plus the end-of-run orphan sweep.
//!
//! Files are processed in batches of five; file/directory/module kinds
//! are skipped on the first pass. Every produced vector is validated
//! (finite components, exact dimensionality) before it can reach the
//! vector store; a rejected vector is logged and skipped so it can
//! never corrupt the index.

pub mod document;
pub mod runner;

use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::LatticeResult;
use crate::stores::{GraphStore, VectorSearch};
use crate::types::{EmbeddingRecord, EmbeddingVariant, EntityKind, Tenant, EMBEDDING_DIMENSIONS};

pub use runner::{DenseVectorModel, OnnxModelRunner, StubModel};

/// Outcome of the embedding stage.
#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
    /// Vectors successfully upserted.
    pub embedded: usize,
    /// Entities skipped by kind.
    pub skipped_kind: usize,
    /// Vectors rejected by validation.
    pub rejected: usize,
    /// Entities whose inference failed.
    pub failed: usize,
    /// Orphaned vectors removed by the sweep.
    pub orphans_removed: usize,
}

/// Validate a vector: exact dimensionality, all components finite.
pub fn validate_vector(vector: &[f32]) -> bool {
    vector.len() == EMBEDDING_DIMENSIONS && vector.iter().all(|component| component.is_finite())
}

/// Run the embedding stage over every file in the repo.
pub async fn run_embedding(
    graph: &Arc<dyn GraphStore>,
    vectors: &Arc<dyn VectorSearch>,
    model: &dyn DenseVectorModel,
    config: &EmbeddingConfig,
    tenant: &Tenant,
) -> LatticeResult<EmbedOutcome> {
    let mut outcome = EmbedOutcome::default();

    if !model.is_available() {
        tracing::warn!(tenant = %tenant, "embedding model unavailable, stage skipped");
        return Ok(outcome);
    }

    let files = graph.list_files(tenant).await?;
    let mut upsert_buffer: Vec<EmbeddingRecord> = Vec::new();

    for file_batch in files.chunks(config.files_per_batch) {
        for file_path in file_batch {
            let entities = graph.get_entities_by_file(tenant, file_path).await?;

            // Method inventory per class for the class documents.
            let methods_of = |class_name: &str| -> Vec<String> {
                entities
                    .iter()
                    .filter(|e| e.kind == EntityKind::Method)
                    .filter(|e| {
                        // Methods share the file; ownership is approximated
                        // by line containment within the class span.
                        entities
                            .iter()
                            .any(|c| {
                                c.name == class_name
                                    && c.kind == EntityKind::Class
                                    && e.start_line >= c.start_line
                                    && e.end_line <= c.end_line
                            })
                    })
                    .map(|e| e.name.clone())
                    .collect()
            };

            for entity in &entities {
                // First pass skips container kinds.
                if !entity.kind.is_semantic() {
                    outcome.skipped_kind += 1;
                    continue;
                }

                let justification = graph.get_justification(tenant, &entity.key).await?;
                let methods = if entity.kind == EntityKind::Class {
                    methods_of(&entity.name)
                } else {
                    Vec::new()
                };
                let text = document::build_document(
                    entity,
                    &methods,
                    justification.as_ref(),
                    config.body_chars,
                );

                // One document at a time; batching spikes memory.
                let vector = match model.embed_one(&text) {
                    Ok(vector) => vector,
                    Err(e) => {
                        tracing::warn!(entity = %entity.key, error = %e, "inference failed");
                        outcome.failed += 1;
                        continue;
                    }
                };

                if !validate_vector(&vector) {
                    tracing::warn!(
                        entity = %entity.key,
                        "rejecting vector with non-finite or missing components"
                    );
                    outcome.rejected += 1;
                    continue;
                }

                upsert_buffer.push(EmbeddingRecord {
                    entity_key: entity.key.clone(),
                    variant: EmbeddingVariant::Code,
                    vector,
                    org_id: tenant.org_id.clone(),
                    repo_id: tenant.repo_id.clone(),
                });

                if upsert_buffer.len() >= config.upsert_batch {
                    outcome.embedded += vectors.upsert(tenant, &upsert_buffer).await?;
                    upsert_buffer.clear();
                }
            }
        }
    }

    if !upsert_buffer.is_empty() {
        outcome.embedded += vectors.upsert(tenant, &upsert_buffer).await?;
    }

    // Orphan sweep: vectors whose entity no longer exists.
    let live_keys: Vec<String> = graph
        .get_all_entities(tenant)
        .await?
        .into_iter()
        .map(|e| e.key)
        .collect();
    outcome.orphans_removed = vectors.delete_orphaned(tenant, &live_keys).await?;

    tracing::info!(
        tenant = %tenant,
        embedded = outcome.embedded,
        skipped = outcome.skipped_kind,
        rejected = outcome.rejected,
        failed = outcome.failed,
        orphans = outcome.orphans_removed,
        "embedding stage complete"
    );

    Ok(outcome)
}

/// Re-embed only the given entities (incremental delta path).
pub async fn embed_delta(
    graph: &Arc<dyn GraphStore>,
    vectors: &Arc<dyn VectorSearch>,
    model: &dyn DenseVectorModel,
    config: &EmbeddingConfig,
    tenant: &Tenant,
    entity_keys: &[String],
) -> LatticeResult<usize> {
    if !model.is_available() {
        return Ok(0);
    }
    let entities = graph.get_entities_by_keys(tenant, entity_keys).await?;
    let mut records = Vec::new();
    for entity in &entities {
        if !entity.kind.is_semantic() {
            continue;
        }
        let justification = graph.get_justification(tenant, &entity.key).await?;
        let text =
            document::build_document(entity, &[], justification.as_ref(), config.body_chars);
        match model.embed_one(&text) {
            Ok(vector) if validate_vector(&vector) => records.push(EmbeddingRecord {
                entity_key: entity.key.clone(),
                variant: EmbeddingVariant::Code,
                vector,
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
            }),
            Ok(_) => tracing::warn!(entity = %entity.key, "delta vector rejected"),
            Err(e) => tracing::warn!(entity = %entity.key, error = %e, "delta inference failed"),
        }
    }
    let mut written = 0;
    for batch in records.chunks(config.upsert_batch) {
        written += vectors.upsert(tenant, batch).await?;
    }
    Ok(written)
}
