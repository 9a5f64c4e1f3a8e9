//! Vector search port: dense-vector upsert and filtered k-NN.
//!
//! Vectors are validated before they reach this port (no NaN/infinity,
//! fixed 768 dimensions); implementations are free to assume finite
//! components. The in-memory fake embeds with a deterministic hash
//! projection so hermetic tests get stable, model-free vectors.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LatticeError, LatticeResult};
use crate::types::{EmbeddingRecord, EmbeddingVariant, Tenant, EMBEDDING_DIMENSIONS};

/// A k-NN hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Entity key of the matched vector.
    pub entity_key: String,
    /// Variant the vector was produced from.
    pub variant: EmbeddingVariant,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// Port over the vector database.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Embed a batch of documents into 768-d vectors.
    async fn embed_documents(&self, texts: &[String]) -> LatticeResult<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> LatticeResult<Vec<f32>>;

    /// Upsert vectors, conflict on `(entity_key, variant)`.
    async fn upsert(&self, tenant: &Tenant, records: &[EmbeddingRecord]) -> LatticeResult<usize>;

    /// k-NN search over one variant within the tenant scope.
    async fn search(
        &self,
        tenant: &Tenant,
        embedding: &[f32],
        top_k: usize,
        variant: EmbeddingVariant,
    ) -> LatticeResult<Vec<VectorHit>>;

    /// Delete vectors whose `entity_key` is not in `live_keys`.
    /// Returns the number removed.
    async fn delete_orphaned(&self, tenant: &Tenant, live_keys: &[String]) -> LatticeResult<usize>;

    /// Convenience: k-NN over the justification (`synthesis`) variant.
    async fn search_justification_embeddings(
        &self,
        tenant: &Tenant,
        query: &str,
        top_k: usize,
    ) -> LatticeResult<Vec<VectorHit>> {
        let embedding = self.embed_query(query).await?;
        self.search(tenant, &embedding, top_k, EmbeddingVariant::Synthesis)
            .await
    }

    /// Number of vectors stored for a tenant (observability).
    async fn count(&self, tenant: &Tenant) -> LatticeResult<usize>;
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

/// Flat in-memory vector store with deterministic pseudo-embeddings.
#[derive(Default)]
pub struct MemoryVectorSearch {
    vectors: RwLock<HashMap<Tenant, HashMap<(String, EmbeddingVariant), Vec<f32>>>>,
}

impl MemoryVectorSearch {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic hash projection into 768 dimensions, L2-normalized.
    /// Not semantically meaningful; stable across runs, which is what
    /// hermetic tests need.
    fn pseudo_embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSIONS];
        for (i, token) in text.split_whitespace().enumerate() {
            let h = xxhash_rust::xxh3::xxh3_64_with_seed(token.as_bytes(), i as u64);
            let slot = (h % EMBEDDING_DIMENSIONS as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl VectorSearch for MemoryVectorSearch {
    async fn embed_documents(&self, texts: &[String]) -> LatticeResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::pseudo_embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> LatticeResult<Vec<f32>> {
        Ok(Self::pseudo_embed(text))
    }

    async fn upsert(&self, tenant: &Tenant, records: &[EmbeddingRecord]) -> LatticeResult<usize> {
        for record in records {
            if record.vector.len() != EMBEDDING_DIMENSIONS {
                return Err(LatticeError::EmbeddingValidation {
                    entity_key: record.entity_key.clone(),
                });
            }
            if record.vector.iter().any(|v| !v.is_finite()) {
                return Err(LatticeError::EmbeddingValidation {
                    entity_key: record.entity_key.clone(),
                });
            }
        }
        let mut vectors = self.vectors.write();
        let repo = vectors.entry(tenant.clone()).or_default();
        for record in records {
            repo.insert(
                (record.entity_key.clone(), record.variant),
                record.vector.clone(),
            );
        }
        Ok(records.len())
    }

    async fn search(
        &self,
        tenant: &Tenant,
        embedding: &[f32],
        top_k: usize,
        variant: EmbeddingVariant,
    ) -> LatticeResult<Vec<VectorHit>> {
        let vectors = self.vectors.read();
        let Some(repo) = vectors.get(tenant) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<VectorHit> = repo
            .iter()
            .filter(|((_, v), _)| *v == variant)
            .map(|((key, v), vector)| VectorHit {
                entity_key: key.clone(),
                variant: *v,
                score: cosine_similarity(embedding, vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_orphaned(&self, tenant: &Tenant, live_keys: &[String]) -> LatticeResult<usize> {
        let live: std::collections::HashSet<&String> = live_keys.iter().collect();
        let mut vectors = self.vectors.write();
        let Some(repo) = vectors.get_mut(tenant) else {
            return Ok(0);
        };
        let before = repo.len();
        repo.retain(|(key, _), _| live.contains(key));
        Ok(before - repo.len())
    }

    async fn count(&self, tenant: &Tenant) -> LatticeResult<usize> {
        Ok(self.vectors.read().get(tenant).map_or(0, HashMap::len))
    }
}
