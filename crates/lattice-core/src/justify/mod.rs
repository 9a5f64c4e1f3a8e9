//! Justification engine: topology-ordered, batched LLM production of
//! business justifications.
//!
//! Processing is bottom-up over the levels of the semantic-dependency
//! DAG: leaves first, so every entity's callees carry justifications
//! before the entity itself is prompted. Within a level, entities are
//! chunked, staleness-checked, routed to a model tier, bin-packed into
//! batches under joint token budgets, and written bi-temporally. LLM
//! failures degrade through per-entity calls to canned low-confidence
//! justifications; the pipeline always completes.

pub mod batch;
pub mod confidence;
pub mod context;
pub mod features;
pub mod prompt;
pub mod propagate;
pub mod router;
pub mod staleness;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::analytics::{topo_levels, GraphArena};
use crate::config::{JustifyConfig, LlmConfig};
use crate::error::{LatticeError, LatticeResult};
use crate::keys;
use crate::stores::{GitHost, GraphStore, LlmProvider, ObjectRequest, VectorSearch};
use crate::types::{
    CodeEntity, ConfidenceBreakdown, FeatureAggregation, Justification, ModelTier, Tenant,
    valid_to_infinity,
};

use context::EntityContext;
use staleness::ChangedSet;

pub use propagate::UNCLASSIFIED;

/// Commit subjects fetched per file for the intent signal.
const COMMIT_SUBJECTS_PER_FILE: usize = 10;
/// Minimum occurrences for a concept to enter the ontology refinement.
const REFINE_MIN_OCCURRENCES: u32 = 3;
/// Concepts appended per refinement.
const REFINE_CAP: usize = 50;

/// Outcome of a justification run.
#[derive(Debug, Clone, Default)]
pub struct JustifyOutcome {
    /// Justifications written from LLM output.
    pub justified: usize,
    /// Entities skipped as fresh.
    pub skipped_fresh: usize,
    /// Entities served by the heuristic bypass.
    pub heuristic_bypassed: usize,
    /// Entities that received the canned fallback.
    pub fallback: usize,
    /// Cycles broken during the sort.
    pub cycles_broken: usize,
    /// Levels processed.
    pub levels: usize,
    /// Per-feature rollups computed at the end of the run.
    pub features: Vec<FeatureAggregation>,
}

/// The engine, constructor-injected with its collaborators.
pub struct JustificationEngine {
    graph: Arc<dyn GraphStore>,
    relational: Arc<dyn crate::stores::RelationalStore>,
    vectors: Arc<dyn VectorSearch>,
    llm: Arc<dyn LlmProvider>,
    config: JustifyConfig,
    llm_config: LlmConfig,
    /// Workspace checkout for commit-subject harvesting, when available.
    git: Option<(Arc<dyn GitHost>, PathBuf)>,
}

impl JustificationEngine {
    /// Create an engine.
    pub fn new(
        graph: Arc<dyn GraphStore>,
        relational: Arc<dyn crate::stores::RelationalStore>,
        vectors: Arc<dyn VectorSearch>,
        llm: Arc<dyn LlmProvider>,
        config: JustifyConfig,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            graph,
            relational,
            vectors,
            llm,
            config,
            llm_config,
            git: None,
        }
    }

    /// Attach a workspace checkout for commit-subject harvesting.
    pub fn with_workspace(mut self, git: Arc<dyn GitHost>, workspace: PathBuf) -> Self {
        self.git = Some((git, workspace));
        self
    }

    /// Run the full justification pass over the repo.
    pub async fn run(&self, tenant: &Tenant) -> LatticeResult<JustifyOutcome> {
        self.run_scoped(tenant, None).await
    }

    /// Cascade re-justification for the incremental path: each changed
    /// entity contributes its bounded subgraph (hub entities exempt),
    /// and the union is re-justified in topology order.
    pub async fn run_cascade(
        &self,
        tenant: &Tenant,
        changed_keys: &[String],
    ) -> LatticeResult<JustifyOutcome> {
        let mut union: HashSet<String> = HashSet::new();
        for changed in changed_keys {
            if let Some(entity) = self.graph.get_entity(tenant, changed).await? {
                if entity.fan_in.unwrap_or(0) > self.config.hub_threshold {
                    tracing::debug!(entity = %changed, "hub entity exempt from cascade");
                    union.insert(changed.clone());
                    continue;
                }
            }
            let neighborhood = self
                .graph
                .get_subgraph(
                    tenant,
                    std::slice::from_ref(changed),
                    self.config.cascade_hops,
                    self.config.cascade_entity_budget,
                )
                .await?;
            union.insert(changed.clone());
            union.extend(neighborhood.into_iter().map(|e| e.key));
        }
        self.run_scoped(tenant, Some(union)).await
    }

    async fn run_scoped(
        &self,
        tenant: &Tenant,
        scope: Option<HashSet<String>>,
    ) -> LatticeResult<JustifyOutcome> {
        let entities = self.graph.get_all_entities(tenant).await?;
        let edges = self.graph.get_all_edges(tenant).await?;
        let arena = GraphArena::build(&entities, &edges);
        let entity_by_key: HashMap<&str, &CodeEntity> =
            entities.iter().map(|e| (e.key.as_str(), e)).collect();

        let sorted = topo_levels(&arena);
        for broken in &sorted.broken_edges {
            tracing::warn!(
                from = %broken.from_key,
                to = %broken.to_key,
                "cycle broken during topological sort"
            );
        }

        let mut outcome = JustifyOutcome {
            cycles_broken: sorted.broken_edges.len(),
            ..JustifyOutcome::default()
        };
        let mut changed = ChangedSet::new(self.config.changed_id_cap);
        let mut concept_counts: BTreeMap<String, u32> = BTreeMap::new();
        let mut subjects_cache: HashMap<String, Vec<String>> = HashMap::new();

        let ontology = self.graph.get_domain_ontology(tenant).await?;
        let context_document = self.context_document(tenant).await?;

        for (level_index, level) in sorted.levels.iter().enumerate() {
            outcome.levels += 1;

            let level_entities: Vec<CodeEntity> = level
                .iter()
                .map(|&index| arena.keys[index].as_str())
                .filter(|key| scope.as_ref().map_or(true, |s| s.contains(*key)))
                .filter_map(|key| entity_by_key.get(key).map(|&e| e.clone()))
                .filter(|e| e.kind.is_semantic() && e.quarantine_error.is_none())
                .collect();

            // Parallel chunks of 100 within a level.
            for chunk in level_entities.chunks(self.config.chunk_size) {
                self.harvest_commit_subjects(chunk, &mut subjects_cache).await;

                for context_batch in chunk.chunks(self.config.context_batch) {
                    let contexts = context::build_contexts(
                        &self.graph,
                        tenant,
                        context_batch,
                        &subjects_cache,
                    )
                    .await?;

                    let mut pending: Vec<EntityContext> = Vec::new();
                    let mut rows: Vec<Justification> = Vec::new();

                    for ctx in contexts {
                        let current = self
                            .graph
                            .get_justification(tenant, &ctx.entity.key)
                            .await?;
                        let callee_keys: Vec<String> =
                            ctx.callees.iter().map(|(_, key)| key.clone()).collect();

                        if staleness::is_fresh(&ctx.entity, current.as_ref(), &callee_keys, &changed)
                        {
                            outcome.skipped_fresh += 1;
                            continue;
                        }

                        if let Some(hint) = router::heuristic_hint(&ctx.entity) {
                            if router::can_bypass(&hint, ctx.caller_names.len()) {
                                rows.push(self.canned_row(
                                    tenant,
                                    &ctx,
                                    hint.taxonomy,
                                    &hint.feature_tag,
                                    &hint.purpose,
                                    hint.confidence,
                                    ModelTier::Heuristic,
                                ));
                                outcome.heuristic_bypassed += 1;
                                continue;
                            }
                        }

                        pending.push(ctx);
                    }

                    // Group by tier; each tier has its own budgets.
                    let mut by_tier: BTreeMap<&str, Vec<EntityContext>> = BTreeMap::new();
                    for ctx in pending {
                        by_tier.entry(ctx.tier.as_str()).or_default().push(ctx);
                    }

                    for (_, tier_contexts) in by_tier {
                        let tier = tier_contexts[0].tier;
                        let produced = self
                            .justify_tier(tenant, tier, &tier_contexts, ontology.as_ref(), context_document.as_deref())
                            .await;
                        for (row, was_fallback) in produced {
                            if was_fallback {
                                outcome.fallback += 1;
                            } else {
                                outcome.justified += 1;
                            }
                            rows.push(row);
                        }
                    }

                    for row in &rows {
                        changed.record(&row.entity_id);
                        for concept in &row.domain_concepts {
                            *concept_counts.entry(concept.to_lowercase()).or_insert(0) += 1;
                        }
                    }
                    if !rows.is_empty() {
                        self.graph.bulk_upsert_justifications(tenant, &rows).await?;
                    }
                }
            }

            // Ontology refinement every N levels.
            if (level_index + 1) % self.config.refine_every_levels == 0 {
                crate::ontology::refine_ontology(
                    &self.graph,
                    tenant,
                    &concept_counts,
                    REFINE_MIN_OCCURRENCES,
                    REFINE_CAP,
                )
                .await?;
            }
        }

        // Post-pass: propagation, community labels, rollups, synthesis
        // embeddings.
        propagate::propagate(&self.graph, tenant).await?;
        self.label_communities(tenant).await?;

        let final_entities = self.graph.get_all_entities(tenant).await?;
        let final_justifications = self.graph.get_current_justifications(tenant).await?;
        outcome.features =
            features::aggregate_features(tenant, &final_entities, &final_justifications);
        features::embed_justifications(&self.graph, &self.vectors, tenant).await?;

        tracing::info!(
            tenant = %tenant,
            justified = outcome.justified,
            skipped = outcome.skipped_fresh,
            heuristic = outcome.heuristic_bypassed,
            fallback = outcome.fallback,
            levels = outcome.levels,
            cycles_broken = outcome.cycles_broken,
            "justification pass complete"
        );

        Ok(outcome)
    }

    /// Justify one tier's contexts: pack, call, parse, calibrate.
    /// Returns `(row, was_fallback)` pairs.
    async fn justify_tier(
        &self,
        tenant: &Tenant,
        tier: ModelTier,
        contexts: &[EntityContext],
        ontology: Option<&crate::types::DomainOntology>,
        context_document: Option<&str>,
    ) -> Vec<(Justification, bool)> {
        let params = self.llm_config.params_for_tier(tier);
        let budgets = batch::Budgets::for_model(params, &self.config);
        let by_key: HashMap<&str, &EntityContext> = contexts
            .iter()
            .map(|ctx| (ctx.entity.key.as_str(), ctx))
            .collect();

        let items: Vec<batch::PackItem> = contexts
            .iter()
            .map(|ctx| batch::PackItem {
                entity_key: ctx.entity.key.clone(),
                prompt_chars: prompt::estimated_prompt_chars(ctx),
            })
            .collect();

        let mut rows = Vec::new();
        for packed in batch::pack(&items, budgets, &self.config) {
            let batch_contexts: Vec<&EntityContext> = packed
                .entity_keys
                .iter()
                .filter_map(|key| by_key.get(key.as_str()).copied())
                .collect();
            if batch_contexts.is_empty() {
                continue;
            }

            let request = ObjectRequest {
                model: params.model.clone(),
                schema: prompt::batch_schema(),
                prompt: prompt::batch_prompt(&batch_contexts, ontology, context_document),
                system: Some(prompt::SYSTEM_PROMPT.to_string()),
                temperature: 0.1,
            };

            match self.call_with_backoff(&request).await {
                Ok(response) => {
                    let parsed: Result<prompt::LlmBatchResponse, _> =
                        serde_json::from_value(response.value);
                    match parsed {
                        Ok(batch_response) => {
                            let mut returned: HashMap<String, prompt::LlmJustification> =
                                batch_response
                                    .justifications
                                    .into_iter()
                                    .map(|j| (j.entity_key.clone(), j))
                                    .collect();
                            for ctx in &batch_contexts {
                                match returned.remove(ctx.entity.key.as_str()) {
                                    Some(output) => rows.push((
                                        self.row_from_output(tenant, ctx, output, tier, params),
                                        false,
                                    )),
                                    None => {
                                        // The model dropped an entity from
                                        // the batch; retry it solo.
                                        rows.push(
                                            self.justify_solo(
                                                tenant,
                                                ctx,
                                                tier,
                                                ontology,
                                                context_document,
                                            )
                                            .await,
                                        );
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "batch response malformed, going per-entity");
                            for ctx in &batch_contexts {
                                rows.push(
                                    self.justify_solo(tenant, ctx, tier, ontology, context_document)
                                        .await,
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch call failed, going per-entity");
                    for ctx in &batch_contexts {
                        rows.push(
                            self.justify_solo(tenant, ctx, tier, ontology, context_document)
                                .await,
                        );
                    }
                }
            }
        }
        rows
    }

    /// Per-entity call, degrading to the canned fallback.
    async fn justify_solo(
        &self,
        tenant: &Tenant,
        ctx: &EntityContext,
        tier: ModelTier,
        ontology: Option<&crate::types::DomainOntology>,
        context_document: Option<&str>,
    ) -> (Justification, bool) {
        let params = self.llm_config.params_for_tier(tier);
        let request = ObjectRequest {
            model: params.model.clone(),
            schema: prompt::batch_schema(),
            prompt: prompt::batch_prompt(&[ctx], ontology, context_document),
            system: Some(prompt::SYSTEM_PROMPT.to_string()),
            temperature: 0.1,
        };

        match self.call_with_backoff(&request).await {
            Ok(response) => {
                let parsed: Result<prompt::LlmBatchResponse, _> =
                    serde_json::from_value(response.value);
                if let Ok(batch_response) = parsed {
                    if let Some(output) = batch_response.justifications.into_iter().next() {
                        return (self.row_from_output(tenant, ctx, output, tier, params), false);
                    }
                }
                (self.fallback_row(tenant, ctx), true)
            }
            Err(e) => {
                tracing::warn!(entity = %ctx.entity.key, error = %e, "per-entity call failed");
                (self.fallback_row(tenant, ctx), true)
            }
        }
    }

    /// Call the provider with the `[2s, 8s, 30s]` backoff schedule on
    /// retryable failures.
    async fn call_with_backoff(
        &self,
        request: &ObjectRequest,
    ) -> LatticeResult<crate::stores::ObjectResponse> {
        let mut last_error = None;
        for (attempt, delay) in std::iter::once(&0u64)
            .chain(self.config.backoff_secs.iter())
            .enumerate()
        {
            if *delay > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(*delay)).await;
            }
            match self.llm.generate_object(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "llm call failed, backing off");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LatticeError::Llm {
            message: "exhausted backoff".into(),
            retryable: true,
        }))
    }

    fn row_from_output(
        &self,
        tenant: &Tenant,
        ctx: &EntityContext,
        output: prompt::LlmJustification,
        tier: ModelTier,
        params: &crate::config::ModelParams,
    ) -> Justification {
        let breakdown = confidence::calibrate(ctx, output.confidence, tier);
        Justification {
            entity_id: ctx.entity.key.clone(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            taxonomy: prompt::parse_taxonomy(&output.taxonomy),
            feature_tag: if output.feature_tag.trim().is_empty() {
                UNCLASSIFIED.to_string()
            } else {
                output.feature_tag.trim().to_lowercase()
            },
            business_purpose: output.business_purpose,
            domain_concepts: output.domain_concepts,
            semantic_triples: output
                .semantic_triples
                .into_iter()
                .map(prompt::LlmTriple::into_domain)
                .collect(),
            confidence: output.confidence,
            calibrated_confidence: breakdown.total(),
            confidence_breakdown: breakdown,
            reasoning: output.reasoning,
            model_used: params.model.clone(),
            model_tier: tier,
            body_hash: keys::body_hash(&ctx.entity.body),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        }
    }

    /// Canned fallback: UTILITY, confidence 0.3.
    fn fallback_row(&self, tenant: &Tenant, ctx: &EntityContext) -> Justification {
        self.canned_row(
            tenant,
            ctx,
            crate::types::Taxonomy::Utility,
            UNCLASSIFIED,
            "No justification could be produced; classified as infrastructure by default.",
            0.3,
            ModelTier::Fallback,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn canned_row(
        &self,
        tenant: &Tenant,
        ctx: &EntityContext,
        taxonomy: crate::types::Taxonomy,
        feature_tag: &str,
        purpose: &str,
        confidence: f64,
        tier: ModelTier,
    ) -> Justification {
        Justification {
            entity_id: ctx.entity.key.clone(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            taxonomy,
            feature_tag: feature_tag.to_string(),
            business_purpose: purpose.to_string(),
            domain_concepts: vec![],
            semantic_triples: vec![],
            confidence,
            calibrated_confidence: confidence,
            confidence_breakdown: ConfidenceBreakdown {
                structural: 0.0,
                intent: 0.0,
                llm: 0.0,
            },
            reasoning: String::new(),
            model_used: "none".into(),
            model_tier: tier,
            body_hash: keys::body_hash(&ctx.entity.body),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        }
    }

    /// Fetch recent commit subjects for the chunk's files.
    async fn harvest_commit_subjects(
        &self,
        chunk: &[CodeEntity],
        cache: &mut HashMap<String, Vec<String>>,
    ) {
        let Some((git, workspace)) = &self.git else {
            return;
        };
        for entity in chunk {
            if cache.contains_key(&entity.file_path) {
                continue;
            }
            let subjects = git
                .recent_commit_subjects(workspace, &entity.file_path, COMMIT_SUBJECTS_PER_FILE)
                .await
                .unwrap_or_default();
            cache.insert(entity.file_path.clone(), subjects);
        }
    }

    /// First user-provided context document, when present.
    async fn context_document(&self, tenant: &Tenant) -> LatticeResult<Option<String>> {
        Ok(self
            .relational
            .get_repo(tenant)
            .await?
            .and_then(|repo| repo.context_documents.into_iter().next()))
    }

    /// Choose community labels: each community adopts the most common
    /// feature tag among its justified members.
    async fn label_communities(&self, tenant: &Tenant) -> LatticeResult<()> {
        let entities = self.graph.get_all_entities(tenant).await?;
        let justifications = self.graph.get_current_justifications(tenant).await?;
        let tag_of: HashMap<&str, &str> = justifications
            .iter()
            .filter(|j| j.feature_tag != UNCLASSIFIED)
            .map(|j| (j.entity_id.as_str(), j.feature_tag.as_str()))
            .collect();

        let mut tags_by_community: HashMap<u32, BTreeMap<&str, usize>> = HashMap::new();
        for entity in &entities {
            if let (Some(community), Some(tag)) =
                (entity.community_id, tag_of.get(entity.key.as_str()))
            {
                *tags_by_community
                    .entry(community)
                    .or_default()
                    .entry(tag)
                    .or_insert(0) += 1;
            }
        }

        let label_by_community: HashMap<u32, String> = tags_by_community
            .into_iter()
            .filter_map(|(community, counts)| {
                counts
                    .into_iter()
                    .max_by_key(|(_, count)| *count)
                    .map(|(tag, _)| (community, tag.to_string()))
            })
            .collect();

        let mut updated: Vec<CodeEntity> = Vec::new();
        for mut entity in entities {
            if let Some(community) = entity.community_id {
                if let Some(label) = label_by_community.get(&community) {
                    if entity.community_label.as_deref() != Some(label) {
                        entity.community_label = Some(label.clone());
                        updated.push(entity);
                    }
                }
            }
        }
        if !updated.is_empty() {
            self.graph.bulk_upsert_entities(tenant, &updated).await?;
        }
        Ok(())
    }
}
