//! The full-index workflow: eleven tracked steps from workspace
//! preparation to pattern detection.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::analytics;
use crate::embedding;
use crate::error::{LatticeError, LatticeResult};
use crate::health;
use crate::indexer::{self, finalize, resolve, scip, workspace, IndexTally, RunScope};
use crate::justify::JustificationEngine;
use crate::ontology;
use crate::patterns;
use crate::snapshot;
use crate::types::{IndexEvent, PipelineStep, RepoStatus, Tenant};

use super::activity::{run_activity, timeouts, ActivityOptions};
use super::progress::ProgressTracker;
use super::Orchestrator;

/// Options for a full index run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Branch to clone; the repo default when `None`.
    pub branch: Option<String>,
    /// Precise indexer command and args, when one is deployed for the
    /// repo's language.
    pub precise_indexer: Option<(String, Vec<String>)>,
    /// Await the embedding/snapshot/patterns children instead of
    /// firing and forgetting.
    pub await_children: bool,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Run identifier.
    pub run_id: String,
    /// Index version stamped on this run's writes.
    pub index_version: String,
    /// HEAD SHA indexed.
    pub head_sha: String,
    /// Entities live after the swap.
    pub entities: usize,
    /// Edges live after the swap.
    pub edges: usize,
    /// Whether this was a shadow re-index.
    pub shadow: bool,
}

impl Orchestrator {
    /// Run a full index for the tenant. Returns when finalization (and,
    /// when `await_children` is set, the downstream stages) complete.
    pub async fn index_repo(
        self: &Arc<Self>,
        tenant: &Tenant,
        options: IndexOptions,
    ) -> LatticeResult<IndexReport> {
        let repo = self
            .services
            .relational
            .get_repo(tenant)
            .await?
            .ok_or_else(|| LatticeError::RepoNotFound {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
            })?;

        // Trigger rules: no re-index while one is in progress, and at
        // most one per hour per repo.
        if repo.status.is_in_progress() {
            return Err(LatticeError::Conflict {
                reason: format!("repo is {}", repo.status.as_str()),
            });
        }
        let rate_key = format!("reindex:{}:{}", tenant.org_id, tenant.repo_id);
        let allowed = self
            .services
            .cache
            .rate_limit(
                &rate_key,
                self.config.workflow.reindex_per_hour,
                std::time::Duration::from_secs(3600),
            )
            .await?;
        if !allowed {
            return Err(LatticeError::RateLimited {
                reason: format!("re-index limit for {tenant}"),
            });
        }

        self.services.graph.health_check().await?;

        // A shadow re-index keeps the repo readable at the prior version
        // until the swap.
        let shadow = repo.status == RepoStatus::Ready;
        let run_id = Uuid::new_v4().to_string();
        let index_version = Uuid::new_v4().to_string();
        let scope = RunScope::new(tenant.clone(), index_version.clone());

        let tracker = ProgressTracker::start(
            self.services.relational.clone(),
            self.services.cache.clone(),
            tenant.clone(),
            run_id.clone(),
            index_version.clone(),
        )
        .await?;

        if !shadow {
            self.services
                .relational
                .update_repo_status(tenant, RepoStatus::Indexing)
                .await?;
        }

        let clone_url = repo
            .clone_url
            .clone()
            .unwrap_or_else(|| format!("https://git.invalid/{tenant}.git"));
        let branch = options
            .branch
            .clone()
            .or_else(|| Some(repo.default_branch.clone()));

        match self
            .run_pipeline(tenant, &scope, &tracker, &options, &clone_url, branch.as_deref(), shadow)
            .await
        {
            Ok(mut report) => {
                report.run_id = run_id;
                report.index_version = index_version;
                report.shadow = shadow;
                tracker.finish(report.entities, report.edges).await?;
                if !shadow {
                    self.services
                        .relational
                        .update_repo_status(tenant, RepoStatus::Ready)
                        .await?;
                }
                Ok(report)
            }
            Err((step, error)) => {
                tracker.step_failed(step, &error.to_string()).await.ok();
                tracker.finish(0, 0).await.ok();
                let status = match step {
                    PipelineStep::Embed => RepoStatus::EmbedFailed,
                    PipelineStep::Justify => RepoStatus::JustifyFailed,
                    _ => RepoStatus::Error,
                };
                self.services
                    .relational
                    .update_repo_status(tenant, status)
                    .await
                    .ok();
                Err(error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        self: &Arc<Self>,
        tenant: &Tenant,
        scope: &RunScope,
        tracker: &ProgressTracker,
        options: &IndexOptions,
        clone_url: &str,
        branch: Option<&str>,
        shadow: bool,
    ) -> Result<IndexReport, (PipelineStep, LatticeError)> {
        let mut tally = IndexTally::default();

        // ---- Step 1: prepare workspace (heavy) -------------------------
        tracker.step_started(PipelineStep::Prepare).await.map_err(fail(PipelineStep::Prepare))?;
        let lock_key = format!(
            "lock:workspace:{}:{}:{}",
            tenant.org_id,
            tenant.repo_id,
            branch.unwrap_or("HEAD")
        );
        let workspace_lock = crate::stores::DistributedLock::acquire(
            self.services.cache.clone(),
            &lock_key,
            tracker.run_id(),
        )
        .await
        .map_err(fail(PipelineStep::Prepare))?
        .ok_or_else(|| {
            (
                PipelineStep::Prepare,
                LatticeError::Conflict {
                    reason: format!("workspace locked: {lock_key}"),
                },
            )
        })?;
        let prepared = {
            let _permit = self.heavy_permit().await.map_err(fail(PipelineStep::Prepare))?;
            let prepare_options = ActivityOptions::new("prepare", timeouts::PREPARE);
            run_activity(&prepare_options, || {
                workspace::prepare(
                    &self.services.git,
                    &self.config.indexing,
                    tenant,
                    clone_url,
                    branch,
                )
            })
            .await
            .map_err(fail(PipelineStep::Prepare))?
        };
        workspace_lock
            .release()
            .await
            .map_err(fail(PipelineStep::Prepare))?;
        tracker.step_completed(PipelineStep::Prepare).await.ok();

        let file_texts: HashMap<String, String> = prepared
            .files
            .iter()
            .filter_map(|f| {
                indexer::encoding::decode(&f.bytes).map(|text| (f.path.clone(), text))
            })
            .collect();

        // ---- Step 2: precise-indexer decode (heavy) --------------------
        tracker.step_started(PipelineStep::PreciseIndex).await.ok();
        let covered = match &options.precise_indexer {
            Some((command, args)) => {
                let _permit = self.heavy_permit().await.map_err(fail(PipelineStep::PreciseIndex))?;
                match scip::invoke_indexer(
                    &self.config.indexing,
                    prepared.handle.path(),
                    command,
                    args,
                )
                .await
                {
                    Ok(bytes) => {
                        let decoded = scip::decode_index(scope, &bytes, &file_texts);
                        tally.record_entities(&decoded.entities);
                        tally.edges += decoded.edges.len();
                        for batch in decoded.entities.chunks(self.config.indexing.write_batch) {
                            self.services
                                .graph
                                .bulk_upsert_entities(tenant, batch)
                                .await
                                .map_err(fail(PipelineStep::PreciseIndex))?;
                        }
                        for batch in decoded.edges.chunks(self.config.indexing.write_batch) {
                            self.services
                                .graph
                                .bulk_upsert_edges(tenant, batch)
                                .await
                                .map_err(fail(PipelineStep::PreciseIndex))?;
                        }
                        decoded.covered_files
                    }
                    Err(e) => {
                        // External tool failure: the fallback path covers
                        // every file.
                        tracing::warn!(error = %e, "precise indexer failed, falling back");
                        Default::default()
                    }
                }
            }
            None => Default::default(),
        };
        tracker.step_completed(PipelineStep::PreciseIndex).await.ok();

        // ---- Step 3: fallback parse + cross-file resolution (heavy) ----
        tracker.step_started(PipelineStep::FallbackParse).await.ok();
        let outcome = {
            let _permit = self.heavy_permit().await.map_err(fail(PipelineStep::FallbackParse))?;
            let fallback_options = ActivityOptions::new("fallback_parse", timeouts::FALLBACK);
            let graph = self.services.graph.clone();
            let config = self.config.indexing.clone();
            let heartbeat = |files: usize| tracing::trace!(files, "fallback heartbeat");
            run_activity(&fallback_options, || {
                indexer::run_fallback_parse(
                    &graph,
                    &config,
                    scope,
                    &prepared.files,
                    &covered,
                    &heartbeat,
                )
            })
            .await
            .map_err(fail(PipelineStep::FallbackParse))?
        };
        for (kind, count) in &outcome.tally.entities_by_kind {
            *tally.entities_by_kind.entry(kind.clone()).or_insert(0) += count;
        }
        tally.edges += outcome.tally.edges;
        tally.quarantined += outcome.tally.quarantined;
        resolve::resolve_cross_file_calls(
            &self.services.graph,
            &self.config.indexing,
            scope,
            &outcome.artifacts,
        )
        .await
        .map_err(fail(PipelineStep::FallbackParse))?;
        tracker.step_completed(PipelineStep::FallbackParse).await.ok();

        // ---- Step 4: finalize (shadow swap) ----------------------------
        tracker.step_started(PipelineStep::Finalize).await.ok();
        let finalize_options = ActivityOptions::new("finalize", timeouts::FINALIZE);
        let swap = run_activity(&finalize_options, || {
            finalize::finalize(
                &self.services.graph,
                &self.services.relational,
                scope,
                &prepared.head_sha,
                &tally,
            )
        })
        .await
        .map_err(fail(PipelineStep::Finalize))?;
        self.services
            .graph
            .append_index_event(&IndexEvent {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
                kind: if shadow { "reindex" } else { "full_index" }.to_string(),
                sha: Some(prepared.head_sha.clone()),
                entities_affected: swap.entities_live,
                ts: chrono::Utc::now(),
            })
            .await
            .ok();
        tracker.step_completed(PipelineStep::Finalize).await.ok();

        // ---- Step 4b: analytics pre-compute ----------------------------
        tracker.step_started(PipelineStep::GraphAnalytics).await.ok();
        analytics::run_analytics(
            &self.services.graph,
            &self.services.cache,
            &self.config.indexing,
            tenant,
        )
        .await
        .map_err(fail(PipelineStep::GraphAnalytics))?;
        tracker.step_completed(PipelineStep::GraphAnalytics).await.ok();

        // ---- Branch: snapshot and patterns run beside the semantic
        // chain; the chain itself is strictly ordered. ------------------
        let workspace_path = prepared.handle.path().to_path_buf();

        let semantic_chain = self.semantic_chain(tenant, scope, tracker, shadow, &workspace_path);
        let snapshot_branch = self.snapshot_branch(tenant, tracker);
        let patterns_branch = self.patterns_branch(tenant, tracker, &workspace_path);

        if options.await_children {
            let (chain, _, _) = tokio::join!(semantic_chain, snapshot_branch, patterns_branch);
            chain?;
        } else {
            semantic_chain.await?;
            // Fire and forget: the children own clones of everything
            // they touch; the workspace is handed over to the patterns
            // branch via the orphan sweep.
            let orchestrator = Arc::clone(self);
            let tenant_clone = tenant.clone();
            tokio::spawn(async move {
                let _ = snapshot::run_snapshot_export(
                    &orchestrator.services.graph,
                    &orchestrator.services.relational,
                    &orchestrator.services.objects,
                    &orchestrator.services.cache,
                    &orchestrator.config.snapshot,
                    &tenant_clone,
                    &|_| {},
                )
                .await;
                let _ = patterns::run_pattern_stage(
                    &orchestrator.services.graph,
                    &orchestrator.services.patterns,
                    &tenant_clone,
                    None,
                )
                .await;
            });
        }

        Ok(IndexReport {
            run_id: String::new(),
            index_version: scope.index_version.clone(),
            head_sha: prepared.head_sha.clone(),
            entities: swap.entities_live,
            edges: swap.edges_live,
            shadow,
        })
    }

    /// The strictly ordered semantic chain: embed, ontology, justify,
    /// health.
    async fn semantic_chain(
        self: &Arc<Self>,
        tenant: &Tenant,
        scope: &RunScope,
        tracker: &ProgressTracker,
        shadow: bool,
        workspace_path: &std::path::Path,
    ) -> Result<(), (PipelineStep, LatticeError)> {
        // ---- Step 5: embedding ----------------------------------------
        tracker.step_started(PipelineStep::Embed).await.ok();
        if !shadow {
            self.services
                .relational
                .update_repo_status(tenant, RepoStatus::Embedding)
                .await
                .ok();
        }
        {
            let _permit = self.light_permit().await.map_err(fail(PipelineStep::Embed))?;
            let embed_options = ActivityOptions::new("embed", timeouts::EMBED);
            run_activity(&embed_options, || {
                embedding::run_embedding(
                    &self.services.graph,
                    &self.services.vectors,
                    self.embed_model.as_ref(),
                    &self.config.embedding,
                    tenant,
                )
            })
            .await
            .map_err(fail(PipelineStep::Embed))?;
        }
        tracker.step_completed(PipelineStep::Embed).await.ok();

        // ---- Step 6: ontology discovery --------------------------------
        tracker.step_started(PipelineStep::Ontology).await.ok();
        if !shadow {
            self.services
                .relational
                .update_repo_status(tenant, RepoStatus::Ontology)
                .await
                .ok();
        }
        let manifest_files = manifest_files_from(workspace_path);
        let ontology_options = ActivityOptions::new("ontology", timeouts::ONTOLOGY);
        run_activity(&ontology_options, || {
            ontology::run_ontology_discovery(
                &self.services.graph,
                &self.services.relational,
                &self.services.llm,
                &self.config.llm,
                tenant,
                &manifest_files,
            )
        })
        .await
        .map_err(fail(PipelineStep::Ontology))?;
        tracker.step_completed(PipelineStep::Ontology).await.ok();

        // ---- Step 7: justification ------------------------------------
        tracker.step_started(PipelineStep::Justify).await.ok();
        if !shadow {
            self.services
                .relational
                .update_repo_status(tenant, RepoStatus::Justifying)
                .await
                .ok();
        }
        let engine = JustificationEngine::new(
            self.services.graph.clone(),
            self.services.relational.clone(),
            self.services.vectors.clone(),
            self.services.llm.clone(),
            self.config.justify.clone(),
            self.config.llm.clone(),
        )
        .with_workspace(self.services.git.clone(), workspace_path.to_path_buf());
        let justify_options = ActivityOptions {
            name: "justify",
            timeout: std::time::Duration::from_secs(timeouts::JUSTIFY),
            retry: super::activity::RetryPolicy::none(),
        };
        run_activity(&justify_options, || engine.run(tenant))
            .await
            .map_err(fail(PipelineStep::Justify))?;
        tracker.step_completed(PipelineStep::Justify).await.ok();

        // ---- Step 8: health report ------------------------------------
        tracker.step_started(PipelineStep::Health).await.ok();
        if !shadow {
            self.services
                .relational
                .update_repo_status(tenant, RepoStatus::Analyzing)
                .await
                .ok();
        }
        health::run_health_report(&self.services.graph, tenant, &scope.index_version)
            .await
            .map_err(fail(PipelineStep::Health))?;
        tracker.step_completed(PipelineStep::Health).await.ok();

        Ok(())
    }

    async fn snapshot_branch(
        self: &Arc<Self>,
        tenant: &Tenant,
        tracker: &ProgressTracker,
    ) {
        tracker.step_started(PipelineStep::Snapshot).await.ok();
        let snapshot_options = ActivityOptions::new("snapshot", timeouts::SNAPSHOT);
        let heartbeat = |chunk: usize| tracing::trace!(chunk, "snapshot heartbeat");
        let result = run_activity(&snapshot_options, || {
            snapshot::run_snapshot_export(
                &self.services.graph,
                &self.services.relational,
                &self.services.objects,
                &self.services.cache,
                &self.config.snapshot,
                tenant,
                &heartbeat,
            )
        })
        .await;
        match result {
            Ok(_) => {
                tracker.step_completed(PipelineStep::Snapshot).await.ok();
            }
            Err(e) => {
                tracker
                    .step_failed(PipelineStep::Snapshot, &e.to_string())
                    .await
                    .ok();
            }
        }
    }

    async fn patterns_branch(
        self: &Arc<Self>,
        tenant: &Tenant,
        tracker: &ProgressTracker,
        workspace_path: &std::path::Path,
    ) {
        tracker.step_started(PipelineStep::Patterns).await.ok();
        let result = patterns::run_pattern_stage(
            &self.services.graph,
            &self.services.patterns,
            tenant,
            Some(workspace_path),
        )
        .await;
        match result {
            Ok(_) => {
                tracker.step_completed(PipelineStep::Patterns).await.ok();
            }
            Err(e) => {
                tracker
                    .step_failed(PipelineStep::Patterns, &e.to_string())
                    .await
                    .ok();
            }
        }
    }
}

/// Map an error into the `(step, error)` shape the workflow reports.
fn fail(step: PipelineStep) -> impl Fn(LatticeError) -> (PipelineStep, LatticeError) {
    move |error| (step, error)
}

/// Manifest files the ontology stage reads, pulled from the workspace.
fn manifest_files_from(workspace: &std::path::Path) -> Vec<(String, String)> {
    let mut manifests = Vec::new();
    for name in ["package.json", "Cargo.toml", "pyproject.toml", "go.mod", "pom.xml", "Gemfile"] {
        let path = workspace.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            manifests.push((name.to_string(), content));
        }
    }
    manifests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::stores::{FakeGitHost, MockLlmProvider, Services};
    use crate::types::{ManifestData, RepoRecord};
    use chrono::Utc;

    async fn orchestrator_with_repo(
        tenant: &Tenant,
        status: RepoStatus,
    ) -> (Arc<Orchestrator>, Arc<FakeGitHost>) {
        let git = Arc::new(FakeGitHost::new());
        git.add_tree(
            "sha1",
            &[
                (
                    "src/a.ts",
                    "export function foo(x: number) { return x + 1 }",
                ),
                ("package.json", "{\"name\": \"demo\"}"),
            ],
        );
        git.set_head("sha1");

        let llm = Arc::new(MockLlmProvider::always(serde_json::json!({
            "justifications": []
        })));

        let services = Services::in_memory_with(git.clone(), llm);
        let mut config = Config::default();
        let scratch = tempfile::tempdir().expect("tmp");
        config.indexing.workspace_root = scratch.path().to_path_buf();
        // Leak the tempdir so the workspace root survives the test body.
        std::mem::forget(scratch);

        let orchestrator = Orchestrator::new(services.clone(), config);
        services
            .relational
            .upsert_repo(&RepoRecord {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
                provider: "github".into(),
                clone_url: Some("https://example.invalid/demo.git".into()),
                default_branch: "main".into(),
                last_indexed_sha: None,
                index_version: None,
                status,
                entity_count: 0,
                edge_count: 0,
                manifest_data: ManifestData::default(),
                context_documents: vec![],
                updated_at: Utc::now(),
            })
            .await
            .expect("repo");
        (orchestrator, git)
    }

    #[tokio::test]
    async fn test_full_index_reaches_ready() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, _git) = orchestrator_with_repo(&tenant, RepoStatus::Pending).await;

        let report = orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("index");

        assert_eq!(report.head_sha, "sha1");
        assert!(report.entities >= 2, "file + function at minimum");
        assert!(!report.shadow);

        let repo = orchestrator
            .services
            .relational
            .get_repo(&tenant)
            .await
            .expect("get")
            .expect("some");
        assert_eq!(repo.status, RepoStatus::Ready);
        assert_eq!(repo.last_indexed_sha.as_deref(), Some("sha1"));

        // Entities are queryable by file.
        let entities = orchestrator
            .services
            .graph
            .get_entities_by_file(&tenant, "src/a.ts")
            .await
            .expect("query");
        assert!(entities.iter().any(|e| e.name == "foo"));
    }

    #[tokio::test]
    async fn test_in_progress_repo_rejects_trigger() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, _git) = orchestrator_with_repo(&tenant, RepoStatus::Indexing).await;

        let error = orchestrator
            .index_repo(&tenant, IndexOptions::default())
            .await
            .expect_err("must reject");
        assert!(matches!(error, LatticeError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_enforced() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, _git) = orchestrator_with_repo(&tenant, RepoStatus::Pending).await;

        orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("first run");

        let error = orchestrator
            .index_repo(&tenant, IndexOptions::default())
            .await
            .expect_err("second run within the hour");
        assert!(matches!(error, LatticeError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_deterministic_reindex_keys() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, _git) = orchestrator_with_repo(&tenant, RepoStatus::Pending).await;

        let options = IndexOptions {
            await_children: true,
            ..IndexOptions::default()
        };
        orchestrator
            .index_repo(&tenant, options.clone())
            .await
            .expect("first");
        let first_keys: Vec<String> = orchestrator
            .services
            .graph
            .get_all_entities(&tenant)
            .await
            .expect("all")
            .into_iter()
            .map(|e| e.key)
            .collect();

        // Clear the rate limiter by using a fresh orchestrator over the
        // same stores.
        let services = orchestrator.services.clone();
        let mut config = orchestrator.config.clone();
        config.indexing.workspace_root =
            tempfile::tempdir().expect("tmp").path().to_path_buf();
        let second = Orchestrator::new(
            Services {
                cache: Arc::new(crate::stores::MemoryCacheStore::new()),
                ..services
            },
            config,
        );
        second.index_repo(&tenant, options).await.expect("second");

        let second_keys: Vec<String> = second
            .services
            .graph
            .get_all_entities(&tenant)
            .await
            .expect("all")
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(first_keys, second_keys, "identical bytes, identical keys");
    }
}
