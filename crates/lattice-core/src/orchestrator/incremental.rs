//! The incremental path: signal-debounced re-indexing driven by push
//! events.
//!
//! `push(sha)` signals land on the repo's long-running incremental
//! workflow (signal-with-start). A signal opens a debounce window;
//! further signals coalesce to the latest SHA and reset the window.
//! When quiet, the run diffs against the last indexed SHA, re-parses
//! changed files with quarantine wrapping, repairs edges, re-embeds the
//! delta, cascades re-justification through the bounded subgraph, and
//! finalizes with cache invalidation and an index event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::embedding;
use crate::error::{LatticeError, LatticeResult};
use crate::indexer::{self, workspace, RunScope};
use crate::justify::JustificationEngine;
use crate::types::{IndexEvent, Tenant};

use super::full::IndexOptions;
use super::Orchestrator;

/// Per-repo debounce channels for the incremental workflows.
#[derive(Default)]
pub struct IncrementalChannels {
    senders: DashMap<String, mpsc::UnboundedSender<String>>,
}

/// Summary of one incremental run.
#[derive(Debug, Clone, Default)]
pub struct IncrementalReport {
    /// SHA the run converged on.
    pub sha: String,
    /// Files changed since the last indexed SHA.
    pub files_changed: usize,
    /// Entities re-parsed.
    pub entities_updated: usize,
    /// Entities removed with their files.
    pub entities_removed: usize,
    /// Edges repaired (deleted due to removed endpoints).
    pub edges_repaired: usize,
    /// Entities re-justified by the cascade.
    pub rejustified: usize,
    /// Whether the run escalated to a full re-index.
    pub escalated_to_full: bool,
}

impl Orchestrator {
    /// Deliver a `push(sha)` signal, starting the repo's incremental
    /// workflow if it is not running (signal-with-start).
    pub fn signal_push(self: &Arc<Self>, tenant: &Tenant, sha: &str) {
        let workflow_id = Self::incremental_workflow_id(tenant);
        let sender = self
            .incremental
            .senders
            .entry(workflow_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let orchestrator = Arc::clone(self);
                let tenant = tenant.clone();
                tokio::spawn(async move {
                    debounce_loop(orchestrator, tenant, rx).await;
                });
                tx
            })
            .clone();
        if sender.send(sha.to_string()).is_err() {
            // The loop exited; drop the stale channel so the next signal
            // restarts it.
            self.incremental.senders.remove(&workflow_id);
            self.signal_push(tenant, sha);
        }
    }

    /// One incremental run against a quiesced SHA. Public for tests and
    /// for replaying a missed signal; the debounce loop is the normal
    /// entry.
    pub async fn run_incremental(
        self: &Arc<Self>,
        tenant: &Tenant,
        sha: &str,
    ) -> LatticeResult<IncrementalReport> {
        let repo = self
            .services
            .relational
            .get_repo(tenant)
            .await?
            .ok_or_else(|| LatticeError::RepoNotFound {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
            })?;
        let Some(last_sha) = repo.last_indexed_sha.clone() else {
            // Nothing indexed yet; this is a full index.
            let orchestrator = Arc::clone(self);
            let tenant_clone = tenant.clone();
            tokio::spawn(async move {
                let _ = orchestrator
                    .index_repo(&tenant_clone, IndexOptions::default())
                    .await;
            });
            return Ok(IncrementalReport {
                sha: sha.to_string(),
                escalated_to_full: true,
                ..IncrementalReport::default()
            });
        };

        if last_sha == sha {
            tracing::debug!(tenant = %tenant, sha, "already at signalled SHA");
            return Ok(IncrementalReport {
                sha: sha.to_string(),
                ..IncrementalReport::default()
            });
        }

        let index_version = repo.index_version.clone().unwrap_or_default();
        let scope = RunScope::new(tenant.clone(), index_version);

        // Step 1: pull and diff.
        let clone_url = repo
            .clone_url
            .clone()
            .unwrap_or_else(|| format!("https://git.invalid/{tenant}.git"));
        let prepared = workspace::prepare(
            &self.services.git,
            &self.config.indexing,
            tenant,
            &clone_url,
            Some(repo.default_branch.as_str()),
        )
        .await?;
        let changed_files = self
            .services
            .git
            .diff_files(prepared.handle.path(), &last_sha, sha)
            .await?;

        let mut report = IncrementalReport {
            sha: sha.to_string(),
            files_changed: changed_files.len(),
            ..IncrementalReport::default()
        };

        // Step 2: escalate when the diff is too wide.
        if changed_files.len() > self.config.workflow.full_reindex_threshold {
            tracing::info!(
                tenant = %tenant,
                changed = changed_files.len(),
                "diff too wide, escalating to full re-index"
            );
            report.escalated_to_full = true;
            let orchestrator = Arc::clone(self);
            let tenant_clone = tenant.clone();
            // Abandon-on-close: the child outlives this workflow.
            tokio::spawn(async move {
                let _ = orchestrator
                    .index_repo(&tenant_clone, IndexOptions::default())
                    .await;
            });
            return Ok(report);
        }

        let workspace_files: HashMap<&str, &workspace::WorkspaceFile> = prepared
            .files
            .iter()
            .map(|f| (f.path.as_str(), f))
            .collect();

        // Steps 3-5: re-parse changed files (batches of 5, quarantine
        // wrapping), delete entities for removed files, repair edges.
        let mut changed_entity_keys: Vec<String> = Vec::new();
        let mut removed_keys: Vec<String> = Vec::new();

        for batch in changed_files.chunks(5) {
            for file_path in batch {
                let prior: Vec<String> = self
                    .services
                    .graph
                    .get_entities_by_file(tenant, file_path)
                    .await?
                    .into_iter()
                    .map(|e| e.key)
                    .collect();

                match workspace_files.get(file_path.as_str()) {
                    Some(file) => {
                        let language = crate::types::Language::from_path(file_path);
                        let result = indexer::encoding::decode(&file.bytes)
                            .ok_or(LatticeError::Encoding {
                                path: file_path.into(),
                            })
                            .and_then(|text| {
                                indexer::languages::parse_file(
                                    text.as_bytes(),
                                    file_path,
                                    language,
                                )
                            });
                        match result {
                            Ok(parsed) => {
                                // A healed file replaces any quarantine
                                // placeholder through the same key; stale
                                // declarations are dropped with the file.
                                let (entities, edges, _) = indexer::materialize_file(
                                    &scope, file_path, language, &parsed,
                                );
                                let new_keys: HashSet<String> =
                                    entities.iter().map(|e| e.key.clone()).collect();
                                removed_keys
                                    .extend(prior.iter().filter(|k| !new_keys.contains(*k)).cloned());
                                changed_entity_keys.extend(new_keys.iter().cloned());
                                report.entities_updated += entities.len();
                                self.services
                                    .graph
                                    .delete_entities_by_file(tenant, file_path)
                                    .await?;
                                self.services
                                    .graph
                                    .bulk_upsert_entities(tenant, &entities)
                                    .await?;
                                self.services.graph.bulk_upsert_edges(tenant, &edges).await?;
                            }
                            Err(e) => {
                                tracing::warn!(file = %file_path, error = %e, "quarantining file");
                                let placeholder =
                                    indexer::quarantine_entity(&scope, file_path, &e.to_string());
                                self.services
                                    .graph
                                    .bulk_upsert_entities(tenant, &[placeholder])
                                    .await?;
                            }
                        }
                    }
                    None => {
                        // File removed: delete its entities.
                        let deleted = self
                            .services
                            .graph
                            .delete_entities_by_file(tenant, file_path)
                            .await?;
                        report.entities_removed += deleted;
                        removed_keys.extend(prior);
                    }
                }
            }
        }

        // Step 5: repair edges referencing deleted entities.
        if !removed_keys.is_empty() {
            report.edges_repaired = self
                .services
                .graph
                .delete_edges_referencing(tenant, &removed_keys)
                .await?;
        }

        // Step 6: delta re-embed.
        embedding::embed_delta(
            &self.services.graph,
            &self.services.vectors,
            self.embed_model.as_ref(),
            &self.config.embedding,
            tenant,
            &changed_entity_keys,
        )
        .await?;

        // Step 7: cascade re-justify.
        let engine = JustificationEngine::new(
            self.services.graph.clone(),
            self.services.relational.clone(),
            self.services.vectors.clone(),
            self.services.llm.clone(),
            self.config.justify.clone(),
            self.config.llm.clone(),
        )
        .with_workspace(self.services.git.clone(), prepared.handle.path().to_path_buf());
        let cascade = engine.run_cascade(tenant, &changed_entity_keys).await?;
        report.rejustified = cascade.justified + cascade.fallback;

        // Step 8: drift detection between old and new taxonomy mix is
        // surfaced on the log channel for a reviewer to act on.
        self.detect_drift(tenant).await.ok();

        // Step 9: cache invalidation, exact keys then a prefix sweep.
        self.invalidate_caches(tenant).await?;

        // Step 10: index event and finalize (advance the indexed SHA).
        self.services
            .graph
            .append_index_event(&IndexEvent {
                org_id: tenant.org_id.clone(),
                repo_id: tenant.repo_id.clone(),
                kind: "incremental".into(),
                sha: Some(sha.to_string()),
                entities_affected: report.entities_updated + report.entities_removed,
                ts: chrono::Utc::now(),
            })
            .await?;
        let entity_count = self.services.graph.get_all_entities(tenant).await?.len();
        let edge_count = self.services.graph.get_all_edges(tenant).await?.len();
        self.services
            .relational
            .record_finalized_index(tenant, sha, &scope.index_version, entity_count, edge_count)
            .await?;

        tracing::info!(
            tenant = %tenant,
            sha,
            files = report.files_changed,
            updated = report.entities_updated,
            removed = report.entities_removed,
            rejustified = report.rejustified,
            "incremental run complete"
        );

        Ok(report)
    }

    /// Propose drift documentation when the taxonomy mix shifts away
    /// from what the health report last saw.
    async fn detect_drift(&self, tenant: &Tenant) -> LatticeResult<()> {
        let justifications = self.services.graph.get_current_justifications(tenant).await?;
        let vertical = justifications
            .iter()
            .filter(|j| j.taxonomy == crate::types::Taxonomy::Vertical)
            .count();
        let total = justifications.len().max(1);
        let channel = format!("pipeline-logs:{}", tenant.repo_id);
        let message = serde_json::json!({
            "kind": "taxonomy_drift_check",
            "vertical_ratio": vertical as f64 / total as f64,
            "total": total,
        });
        self.services
            .cache
            .publish(&channel, &message.to_string())
            .await
    }

    /// The seven exact invalidations plus the prefix sweep.
    async fn invalidate_caches(&self, tenant: &Tenant) -> LatticeResult<()> {
        let org = &tenant.org_id;
        let repo = &tenant.repo_id;
        for key in [
            format!("repo:{org}:{repo}"),
            format!("repo-status:{org}:{repo}"),
            format!("graph-summary:{org}:{repo}"),
            format!("feature-map:{org}:{repo}"),
            format!("health:{org}:{repo}"),
            format!("ontology:{org}:{repo}"),
            format!("entity-counts:{org}:{repo}"),
        ] {
            self.services.cache.invalidate(&key).await?;
        }
        self.services
            .cache
            .invalidate_by_prefix(&format!("community:{org}:{repo}:"))
            .await?;
        Ok(())
    }
}

/// Debounce loop for one repo's incremental workflow.
async fn debounce_loop(
    orchestrator: Arc<Orchestrator>,
    tenant: Tenant,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let window = Duration::from_secs(orchestrator.config.workflow.debounce_secs);
    while let Some(mut sha) = rx.recv().await {
        // Coalesce: every further signal resets the window and replaces
        // the target SHA.
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(newer)) => sha = newer,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if let Err(e) = orchestrator.run_incremental(&tenant, &sha).await {
            tracing::warn!(tenant = %tenant, sha = %sha, error = %e, "incremental run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::stores::{FakeGitHost, MockLlmProvider, Services};
    use crate::types::{ManifestData, RepoRecord, RepoStatus};
    use chrono::Utc;

    async fn setup(tenant: &Tenant) -> (Arc<Orchestrator>, Arc<FakeGitHost>) {
        let git = Arc::new(FakeGitHost::new());
        git.add_tree("sha_a", &[("src/a.ts", "export function foo(x) { return x + 1 }")]);
        git.add_tree(
            "sha_b",
            &[
                ("src/a.ts", "export function foo(x) { return x + 2 }"),
                ("src/new.ts", "export function fresh() { return 0 }"),
            ],
        );
        git.set_head("sha_a");

        let llm = Arc::new(MockLlmProvider::always(
            serde_json::json!({"justifications": []}),
        ));
        let services = Services::in_memory_with(git.clone(), llm);
        let mut config = Config::default();
        config.workflow.debounce_secs = 1;
        let scratch = tempfile::tempdir().expect("tmp");
        config.indexing.workspace_root = scratch.path().to_path_buf();
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
                status: RepoStatus::Pending,
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
    async fn test_incremental_updates_changed_entities() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, git) = setup(&tenant).await;

        // Full index at sha_a first.
        orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("full index");

        // Push sha_b: foo changed, fresh added.
        git.set_head("sha_b");
        let report = orchestrator
            .run_incremental(&tenant, "sha_b")
            .await
            .expect("incremental");

        assert!(!report.escalated_to_full);
        assert_eq!(report.files_changed, 2);
        assert!(report.entities_updated >= 2);

        let repo = orchestrator
            .services
            .relational
            .get_repo(&tenant)
            .await
            .expect("get")
            .expect("some");
        assert_eq!(repo.last_indexed_sha.as_deref(), Some("sha_b"));

        let fresh = orchestrator
            .services
            .graph
            .search_entities(&tenant, "fresh", 10)
            .await
            .expect("search");
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_idempotence() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, git) = setup(&tenant).await;
        orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("full index");

        git.set_head("sha_b");
        orchestrator
            .run_incremental(&tenant, "sha_b")
            .await
            .expect("first replay");
        let keys_after_first: Vec<String> = orchestrator
            .services
            .graph
            .get_all_entities(&tenant)
            .await
            .expect("all")
            .into_iter()
            .map(|e| e.key)
            .collect();

        // Replaying the same signal is a no-op diff.
        let second = orchestrator
            .run_incremental(&tenant, "sha_b")
            .await
            .expect("second replay");
        assert_eq!(second.files_changed, 0);

        let keys_after_second: Vec<String> = orchestrator
            .services
            .graph
            .get_all_entities(&tenant)
            .await
            .expect("all")
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys_after_first, keys_after_second);
    }

    #[tokio::test]
    async fn test_wide_diff_escalates_to_full() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, git) = setup(&tenant).await;
        orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("full index");

        // A tree with 250 changed files.
        let files: Vec<(String, String)> = (0..250)
            .map(|i| (format!("src/gen{i}.ts"), format!("export function g{i}() {{}}")))
            .collect();
        let file_refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        git.add_tree("sha_wide", &file_refs);
        git.set_head("sha_wide");

        let report = orchestrator
            .run_incremental(&tenant, "sha_wide")
            .await
            .expect("incremental");
        assert!(report.escalated_to_full);
    }

    #[tokio::test]
    async fn test_signal_coalescing_targets_latest_sha() {
        let tenant = Tenant::new("o1", "r1");
        let (orchestrator, git) = setup(&tenant).await;
        orchestrator
            .index_repo(
                &tenant,
                IndexOptions {
                    await_children: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .expect("full index");
        git.set_head("sha_b");

        // Two pushes inside one debounce window coalesce to the latest.
        orchestrator.signal_push(&tenant, "sha_a");
        orchestrator.signal_push(&tenant, "sha_b");

        // Wait out the debounce window plus slack for the run itself.
        let deadline = std::time::Instant::now() + Duration::from_secs(15);
        loop {
            let repo = orchestrator
                .services
                .relational
                .get_repo(&tenant)
                .await
                .expect("get")
                .expect("some");
            if repo.last_indexed_sha.as_deref() == Some("sha_b") {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("incremental run did not land on sha_b");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
