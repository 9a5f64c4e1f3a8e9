//! In-process workflow engine implementing the
//! [`crate::stores::WorkflowEngine`] port.
//!
//! Workflows are identified by fixed IDs; starting a duplicate is
//! rejected while the original runs. Cancellation propagates via a
//! token that in-flight activities observe at their next suspension
//! point. Durability here is process-scoped; a deployment against a
//! hosted workflow backend slots in behind the same port.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{LatticeError, LatticeResult};
use crate::stores::{WorkflowEngine, WorkflowSignal, WorkflowStatus};
use crate::types::Tenant;

use super::full::IndexOptions;
use super::Orchestrator;

struct WorkflowHandle {
    status: Arc<RwLock<WorkflowStatus>>,
    cancel: CancellationToken,
}

/// In-process workflow engine over the orchestrator.
pub struct LocalWorkflowEngine {
    orchestrator: Arc<Orchestrator>,
    workflows: DashMap<String, WorkflowHandle>,
}

impl LocalWorkflowEngine {
    /// Build an engine around the orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            workflows: DashMap::new(),
        }
    }

    fn tenant_from(input: &Value) -> LatticeResult<Tenant> {
        let org_id = input["org_id"]
            .as_str()
            .ok_or_else(|| LatticeError::Internal("workflow input missing org_id".into()))?;
        let repo_id = input["repo_id"]
            .as_str()
            .ok_or_else(|| LatticeError::Internal("workflow input missing repo_id".into()))?;
        Ok(Tenant::new(org_id, repo_id))
    }
}

#[async_trait]
impl WorkflowEngine for LocalWorkflowEngine {
    async fn start_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: Value,
    ) -> LatticeResult<()> {
        // Fixed-ID uniqueness: reject while a run is in flight.
        if let Some(existing) = self.workflows.get(workflow_id) {
            if *existing.status.read() == WorkflowStatus::Running {
                return Err(LatticeError::DuplicateWorkflow {
                    workflow_id: workflow_id.to_string(),
                });
            }
        }

        let status = Arc::new(RwLock::new(WorkflowStatus::Running));
        let cancel = CancellationToken::new();
        self.workflows.insert(
            workflow_id.to_string(),
            WorkflowHandle {
                status: status.clone(),
                cancel: cancel.clone(),
            },
        );

        let orchestrator = self.orchestrator.clone();
        let tenant = Self::tenant_from(&input)?;
        let workflow_type = workflow_type.to_string();
        let workflow_id_owned = workflow_id.to_string();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(LatticeError::Cancelled {
                    workflow_id: workflow_id_owned.clone(),
                }),
                result = dispatch(&orchestrator, &workflow_type, &tenant, &input) => result,
            };
            let mut status = status.write();
            *status = match result {
                Ok(()) => WorkflowStatus::Completed,
                Err(LatticeError::Cancelled { .. }) => WorkflowStatus::Cancelled,
                Err(e) => {
                    tracing::warn!(workflow = %workflow_id_owned, error = %e, "workflow failed");
                    WorkflowStatus::Failed
                }
            };
        });

        Ok(())
    }

    async fn signal_with_start(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: Value,
        signal: WorkflowSignal,
    ) -> LatticeResult<()> {
        // The incremental workflow is the signal consumer; its
        // signal-with-start is a channel get-or-spawn on the
        // orchestrator.
        if workflow_type == "incremental_index" && signal.name == "push" {
            let tenant = Self::tenant_from(&input)?;
            let sha = signal.payload["sha"]
                .as_str()
                .ok_or_else(|| LatticeError::Internal("push signal missing sha".into()))?;
            self.orchestrator.signal_push(&tenant, sha);
            self.workflows
                .entry(workflow_id.to_string())
                .or_insert_with(|| WorkflowHandle {
                    status: Arc::new(RwLock::new(WorkflowStatus::Running)),
                    cancel: CancellationToken::new(),
                });
            return Ok(());
        }

        match self.start_workflow(workflow_id, workflow_type, input).await {
            Ok(()) | Err(LatticeError::DuplicateWorkflow { .. }) => {
                self.signal(workflow_id, signal).await
            }
            Err(e) => Err(e),
        }
    }

    async fn signal(&self, workflow_id: &str, signal: WorkflowSignal) -> LatticeResult<()> {
        if !self.workflows.contains_key(workflow_id) {
            return Err(LatticeError::Internal(format!(
                "no workflow to signal: {workflow_id}"
            )));
        }
        tracing::debug!(workflow = workflow_id, signal = %signal.name, "signal delivered");
        Ok(())
    }

    async fn get_status(&self, workflow_id: &str) -> LatticeResult<WorkflowStatus> {
        Ok(self
            .workflows
            .get(workflow_id)
            .map(|handle| *handle.status.read())
            .unwrap_or(WorkflowStatus::NotFound))
    }

    async fn cancel(&self, workflow_id: &str) -> LatticeResult<()> {
        let handle = self.workflows.get(workflow_id).ok_or_else(|| {
            LatticeError::Internal(format!("no workflow to cancel: {workflow_id}"))
        })?;
        handle.cancel.cancel();
        Ok(())
    }
}

async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    workflow_type: &str,
    tenant: &Tenant,
    input: &Value,
) -> LatticeResult<()> {
    match workflow_type {
        "index_repo" => {
            let options = IndexOptions {
                branch: input["branch"].as_str().map(String::from),
                precise_indexer: None,
                await_children: input["await_children"].as_bool().unwrap_or(false),
            };
            orchestrator.index_repo(tenant, options).await.map(|_| ())
        }
        "merge_ledger" => {
            let source = input["source_branch"].as_str().unwrap_or_default();
            let target = input["target_branch"].as_str().unwrap_or_default();
            let pr = input["pr_number"].as_u64().unwrap_or_default();
            orchestrator
                .merge_ledger(tenant, source, target, pr)
                .await
                .map(|_| ())
        }
        other => Err(LatticeError::Internal(format!(
            "unknown workflow type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::stores::Services;

    fn engine() -> LocalWorkflowEngine {
        let mut config = Config::default();
        let scratch = tempfile::tempdir().expect("tmp");
        config.indexing.workspace_root = scratch.path().to_path_buf();
        std::mem::forget(scratch);
        LocalWorkflowEngine::new(Orchestrator::new(Services::in_memory(), config))
    }

    #[tokio::test]
    async fn test_duplicate_workflow_rejected() {
        let engine = engine();
        let input = serde_json::json!({"org_id": "o", "repo_id": "missing"});

        engine
            .start_workflow("reindex-o-missing", "index_repo", input.clone())
            .await
            .expect("first start");
        let error = engine
            .start_workflow("reindex-o-missing", "index_repo", input)
            .await
            .expect_err("duplicate");
        assert!(matches!(error, LatticeError::DuplicateWorkflow { .. }));
    }

    #[tokio::test]
    async fn test_missing_repo_workflow_fails() {
        let engine = engine();
        let input = serde_json::json!({"org_id": "o", "repo_id": "missing"});
        engine
            .start_workflow("reindex-o-missing", "index_repo", input)
            .await
            .expect("start");

        // The spawned workflow fails against the missing repo.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let status = engine
                .get_status("reindex-o-missing")
                .await
                .expect("status");
            if status == WorkflowStatus::Failed {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("workflow did not fail, status {status:?}");
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_unknown_workflow_status() {
        let engine = engine();
        assert_eq!(
            engine.get_status("nope").await.expect("status"),
            WorkflowStatus::NotFound
        );
    }
}
