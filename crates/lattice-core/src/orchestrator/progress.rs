//! Pipeline-run progress tracking and the event feed.
//!
//! Every step writes start/complete or start/fail onto the run row, and
//! each transition publishes a log event on `pipeline-logs:{repo_id}`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::LatticeResult;
use crate::stores::{CacheStore, RelationalStore};
use crate::types::{PipelineLogEvent, PipelineRun, PipelineStep, StepState, Tenant};

/// Tracks one run's step bookkeeping.
pub struct ProgressTracker {
    relational: Arc<dyn RelationalStore>,
    cache: Arc<dyn CacheStore>,
    tenant: Tenant,
    run_id: String,
}

impl ProgressTracker {
    /// Start tracking a new run; the run row is created immediately.
    pub async fn start(
        relational: Arc<dyn RelationalStore>,
        cache: Arc<dyn CacheStore>,
        tenant: Tenant,
        run_id: String,
        index_version: String,
    ) -> LatticeResult<Self> {
        let run = PipelineRun {
            run_id: run_id.clone(),
            index_version,
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            steps: Vec::new(),
            total_entities: 0,
            total_edges: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        relational.upsert_pipeline_run(&run).await?;
        Ok(Self {
            relational,
            cache,
            tenant,
            run_id,
        })
    }

    /// Record a step start.
    pub async fn step_started(&self, step: PipelineStep) -> LatticeResult<()> {
        self.relational
            .append_pipeline_step(
                &self.run_id,
                &StepState {
                    step,
                    started_at: Utc::now(),
                    completed_at: None,
                    error: None,
                },
            )
            .await?;
        self.publish(step, "info", &format!("{} started", step.as_str()), None)
            .await
    }

    /// Record a step completion.
    pub async fn step_completed(&self, step: PipelineStep) -> LatticeResult<()> {
        self.update_step(step, None).await?;
        self.publish(step, "info", &format!("{} completed", step.as_str()), None)
            .await
    }

    /// Record a step failure.
    pub async fn step_failed(&self, step: PipelineStep, error: &str) -> LatticeResult<()> {
        self.update_step(step, Some(error.to_string())).await?;
        self.publish(step, "error", &format!("{} failed", step.as_str()), Some(error))
            .await
    }

    /// Record run totals and the finish timestamp.
    pub async fn finish(&self, total_entities: usize, total_edges: usize) -> LatticeResult<()> {
        if let Some(mut run) = self.relational.get_pipeline_run(&self.run_id).await? {
            run.total_entities = total_entities;
            run.total_edges = total_edges;
            run.finished_at = Some(Utc::now());
            self.relational.upsert_pipeline_run(&run).await?;
        }
        Ok(())
    }

    /// The tracked run ID.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn update_step(&self, step: PipelineStep, error: Option<String>) -> LatticeResult<()> {
        let started_at = self
            .relational
            .get_pipeline_run(&self.run_id)
            .await?
            .and_then(|run| {
                run.steps
                    .iter()
                    .find(|s| s.step == step)
                    .map(|s| s.started_at)
            })
            .unwrap_or_else(Utc::now);
        self.relational
            .append_pipeline_step(
                &self.run_id,
                &StepState {
                    step,
                    started_at,
                    completed_at: Some(Utc::now()),
                    error,
                },
            )
            .await
    }

    async fn publish(
        &self,
        step: PipelineStep,
        level: &str,
        message: &str,
        error: Option<&str>,
    ) -> LatticeResult<()> {
        let event = PipelineLogEvent {
            run_id: self.run_id.clone(),
            step: step.as_str().to_string(),
            level: level.to_string(),
            message: message.to_string(),
            meta: error.map_or(serde_json::Value::Null, |e| serde_json::json!({ "error": e })),
            ts: Utc::now(),
        };
        let channel = format!("pipeline-logs:{}", self.tenant.repo_id);
        self.cache
            .publish(&channel, &serde_json::to_string(&event)?)
            .await
    }
}
