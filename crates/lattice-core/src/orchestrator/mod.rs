//! Orchestrator: the durable ten-stage pipeline over two worker pools.
//!
//! ```text
//! prepare -> precise decode -> fallback parse -> finalize -> analytics
//!                                                               |
//!                     +------------------ branch ---------------+
//!                     |                      |                  |
//!              embed -> ontology      snapshot export      patterns
//!                -> justify -> health
//! ```
//!
//! Heavy (CPU-bound) activities run under the small heavy pool; store
//! and network activities under the large light pool. Workflow IDs are
//! fixed per repo so the engine can reject concurrent duplicates, and
//! every step writes start/complete/fail bookkeeping onto the run row.

pub mod activity;
pub mod engine;
pub mod full;
pub mod incremental;
pub mod progress;

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::{LatticeError, LatticeResult};
use crate::stores::Services;
use crate::types::Tenant;

pub use engine::LocalWorkflowEngine;
pub use full::{IndexOptions, IndexReport};

/// The orchestrator. Cheap to clone behind an `Arc`; workflows borrow
/// the shared services container.
pub struct Orchestrator {
    pub(crate) services: Services,
    pub(crate) config: Config,
    /// Local dense-vector model for the embedding stage.
    pub(crate) embed_model: Arc<dyn crate::embedding::DenseVectorModel>,
    /// CPU-bound pool: clone, decode, parse, serialize, match.
    pub(crate) heavy_pool: Arc<Semaphore>,
    /// Network-bound pool: LLM calls, store writes, uploads.
    pub(crate) light_pool: Arc<Semaphore>,
    /// Debounce channels for incremental workflows.
    pub(crate) incremental: incremental::IncrementalChannels,
}

impl Orchestrator {
    /// Build an orchestrator over a service container. The embedding
    /// model starts degraded (stage skips); production wiring passes a
    /// loaded runner via [`Orchestrator::with_model`].
    pub fn new(services: Services, config: Config) -> Arc<Self> {
        let model = crate::embedding::OnnxModelRunner::degraded(&config.embedding);
        Self::with_model(services, config, Arc::new(model))
    }

    /// Build an orchestrator with an explicit embedding model.
    pub fn with_model(
        services: Services,
        config: Config,
        embed_model: Arc<dyn crate::embedding::DenseVectorModel>,
    ) -> Arc<Self> {
        let heavy = config.workflow.heavy_workers.max(1);
        let light = config.workflow.light_workers.max(1);
        Arc::new(Self {
            services,
            config,
            embed_model,
            heavy_pool: Arc::new(Semaphore::new(heavy)),
            light_pool: Arc::new(Semaphore::new(light)),
            incremental: incremental::IncrementalChannels::default(),
        })
    }

    /// The workflow ID for a full re-index of a repo.
    pub fn reindex_workflow_id(tenant: &Tenant) -> String {
        format!("reindex-{}-{}", tenant.org_id, tenant.repo_id)
    }

    /// The workflow ID for a repo's incremental workflow.
    pub fn incremental_workflow_id(tenant: &Tenant) -> String {
        format!("incremental-{}-{}", tenant.org_id, tenant.repo_id)
    }

    /// Reparent ledger entries on PR merge.
    pub async fn merge_ledger(
        &self,
        tenant: &Tenant,
        source_branch: &str,
        target_branch: &str,
        pr_number: u64,
    ) -> LatticeResult<usize> {
        let moved = self
            .services
            .graph
            .reparent_ledger_entries(tenant, source_branch, target_branch)
            .await?;
        tracing::info!(
            tenant = %tenant,
            source = source_branch,
            target = target_branch,
            pr = pr_number,
            moved,
            "ledger entries reparented"
        );
        Ok(moved)
    }

    /// Safety-net sweep for orphaned workspaces. Intended to run on a
    /// cron cadence alongside the worker.
    pub fn sweep_workspaces(&self) -> LatticeResult<usize> {
        crate::indexer::workspace::sweep_orphans(
            &self.config.indexing.workspace_root,
            self.config.indexing.workspace_sweep_hours,
        )
    }

    /// Acquire a heavy-pool permit, surfacing closure as an error.
    pub(crate) async fn heavy_permit(&self) -> LatticeResult<tokio::sync::OwnedSemaphorePermit> {
        self.heavy_pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LatticeError::Internal("heavy pool closed".into()))
    }

    /// Acquire a light-pool permit.
    pub(crate) async fn light_permit(&self) -> LatticeResult<tokio::sync::OwnedSemaphorePermit> {
        self.light_pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LatticeError::Internal("light pool closed".into()))
    }
}
