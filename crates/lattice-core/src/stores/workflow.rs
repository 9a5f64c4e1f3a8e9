//! Workflow engine port.
//!
//! The pipeline is orchestrated as durable workflows with fixed IDs;
//! the engine rejects concurrent duplicates and delivers signals to
//! long-running workflows. The in-process implementation lives in
//! [`crate::orchestrator`]; this module only defines the port.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LatticeResult;

/// Observable status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// The workflow is executing or awaiting signals.
    Running,
    /// The workflow finished successfully.
    Completed,
    /// The workflow failed terminally.
    Failed,
    /// The workflow was cancelled.
    Cancelled,
    /// No workflow with the given ID exists.
    NotFound,
}

/// A signal delivered to a running workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSignal {
    /// Signal name (e.g. `push`).
    pub name: String,
    /// Signal payload.
    pub payload: Value,
}

/// Port over the durable workflow engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a workflow with a fixed ID. Fails with
    /// [`crate::error::LatticeError::DuplicateWorkflow`] if one with the
    /// same ID is already running.
    async fn start_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: Value,
    ) -> LatticeResult<()>;

    /// Deliver a signal, starting the workflow first if it is not
    /// running (signal-with-start semantics).
    async fn signal_with_start(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: Value,
        signal: WorkflowSignal,
    ) -> LatticeResult<()>;

    /// Deliver a signal to a running workflow.
    async fn signal(&self, workflow_id: &str, signal: WorkflowSignal) -> LatticeResult<()>;

    /// Current status of a workflow.
    async fn get_status(&self, workflow_id: &str) -> LatticeResult<WorkflowStatus>;

    /// Request cancellation; in-flight activities unwind.
    async fn cancel(&self, workflow_id: &str) -> LatticeResult<()>;
}
