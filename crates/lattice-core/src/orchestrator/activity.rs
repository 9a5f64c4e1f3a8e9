//! Activity primitives: retry policies, timeouts, heartbeats.
//!
//! An activity is an idempotent unit of work with its own start-to-close
//! timeout, heartbeat cadence, and retry policy. Retries happen at the
//! workflow boundary so a resumed workflow only reruns un-completed
//! activities.

use std::future::Future;
use std::time::Duration;

use crate::error::{LatticeError, LatticeResult};

/// First-class retry policy attached to an activity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (1 = no retry).
    pub max_attempts: u32,
    /// Delay before each retry; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Vec::new(),
        }
    }

    /// The standard store-write policy: 3 attempts, short backoff.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![Duration::from_secs(1), Duration::from_secs(5)],
        }
    }

    fn delay_for(&self, retry_index: u32) -> Duration {
        self.backoff
            .get(retry_index as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Declared options for one activity.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Activity name, for logging and failure attribution.
    pub name: &'static str,
    /// Start-to-close timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    /// Build options with the standard retry policy.
    pub fn new(name: &'static str, timeout_secs: u64) -> Self {
        Self {
            name,
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::standard(),
        }
    }
}

/// Run an activity under its timeout and retry policy.
///
/// The factory is called per attempt so each retry gets a fresh future.
/// Timeout and retryable failures consume attempts; non-retryable
/// errors surface immediately.
pub async fn run_activity<T, F, Fut>(options: &ActivityOptions, mut factory: F) -> LatticeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LatticeResult<T>>,
{
    let mut last_error: Option<LatticeError> = None;
    for attempt in 0..options.retry.max_attempts {
        if attempt > 0 {
            let delay = options.retry.delay_for(attempt - 1);
            tracing::debug!(
                activity = options.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying activity"
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(options.timeout, factory()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retryable() => {
                tracing::warn!(activity = options.name, attempt, error = %e, "activity failed");
                last_error = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let timeout_error = LatticeError::ActivityTimeout {
                    activity: options.name.to_string(),
                    seconds: options.timeout.as_secs(),
                };
                tracing::warn!(activity = options.name, attempt, "activity timed out");
                last_error = Some(timeout_error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LatticeError::Internal(format!("activity {} failed with no attempts", options.name))
    }))
}

/// Declared start-to-close timeouts (seconds) for the pipeline's
/// activities.
pub mod timeouts {
    /// Workspace preparation.
    pub const PREPARE: u64 = 30 * 60;
    /// Precise-indexer invocation and decode.
    pub const PRECISE_INDEX: u64 = 30 * 60;
    /// Fallback parsing.
    pub const FALLBACK: u64 = 30 * 60;
    /// Shadow swap.
    pub const FINALIZE: u64 = 5 * 60;
    /// Embedding stage.
    pub const EMBED: u64 = 60 * 60;
    /// Ontology discovery.
    pub const ONTOLOGY: u64 = 10 * 60;
    /// Justification engine.
    pub const JUSTIFY: u64 = 60 * 60;
    /// Snapshot export.
    pub const SNAPSHOT: u64 = 15 * 60;
}
