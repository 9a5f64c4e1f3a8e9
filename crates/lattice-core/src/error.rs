//! Error types for lattice-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the failure kind. Activities recover locally where the pipeline
//! allows it (fallbacks, skips, quarantine); only store-write hardness,
//! unrecoverable workspace errors, and cancellations surface as
//! workflow failure.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all lattice-core operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    // ---- Caller errors (no retry) ----
    /// The requested repository does not exist for this tenant.
    #[error("repo not found: {org_id}/{repo_id}")]
    RepoNotFound {
        /// Organization the lookup was scoped to.
        org_id: String,
        /// Repository that was requested.
        repo_id: String,
    },

    /// A document belonging to another tenant was addressed.
    #[error("tenant mismatch: document belongs to {owner}, caller is {caller}")]
    TenantMismatch {
        /// Organization that owns the document.
        owner: String,
        /// Organization that issued the request.
        caller: String,
    },

    /// A pipeline trigger was rejected (repo busy, or rate limit hit).
    #[error("conflict: {reason}")]
    Conflict {
        /// Why the trigger was rejected.
        reason: String,
    },

    // ---- Retryable ----
    /// The caller was rate limited and should back off.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Which limiter rejected the call.
        reason: String,
    },

    /// A store write failed transiently; the activity retry policy applies.
    #[error("store write failed: {details}")]
    StoreWrite {
        /// Diagnostic details from the store.
        details: String,
    },

    // ---- Recoverable in-stage (fallback path continues) ----
    /// An external precise indexer failed (non-zero exit, oversized output,
    /// or timeout). Fallback parsing covers the affected files.
    #[error("external tool failure: {tool}: {message}")]
    ExternalTool {
        /// Name of the tool that failed.
        tool: String,
        /// What went wrong.
        message: String,
    },

    /// A single file failed to parse. A quarantine placeholder is written
    /// and the stage continues.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// A file's bytes could not be decoded as text. The file is skipped.
    #[error("encoding failure for {path}")]
    Encoding {
        /// Path to the undecodable file.
        path: PathBuf,
    },

    /// An LLM call failed after exhausting its backoff schedule.
    #[error("llm failure: {message}")]
    Llm {
        /// Provider-reported error.
        message: String,
        /// Whether the provider signalled rate limiting / overload.
        retryable: bool,
    },

    /// A produced embedding vector contained NaN or infinity.
    #[error("embedding validation failed for {entity_key}: non-finite component")]
    EmbeddingValidation {
        /// Key of the entity whose vector was rejected.
        entity_key: String,
    },

    /// A snapshot's uploaded bytes did not match its recorded checksum.
    #[error("snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in metadata.
        expected: String,
        /// Checksum of the bytes actually read back.
        actual: String,
    },

    // ---- Workflow ----
    /// An activity exceeded its start-to-close timeout.
    #[error("activity timed out: {activity} after {seconds}s")]
    ActivityTimeout {
        /// Activity identifier.
        activity: String,
        /// Configured timeout.
        seconds: u64,
    },

    /// The workflow was cancelled; in-flight activities must unwind.
    #[error("workflow cancelled: {workflow_id}")]
    Cancelled {
        /// ID of the cancelled workflow.
        workflow_id: String,
    },

    /// A workflow with the same ID is already running.
    #[error("workflow already running: {workflow_id}")]
    DuplicateWorkflow {
        /// The contended workflow ID.
        workflow_id: String,
    },

    // ---- Configuration ----
    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error from a store adapter.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (JSON, MessagePack, or bincode).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LatticeError {
    /// Whether the activity retry policy should re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::StoreWrite { .. } => true,
            Self::Llm { retryable, .. } => *retryable,
            Self::ActivityTimeout { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for Results in lattice-core.
pub type LatticeResult<T> = Result<T, LatticeError>;
