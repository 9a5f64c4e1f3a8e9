//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`LATTICE_*`)
//! 2. Deployment config (`lattice.toml` next to the working directory)
//! 3. User config (`~/.config/lattice/config.toml`)
//! 4. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LatticeError, LatticeResult};

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Indexing configuration (stages 1-3).
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Justification engine configuration.
    #[serde(default)]
    pub justify: JustifyConfig,

    /// LLM provider configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Snapshot exporter configuration.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Workflow engine configuration.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Stage 1-3 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Root directory under which tenant workspaces are created.
    #[serde(default = "IndexingConfig::default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Directory names never descended into when git exclusion
    /// semantics are unavailable.
    #[serde(default = "IndexingConfig::default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    /// Per-file size cap; larger files produce only a file entity.
    #[serde(default = "IndexingConfig::default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Wall-clock budget for one precise-indexer invocation.
    #[serde(default = "IndexingConfig::default_precise_timeout_secs")]
    pub precise_timeout_secs: u64,

    /// Output cap for one precise-indexer invocation.
    #[serde(default = "IndexingConfig::default_precise_max_output_bytes")]
    pub precise_max_output_bytes: u64,

    /// Bulk-write batch size for entity/edge upserts.
    #[serde(default = "IndexingConfig::default_write_batch")]
    pub write_batch: usize,

    /// Heartbeat cadence during fallback parsing, in files.
    #[serde(default = "IndexingConfig::default_heartbeat_every_files")]
    pub heartbeat_every_files: usize,

    /// Age after which an orphaned workspace is swept.
    #[serde(default = "IndexingConfig::default_workspace_sweep_hours")]
    pub workspace_sweep_hours: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workspace_root: Self::default_workspace_root(),
            ignore_dirs: Self::default_ignore_dirs(),
            max_file_bytes: Self::default_max_file_bytes(),
            precise_timeout_secs: Self::default_precise_timeout_secs(),
            precise_max_output_bytes: Self::default_precise_max_output_bytes(),
            write_batch: Self::default_write_batch(),
            heartbeat_every_files: Self::default_heartbeat_every_files(),
            workspace_sweep_hours: Self::default_workspace_sweep_hours(),
        }
    }
}

impl IndexingConfig {
    fn default_workspace_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lattice")
            .join("workspaces")
    }

    fn default_ignore_dirs() -> Vec<String> {
        vec![
            ".git".into(),
            "node_modules".into(),
            "target".into(),
            "__pycache__".into(),
            ".venv".into(),
            "venv".into(),
            "dist".into(),
            "build".into(),
            ".next".into(),
            "vendor".into(),
            "coverage".into(),
        ]
    }

    fn default_max_file_bytes() -> u64 {
        1024 * 1024 // 1MB
    }

    fn default_precise_timeout_secs() -> u64 {
        600
    }

    fn default_precise_max_output_bytes() -> u64 {
        100 * 1024 * 1024
    }

    fn default_write_batch() -> usize {
        1000
    }

    fn default_heartbeat_every_files() -> usize {
        100
    }

    fn default_workspace_sweep_hours() -> u64 {
        24
    }
}

/// Embedding stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file.
    #[serde(default = "EmbeddingConfig::default_model_path")]
    pub model_path: PathBuf,

    /// Output embedding dimensions.
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,

    /// Maximum sequence length for the tokenizer.
    #[serde(default = "EmbeddingConfig::default_max_seq_length")]
    pub max_seq_length: usize,

    /// Files fetched per embedding batch.
    #[serde(default = "EmbeddingConfig::default_files_per_batch")]
    pub files_per_batch: usize,

    /// Documents inferred before the inference session is rotated.
    #[serde(default = "EmbeddingConfig::default_session_rotate_every")]
    pub session_rotate_every: usize,

    /// Vector-store upsert sub-batch size.
    #[serde(default = "EmbeddingConfig::default_upsert_batch")]
    pub upsert_batch: usize,

    /// Body truncation for embedding documents, in characters.
    #[serde(default = "EmbeddingConfig::default_body_chars")]
    pub body_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: Self::default_model_path(),
            dimensions: Self::default_dimensions(),
            max_seq_length: Self::default_max_seq_length(),
            files_per_batch: Self::default_files_per_batch(),
            session_rotate_every: Self::default_session_rotate_every(),
            upsert_batch: Self::default_upsert_batch(),
            body_chars: Self::default_body_chars(),
        }
    }
}

impl EmbeddingConfig {
    fn default_model_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lattice")
            .join("models")
            .join("model.onnx")
    }
    fn default_dimensions() -> usize { crate::types::EMBEDDING_DIMENSIONS }
    fn default_max_seq_length() -> usize { 512 }
    fn default_files_per_batch() -> usize { 5 }
    fn default_session_rotate_every() -> usize { 500 }
    fn default_upsert_batch() -> usize { 10 }
    fn default_body_chars() -> usize { 2000 }
}

/// Justification engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JustifyConfig {
    /// Entities per parallel chunk within a topological level.
    #[serde(default = "JustifyConfig::default_chunk_size")]
    pub chunk_size: usize,

    /// Entities fetched per graph-context batch.
    #[serde(default = "JustifyConfig::default_context_batch")]
    pub context_batch: usize,

    /// Cap on the accumulated changed-ID set used for staleness checks.
    #[serde(default = "JustifyConfig::default_changed_id_cap")]
    pub changed_id_cap: usize,

    /// Hard cap on entities per LLM batch.
    #[serde(default = "JustifyConfig::default_max_batch_entities")]
    pub max_batch_entities: usize,

    /// Fraction of any token budget actually used.
    #[serde(default = "JustifyConfig::default_safety_margin")]
    pub safety_margin: f64,

    /// Estimated characters per token (conservative).
    #[serde(default = "JustifyConfig::default_chars_per_token")]
    pub chars_per_token: f64,

    /// Levels between ontology refinements.
    #[serde(default = "JustifyConfig::default_refine_every_levels")]
    pub refine_every_levels: usize,

    /// Retry backoff schedule, in seconds.
    #[serde(default = "JustifyConfig::default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Maximum hops for cascade re-justification.
    #[serde(default = "JustifyConfig::default_cascade_hops")]
    pub cascade_hops: usize,

    /// Entity budget for cascade re-justification.
    #[serde(default = "JustifyConfig::default_cascade_entity_budget")]
    pub cascade_entity_budget: usize,

    /// Inbound-call count above which an entity is exempt from cascades.
    #[serde(default = "JustifyConfig::default_hub_threshold")]
    pub hub_threshold: u32,
}

impl Default for JustifyConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            context_batch: Self::default_context_batch(),
            changed_id_cap: Self::default_changed_id_cap(),
            max_batch_entities: Self::default_max_batch_entities(),
            safety_margin: Self::default_safety_margin(),
            chars_per_token: Self::default_chars_per_token(),
            refine_every_levels: Self::default_refine_every_levels(),
            backoff_secs: Self::default_backoff_secs(),
            cascade_hops: Self::default_cascade_hops(),
            cascade_entity_budget: Self::default_cascade_entity_budget(),
            hub_threshold: Self::default_hub_threshold(),
        }
    }
}

impl JustifyConfig {
    fn default_chunk_size() -> usize { 100 }
    fn default_context_batch() -> usize { 50 }
    fn default_changed_id_cap() -> usize { 5000 }
    fn default_max_batch_entities() -> usize { 15 }
    fn default_safety_margin() -> f64 { 0.85 }
    fn default_chars_per_token() -> f64 { 3.5 }
    fn default_refine_every_levels() -> usize { 20 }
    fn default_backoff_secs() -> Vec<u64> { vec![2, 8, 30] }
    fn default_cascade_hops() -> usize { 2 }
    fn default_cascade_entity_budget() -> usize { 50 }
    fn default_hub_threshold() -> u32 { 50 }
}

/// One routing tier's model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Provider model identifier.
    pub model: String,
    /// Context window, in tokens.
    pub context_tokens: usize,
    /// Maximum output, in tokens.
    pub max_output_tokens: usize,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the provider API.
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,

    /// Premium tier model parameters.
    #[serde(default = "LlmConfig::default_premium")]
    pub premium: ModelParams,

    /// Standard tier model parameters.
    #[serde(default = "LlmConfig::default_standard")]
    pub standard: ModelParams,

    /// Fast tier model parameters.
    #[serde(default = "LlmConfig::default_fast")]
    pub fast: ModelParams,

    /// Requests per minute allowed by the token-bucket gate.
    #[serde(default = "LlmConfig::default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Tokens per minute allowed by the token-bucket gate.
    #[serde(default = "LlmConfig::default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    /// Provider-level retry attempts on rate limiting.
    #[serde(default = "LlmConfig::default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            premium: Self::default_premium(),
            standard: Self::default_standard(),
            fast: Self::default_fast(),
            requests_per_minute: Self::default_requests_per_minute(),
            tokens_per_minute: Self::default_tokens_per_minute(),
            retry_attempts: Self::default_retry_attempts(),
        }
    }
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://api.llm.invalid/v1".into()
    }
    fn default_premium() -> ModelParams {
        ModelParams {
            model: "lattice-premium".into(),
            context_tokens: 200_000,
            max_output_tokens: 16_384,
        }
    }
    fn default_standard() -> ModelParams {
        ModelParams {
            model: "lattice-standard".into(),
            context_tokens: 128_000,
            max_output_tokens: 8_192,
        }
    }
    fn default_fast() -> ModelParams {
        ModelParams {
            model: "lattice-fast".into(),
            context_tokens: 64_000,
            max_output_tokens: 4_096,
        }
    }
    fn default_requests_per_minute() -> u32 { 15 }
    fn default_tokens_per_minute() -> u64 { 1_000_000 }
    fn default_retry_attempts() -> u32 { 5 }

    /// Model parameters for a routing tier. Heuristic and fallback tiers
    /// never reach the provider; they borrow the fast parameters.
    pub fn params_for_tier(&self, tier: crate::types::ModelTier) -> &ModelParams {
        use crate::types::ModelTier::{Fallback, Fast, Heuristic, Premium, Standard};
        match tier {
            Premium => &self.premium,
            Standard => &self.standard,
            Fast | Heuristic | Fallback => &self.fast,
        }
    }
}

/// Snapshot exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Entity count above which chunked serialization is used.
    #[serde(default = "SnapshotConfig::default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Entities per serialization chunk.
    #[serde(default = "SnapshotConfig::default_chunk_size")]
    pub chunk_size: usize,

    /// Edge page size when reading from the graph store.
    #[serde(default = "SnapshotConfig::default_edge_page")]
    pub edge_page: usize,

    /// Hard cap on exported edges.
    #[serde(default = "SnapshotConfig::default_edge_cap")]
    pub edge_cap: usize,

    /// Maximum rules included.
    #[serde(default = "SnapshotConfig::default_max_rules")]
    pub max_rules: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: Self::default_chunk_threshold(),
            chunk_size: Self::default_chunk_size(),
            edge_page: Self::default_edge_page(),
            edge_cap: Self::default_edge_cap(),
            max_rules: Self::default_max_rules(),
        }
    }
}

impl SnapshotConfig {
    fn default_chunk_threshold() -> usize { 5000 }
    fn default_chunk_size() -> usize { 1000 }
    fn default_edge_page() -> usize { 20_000 }
    fn default_edge_cap() -> usize { 200_000 }
    fn default_max_rules() -> usize { 200 }
}

/// Workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Concurrent workers in the CPU-bound heavy pool.
    #[serde(default = "WorkflowConfig::default_heavy_workers")]
    pub heavy_workers: usize,

    /// Concurrent workers in the network-bound light pool.
    #[serde(default = "WorkflowConfig::default_light_workers")]
    pub light_workers: usize,

    /// Debounce window for incremental push signals, in seconds.
    #[serde(default = "WorkflowConfig::default_debounce_secs")]
    pub debounce_secs: u64,

    /// Changed-file count above which an incremental run escalates to a
    /// full re-index.
    #[serde(default = "WorkflowConfig::default_full_reindex_threshold")]
    pub full_reindex_threshold: usize,

    /// Re-index rate limit: runs per repo per window.
    #[serde(default = "WorkflowConfig::default_reindex_per_hour")]
    pub reindex_per_hour: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            heavy_workers: Self::default_heavy_workers(),
            light_workers: Self::default_light_workers(),
            debounce_secs: Self::default_debounce_secs(),
            full_reindex_threshold: Self::default_full_reindex_threshold(),
            reindex_per_hour: Self::default_reindex_per_hour(),
        }
    }
}

impl WorkflowConfig {
    fn default_heavy_workers() -> usize { 2 }
    fn default_light_workers() -> usize { 20 }
    fn default_debounce_secs() -> u64 { 60 }
    fn default_full_reindex_threshold() -> usize { 200 }
    fn default_reindex_per_hour() -> u32 { 1 }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    /// Load configuration from defaults, then user config, then the
    /// deployment config in `dir`, then environment overrides.
    pub fn load(dir: &Path) -> LatticeResult<Self> {
        let mut config = Self::default();

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("lattice").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        let deploy_config = dir.join("lattice.toml");
        if deploy_config.exists() {
            config.merge_from_file(&deploy_config)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> LatticeResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| LatticeError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        macro_rules! overlay_section {
            ($field:ident, $key:literal, $ty:ty) => {
                if let Some(section) = overlay.get($key) {
                    if let Ok(parsed) = section.clone().try_into::<$ty>() {
                        self.$field = parsed;
                    }
                }
            };
        }

        overlay_section!(indexing, "indexing", IndexingConfig);
        overlay_section!(embedding, "embedding", EmbeddingConfig);
        overlay_section!(justify, "justify", JustifyConfig);
        overlay_section!(llm, "llm", LlmConfig);
        overlay_section!(snapshot, "snapshot", SnapshotConfig);
        overlay_section!(workflow, "workflow", WorkflowConfig);
        overlay_section!(logging, "logging", LoggingConfig);

        Ok(())
    }

    /// Apply environment variable overrides (`LATTICE_*` prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("LATTICE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(model) = std::env::var("LATTICE_MODEL_PATH") {
            self.embedding.model_path = PathBuf::from(model);
        }
        if let Ok(url) = std::env::var("LATTICE_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(root) = std::env::var("LATTICE_WORKSPACE_ROOT") {
            self.indexing.workspace_root = PathBuf::from(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.indexing.max_file_bytes, 1024 * 1024);
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.justify.max_batch_entities, 15);
        assert_eq!(config.justify.backoff_secs, vec![2, 8, 30]);
        assert_eq!(config.workflow.heavy_workers, 2);
        assert_eq!(config.workflow.light_workers, 20);
        assert_eq!(config.snapshot.edge_cap, 200_000);
    }

    #[test]
    fn test_merge_from_file_overlays_sections() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("lattice.toml");
        std::fs::write(
            &path,
            "[workflow]\ndebounce_secs = 5\n\n[justify]\nchunk_size = 10\n",
        )
        .expect("write");

        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.workflow.debounce_secs, 5);
        assert_eq!(config.justify.chunk_size, 10);
        // Untouched sections keep defaults
        assert_eq!(config.embedding.dimensions, 768);
    }

    #[test]
    fn test_tier_params_routing() {
        use crate::types::ModelTier;
        let llm = LlmConfig::default();
        assert_eq!(llm.params_for_tier(ModelTier::Premium).model, "lattice-premium");
        assert_eq!(llm.params_for_tier(ModelTier::Fallback).model, "lattice-fast");
    }
}
