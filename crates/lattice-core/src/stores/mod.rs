//! Store ports and their adapters.
//!
//! Every external dependency of the pipeline is abstracted behind a
//! named interface: real adapter for production, in-memory fake for
//! tests and hermetic runs. The [`Services`] container injects them
//! into the pipeline; there are no process-wide singletons.

pub mod cache;
pub mod git;
pub mod graph;
pub mod graph_sqlite;
pub mod llm;
pub mod object;
pub mod pattern_engine;
pub mod relational;
pub mod vector;
pub mod workflow;

use std::sync::Arc;

pub use cache::{CacheStore, DistributedLock, MemoryCacheStore};
pub use git::{CloneOpts, FakeGitHost, GitHost, LocalGitHost, PrFile};
pub use graph::{GraphStore, MemoryGraphStore};
pub use graph_sqlite::SqliteGraphStore;
pub use llm::{
    HttpLlmProvider, LlmProvider, MockBehavior, MockLlmProvider, ObjectRequest, ObjectResponse,
    RateGate, TokenUsage,
};
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use pattern_engine::{PatternEngine, RuleMatch, StructuralPatternEngine};
pub use relational::{MemoryRelationalStore, RelationalStore, SqliteRelationalStore};
pub use vector::{cosine_similarity, MemoryVectorSearch, VectorHit, VectorSearch};
pub use workflow::{WorkflowEngine, WorkflowSignal, WorkflowStatus};

/// Constructor-injected container of store interfaces.
///
/// Production wiring creates real adapters; tests build one from fakes
/// with [`Services::in_memory`]. Cloning is cheap (all members are
/// `Arc`s).
#[derive(Clone)]
pub struct Services {
    /// Graph database (entities, edges, justifications, ...).
    pub graph: Arc<dyn GraphStore>,
    /// Relational database (repos, runs, snapshot metadata).
    pub relational: Arc<dyn RelationalStore>,
    /// Vector database.
    pub vectors: Arc<dyn VectorSearch>,
    /// Cache backend (TTL, locks, rate limits, pub/sub).
    pub cache: Arc<dyn CacheStore>,
    /// Blob store for snapshot artifacts.
    pub objects: Arc<dyn ObjectStore>,
    /// Git hosting.
    pub git: Arc<dyn GitHost>,
    /// LLM provider.
    pub llm: Arc<dyn LlmProvider>,
    /// Pattern/rule evaluation engine.
    pub patterns: Arc<dyn PatternEngine>,
}

impl Services {
    /// A fully in-memory service set for tests and hermetic runs.
    pub fn in_memory() -> Self {
        Self {
            graph: Arc::new(MemoryGraphStore::new()),
            relational: Arc::new(MemoryRelationalStore::new()),
            vectors: Arc::new(MemoryVectorSearch::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            git: Arc::new(FakeGitHost::new()),
            llm: Arc::new(MockLlmProvider::always(serde_json::json!({}))),
            patterns: Arc::new(StructuralPatternEngine::new()),
        }
    }

    /// In-memory services with a specific git host and LLM provider
    /// (the two collaborators tests most often script).
    pub fn in_memory_with(git: Arc<dyn GitHost>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            git,
            llm,
            ..Self::in_memory()
        }
    }
}
