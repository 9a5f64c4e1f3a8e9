//! # lattice-core
//!
//! Repository indexing and knowledge-graph pipeline engine for Lattice.
//!
//! A pipeline invocation is scoped to one `(organization, repository)`
//! tenant and runs ten ordered stages: workspace preparation, precise
//! indexer decode, tree-sitter fallback parsing, shadow-swap
//! finalization, graph analytics, embedding, ontology discovery,
//! LLM justification, health reporting, and snapshot export, with
//! pattern detection beside the chain.
//!
//! ## Architecture
//!
//! The engine is split into decoupled subsystems:
//!
//! - **`config`** -- Configuration loading and validation
//! - **`types`** / **`keys`** -- Domain types and deterministic keying
//! - **`stores`** -- Ports over the graph, relational, vector, cache,
//!   object, git, LLM, and pattern backends (real adapter + in-memory
//!   fake per port), injected via the [`stores::Services`] container
//! - **`indexer`** -- Stages 1-3: workspace, precise decode, fallback
//!   parsing, cross-file resolution, finalization
//! - **`analytics`** -- Fan-in/out, weighted PageRank, Louvain
//!   communities, topological sort
//! - **`embedding`** -- Local 768-d dense-vector production with
//!   validation and orphan sweeping
//! - **`ontology`** -- Repo vocabulary discovery and refinement
//! - **`justify`** -- The justification engine: topology-ordered,
//!   batched, bi-temporal
//! - **`patterns`** -- Structural pattern detection and rule synthesis
//! - **`health`** -- The 13-category risk scorecard
//! - **`snapshot`** -- Chunked MessagePack export with checksum
//! - **`orchestrator`** -- Durable workflows over two worker pools
//!
//! Modules communicate via the types in [`types`]; no subsystem holds
//! process-wide state.

pub mod analytics;
pub mod config;
pub mod embedding;
pub mod error;
pub mod health;
pub mod indexer;
pub mod justify;
pub mod keys;
pub mod ontology;
pub mod orchestrator;
pub mod patterns;
pub mod snapshot;
pub mod stores;
pub mod types;

pub use config::Config;
pub use error::{LatticeError, LatticeResult};
pub use orchestrator::Orchestrator;
pub use stores::Services;
pub use types::Tenant;
