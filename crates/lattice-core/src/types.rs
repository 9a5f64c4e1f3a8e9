//! Core domain types shared across all lattice-core subsystems.
//!
//! These types form the API contract between modules and the store ports.
//! Every tenant-owned document carries `org_id` and `repo_id`; read paths
//! filter by `org_id` first, so cross-tenant reads are impossible by
//! construction.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tenant scope
// ---------------------------------------------------------------------------

/// The `(organization, repository)` pair every pipeline invocation is
/// scoped to. Cloned freely; both components are short identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant {
    /// Owning organization.
    pub org_id: String,
    /// Repository within the organization.
    pub repo_id: String,
}

impl Tenant {
    /// Build a tenant scope from its two components.
    pub fn new(org_id: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            repo_id: repo_id.into(),
        }
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org_id, self.repo_id)
    }
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Languages the fallback parser covers. Anything else gets a bare
/// file entity from the generic plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// Rust (.rs)
    Rust,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .cxx, .hpp)
    Cpp,
    /// C# (.cs)
    CSharp,
    /// Ruby (.rb)
    Ruby,
    /// Unknown / unsupported
    Unknown,
}

impl Language {
    /// Detect language from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => Self::Python,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            _ => Self::Unknown,
        }
    }

    /// Detect language from a file path.
    pub fn from_path(path: &str) -> Self {
        path.rsplit('.')
            .next()
            .map_or(Self::Unknown, Self::from_extension)
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// The kind of declaration a [`CodeEntity`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A source file.
    File,
    /// Free function.
    Function,
    /// Class, struct, or record.
    Class,
    /// Interface, trait, or protocol.
    Interface,
    /// Variable or constant.
    Variable,
    /// Method on a class or struct.
    Method,
    /// Type alias or definition.
    Type,
    /// Enumeration.
    Enum,
    /// Module or namespace.
    Module,
}

impl EntityKind {
    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Variable => "variable",
            Self::Method => "method",
            Self::Type => "type",
            Self::Enum => "enum",
            Self::Module => "module",
        }
    }

    /// Parse from store string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "file" => Self::File,
            "function" => Self::Function,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "variable" => Self::Variable,
            "method" => Self::Method,
            "type" => Self::Type,
            "enum" => Self::Enum,
            _ => Self::Module,
        }
    }

    /// Whether justifications and embeddings target this kind.
    ///
    /// File/module containers are skipped on the first embedding pass.
    pub fn is_semantic(&self) -> bool {
        !matches!(self, Self::File | Self::Module)
    }

    /// Whether a `calls` edge to this kind really is a call; other
    /// targets get `references`.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }
}

/// Computed risk bucket from fan-in/fan-out pre-compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Either fan count >= 10.
    High,
    /// Either fan count >= 5.
    Medium,
    /// Everything else.
    Normal,
}

impl RiskLevel {
    /// Bucket a fan-in/fan-out pair.
    pub fn from_fan(fan_in: u32, fan_out: u32) -> Self {
        let max = fan_in.max(fan_out);
        if max >= 10 {
            Self::High
        } else if max >= 5 {
            Self::Medium
        } else {
            Self::Normal
        }
    }
}

/// A declaration extracted from source code.
///
/// Keys are deterministic: two index runs over the same bytes produce the
/// same key set, which makes bulk upserts idempotent and the shadow swap
/// safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    /// 16-hex-char key derived from `(repo_id, file_path, kind, name, signature)`.
    pub key: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// What kind of declaration this is.
    pub kind: EntityKind,
    /// Short name of the declaration.
    pub name: String,
    /// Path relative to the repository root, forward slashes.
    pub file_path: String,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Declaration signature, as written.
    pub signature: String,
    /// Body text, capped at [`CodeEntity::MAX_BODY_LINES`] lines.
    pub body: String,
    /// Extracted doc comment, if any.
    pub documentation: Option<String>,
    /// Source language.
    pub language: Language,
    /// Index version (UUID) of the run that wrote this entity.
    pub index_version: String,
    /// Inbound `calls` edge count, filled by analytics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_in: Option<u32>,
    /// Outbound `calls` edge count, filled by analytics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out: Option<u32>,
    /// Risk bucket derived from fan counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Louvain community this entity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<u32>,
    /// Human-readable community label, chosen during justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_label: Option<String>,
    /// Raw PageRank score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagerank: Option<f64>,
    /// PageRank percentile rank in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagerank_percentile: Option<f64>,
    /// Original kind, preserved when the kind was collapsed to a collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_kind: Option<EntityKind>,
    /// Set when parsing failed and this is a quarantine placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_error: Option<String>,
}

impl CodeEntity {
    /// Maximum number of body lines persisted per entity.
    pub const MAX_BODY_LINES: usize = 3000;

    /// Truncate `body` to the persistence cap, in place.
    pub fn cap_body(&mut self) {
        if self.body.lines().count() > Self::MAX_BODY_LINES {
            self.body = self
                .body
                .lines()
                .take(Self::MAX_BODY_LINES)
                .collect::<Vec<_>>()
                .join("\n");
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// The semantic label on a directed relation between entities or files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// File contains a declaration.
    Contains,
    /// Function/method A calls B.
    Calls,
    /// A references class/variable/module B.
    References,
    /// File A imports module B.
    Imports,
    /// Class A extends B.
    Extends,
    /// Class A implements interface B.
    Implements,
    /// Method A is a member of class B.
    MemberOf,
    /// A emits event E consumed elsewhere.
    Emits,
    /// A listens to event E.
    ListensTo,
    /// A mutates shared state owned by B.
    MutatesState,
    /// A and B change together without a static link.
    LogicallyCoupled,
    /// Test A exercises B.
    Tests,
}

impl EdgeKind {
    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Calls => "calls",
            Self::References => "references",
            Self::Imports => "imports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::MemberOf => "member_of",
            Self::Emits => "emits",
            Self::ListensTo => "listens_to",
            Self::MutatesState => "mutates_state",
            Self::LogicallyCoupled => "logically_coupled",
            Self::Tests => "tests",
        }
    }

    /// Parse from store string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "contains" => Self::Contains,
            "calls" => Self::Calls,
            "imports" => Self::Imports,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "member_of" => Self::MemberOf,
            "emits" => Self::Emits,
            "listens_to" => Self::ListensTo,
            "mutates_state" => Self::MutatesState,
            "logically_coupled" => Self::LogicallyCoupled,
            "tests" => Self::Tests,
            _ => Self::References,
        }
    }

    /// PageRank weight for this edge kind.
    pub fn pagerank_weight(&self) -> f64 {
        match self {
            Self::MutatesState => 0.9,
            Self::Implements => 0.7,
            Self::Emits | Self::ListensTo => 0.6,
            Self::Calls => 0.5,
            Self::References | Self::Extends => 0.3,
            Self::Imports => 0.1,
            Self::MemberOf => 0.05,
            Self::Contains | Self::LogicallyCoupled | Self::Tests => 0.0,
        }
    }

    /// Whether this kind is a semantic dependency for the justification
    /// topological sort.
    pub fn is_semantic_dependency(&self) -> bool {
        matches!(
            self,
            Self::Calls | Self::References | Self::Emits | Self::ListensTo
        )
    }
}

/// A typed directed relation between entities or files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEdge {
    /// 16-hex-char key derived from `(from_key, to_key, edge_kind)`.
    pub key: String,
    /// Key of the source entity.
    pub from_key: String,
    /// Key of the target entity.
    pub to_key: String,
    /// Semantic label.
    pub kind: EdgeKind,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Index version of the run that wrote this edge.
    pub index_version: String,
    /// Whether the target lives outside the repository.
    #[serde(default)]
    pub is_external: bool,
    /// Package the external target belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Curated boundary category for external packages (http, db, queue, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_category: Option<String>,
    /// Optional edge weight (logical coupling strength).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Event name for emits/listens_to edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Justifications
// ---------------------------------------------------------------------------

/// Three-valued classification of a code entity's business role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Taxonomy {
    /// Core product feature.
    Vertical,
    /// Shared business logic.
    Horizontal,
    /// Infrastructure / plumbing.
    Utility,
}

impl Taxonomy {
    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertical => "VERTICAL",
            Self::Horizontal => "HORIZONTAL",
            Self::Utility => "UTILITY",
        }
    }

    /// Parse from store string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "VERTICAL" => Self::Vertical,
            "HORIZONTAL" => Self::Horizontal,
            _ => Self::Utility,
        }
    }
}

/// Routing class determining LLM model, body budget, and output budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Entities with more than 20 callers or a safety-critical match.
    Premium,
    /// 3 to 20 callers.
    Standard,
    /// Fewer than 3 callers.
    Fast,
    /// Canned justification from a strong heuristic hint; no LLM call.
    Heuristic,
    /// Canned low-confidence justification after LLM failure.
    Fallback,
}

impl ModelTier {
    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Standard => "standard",
            Self::Fast => "fast",
            Self::Heuristic => "heuristic",
            Self::Fallback => "fallback",
        }
    }

    /// Per-entity body truncation budget, in characters.
    pub fn body_budget_chars(&self) -> usize {
        match self {
            Self::Premium => 12_000,
            Self::Standard => 8_000,
            Self::Fast => 4_000,
            Self::Heuristic | Self::Fallback => 0,
        }
    }

    /// Weight applied to the LLM's self-reported confidence when
    /// computing the calibrated composite.
    pub fn confidence_weight(&self) -> f64 {
        match self {
            Self::Premium => 1.0,
            Self::Standard => 0.9,
            Self::Fast => 0.75,
            Self::Heuristic => 0.6,
            Self::Fallback => 0.0,
        }
    }
}

/// A `(subject, predicate, object)` triple extracted by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTriple {
    /// Subject concept.
    pub subject: String,
    /// Relation between subject and object.
    pub predicate: String,
    /// Object concept.
    pub object: String,
}

/// Per-dimension breakdown of calibrated confidence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    /// Structural signal contribution, 0.0 - 0.5.
    pub structural: f64,
    /// Intent signal contribution, 0.0 - 0.3.
    pub intent: f64,
    /// Weighted LLM self-report contribution, 0.0 - 0.2.
    pub llm: f64,
}

impl ConfidenceBreakdown {
    /// Composite calibrated confidence.
    pub fn total(&self) -> f64 {
        self.structural + self.intent + self.llm
    }
}

/// Sentinel `valid_to` for the current row of a bi-temporal justification.
pub fn valid_to_infinity() -> DateTime<Utc> {
    // Far-future sentinel; chrono caps at year 262143 so 9999 is safe
    // for every backend.
    Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0).single().unwrap_or_else(Utc::now)
}

/// Business meaning of a [`CodeEntity`], produced by the justification
/// engine. Bi-temporal: at any instant an entity has at most one row
/// whose `valid_to` equals the far-future sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Justification {
    /// Key of the justified entity.
    pub entity_id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Business-role classification.
    pub taxonomy: Taxonomy,
    /// Feature this entity belongs to.
    pub feature_tag: String,
    /// One-paragraph business purpose.
    pub business_purpose: String,
    /// Domain concepts this entity touches.
    pub domain_concepts: Vec<String>,
    /// Extracted semantic triples.
    pub semantic_triples: Vec<SemanticTriple>,
    /// Raw confidence as reported by the model.
    pub confidence: f64,
    /// Calibrated composite confidence.
    pub calibrated_confidence: f64,
    /// Per-dimension breakdown of the calibrated score.
    pub confidence_breakdown: ConfidenceBreakdown,
    /// Model chain-of-reasoning summary.
    pub reasoning: String,
    /// Concrete model identifier used.
    pub model_used: String,
    /// Routing tier the entity was processed under.
    pub model_tier: ModelTier,
    /// SHA-256 hex of the entity body at justification time.
    pub body_hash: String,
    /// Start of validity.
    pub valid_from: DateTime<Utc>,
    /// End of validity; far-future sentinel for the current row.
    pub valid_to: DateTime<Utc>,
}

impl Justification {
    /// Whether this is the current row for its entity.
    pub fn is_current(&self) -> bool {
        self.valid_to >= valid_to_infinity()
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Which text variant a vector was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingVariant {
    /// Embedding of the entity's code document.
    Code,
    /// Embedding of the justification synthesis text.
    Synthesis,
}

impl EmbeddingVariant {
    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Synthesis => "synthesis",
        }
    }
}

/// Number of components in every stored vector.
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// A dense vector for an entity or justification. All components are
/// finite; the embedding stage rejects NaN and infinity before upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Key of the entity this vector describes.
    pub entity_key: String,
    /// Text variant the vector was produced from.
    pub variant: EmbeddingVariant,
    /// The 768-d vector.
    pub vector: Vec<f32>,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
}

// ---------------------------------------------------------------------------
// Ontology
// ---------------------------------------------------------------------------

/// A defined term in the repo vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyTerm {
    /// The term itself.
    pub term: String,
    /// LLM- or heuristic-produced definition.
    pub definition: String,
    /// Tier this term belongs to.
    pub tier: OntologyTier,
    /// How often the term appears in entity names.
    pub frequency: u32,
}

/// Tiered classification of ontology terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OntologyTier {
    /// Business-domain vocabulary.
    Domain,
    /// Architectural vocabulary (service, repository, handler, ...).
    Architectural,
    /// Framework-specific vocabulary.
    Framework,
}

/// Repo-wide vocabulary. One current ontology per repo; grows
/// monotonically within an index run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainOntology {
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Tiered terms.
    pub terms: Vec<OntologyTerm>,
    /// Ubiquitous-language aliases: canonical term -> synonyms.
    pub aliases: std::collections::BTreeMap<String, Vec<String>>,
    /// Domain term -> architectural terms it maps onto.
    pub domain_architecture_relations: std::collections::BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Feature aggregation & health
// ---------------------------------------------------------------------------

/// Per-feature rollup, regenerated on every justification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureAggregation {
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// The feature tag entities were grouped by.
    pub feature_tag: String,
    /// Number of entities carrying the tag.
    pub entity_count: usize,
    /// Entry-point entity keys (high fan-in and exported).
    pub entry_points: Vec<String>,
    /// Taxonomy -> entity count.
    pub taxonomy_breakdown: std::collections::BTreeMap<String, usize>,
    /// Mean calibrated confidence across the feature.
    pub average_confidence: f64,
}

/// A single category score in a [`HealthReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCategory {
    /// Category identifier (one of the 13 fixed categories).
    pub category: String,
    /// Score 0 - 100.
    pub score: u32,
    /// Entities cited as evidence.
    pub entity_refs: Vec<String>,
    /// One-line finding.
    pub finding: String,
}

/// 13-category risk scorecard and narrative. Regenerated per index run,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Index version this report describes.
    pub index_version: String,
    /// Per-category scores; empty when `insufficient_data` is set.
    pub categories: Vec<HealthCategory>,
    /// Narrative summary.
    pub summary: String,
    /// Set when the justification stage produced only fallback stubs.
    #[serde(default)]
    pub insufficient_data: bool,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rules & patterns
// ---------------------------------------------------------------------------

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    /// Offer the finding as a suggestion.
    Suggest,
    /// Emit a warning.
    Warn,
    /// Block the change.
    Block,
}

/// Lifecycle status of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Candidate, not yet enforced.
    Proposed,
    /// Enforced.
    Active,
    /// Explicitly disabled.
    Disabled,
}

/// Synthesized or curated enforcement directive. Higher priority wins
/// conflicts; repo-scoped rules override org-scoped ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository; `None` for org-scoped rules.
    pub repo_id: Option<String>,
    /// Structural query body.
    pub rule_body: String,
    /// Optional Semgrep-style YAML rule.
    pub semgrep_rule: Option<String>,
    /// Enforcement level.
    pub enforcement: Enforcement,
    /// Human-readable scope description.
    pub scope: String,
    /// Conflict-resolution priority; higher wins.
    pub priority: i32,
    /// Lifecycle status.
    pub status: RuleStatus,
    /// Languages the rule applies to.
    pub languages: Vec<Language>,
}

/// A recurring structural convention detected in the codebase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Pattern identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Short pattern name.
    pub name: String,
    /// What the pattern looks like.
    pub description: String,
    /// Entity keys exemplifying the pattern (capped at 5 for export).
    pub exemplars: Vec<String>,
    /// Occurrence count across the repo.
    pub occurrences: usize,
    /// Whether a reviewer confirmed the pattern.
    pub confirmed: bool,
}

// ---------------------------------------------------------------------------
// Ledger & working snapshots
// ---------------------------------------------------------------------------

/// Status of a ledger entry in the rewind/replay facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Created, not yet applied.
    Pending,
    /// Changes applied, not validated.
    Working,
    /// Validation failed.
    Broken,
    /// Committed to the branch.
    Committed,
    /// Rolled back.
    Reverted,
}

impl LedgerStatus {
    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(&self, next: LedgerStatus) -> bool {
        use LedgerStatus::{Broken, Committed, Pending, Reverted, Working};
        matches!(
            (self, next),
            (Pending, Working)
                | (Working, Broken)
                | (Working, Committed)
                | (Broken, Working)
                | (Broken, Reverted)
                | (Committed, Reverted)
        )
    }
}

/// A single file change recorded in a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerChange {
    /// Path of the changed file.
    pub file_path: String,
    /// Diff or full new content, per the authoring subsystem.
    pub patch: String,
}

/// Append-only record of an agent-driven change attempt. Entries are
/// never deleted; `merge_ledger` reparents them across branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Prompt that drove the change.
    pub prompt: String,
    /// Files touched.
    pub changes: Vec<LedgerChange>,
    /// Current status in the ledger state machine.
    pub status: LedgerStatus,
    /// Git branch the change targets.
    pub branch: String,
    /// Timeline branch for rewind bookkeeping.
    pub timeline_branch: String,
    /// Parent entry, if any.
    pub parent_id: Option<String>,
    /// Entry this one rewound to, if any.
    pub rewind_target_id: Option<String>,
    /// Commit that landed the change, once committed.
    pub commit_sha: Option<String>,
    /// Working snapshot captured at this entry, if marked.
    pub snapshot_id: Option<String>,
    /// When validation last ran.
    pub validated_at: Option<DateTime<Utc>>,
    /// Whether a rule was synthesized from this entry.
    #[serde(default)]
    pub rule_generated: bool,
}

/// A file captured in a [`WorkingSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Path relative to the repo root.
    pub path: String,
    /// Full file content.
    pub content: String,
    /// Entity keys present in the file at capture time.
    pub entity_hashes: Vec<String>,
}

/// Blob of files at a known-good ledger entry; referenced by rewind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingSnapshot {
    /// Snapshot identifier.
    pub id: String,
    /// Ledger entry this snapshot belongs to.
    pub ledger_entry_id: String,
    /// Captured files.
    pub files: Vec<SnapshotFile>,
    /// Why the snapshot was taken.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Repo record & status machine
// ---------------------------------------------------------------------------

/// User-visible repo status. Only `Ready` permits re-index triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    /// Registered, never indexed.
    Pending,
    /// Stage 1-3 in progress.
    Indexing,
    /// Embedding stage in progress.
    Embedding,
    /// Ontology discovery in progress.
    Ontology,
    /// Justification engine in progress.
    Justifying,
    /// Health / pattern analysis in progress.
    Analyzing,
    /// Index complete and queryable.
    Ready,
    /// Pipeline failed before embedding.
    Error,
    /// Embedding stage failed terminally.
    EmbedFailed,
    /// Justification stage failed terminally.
    JustifyFailed,
}

impl RepoStatus {
    /// Whether a new index run may start from this status.
    ///
    /// During a shadow re-index the status stays `Ready` until
    /// finalization, so `Ready` is the only in-progress-safe entry point;
    /// terminal failures also allow a fresh attempt.
    pub fn can_start_index(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Ready | Self::Error | Self::EmbedFailed | Self::JustifyFailed
        )
    }

    /// Whether the pipeline is currently holding this repo.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Indexing | Self::Embedding | Self::Ontology | Self::Justifying | Self::Analyzing
        )
    }

    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Embedding => "embedding",
            Self::Ontology => "ontology",
            Self::Justifying => "justifying",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::EmbedFailed => "embed_failed",
            Self::JustifyFailed => "justify_failed",
        }
    }

    /// Parse from store string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "indexing" => Self::Indexing,
            "embedding" => Self::Embedding,
            "ontology" => Self::Ontology,
            "justifying" => Self::Justifying,
            "analyzing" => Self::Analyzing,
            "ready" => Self::Ready,
            "error" => Self::Error,
            "embed_failed" => Self::EmbedFailed,
            "justify_failed" => Self::JustifyFailed,
            _ => Self::Pending,
        }
    }
}

/// Manifest facts harvested during ontology discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestData {
    /// Project name from the manifest.
    pub name: Option<String>,
    /// Project description.
    pub description: Option<String>,
    /// Detected tech stack entries.
    pub tech_stack: Vec<String>,
    /// Declared or inferred domain.
    pub domain: Option<String>,
}

/// A tenant-scoped source repository and its pipeline bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    /// Owning organization.
    pub org_id: String,
    /// Repository identifier.
    pub repo_id: String,
    /// Hosting provider (github, gitlab, upload).
    pub provider: String,
    /// Clone URL, when provider-hosted.
    pub clone_url: Option<String>,
    /// Default branch name.
    pub default_branch: String,
    /// HEAD SHA of the last finalized index.
    pub last_indexed_sha: Option<String>,
    /// Index version (UUID) of the current finalized index.
    pub index_version: Option<String>,
    /// Current status in the state machine.
    pub status: RepoStatus,
    /// Entity count at last finalization.
    pub entity_count: usize,
    /// Edge count at last finalization.
    pub edge_count: usize,
    /// Manifest facts from ontology discovery.
    #[serde(default)]
    pub manifest_data: ManifestData,
    /// User-provided context documents (truncated to 3000 chars each).
    #[serde(default)]
    pub context_documents: Vec<String>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A provider app installation granting access to an organization's
/// repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    /// Provider-side installation identifier.
    pub id: String,
    /// Hosting provider (github, gitlab).
    pub provider: String,
    /// Organization the installation belongs to.
    pub org_id: String,
}

/// A user's editing workspace over a repo branch, synced by the
/// agent-edit surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWorkspace {
    /// Workspace identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// User the workspace belongs to.
    pub user_id: String,
    /// Repository checked out.
    pub repo_id: String,
    /// Branch checked out.
    pub branch: String,
    /// SHA the workspace last synced to.
    pub last_synced_sha: Option<String>,
    /// When the workspace last synced.
    pub last_synced_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Pipeline runs
// ---------------------------------------------------------------------------

/// The eleven discrete steps tracked per pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Stage 1: workspace preparation.
    Prepare,
    /// Stage 2: precise-indexer decode.
    PreciseIndex,
    /// Stage 3: tree-sitter fallback parsing.
    FallbackParse,
    /// Shadow swap.
    Finalize,
    /// Fan-in/out, PageRank, community pre-compute.
    GraphAnalytics,
    /// Embedding stage.
    Embed,
    /// Ontology discovery.
    Ontology,
    /// Justification engine.
    Justify,
    /// Health report.
    Health,
    /// Snapshot export.
    Snapshot,
    /// Pattern detection.
    Patterns,
}

impl PipelineStep {
    /// All steps in canonical order.
    pub const ALL: [PipelineStep; 11] = [
        Self::Prepare,
        Self::PreciseIndex,
        Self::FallbackParse,
        Self::Finalize,
        Self::GraphAnalytics,
        Self::Embed,
        Self::Ontology,
        Self::Justify,
        Self::Health,
        Self::Snapshot,
        Self::Patterns,
    ];

    /// Convert to store string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::PreciseIndex => "precise_index",
            Self::FallbackParse => "fallback_parse",
            Self::Finalize => "finalize",
            Self::GraphAnalytics => "graph_analytics",
            Self::Embed => "embed",
            Self::Ontology => "ontology",
            Self::Justify => "justify",
            Self::Health => "health",
            Self::Snapshot => "snapshot",
            Self::Patterns => "patterns",
        }
    }
}

/// Recorded state of one step within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Which step this record describes.
    pub step: PipelineStep,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step completed, if it did.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message, if the step failed.
    pub error: Option<String>,
}

/// A single invocation of the pipeline. Every run writes start/complete
/// or start/fail for each step attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub run_id: String,
    /// Index version this run writes under.
    pub index_version: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Per-step bookkeeping, in execution order.
    pub steps: Vec<StepState>,
    /// Entities written by this run.
    pub total_entities: usize,
    /// Edges written by this run.
    pub total_edges: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (success or failure).
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Graph snapshots
// ---------------------------------------------------------------------------

/// Lifecycle of an exported snapshot artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// Serialization or upload in progress.
    Generating,
    /// Uploaded and checksum-verified.
    Available,
    /// Upload or verification failed; not advertised.
    Failed,
}

/// Metadata row for an exported binary snapshot. The artifact is
/// committed only after the status transitions to `Available` with the
/// checksum stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshotMeta {
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Hex SHA-256 of the serialized bytes.
    pub checksum: String,
    /// Serialized size.
    pub size_bytes: u64,
    /// Entities included.
    pub entity_count: usize,
    /// Edges included.
    pub edge_count: usize,
    /// When the snapshot was generated.
    pub generated_at: DateTime<Utc>,
    /// Artifact lifecycle status.
    pub status: SnapshotStatus,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A progress event published on `pipeline-logs:{repo_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLogEvent {
    /// Run the event belongs to.
    pub run_id: String,
    /// Step the event describes.
    pub step: String,
    /// Severity (info, warn, error).
    pub level: String,
    /// Human-readable message.
    pub message: String,
    /// Structured metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
    /// Event timestamp.
    pub ts: DateTime<Utc>,
}

/// An index event appended to the `index_events` collection (90-day TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEvent {
    /// Owning organization.
    pub org_id: String,
    /// Owning repository.
    pub repo_id: String,
    /// Event kind (full_index, incremental, finalize).
    pub kind: String,
    /// SHA the event refers to.
    pub sha: Option<String>,
    /// Entities affected.
    pub entities_affected: usize,
    /// Event timestamp.
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("tsx"), Language::TypeScript);
        assert_eq!(Language::from_extension("rs"), Language::Rust);
        assert_eq!(Language::from_extension("xyz"), Language::Unknown);
        assert_eq!(Language::from_path("src/a/b.go"), Language::Go);
    }

    #[test]
    fn test_risk_level_buckets() {
        assert_eq!(RiskLevel::from_fan(0, 0), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_fan(4, 4), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_fan(5, 0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_fan(0, 9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_fan(10, 0), RiskLevel::High);
        assert_eq!(RiskLevel::from_fan(3, 25), RiskLevel::High);
    }

    #[test]
    fn test_edge_kind_roundtrip() {
        for kind in [
            EdgeKind::Contains,
            EdgeKind::Calls,
            EdgeKind::References,
            EdgeKind::Imports,
            EdgeKind::Extends,
            EdgeKind::Implements,
            EdgeKind::MemberOf,
            EdgeKind::Emits,
            EdgeKind::ListensTo,
            EdgeKind::MutatesState,
            EdgeKind::LogicallyCoupled,
            EdgeKind::Tests,
        ] {
            assert_eq!(EdgeKind::from_str_lossy(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_pagerank_weights_match_design() {
        assert_eq!(EdgeKind::MutatesState.pagerank_weight(), 0.9);
        assert_eq!(EdgeKind::Calls.pagerank_weight(), 0.5);
        assert_eq!(EdgeKind::Contains.pagerank_weight(), 0.0);
    }

    #[test]
    fn test_repo_status_machine() {
        assert!(RepoStatus::Ready.can_start_index());
        assert!(RepoStatus::Pending.can_start_index());
        assert!(RepoStatus::Error.can_start_index());
        assert!(!RepoStatus::Indexing.can_start_index());
        assert!(!RepoStatus::Justifying.can_start_index());
        assert!(RepoStatus::Embedding.is_in_progress());
        assert!(!RepoStatus::Ready.is_in_progress());
    }

    #[test]
    fn test_ledger_status_transitions() {
        assert!(LedgerStatus::Pending.can_transition_to(LedgerStatus::Working));
        assert!(LedgerStatus::Working.can_transition_to(LedgerStatus::Committed));
        assert!(LedgerStatus::Broken.can_transition_to(LedgerStatus::Working));
        assert!(!LedgerStatus::Committed.can_transition_to(LedgerStatus::Working));
        assert!(!LedgerStatus::Pending.can_transition_to(LedgerStatus::Committed));
    }

    #[test]
    fn test_justification_current_row() {
        let just = Justification {
            entity_id: "abc".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            taxonomy: Taxonomy::Utility,
            feature_tag: "unclassified".into(),
            business_purpose: String::new(),
            domain_concepts: vec![],
            semantic_triples: vec![],
            confidence: 0.3,
            calibrated_confidence: 0.3,
            confidence_breakdown: ConfidenceBreakdown::default(),
            reasoning: String::new(),
            model_used: "none".into(),
            model_tier: ModelTier::Fallback,
            body_hash: String::new(),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        };
        assert!(just.is_current());

        let closed = Justification {
            valid_to: Utc::now(),
            ..just
        };
        assert!(!closed.is_current());
    }

    #[test]
    fn test_model_tier_budgets() {
        assert_eq!(ModelTier::Premium.body_budget_chars(), 12_000);
        assert_eq!(ModelTier::Standard.body_budget_chars(), 8_000);
        assert_eq!(ModelTier::Fast.body_budget_chars(), 4_000);
    }

    #[test]
    fn test_body_cap() {
        let mut entity = CodeEntity {
            key: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            kind: EntityKind::Function,
            name: "f".into(),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 5000,
            signature: "fn f()".into(),
            body: vec!["line"; 4000].join("\n"),
            documentation: None,
            language: Language::Rust,
            index_version: "v".into(),
            fan_in: None,
            fan_out: None,
            risk_level: None,
            community_id: None,
            community_label: None,
            pagerank: None,
            pagerank_percentile: None,
            original_kind: None,
            quarantine_error: None,
        };
        entity.cap_body();
        assert_eq!(entity.body.lines().count(), CodeEntity::MAX_BODY_LINES);
    }
}
