//! Indexer core: stages 1-3 of the pipeline.
//!
//! ```text
//! prepare (workspace) --> precise decode (scip) --> fallback parse
//!         |                        |                      |
//!         v                        v                      v
//!    file inventory          entities+edges        entities+edges
//!                                   \                    /
//!                                    +--> resolve --> finalize (shadow swap)
//! ```
//!
//! All writes go through the deterministic hasher, batch at the
//! configured size, and carry the run's `index_version`, which makes
//! them idempotent and lets finalization swap the shadow index with a
//! single delete.

pub mod encoding;
pub mod external;
pub mod finalize;
pub mod languages;
pub mod resolve;
pub mod scip;
pub mod workspace;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::IndexingConfig;
use crate::error::LatticeResult;
use crate::keys;
use crate::stores::GraphStore;
use crate::types::{CodeEdge, CodeEntity, EdgeKind, EntityKind, Language, Tenant};

use languages::{ParsedFile, RawImport};

/// Per-file cap on individual variable entities; the overflow collapses
/// into one collection entity that preserves the original kind.
const VARIABLE_COLLAPSE_THRESHOLD: usize = 50;

/// Identity of one pipeline run's writes.
#[derive(Debug, Clone)]
pub struct RunScope {
    /// Tenant the run belongs to.
    pub tenant: Tenant,
    /// Index version (UUID) stamped on every document.
    pub index_version: String,
}

impl RunScope {
    /// Create a run scope.
    pub fn new(tenant: Tenant, index_version: impl Into<String>) -> Self {
        Self {
            tenant,
            index_version: index_version.into(),
        }
    }
}

/// Running tally of writes, kept in memory for finalization
/// verification.
#[derive(Debug, Clone, Default)]
pub struct IndexTally {
    /// Entities written, by kind.
    pub entities_by_kind: BTreeMap<String, usize>,
    /// Total edges written.
    pub edges: usize,
    /// Files quarantined by parse failures.
    pub quarantined: usize,
    /// Files skipped as binary.
    pub skipped_binary: usize,
}

impl IndexTally {
    /// Record entity writes.
    pub fn record_entities(&mut self, entities: &[CodeEntity]) {
        for entity in entities {
            *self
                .entities_by_kind
                .entry(entity.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    /// Total entities recorded.
    pub fn total_entities(&self) -> usize {
        self.entities_by_kind.values().sum()
    }
}

/// Cross-file resolution inputs accumulated while parsing.
#[derive(Debug, Default)]
pub struct ParseArtifacts {
    /// Per-file imports: file path -> raw imports.
    pub file_imports: HashMap<String, Vec<RawImport>>,
    /// Declared name -> (entity key, kind), repo-wide.
    pub name_to_entity: HashMap<String, Vec<(String, EntityKind)>>,
    /// Function/method bodies for call-site scanning: (key, file, body).
    pub function_bodies: Vec<(String, String, String)>,
}

impl ParseArtifacts {
    /// Merge another file's artifacts into this set.
    pub fn absorb(&mut self, other: ParseArtifacts) {
        for (file, imports) in other.file_imports {
            self.file_imports.entry(file).or_default().extend(imports);
        }
        for (name, entries) in other.name_to_entity {
            self.name_to_entity.entry(name).or_default().extend(entries);
        }
        self.function_bodies.extend(other.function_bodies);
    }
}

/// Materialize entities and edges for one parsed file.
///
/// Produces the file entity, declaration entities, `contains` edges,
/// `member_of` edges, within-file `extends`/`implements` edges, and
/// external `imports` edges. Cross-file relations are resolved later
/// from the returned artifacts.
pub fn materialize_file(
    scope: &RunScope,
    file_path: &str,
    language: Language,
    parsed: &ParsedFile,
) -> (Vec<CodeEntity>, Vec<CodeEdge>, ParseArtifacts) {
    let mut entities = Vec::new();
    let mut edges = Vec::new();
    let mut artifacts = ParseArtifacts::default();

    let file_key = keys::file_entity_key(&scope.tenant.repo_id, file_path);
    entities.push(file_entity(scope, file_path, language, &file_key));

    // Collapse excess variables into one collection entity.
    let variable_count = parsed
        .declarations
        .iter()
        .filter(|d| d.kind == EntityKind::Variable)
        .count();
    let collapse_variables = variable_count > VARIABLE_COLLAPSE_THRESHOLD;
    let mut collapsed: usize = 0;

    let mut name_to_key: HashMap<String, (String, EntityKind)> = HashMap::new();

    for decl in &parsed.declarations {
        if collapse_variables && decl.kind == EntityKind::Variable {
            collapsed += 1;
            continue;
        }
        let key = keys::entity_key(
            &scope.tenant.repo_id,
            file_path,
            decl.kind,
            &decl.name,
            &decl.signature,
        );
        let mut entity = CodeEntity {
            key: key.clone(),
            org_id: scope.tenant.org_id.clone(),
            repo_id: scope.tenant.repo_id.clone(),
            kind: decl.kind,
            name: decl.name.clone(),
            file_path: file_path.to_string(),
            start_line: decl.start_line,
            end_line: decl.end_line,
            signature: decl.signature.clone(),
            body: decl.body.clone(),
            documentation: decl.documentation.clone(),
            language,
            index_version: scope.index_version.clone(),
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

        edges.push(edge(scope, &file_key, &key, EdgeKind::Contains));

        if decl.kind.is_callable() {
            artifacts
                .function_bodies
                .push((key.clone(), file_path.to_string(), decl.body.clone()));
        }

        name_to_key.insert(decl.name.clone(), (key.clone(), decl.kind));
        artifacts
            .name_to_entity
            .entry(decl.name.clone())
            .or_default()
            .push((key.clone(), decl.kind));

        entities.push(entity);
    }

    if collapsed > 0 {
        let name = format!("{file_path} variables");
        let key = keys::entity_key(
            &scope.tenant.repo_id,
            file_path,
            EntityKind::Module,
            &name,
            "",
        );
        let mut entity = file_entity(scope, file_path, language, &key);
        entity.kind = EntityKind::Module;
        entity.name = name;
        entity.original_kind = Some(EntityKind::Variable);
        entity.body = format!("{collapsed} variable declarations");
        edges.push(edge(scope, &file_key, &key, EdgeKind::Contains));
        entities.push(entity);
    }

    // member_of: method -> enclosing class in the same file.
    for decl in &parsed.declarations {
        let Some(parent_name) = &decl.parent else {
            continue;
        };
        let (Some((child_key, _)), Some((parent_key, _))) =
            (name_to_key.get(&decl.name), name_to_key.get(parent_name))
        else {
            continue;
        };
        if child_key != parent_key {
            edges.push(edge(scope, child_key, parent_key, EdgeKind::MemberOf));
        }
    }

    // extends/implements resolved within the file; unresolved names are
    // retried during cross-file resolution.
    for relation in &parsed.relations {
        let (Some((from_key, _)), Some((to_key, _))) = (
            name_to_key.get(&relation.from_name),
            name_to_key.get(&relation.to_name),
        ) else {
            continue;
        };
        if from_key != to_key {
            edges.push(edge(scope, from_key, to_key, relation.kind));
        }
    }

    // External imports become boundary edges off the file entity.
    for import in &parsed.imports {
        if let Some((category, package)) = external::classify(&import.module) {
            let target_key = keys::entity_key(
                &scope.tenant.repo_id,
                "(external)",
                EntityKind::Module,
                &package,
                "",
            );
            let mut external_edge = edge(scope, &file_key, &target_key, EdgeKind::Imports);
            external_edge.is_external = true;
            external_edge.package_name = Some(package);
            external_edge.boundary_category = Some(category.to_string());
            edges.push(external_edge);
        }
    }

    artifacts
        .file_imports
        .insert(file_path.to_string(), parsed.imports.clone());

    (entities, edges, artifacts)
}

pub(crate) fn file_entity(
    scope: &RunScope,
    file_path: &str,
    language: Language,
    key: &str,
) -> CodeEntity {
    CodeEntity {
        key: key.to_string(),
        org_id: scope.tenant.org_id.clone(),
        repo_id: scope.tenant.repo_id.clone(),
        kind: EntityKind::File,
        name: file_path
            .rsplit('/')
            .next()
            .unwrap_or(file_path)
            .to_string(),
        file_path: file_path.to_string(),
        start_line: 1,
        end_line: 1,
        signature: String::new(),
        body: String::new(),
        documentation: None,
        language,
        index_version: scope.index_version.clone(),
        fan_in: None,
        fan_out: None,
        risk_level: None,
        community_id: None,
        community_label: None,
        pagerank: None,
        pagerank_percentile: None,
        original_kind: None,
        quarantine_error: None,
    }
}

/// Build an edge within the run scope.
pub fn edge(scope: &RunScope, from_key: &str, to_key: &str, kind: EdgeKind) -> CodeEdge {
    CodeEdge {
        key: keys::edge_key(from_key, to_key, kind),
        from_key: from_key.to_string(),
        to_key: to_key.to_string(),
        kind,
        org_id: scope.tenant.org_id.clone(),
        repo_id: scope.tenant.repo_id.clone(),
        index_version: scope.index_version.clone(),
        is_external: false,
        package_name: None,
        boundary_category: None,
        weight: None,
        event_name: None,
    }
}

/// A quarantine placeholder for a file that failed to parse.
pub fn quarantine_entity(scope: &RunScope, file_path: &str, error: &str) -> CodeEntity {
    let key = keys::file_entity_key(&scope.tenant.repo_id, file_path);
    let mut entity = file_entity(scope, file_path, Language::from_path(file_path), &key);
    entity.quarantine_error = Some(error.to_string());
    entity
}

/// Result of the fallback-parse stage.
#[derive(Debug, Default)]
pub struct FallbackOutcome {
    /// Files parsed successfully.
    pub files_parsed: usize,
    /// Files quarantined.
    pub files_quarantined: usize,
    /// Files skipped (binary or oversized).
    pub files_skipped: usize,
    /// Cross-file resolution inputs.
    pub artifacts: ParseArtifacts,
    /// Write tally for finalization verification.
    pub tally: IndexTally,
}

/// Stage 3: fallback-parse every file the precise indexer did not cover.
///
/// Parsing runs on the rayon pool; store writes are batched from the
/// driving thread. `heartbeat` is invoked every
/// [`IndexingConfig::heartbeat_every_files`] files.
pub async fn run_fallback_parse(
    graph: &Arc<dyn GraphStore>,
    config: &IndexingConfig,
    scope: &RunScope,
    files: &[workspace::WorkspaceFile],
    covered: &std::collections::HashSet<String>,
    heartbeat: &(dyn Fn(usize) + Send + Sync),
) -> LatticeResult<FallbackOutcome> {
    let mut outcome = FallbackOutcome::default();
    let tally = &mut outcome.tally;

    let pending: Vec<&workspace::WorkspaceFile> = files
        .iter()
        .filter(|f| !covered.contains(&f.path))
        .collect();

    let mut entity_buffer: Vec<CodeEntity> = Vec::new();
    let mut edge_buffer: Vec<CodeEdge> = Vec::new();

    for (batch_index, batch) in pending.chunks(config.heartbeat_every_files).enumerate() {
        // Parse the batch in parallel; each item is independent.
        let results: Vec<FileParseResult> = batch
            .par_iter()
            .map(|file| parse_one(config, scope, file))
            .collect();

        for result in results {
            match result {
                FileParseResult::Parsed {
                    entities,
                    edges,
                    artifacts,
                } => {
                    outcome.files_parsed += 1;
                    tally.record_entities(&entities);
                    tally.edges += edges.len();
                    entity_buffer.extend(entities);
                    edge_buffer.extend(edges);
                    outcome.artifacts.absorb(artifacts);
                }
                FileParseResult::Quarantined { entity } => {
                    outcome.files_quarantined += 1;
                    tally.quarantined += 1;
                    tally.record_entities(std::slice::from_ref(&entity));
                    entity_buffer.push(entity);
                }
                FileParseResult::FileOnly { entity } => {
                    outcome.files_skipped += 1;
                    tally.record_entities(std::slice::from_ref(&entity));
                    entity_buffer.push(entity);
                }
                FileParseResult::Binary => {
                    outcome.files_skipped += 1;
                    tally.skipped_binary += 1;
                }
            }

            if entity_buffer.len() >= config.write_batch {
                graph
                    .bulk_upsert_entities(&scope.tenant, &entity_buffer)
                    .await?;
                entity_buffer.clear();
            }
            if edge_buffer.len() >= config.write_batch {
                graph.bulk_upsert_edges(&scope.tenant, &edge_buffer).await?;
                edge_buffer.clear();
            }
        }

        heartbeat((batch_index + 1) * config.heartbeat_every_files);
    }

    if !entity_buffer.is_empty() {
        graph
            .bulk_upsert_entities(&scope.tenant, &entity_buffer)
            .await?;
    }
    if !edge_buffer.is_empty() {
        graph.bulk_upsert_edges(&scope.tenant, &edge_buffer).await?;
    }

    tracing::info!(
        parsed = outcome.files_parsed,
        quarantined = outcome.files_quarantined,
        skipped = outcome.files_skipped,
        "fallback parse complete"
    );

    Ok(outcome)
}

enum FileParseResult {
    Parsed {
        entities: Vec<CodeEntity>,
        edges: Vec<CodeEdge>,
        artifacts: ParseArtifacts,
    },
    Quarantined {
        entity: CodeEntity,
    },
    FileOnly {
        entity: CodeEntity,
    },
    Binary,
}

fn parse_one(
    config: &IndexingConfig,
    scope: &RunScope,
    file: &workspace::WorkspaceFile,
) -> FileParseResult {
    let language = Language::from_path(&file.path);

    // Oversized files contribute only a file entity.
    if file.bytes.len() as u64 > config.max_file_bytes {
        let key = keys::file_entity_key(&scope.tenant.repo_id, &file.path);
        return FileParseResult::FileOnly {
            entity: file_entity(scope, &file.path, language, &key),
        };
    }

    let Some(text) = encoding::decode(&file.bytes) else {
        return FileParseResult::Binary;
    };

    match languages::parse_file(text.as_bytes(), &file.path, language) {
        Ok(parsed) => {
            let (entities, edges, artifacts) =
                materialize_file(scope, &file.path, language, &parsed);
            FileParseResult::Parsed {
                entities,
                edges,
                artifacts,
            }
        }
        Err(e) => {
            tracing::warn!(path = %file.path, error = %e, "parse failed, quarantining file");
            FileParseResult::Quarantined {
                entity: quarantine_entity(scope, &file.path, &e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryGraphStore;

    fn scope() -> RunScope {
        RunScope::new(Tenant::new("o1", "r1"), "v1")
    }

    #[test]
    fn test_materialize_produces_file_and_contains() {
        let parsed = languages::parse_file(
            b"export function foo(x: number) { return x + 1 }",
            "src/a.ts",
            Language::TypeScript,
        )
        .expect("parse");
        let (entities, edges, artifacts) =
            materialize_file(&scope(), "src/a.ts", Language::TypeScript, &parsed);

        assert_eq!(entities.len(), 2, "file entity + function entity");
        assert_eq!(entities[0].kind, EntityKind::File);
        assert_eq!(entities[1].name, "foo");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Contains);
        assert_eq!(artifacts.function_bodies.len(), 1);
    }

    #[test]
    fn test_materialize_is_deterministic() {
        let source = b"export function foo(x: number) { return x + 1 }";
        let parsed =
            languages::parse_file(source, "src/a.ts", Language::TypeScript).expect("parse");
        let (first, _, _) = materialize_file(&scope(), "src/a.ts", Language::TypeScript, &parsed);
        let (second, _, _) = materialize_file(&scope(), "src/a.ts", Language::TypeScript, &parsed);
        let first_keys: Vec<&str> = first.iter().map(|e| e.key.as_str()).collect();
        let second_keys: Vec<&str> = second.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(first_keys, second_keys);
    }

    #[test]
    fn test_external_import_edge() {
        let parsed = languages::parse_file(
            b"import axios from 'axios';\nexport function fetchUser() { return axios.get('/u'); }",
            "src/api.ts",
            Language::TypeScript,
        )
        .expect("parse");
        let (_, edges, _) = materialize_file(&scope(), "src/api.ts", Language::TypeScript, &parsed);
        let external = edges
            .iter()
            .find(|e| e.is_external)
            .expect("external edge");
        assert_eq!(external.kind, EdgeKind::Imports);
        assert_eq!(external.package_name.as_deref(), Some("axios"));
        assert_eq!(external.boundary_category.as_deref(), Some("http"));
    }

    #[test]
    fn test_member_of_edge() {
        let parsed = languages::parse_file(
            b"class Svc { run() { return 1 } }",
            "src/svc.ts",
            Language::TypeScript,
        )
        .expect("parse");
        let (_, edges, _) = materialize_file(&scope(), "src/svc.ts", Language::TypeScript, &parsed);
        assert!(edges.iter().any(|e| e.kind == EdgeKind::MemberOf));
    }

    #[tokio::test]
    async fn test_fallback_stage_writes_and_quarantines() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let config = IndexingConfig::default();
        let scope = scope();
        let files = vec![
            workspace::WorkspaceFile {
                path: "src/ok.py".into(),
                bytes: b"def fine():\n    pass\n".to_vec(),
            },
            workspace::WorkspaceFile {
                path: "assets/logo.bin".into(),
                bytes: vec![0u8, 159, 146, 150],
            },
        ];
        let outcome = run_fallback_parse(
            &graph,
            &config,
            &scope,
            &files,
            &std::collections::HashSet::new(),
            &|_| {},
        )
        .await
        .expect("stage");

        assert_eq!(outcome.files_parsed, 1);
        assert_eq!(outcome.files_skipped, 1);
        assert_eq!(outcome.tally.skipped_binary, 1);

        let entities = graph.get_all_entities(&scope.tenant).await.expect("all");
        assert!(entities.iter().any(|e| e.name == "fine"));
    }
}
