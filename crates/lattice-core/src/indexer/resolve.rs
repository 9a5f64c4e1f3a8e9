//! Cross-file call resolution.
//!
//! After fallback parsing, each function body is scanned for `name(`
//! and `new Name(` call sites. When the name was imported into the
//! file and the import resolves to a known entity, a `calls` edge is
//! emitted (or `references` when the target is not callable).

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::IndexingConfig;
use crate::error::LatticeResult;
use crate::stores::GraphStore;
use crate::types::{CodeEdge, EdgeKind, EntityKind};

use super::{edge, ParseArtifacts, RunScope};

/// Keywords that look like call sites but never are.
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "match", "return", "catch", "new", "await", "yield", "typeof",
    "sizeof", "function", "def", "fn", "println", "super",
];

/// Scan a function body for call-site names: `name(` and `new Name(`.
pub fn scan_call_sites(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    let bytes = body.as_bytes();
    let mut word_start = None;
    for (i, &b) in bytes.iter().enumerate() {
        let is_ident = b.is_ascii_alphanumeric() || b == b'_';
        match (word_start, is_ident) {
            (None, true) => word_start = Some(i),
            (Some(start), false) => {
                if b == b'(' {
                    let word = &body[start..i];
                    if !word.is_empty()
                        && !word.as_bytes()[0].is_ascii_digit()
                        && !CALL_KEYWORDS.contains(&word)
                    {
                        names.push(word.to_string());
                    }
                }
                word_start = None;
            }
            _ => {}
        }
    }
    names.sort();
    names.dedup();
    names
}

/// Resolve cross-file call edges from the parse artifacts and write
/// them in batches. Returns the number of edges written.
pub async fn resolve_cross_file_calls(
    graph: &Arc<dyn GraphStore>,
    config: &IndexingConfig,
    scope: &RunScope,
    artifacts: &ParseArtifacts,
) -> LatticeResult<usize> {
    let mut edges: Vec<CodeEdge> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut written = 0;

    for (source_key, file_path, body) in &artifacts.function_bodies {
        // Names imported into this file.
        let imported: HashSet<&str> = artifacts
            .file_imports
            .get(file_path)
            .map(|imports| {
                imports
                    .iter()
                    .flat_map(|import| import.names.iter().map(String::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if imported.is_empty() {
            continue;
        }

        for name in scan_call_sites(body) {
            if !imported.contains(name.as_str()) {
                continue;
            }
            let Some(candidates) = artifacts.name_to_entity.get(&name) else {
                continue;
            };
            // Prefer callable targets; skip ambiguous names resolving to
            // many entities (a wrong edge is worse than a missing one).
            let callable: Vec<&(String, EntityKind)> = candidates
                .iter()
                .filter(|(key, _)| key != source_key)
                .collect();
            let target = callable
                .iter()
                .find(|(_, kind)| kind.is_callable())
                .or_else(|| callable.first());
            let Some((target_key, target_kind)) = target else {
                continue;
            };

            let kind = if target_kind.is_callable() {
                EdgeKind::Calls
            } else {
                EdgeKind::References
            };
            let new_edge = edge(scope, source_key, target_key, kind);
            if seen.insert(new_edge.key.clone()) {
                edges.push(new_edge);
            }
            if edges.len() >= config.write_batch {
                written += graph.bulk_upsert_edges(&scope.tenant, &edges).await?;
                edges.clear();
            }
        }
    }

    if !edges.is_empty() {
        written += graph.bulk_upsert_edges(&scope.tenant, &edges).await?;
    }

    tracing::debug!(edges = written, "cross-file call resolution complete");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::languages::RawImport;
    use crate::stores::MemoryGraphStore;
    use crate::types::Tenant;

    #[test]
    fn test_scan_call_sites_basic() {
        let names = scan_call_sites("function f() { validate(x); transform(y); return g(z); }");
        assert_eq!(names, vec!["f", "g", "transform", "validate"]);
    }

    #[test]
    fn test_scan_ignores_keywords_and_numbers() {
        let names = scan_call_sites("if (x) { for (;;) { call1(2); } } return 3(x);");
        assert_eq!(names, vec!["call1"]);
    }

    #[test]
    fn test_scan_new_name() {
        let names = scan_call_sites("const s = new OrderService(db);");
        assert_eq!(names, vec!["OrderService"]);
    }

    #[tokio::test]
    async fn test_resolution_requires_import() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let config = IndexingConfig::default();
        let scope = RunScope::new(Tenant::new("o", "r"), "v1");

        let mut artifacts = ParseArtifacts::default();
        artifacts
            .name_to_entity
            .insert("helper".into(), vec![("helperkey".into(), EntityKind::Function)]);
        artifacts.function_bodies.push((
            "callerkey".into(),
            "src/caller.ts".into(),
            "function caller() { helper(); orphan(); }".into(),
        ));

        // Without an import table entry, nothing resolves.
        let written = resolve_cross_file_calls(&graph, &config, &scope, &artifacts)
            .await
            .expect("resolve");
        assert_eq!(written, 0);

        // With the import, the call edge lands.
        artifacts.file_imports.insert(
            "src/caller.ts".into(),
            vec![RawImport {
                module: "./helper".into(),
                names: vec!["helper".into()],
                line: 1,
            }],
        );
        let written = resolve_cross_file_calls(&graph, &config, &scope, &artifacts)
            .await
            .expect("resolve");
        assert_eq!(written, 1);

        let edges = graph.get_all_edges(&scope.tenant).await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Calls);
        assert_eq!(edges[0].from_key, "callerkey");
        assert_eq!(edges[0].to_key, "helperkey");
    }
}
