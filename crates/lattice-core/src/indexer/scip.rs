//! Stage 2: precise-indexer invocation and output decoding.
//!
//! The external indexer emits a SCIP-style protobuf index. Decoding is
//! two-pass:
//!
//! 1. Build `file -> sorted (start_line, entity_key)` from definition
//!    occurrences, materializing entities (bodies filled from the
//!    workspace files).
//! 2. For each reference occurrence, binary-search the enclosing entity
//!    in the source file and emit a `calls` edge when the target is a
//!    function/method, `references` otherwise.
//!
//! The top-level message is scanned field by field so a truncated or
//! corrupt document yields a partial result, never a failed stage; all
//! field reads are bound-checked by prost.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use prost::encoding::{decode_key, decode_varint, WireType};
use prost::Message;

use crate::config::IndexingConfig;
use crate::error::{LatticeError, LatticeResult};
use crate::keys;
use crate::types::{CodeEdge, CodeEntity, EdgeKind, EntityKind, Language};

use super::{edge, RunScope};

/// SymbolRole bit marking a definition occurrence.
const ROLE_DEFINITION: i32 = 0x1;

// ---------------------------------------------------------------------------
// Wire messages (SCIP subset)
// ---------------------------------------------------------------------------

/// One indexed source file.
#[derive(Clone, PartialEq, Message)]
pub struct WireDocument {
    /// Path relative to the index root.
    #[prost(string, tag = "1")]
    pub relative_path: String,
    /// Symbol occurrences within the file.
    #[prost(message, repeated, tag = "2")]
    pub occurrences: Vec<WireOccurrence>,
    /// Symbol metadata.
    #[prost(message, repeated, tag = "3")]
    pub symbols: Vec<WireSymbolInformation>,
    /// Language identifier string.
    #[prost(string, tag = "4")]
    pub language: String,
}

/// One occurrence of a symbol.
#[derive(Clone, PartialEq, Message)]
pub struct WireOccurrence {
    /// `[start_line, start_char, end_line, end_char]` (or 3 elements when
    /// the occurrence is single-line), zero-based.
    #[prost(int32, repeated, tag = "1")]
    pub range: Vec<i32>,
    /// Symbol identifier.
    #[prost(string, tag = "2")]
    pub symbol: String,
    /// Bitset of symbol roles.
    #[prost(int32, tag = "3")]
    pub symbol_roles: i32,
}

/// Metadata for one symbol.
#[derive(Clone, PartialEq, Message)]
pub struct WireSymbolInformation {
    /// Symbol identifier.
    #[prost(string, tag = "1")]
    pub symbol: String,
    /// Markdown documentation blocks.
    #[prost(string, repeated, tag = "3")]
    pub documentation: Vec<String>,
    /// Display name, when the indexer provides one.
    #[prost(string, tag = "6")]
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// External tool invocation
// ---------------------------------------------------------------------------

/// Run an external precise indexer in `workspace` and return the bytes
/// of the index it produced, honoring the wall-clock budget and output
/// cap.
pub async fn invoke_indexer(
    config: &IndexingConfig,
    workspace: &Path,
    command: &str,
    args: &[String],
) -> LatticeResult<Vec<u8>> {
    let output_path = workspace.join("index.scip");
    let mut child = tokio::process::Command::new(command)
        .args(args)
        .current_dir(workspace)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LatticeError::ExternalTool {
            tool: command.to_string(),
            message: format!("spawn failed: {e}"),
        })?;

    let budget = Duration::from_secs(config.precise_timeout_secs);
    let status = match tokio::time::timeout(budget, child.wait()).await {
        Ok(status) => status.map_err(|e| LatticeError::ExternalTool {
            tool: command.to_string(),
            message: format!("wait failed: {e}"),
        })?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(LatticeError::ExternalTool {
                tool: command.to_string(),
                message: format!("timed out after {}s", config.precise_timeout_secs),
            });
        }
    };

    if !status.success() {
        return Err(LatticeError::ExternalTool {
            tool: command.to_string(),
            message: format!("exit status {status}"),
        });
    }

    let metadata = std::fs::metadata(&output_path).map_err(|e| LatticeError::ExternalTool {
        tool: command.to_string(),
        message: format!("no index output: {e}"),
    })?;
    if metadata.len() > config.precise_max_output_bytes {
        return Err(LatticeError::ExternalTool {
            tool: command.to_string(),
            message: format!(
                "output {} bytes exceeds cap {}",
                metadata.len(),
                config.precise_max_output_bytes
            ),
        });
    }

    Ok(std::fs::read(&output_path)?)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Result of decoding a precise index.
#[derive(Debug, Default)]
pub struct DecodedIndex {
    /// Entities materialized from definitions (plus file entities).
    pub entities: Vec<CodeEntity>,
    /// `contains`, `calls`, and `references` edges.
    pub edges: Vec<CodeEdge>,
    /// Files covered by the index (skipped by fallback parsing).
    pub covered_files: HashSet<String>,
    /// Documents that failed to decode (partial result).
    pub failed_documents: usize,
}

/// Scan the top-level index message, decoding documents one at a time.
///
/// Unknown fields are skipped; a document that fails to decode is
/// counted and dropped rather than failing the stage.
fn scan_documents(mut buf: &[u8]) -> (Vec<WireDocument>, usize) {
    let mut documents = Vec::new();
    let mut failed = 0;
    while !buf.is_empty() {
        let Ok((tag, wire_type)) = decode_key(&mut buf) else {
            // The remainder is unreadable; keep what we have.
            failed += 1;
            break;
        };
        if tag == 2 && wire_type == WireType::LengthDelimited {
            let Ok(len) = decode_varint(&mut buf) else {
                failed += 1;
                break;
            };
            let len = len as usize;
            if len > buf.len() {
                // Truncated document at the tail.
                failed += 1;
                break;
            }
            let (document_bytes, rest) = buf.split_at(len);
            buf = rest;
            match WireDocument::decode(document_bytes) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable document");
                    failed += 1;
                }
            }
        } else if prost::encoding::skip_field(
            wire_type,
            tag,
            &mut buf,
            prost::encoding::DecodeContext::default(),
        )
        .is_err()
        {
            failed += 1;
            break;
        }
    }
    (documents, failed)
}

/// Decode index bytes into entities and edges.
///
/// `file_texts` maps workspace paths to their decoded text; bodies and
/// line spans are filled from it.
pub fn decode_index(
    scope: &RunScope,
    bytes: &[u8],
    file_texts: &HashMap<String, String>,
) -> DecodedIndex {
    let (documents, failed_documents) = scan_documents(bytes);
    let mut result = DecodedIndex {
        failed_documents,
        ..DecodedIndex::default()
    };

    // symbol -> (entity key, kind), repo-wide.
    let mut symbol_table: HashMap<String, (String, EntityKind)> = HashMap::new();
    // file -> sorted (start_line, entity key).
    let mut definitions_by_file: HashMap<String, Vec<(u32, String)>> = HashMap::new();

    // Pass 1: definitions.
    for document in &documents {
        let file_path = document.relative_path.clone();
        result.covered_files.insert(file_path.clone());
        let language = language_from_document(document);
        let file_key = keys::file_entity_key(&scope.tenant.repo_id, &file_path);
        result
            .entities
            .push(super::file_entity(scope, &file_path, language, &file_key));

        let docs_by_symbol: HashMap<&str, &WireSymbolInformation> = document
            .symbols
            .iter()
            .map(|s| (s.symbol.as_str(), s))
            .collect();

        for occurrence in &document.occurrences {
            if (occurrence.symbol_roles & ROLE_DEFINITION) == 0 {
                continue;
            }
            let Some((start_line, end_line)) = occurrence_lines(&occurrence.range) else {
                continue;
            };
            let Some((name, kind)) = parse_symbol(&occurrence.symbol) else {
                continue;
            };

            let body = file_texts
                .get(&file_path)
                .map(|text| slice_lines(text, start_line, end_line))
                .unwrap_or_default();
            let signature = body.lines().next().unwrap_or(&name).trim().to_string();
            let key = keys::entity_key(
                &scope.tenant.repo_id,
                &file_path,
                kind,
                &name,
                &signature,
            );

            let documentation = docs_by_symbol
                .get(occurrence.symbol.as_str())
                .and_then(|s| s.documentation.first())
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());

            let mut entity = CodeEntity {
                key: key.clone(),
                org_id: scope.tenant.org_id.clone(),
                repo_id: scope.tenant.repo_id.clone(),
                kind,
                name,
                file_path: file_path.clone(),
                start_line,
                end_line,
                signature,
                body,
                documentation,
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

            symbol_table.insert(occurrence.symbol.clone(), (key.clone(), kind));
            definitions_by_file
                .entry(file_path.clone())
                .or_default()
                .push((start_line, key.clone()));
            result.edges.push(edge(scope, &file_key, &key, EdgeKind::Contains));
            result.entities.push(entity);
        }
    }

    for definitions in definitions_by_file.values_mut() {
        definitions.sort();
    }

    // Pass 2: references. Dedup with a hash set over edge keys.
    let mut seen_edges: HashSet<String> = HashSet::new();
    for document in &documents {
        let Some(definitions) = definitions_by_file.get(&document.relative_path) else {
            continue;
        };
        for occurrence in &document.occurrences {
            if (occurrence.symbol_roles & ROLE_DEFINITION) != 0 {
                continue;
            }
            let Some((target_key, target_kind)) = symbol_table.get(&occurrence.symbol) else {
                continue;
            };
            let Some((line, _)) = occurrence_lines(&occurrence.range) else {
                continue;
            };
            // Binary-search the last definition starting at or before
            // the reference line: the enclosing entity.
            let idx = definitions.partition_point(|(start, _)| *start <= line);
            if idx == 0 {
                continue;
            }
            let (_, source_key) = &definitions[idx - 1];
            if source_key == target_key {
                continue;
            }
            let kind = if target_kind.is_callable() {
                EdgeKind::Calls
            } else {
                EdgeKind::References
            };
            let new_edge = edge(scope, source_key, target_key, kind);
            if seen_edges.insert(new_edge.key.clone()) {
                result.edges.push(new_edge);
            }
        }
    }

    tracing::info!(
        documents = documents.len(),
        failed = result.failed_documents,
        entities = result.entities.len(),
        edges = result.edges.len(),
        "precise index decoded"
    );

    result
}

fn language_from_document(document: &WireDocument) -> Language {
    match document.language.to_lowercase().as_str() {
        "python" => Language::Python,
        "typescript" => Language::TypeScript,
        "javascript" => Language::JavaScript,
        "rust" => Language::Rust,
        "go" => Language::Go,
        "java" => Language::Java,
        "c" => Language::C,
        "cpp" | "c++" => Language::Cpp,
        "csharp" | "c#" => Language::CSharp,
        "ruby" => Language::Ruby,
        _ => Language::from_path(&document.relative_path),
    }
}

/// Extract `(start_line, end_line)` (1-indexed) from an occurrence range.
fn occurrence_lines(range: &[i32]) -> Option<(u32, u32)> {
    match range.len() {
        3 => {
            let line = u32::try_from(range[0]).ok()? + 1;
            Some((line, line))
        }
        4 => {
            let start = u32::try_from(range[0]).ok()? + 1;
            let end = u32::try_from(range[2]).ok()? + 1;
            (end >= start).then_some((start, end))
        }
        _ => None,
    }
}

/// Parse a SCIP-style symbol string into `(name, kind)` from its final
/// descriptor: `foo().` is a function/method, `Type#` a class, `term.`
/// a variable, `module/` a module.
fn parse_symbol(symbol: &str) -> Option<(String, EntityKind)> {
    let descriptor = symbol.rsplit(['/', ' ']).next()?.trim();
    if descriptor.is_empty() {
        return None;
    }
    if let Some(name) = descriptor.strip_suffix("().") {
        let kind = if name.contains('#') {
            EntityKind::Method
        } else {
            EntityKind::Function
        };
        let name = name.rsplit('#').next().unwrap_or(name);
        return Some((name.to_string(), kind));
    }
    if let Some(name) = descriptor.strip_suffix('#') {
        return Some((name.to_string(), EntityKind::Class));
    }
    if let Some(name) = descriptor.strip_suffix('.') {
        return Some((name.to_string(), EntityKind::Variable));
    }
    None
}

fn slice_lines(text: &str, start_line: u32, end_line: u32) -> String {
    text.lines()
        .skip(start_line.saturating_sub(1) as usize)
        .take((end_line.saturating_sub(start_line) + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}
