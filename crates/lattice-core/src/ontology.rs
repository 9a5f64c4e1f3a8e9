//! Ontology discovery: repo-wide vocabulary extraction.
//!
//! Raw terms come from splitting PascalCase/camelCase/snake_case entity
//! names, frequency-ranked and filtered against a stop-set of generic
//! programming terms. Manifest facts (name, description, stack) are
//! harvested and persisted on the repo record. The LLM then classifies
//! terms into tiers, defines them, and maps domain terms onto
//! architectural ones; on LLM failure the stage degrades gracefully to
//! the raw terms.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::LlmConfig;
use crate::error::LatticeResult;
use crate::stores::{GraphStore, LlmProvider, ObjectRequest, RelationalStore};
use crate::types::{
    DomainOntology, ManifestData, OntologyTerm, OntologyTier, Tenant,
};

/// Generic programming terms that carry no domain meaning.
const STOP_TERMS: &[&str] = &[
    "get", "set", "new", "init", "create", "update", "delete", "find", "list", "handle", "handler",
    "process", "run", "main", "test", "tests", "mock", "util", "utils", "helper", "helpers",
    "impl", "default", "build", "builder", "make", "from", "into", "with", "data", "info", "item",
    "items", "value", "values", "result", "results", "error", "errors", "type", "types", "index",
    "file", "files", "name", "names", "string", "number", "object", "array", "config", "options",
    "context", "state", "props", "callback", "async", "await", "public", "private", "static",
    "const", "this", "self", "that", "null", "none", "true", "false", "void", "base", "common",
    "core", "shared", "internal", "temp", "tmp",
];

/// Cap on user-provided context document length.
const CONTEXT_DOC_CAP: usize = 3000;

/// Split an identifier into lowercase terms on case and separator
/// boundaries.
pub fn split_identifier(name: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' || c == '.' || c == ' ' {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms.retain(|t| t.len() > 2);
    terms
}

/// Extract frequency-ranked raw terms from entity names, stop-set
/// filtered, most frequent first.
pub fn extract_raw_terms(names: &[String], limit: usize) -> Vec<(String, u32)> {
    let mut frequency: BTreeMap<String, u32> = BTreeMap::new();
    for name in names {
        for term in split_identifier(name) {
            if STOP_TERMS.contains(&term.as_str()) {
                continue;
            }
            *frequency.entry(term).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, u32)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

/// Read manifest facts out of the workspace file set.
pub fn read_manifest(files: &[(String, String)]) -> ManifestData {
    let mut manifest = ManifestData::default();
    for (path, content) in files {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name {
            "package.json" => {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(content) {
                    if manifest.name.is_none() {
                        manifest.name =
                            json["name"].as_str().map(String::from);
                    }
                    if manifest.description.is_none() {
                        manifest.description = json["description"].as_str().map(String::from);
                    }
                    if let Some(deps) = json["dependencies"].as_object() {
                        for dep in deps.keys().take(20) {
                            manifest.tech_stack.push(dep.clone());
                        }
                    }
                }
            }
            "Cargo.toml" | "pyproject.toml" => {
                for line in content.lines() {
                    let line = line.trim();
                    if manifest.name.is_none() {
                        if let Some(value) = line.strip_prefix("name = ") {
                            manifest.name = Some(value.trim_matches('"').to_string());
                        }
                    }
                    if manifest.description.is_none() {
                        if let Some(value) = line.strip_prefix("description = ") {
                            manifest.description = Some(value.trim_matches('"').to_string());
                        }
                    }
                }
            }
            "go.mod" => {
                if manifest.name.is_none() {
                    manifest.name = content
                        .lines()
                        .find_map(|l| l.strip_prefix("module "))
                        .map(|m| m.trim().to_string());
                }
            }
            _ => {}
        }
    }
    manifest.tech_stack.sort();
    manifest.tech_stack.dedup();
    manifest
}

#[derive(Debug, Deserialize)]
struct LlmOntology {
    #[serde(default)]
    terms: Vec<LlmTerm>,
    #[serde(default)]
    aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    domain_architecture_relations: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LlmTerm {
    term: String,
    #[serde(default)]
    definition: String,
    #[serde(default)]
    tier: String,
}

/// JSON schema for the structured ontology output.
fn ontology_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "terms": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "term": { "type": "string" },
                        "definition": { "type": "string" },
                        "tier": { "enum": ["domain", "architectural", "framework"] }
                    },
                    "required": ["term", "definition", "tier"]
                }
            },
            "aliases": {
                "type": "object",
                "additionalProperties": { "type": "array", "items": { "type": "string" } }
            },
            "domain_architecture_relations": {
                "type": "object",
                "additionalProperties": { "type": "array", "items": { "type": "string" } }
            }
        },
        "required": ["terms"]
    })
}

/// Outcome of ontology discovery.
#[derive(Debug, Clone, Default)]
pub struct OntologyOutcome {
    /// Terms stored.
    pub terms: usize,
    /// Whether the LLM enriched the ontology (false = degraded).
    pub llm_enriched: bool,
}

/// Run ontology discovery and store the result.
pub async fn run_ontology_discovery(
    graph: &Arc<dyn GraphStore>,
    relational: &Arc<dyn RelationalStore>,
    llm: &Arc<dyn LlmProvider>,
    llm_config: &LlmConfig,
    tenant: &Tenant,
    manifest_files: &[(String, String)],
) -> LatticeResult<OntologyOutcome> {
    let entities = graph.get_all_entities(tenant).await?;
    let names: Vec<String> = entities
        .iter()
        .filter(|e| e.kind.is_semantic())
        .map(|e| e.name.clone())
        .collect();
    let raw_terms = extract_raw_terms(&names, 100);

    let manifest = read_manifest(manifest_files);
    relational.update_repo_manifest(tenant, &manifest).await?;

    let context_docs: Vec<String> = relational
        .get_repo(tenant)
        .await?
        .map(|repo| {
            repo.context_documents
                .iter()
                .map(|doc| doc.chars().take(CONTEXT_DOC_CAP).collect())
                .collect()
        })
        .unwrap_or_default();

    let mut prompt = String::new();
    prompt.push_str("Classify this repository's vocabulary into tiers and define each term.\n\n");
    if let Some(name) = &manifest.name {
        prompt.push_str(&format!("Project: {name}\n"));
    }
    if let Some(description) = &manifest.description {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    if !manifest.tech_stack.is_empty() {
        prompt.push_str(&format!("Stack: {}\n", manifest.tech_stack.join(", ")));
    }
    for doc in &context_docs {
        prompt.push_str(&format!("\nContext:\n{doc}\n"));
    }
    prompt.push_str("\nTerms by frequency:\n");
    for (term, count) in &raw_terms {
        prompt.push_str(&format!("- {term} ({count})\n"));
    }

    let request = ObjectRequest {
        model: llm_config.standard.model.clone(),
        schema: ontology_schema(),
        prompt,
        system: Some(
            "You build domain ontologies from code vocabularies. Respond with the schema."
                .into(),
        ),
        temperature: 0.2,
    };

    let ontology = match llm.generate_object(&request).await {
        Ok(response) => match serde_json::from_value::<LlmOntology>(response.value) {
            Ok(parsed) => {
                let terms = parsed
                    .terms
                    .into_iter()
                    .map(|t| OntologyTerm {
                        frequency: raw_terms
                            .iter()
                            .find(|(raw, _)| *raw == t.term)
                            .map(|(_, count)| *count)
                            .unwrap_or(0),
                        term: t.term,
                        definition: t.definition,
                        tier: match t.tier.as_str() {
                            "architectural" => OntologyTier::Architectural,
                            "framework" => OntologyTier::Framework,
                            _ => OntologyTier::Domain,
                        },
                    })
                    .collect();
                DomainOntology {
                    org_id: tenant.org_id.clone(),
                    repo_id: tenant.repo_id.clone(),
                    terms,
                    aliases: parsed.aliases,
                    domain_architecture_relations: parsed.domain_architecture_relations,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "ontology response malformed, using raw terms");
                raw_ontology(tenant, &raw_terms)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "ontology LLM call failed, using raw terms");
            raw_ontology(tenant, &raw_terms)
        }
    };

    let llm_enriched = ontology.terms.iter().any(|t| !t.definition.is_empty());
    let outcome = OntologyOutcome {
        terms: ontology.terms.len(),
        llm_enriched,
    };
    graph.upsert_domain_ontology(tenant, &ontology).await?;

    tracing::info!(
        tenant = %tenant,
        terms = outcome.terms,
        enriched = outcome.llm_enriched,
        "ontology discovery complete"
    );

    Ok(outcome)
}

/// Degraded ontology: raw terms, no definitions.
fn raw_ontology(tenant: &Tenant, raw_terms: &[(String, u32)]) -> DomainOntology {
    DomainOntology {
        org_id: tenant.org_id.clone(),
        repo_id: tenant.repo_id.clone(),
        terms: raw_terms
            .iter()
            .map(|(term, frequency)| OntologyTerm {
                term: term.clone(),
                definition: String::new(),
                tier: OntologyTier::Domain,
                frequency: *frequency,
            })
            .collect(),
        aliases: BTreeMap::new(),
        domain_architecture_relations: BTreeMap::new(),
    }
}

/// Refinement: append up to `cap` new concepts seen at least
/// `min_occurrences` times and not already present. The ontology grows
/// monotonically within a run.
pub async fn refine_ontology(
    graph: &Arc<dyn GraphStore>,
    tenant: &Tenant,
    new_concepts: &BTreeMap<String, u32>,
    min_occurrences: u32,
    cap: usize,
) -> LatticeResult<usize> {
    let mut ontology = graph
        .get_domain_ontology(tenant)
        .await?
        .unwrap_or_else(|| DomainOntology {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            ..DomainOntology::default()
        });

    let existing: std::collections::HashSet<&str> =
        ontology.terms.iter().map(|t| t.term.as_str()).collect();
    let mut added = 0;
    let mut candidates: Vec<(&String, &u32)> = new_concepts
        .iter()
        .filter(|(term, count)| **count >= min_occurrences && !existing.contains(term.as_str()))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (term, count) in candidates.into_iter().take(cap) {
        ontology.terms.push(OntologyTerm {
            term: term.clone(),
            definition: String::new(),
            tier: OntologyTier::Domain,
            frequency: *count,
        });
        added += 1;
    }

    if added > 0 {
        graph.upsert_domain_ontology(tenant, &ontology).await?;
        tracing::debug!(added, "ontology refined");
    }
    Ok(added)
}
