//! Prompt construction and the structured-output schema.
//!
//! Each entity's prompt carries four signal sections (structural,
//! intent, temporal, domain) plus the truncated body, the user context
//! document, and recent commit subjects. Batch mode tightens the body
//! to 10 lines and neighbor lists to 5 entries.

use schemars::JsonSchema;
use serde::Deserialize;

use crate::types::{DomainOntology, ModelTier, OntologyTier, SemanticTriple, Taxonomy};

use super::batch::{BATCH_BODY_LINES, BATCH_NEIGHBOR_CAP};
use super::context::EntityContext;

/// Cap on appended context document + git history.
const CONTEXT_APPENDIX_CAP: usize = 3000;

/// One justification as returned by the model.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LlmJustification {
    /// Key of the entity being justified (echoed back in batch mode).
    pub entity_key: String,
    /// VERTICAL, HORIZONTAL, or UTILITY.
    pub taxonomy: String,
    /// Feature this entity belongs to.
    pub feature_tag: String,
    /// One-paragraph business purpose.
    pub business_purpose: String,
    /// Domain concepts involved.
    #[serde(default)]
    pub domain_concepts: Vec<String>,
    /// Subject-predicate-object triples.
    #[serde(default)]
    pub semantic_triples: Vec<LlmTriple>,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    /// Short reasoning summary.
    #[serde(default)]
    pub reasoning: String,
}

/// A triple as returned by the model.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LlmTriple {
    /// Subject concept.
    pub subject: String,
    /// Relation.
    pub predicate: String,
    /// Object concept.
    pub object: String,
}

impl LlmTriple {
    /// Convert to the domain type.
    pub fn into_domain(self) -> SemanticTriple {
        SemanticTriple {
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
        }
    }
}

/// Batch response envelope.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LlmBatchResponse {
    /// One justification per requested entity.
    pub justifications: Vec<LlmJustification>,
}

/// Parse a taxonomy string leniently.
pub fn parse_taxonomy(value: &str) -> Taxonomy {
    Taxonomy::from_str_lossy(value.trim().to_uppercase().as_str())
}

/// JSON schema for the batch response.
pub fn batch_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(LlmBatchResponse))
        .unwrap_or_else(|_| serde_json::json!({}))
}

/// System prompt for justification calls.
pub const SYSTEM_PROMPT: &str = "You are a code analyst producing business justifications. \
For each entity, classify its business role (VERTICAL = core product feature, \
HORIZONTAL = shared business logic, UTILITY = infrastructure), name the feature it \
serves, and explain its purpose in business terms. Respond with the provided schema.";

/// Build the prompt section for one entity.
pub fn entity_section(
    context: &EntityContext,
    ontology: Option<&DomainOntology>,
    context_document: Option<&str>,
    batch_mode: bool,
) -> String {
    let entity = &context.entity;
    let neighbor_cap = if batch_mode { BATCH_NEIGHBOR_CAP } else { usize::MAX };
    let mut section = String::new();

    section.push_str(&format!(
        "ENTITY {} | {} {} in {} (lines {}-{})\n",
        entity.key,
        entity.kind.as_str(),
        entity.name,
        entity.file_path,
        entity.start_line,
        entity.end_line
    ));

    // STRUCTURAL SIGNAL
    section.push_str("STRUCTURAL SIGNAL: ");
    section.push_str(&format!(
        "callers=[{}] callees=[{}] centrality={:.2} fan_in={} fan_out={}",
        join_capped(&context.caller_names, neighbor_cap),
        join_capped(
            &context
                .callees
                .iter()
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>(),
            neighbor_cap
        ),
        context.centrality,
        entity.fan_in.unwrap_or(0),
        entity.fan_out.unwrap_or(0),
    ));
    if let Some(label) = &context.community_label {
        section.push_str(&format!(" community={label}"));
    }
    section.push('\n');

    // INTENT SIGNAL
    section.push_str("INTENT SIGNAL: ");
    if let Some(documentation) = &entity.documentation {
        section.push_str(&format!("doc=\"{}\" ", first_line(documentation)));
    }
    if !context.commit_subjects.is_empty() {
        section.push_str(&format!(
            "commits=[{}] ",
            join_capped(&context.commit_subjects, 10)
        ));
    }
    section.push_str(&format!("name_hint={}\n", naming_hint(&entity.name)));

    // TEMPORAL SIGNAL
    section.push_str(&format!(
        "TEMPORAL SIGNAL: change_frequency={} stability={}\n",
        context.commit_subjects.len(),
        if context.commit_subjects.len() > 5 {
            "volatile"
        } else {
            "stable"
        }
    ));

    // DOMAIN SIGNAL
    if let Some(ontology) = ontology {
        let domain_terms: Vec<String> = ontology
            .terms
            .iter()
            .filter(|t| t.tier == OntologyTier::Domain)
            .take(15)
            .map(|t| t.term.clone())
            .collect();
        if !domain_terms.is_empty() {
            section.push_str(&format!(
                "DOMAIN SIGNAL: terms=[{}]\n",
                domain_terms.join(", ")
            ));
        }
    }

    if !context.imports.is_empty() {
        section.push_str(&format!(
            "imports: {}\n",
            join_capped(&context.imports, neighbor_cap)
        ));
    }
    if !context.siblings.is_empty() {
        section.push_str(&format!(
            "siblings: {}\n",
            join_capped(&context.siblings, neighbor_cap)
        ));
    }

    // Callee justifications enrich the bottom-up pass.
    for justification in context.callee_justifications.iter().take(neighbor_cap) {
        section.push_str(&format!(
            "callee {}: {} ({})\n",
            justification.entity_id,
            first_line(&justification.business_purpose),
            justification.feature_tag
        ));
    }

    // Body, truncated by tier budget or batch mode.
    let body = if batch_mode {
        entity
            .body
            .lines()
            .take(BATCH_BODY_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        truncate_chars(&entity.body, context.tier.body_budget_chars().max(1))
    };
    if !body.is_empty() {
        section.push_str("```\n");
        section.push_str(&body);
        section.push_str("\n```\n");
    }

    if let Some(document) = context_document {
        section.push_str(&format!(
            "CONTEXT DOCUMENT:\n{}\n",
            truncate_chars(document, CONTEXT_APPENDIX_CAP)
        ));
    }

    section
}

/// Build the full prompt for a batch of entities.
pub fn batch_prompt(
    contexts: &[&EntityContext],
    ontology: Option<&DomainOntology>,
    context_document: Option<&str>,
) -> String {
    let batch_mode = contexts.len() > 1;
    let mut prompt = format!(
        "Justify the following {} entit{}.\n\n",
        contexts.len(),
        if contexts.len() == 1 { "y" } else { "ies" }
    );
    for (i, context) in contexts.iter().enumerate() {
        // Only the first entity carries the context document appendix;
        // repeating it per entity would blow the input budget.
        let document = (i == 0).then_some(context_document).flatten();
        prompt.push_str(&entity_section(context, ontology, document, batch_mode));
        prompt.push('\n');
    }
    prompt
}

/// Rough prompt size for the bin packer, in characters.
pub fn estimated_prompt_chars(context: &EntityContext) -> usize {
    let body_lines: usize = context
        .entity
        .body
        .lines()
        .take(BATCH_BODY_LINES)
        .map(|l| l.len() + 1)
        .sum();
    200 + body_lines
        + context.caller_names.iter().take(BATCH_NEIGHBOR_CAP).map(|n| n.len() + 2).sum::<usize>()
        + context.siblings.iter().take(BATCH_NEIGHBOR_CAP).map(|n| n.len() + 2).sum::<usize>()
        + context
            .callee_justifications
            .iter()
            .take(BATCH_NEIGHBOR_CAP)
            .map(|j| j.business_purpose.len().min(120) + 30)
            .sum::<usize>()
}

fn join_capped(items: &[String], cap: usize) -> String {
    let shown: Vec<&str> = items.iter().take(cap).map(String::as_str).collect();
    let mut joined = shown.join(", ");
    if items.len() > cap {
        joined.push_str(&format!(", +{} more", items.len() - cap));
    }
    joined
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Derive a naming hint: verb-object reading of the identifier.
fn naming_hint(name: &str) -> String {
    let terms = crate::ontology::split_identifier(name);
    if terms.is_empty() {
        name.to_lowercase()
    } else {
        terms.join(" ")
    }
}

/// Whether a tier routes to the LLM at all.
pub fn tier_uses_llm(tier: ModelTier) -> bool {
    !matches!(tier, ModelTier::Heuristic | ModelTier::Fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodeEntity, EntityKind, Language};

    fn context(name: &str, callers: usize) -> EntityContext {
        EntityContext {
            entity: CodeEntity {
                key: "k1".into(),
                org_id: "o".into(),
                repo_id: "r".into(),
                kind: EntityKind::Function,
                name: name.into(),
                file_path: "src/pricing.ts".into(),
                start_line: 1,
                end_line: 30,
                signature: format!("function {name}()"),
                body: (0..30)
                    .map(|i| format!("  line{i}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                documentation: Some("Computes the order total.".into()),
                language: Language::TypeScript,
                index_version: "v1".into(),
                fan_in: Some(4),
                fan_out: Some(2),
                risk_level: None,
                community_id: Some(1),
                community_label: Some("pricing".into()),
                pagerank: None,
                pagerank_percentile: Some(0.8),
                original_kind: None,
                quarantine_error: None,
            },
            caller_names: (0..callers).map(|i| format!("caller{i}")).collect(),
            callees: vec![("tax".into(), "k2".into())],
            siblings: vec!["applyDiscount".into()],
            imports: vec!["stripe".into()],
            centrality: 0.8,
            community_label: Some("pricing".into()),
            callee_justifications: vec![],
            tier: ModelTier::Standard,
            commit_subjects: vec!["fix tax rounding".into()],
        }
    }

    #[test]
    fn test_sections_present() {
        let ctx = context("computeTotal", 2);
        let section = entity_section(&ctx, None, None, false);
        assert!(section.contains("STRUCTURAL SIGNAL:"));
        assert!(section.contains("INTENT SIGNAL:"));
        assert!(section.contains("TEMPORAL SIGNAL:"));
        assert!(section.contains("name_hint=compute total"));
        assert!(section.contains("fix tax rounding"));
    }

    #[test]
    fn test_batch_mode_truncates_body() {
        let ctx = context("computeTotal", 2);
        let section = entity_section(&ctx, None, None, true);
        assert!(section.contains("line9"));
        assert!(!section.contains("line10"), "batch body capped at 10 lines");
    }

    #[test]
    fn test_neighbor_capping_in_batch_mode() {
        let ctx = context("computeTotal", 9);
        let section = entity_section(&ctx, None, None, true);
        assert!(section.contains("+4 more"), "9 callers capped at 5: {section}");
    }

    #[test]
    fn test_context_document_only_on_first_entity() {
        let a = context("first", 1);
        let b = context("second", 1);
        let prompt = batch_prompt(&[&a, &b], None, Some("Ordering is our core flow."));
        assert_eq!(prompt.matches("CONTEXT DOCUMENT:").count(), 1);
    }

    #[test]
    fn test_schema_is_nonempty() {
        let schema = batch_schema();
        assert!(schema.get("$schema").is_some() || schema.get("title").is_some());
    }

    #[test]
    fn test_parse_taxonomy_lenient() {
        assert_eq!(parse_taxonomy("vertical"), Taxonomy::Vertical);
        assert_eq!(parse_taxonomy(" HORIZONTAL "), Taxonomy::Horizontal);
        assert_eq!(parse_taxonomy("junk"), Taxonomy::Utility);
    }
}
