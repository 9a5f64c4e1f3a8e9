//! Embedding document builder.
//!
//! Every entity embeds a structured text document rather than raw code:
//! common fields (kind, name, path, signature, documentation, truncated
//! body) plus per-kind emphasis. Classes list their method inventory
//! and extends clause; interfaces emphasize the contract. When a
//! justification exists its business purpose, domain concepts, and
//! feature tag are appended so the vector carries business meaning.

use crate::types::{CodeEntity, EntityKind, Justification};

/// Build the embedding document for one entity.
pub fn build_document(
    entity: &CodeEntity,
    methods: &[String],
    justification: Option<&Justification>,
    body_chars: usize,
) -> String {
    let mut doc = String::new();

    doc.push_str(&format!(
        "{} {} in {}\n",
        entity.kind.as_str(),
        entity.name,
        entity.file_path
    ));
    if !entity.signature.is_empty() {
        doc.push_str(&format!("signature: {}\n", entity.signature));
    }
    if let Some(documentation) = &entity.documentation {
        doc.push_str(&format!("docs: {documentation}\n"));
    }

    match entity.kind {
        EntityKind::Class => {
            if !methods.is_empty() {
                doc.push_str(&format!("methods: {}\n", methods.join(", ")));
            }
        }
        EntityKind::Interface => {
            doc.push_str("contract:\n");
        }
        _ => {}
    }

    let body = truncate_chars(&entity.body, body_chars);
    if !body.is_empty() {
        doc.push_str(&body);
        doc.push('\n');
    }

    if let Some(justification) = justification {
        doc.push_str(&format!("purpose: {}\n", justification.business_purpose));
        if !justification.domain_concepts.is_empty() {
            doc.push_str(&format!(
                "concepts: {}\n",
                justification.domain_concepts.join(", ")
            ));
        }
        doc.push_str(&format!("feature: {}\n", justification.feature_tag));
    }

    doc
}

/// Build the justification-synthesis document (the `synthesis` vector
/// variant): capped at 1500 chars total, body snippet 500 chars, at
/// most 5 semantic triples.
pub fn build_synthesis_document(entity: &CodeEntity, justification: &Justification) -> String {
    let mut doc = String::new();
    doc.push_str(&format!(
        "{} ({}): {}\n",
        entity.name,
        justification.taxonomy.as_str(),
        justification.business_purpose
    ));
    doc.push_str(&format!("feature: {}\n", justification.feature_tag));
    if !justification.domain_concepts.is_empty() {
        doc.push_str(&format!(
            "concepts: {}\n",
            justification.domain_concepts.join(", ")
        ));
    }
    for triple in justification.semantic_triples.iter().take(5) {
        doc.push_str(&format!(
            "{} {} {}\n",
            triple.subject, triple.predicate, triple.object
        ));
    }
    let snippet = truncate_chars(&entity.body, 500);
    if !snippet.is_empty() {
        doc.push_str(&snippet);
    }
    truncate_chars(&doc, 1500)
}

/// Truncate at a char boundary without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfidenceBreakdown, Language, ModelTier, SemanticTriple, Taxonomy};
    use chrono::Utc;

    fn entity(kind: EntityKind, body: &str) -> CodeEntity {
        CodeEntity {
            key: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            kind,
            name: "OrderService".into(),
            file_path: "src/order.ts".into(),
            start_line: 1,
            end_line: 10,
            signature: "class OrderService".into(),
            body: body.into(),
            documentation: Some("Coordinates checkout.".into()),
            language: Language::TypeScript,
            index_version: "v1".into(),
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

    fn justification() -> Justification {
        Justification {
            entity_id: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            taxonomy: Taxonomy::Vertical,
            feature_tag: "checkout".into(),
            business_purpose: "Computes order totals for checkout.".into(),
            domain_concepts: vec!["order".into(), "pricing".into()],
            semantic_triples: vec![SemanticTriple {
                subject: "OrderService".into(),
                predicate: "computes".into(),
                object: "total".into(),
            }],
            confidence: 0.9,
            calibrated_confidence: 0.8,
            confidence_breakdown: ConfidenceBreakdown::default(),
            reasoning: String::new(),
            model_used: "m".into(),
            model_tier: ModelTier::Standard,
            body_hash: "h".into(),
            valid_from: Utc::now(),
            valid_to: crate::types::valid_to_infinity(),
        }
    }

    #[test]
    fn test_class_document_lists_methods() {
        let doc = build_document(
            &entity(EntityKind::Class, "class OrderService {}"),
            &["total".into(), "recalc".into()],
            None,
            2000,
        );
        assert!(doc.contains("class OrderService in src/order.ts"));
        assert!(doc.contains("methods: total, recalc"));
        assert!(doc.contains("docs: Coordinates checkout."));
    }

    #[test]
    fn test_body_truncation() {
        let long_body = "x".repeat(5000);
        let doc = build_document(&entity(EntityKind::Function, &long_body), &[], None, 2000);
        let body_line = doc.lines().find(|l| l.starts_with('x')).expect("body");
        assert_eq!(body_line.chars().count(), 2000);
    }

    #[test]
    fn test_justification_enrichment() {
        let just = justification();
        let doc = build_document(
            &entity(EntityKind::Function, "fn x() {}"),
            &[],
            Some(&just),
            2000,
        );
        assert!(doc.contains("purpose: Computes order totals"));
        assert!(doc.contains("concepts: order, pricing"));
        assert!(doc.contains("feature: checkout"));
    }

    #[test]
    fn test_synthesis_document_caps() {
        let just = justification();
        let long_body = "y".repeat(2000);
        let doc = build_synthesis_document(&entity(EntityKind::Function, &long_body), &just);
        assert!(doc.chars().count() <= 1500);
        assert!(doc.contains("checkout"));
        assert!(doc.contains("OrderService computes total"));
    }
}
