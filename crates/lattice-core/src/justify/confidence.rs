//! Calibrated confidence.
//!
//! The stored confidence is computed from observable signals, not the
//! model's self-report: structural evidence contributes up to 0.5,
//! intent evidence up to 0.3, and the tier-weighted LLM self-report up
//! to 0.2. The per-dimension breakdown is stored alongside the
//! composite.

use crate::types::{CodeEntity, ConfidenceBreakdown, ModelTier};

use super::context::EntityContext;

/// Compute the calibrated confidence for one justified entity.
pub fn calibrate(
    context: &EntityContext,
    llm_confidence: f64,
    tier: ModelTier,
) -> ConfidenceBreakdown {
    ConfidenceBreakdown {
        structural: structural_score(context),
        intent: intent_score(&context.entity),
        llm: llm_score(llm_confidence, tier),
    }
}

/// Structural dimension, 0.0 - 0.5: callers, callees, centrality.
fn structural_score(context: &EntityContext) -> f64 {
    let caller_component = (context.caller_names.len() as f64 / 10.0).min(1.0) * 0.2;
    let callee_component = (context.callees.len() as f64 / 10.0).min(1.0) * 0.1;
    let centrality_component = context.centrality.clamp(0.0, 1.0) * 0.2;
    caller_component + callee_component + centrality_component
}

/// Intent dimension, 0.0 - 0.3: tests, docstring, descriptive name.
fn intent_score(entity: &CodeEntity) -> f64 {
    let mut score: f64 = 0.0;
    if entity.documentation.is_some() {
        score += 0.15;
    }
    // A descriptive name splits into at least two meaningful terms.
    if crate::ontology::split_identifier(&entity.name).len() >= 2 {
        score += 0.1;
    }
    if entity.file_path.contains("test") || entity.name.to_lowercase().contains("test") {
        score += 0.05;
    }
    score.min(0.3)
}

/// LLM dimension, 0.0 - 0.2: self-report weighted by tier reliability.
fn llm_score(llm_confidence: f64, tier: ModelTier) -> f64 {
    llm_confidence.clamp(0.0, 1.0) * tier.confidence_weight() * 0.2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, Language};

    fn context(callers: usize, callees: usize, centrality: f64, documented: bool) -> EntityContext {
        EntityContext {
            entity: CodeEntity {
                key: "k".into(),
                org_id: "o".into(),
                repo_id: "r".into(),
                kind: EntityKind::Function,
                name: "computeOrderTotal".into(),
                file_path: "src/pricing.ts".into(),
                start_line: 1,
                end_line: 10,
                signature: String::new(),
                body: String::new(),
                documentation: documented.then(|| "docs".to_string()),
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
            },
            caller_names: (0..callers).map(|i| format!("c{i}")).collect(),
            callees: (0..callees).map(|i| (format!("e{i}"), format!("k{i}"))).collect(),
            siblings: vec![],
            imports: vec![],
            centrality,
            community_label: None,
            callee_justifications: vec![],
            tier: ModelTier::Standard,
            commit_subjects: vec![],
        }
    }

    #[test]
    fn test_dimensions_respect_caps() {
        // Saturate everything.
        let ctx = context(50, 50, 1.0, true);
        let breakdown = calibrate(&ctx, 1.0, ModelTier::Premium);
        assert!(breakdown.structural <= 0.5 + 1e-9);
        assert!(breakdown.intent <= 0.3 + 1e-9);
        assert!(breakdown.llm <= 0.2 + 1e-9);
        assert!(breakdown.total() <= 1.0 + 1e-9);
    }

    #[test]
    fn test_isolated_undocumented_entity_scores_low() {
        let ctx = context(0, 0, 0.0, false);
        let breakdown = calibrate(&ctx, 0.9, ModelTier::Fast);
        assert!(breakdown.structural < 1e-9);
        // Descriptive name still earns intent credit.
        assert!(breakdown.intent > 0.0);
        assert!(breakdown.total() < 0.35);
    }

    #[test]
    fn test_tier_weights_llm_dimension() {
        let ctx = context(5, 5, 0.5, true);
        let premium = calibrate(&ctx, 0.8, ModelTier::Premium);
        let fast = calibrate(&ctx, 0.8, ModelTier::Fast);
        assert!(premium.llm > fast.llm);

        let fallback = calibrate(&ctx, 0.8, ModelTier::Fallback);
        assert_eq!(fallback.llm, 0.0, "fallback self-report is worthless");
    }

    #[test]
    fn test_out_of_range_llm_confidence_is_clamped() {
        let ctx = context(1, 1, 0.5, false);
        let breakdown = calibrate(&ctx, 7.5, ModelTier::Standard);
        assert!(breakdown.llm <= 0.2 + 1e-9);
    }
}
