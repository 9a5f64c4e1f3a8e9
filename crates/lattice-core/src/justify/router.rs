//! Model-tier routing and the heuristic bypass.
//!
//! Premium: more than 20 callers or a safety-critical name match.
//! Standard: 3 to 20 callers. Fast: fewer than 3. Entities with a
//! strong heuristic hint and zero inbound callers skip the LLM
//! entirely and store a canned justification under the `heuristic`
//! tier.

use crate::types::{CodeEntity, ModelTier, Taxonomy};

/// Name fragments that mark safety-critical code paths.
const SAFETY_CRITICAL_FRAGMENTS: &[&str] = &[
    "auth", "password", "credential", "token", "secret", "crypto", "encrypt", "decrypt", "payment",
    "billing", "charge", "refund", "permission", "privilege", "sanitize", "escape",
];

/// Route an entity to its model tier.
pub fn route_tier(entity: &CodeEntity, caller_count: usize) -> ModelTier {
    if caller_count > 20 || is_safety_critical(entity) {
        ModelTier::Premium
    } else if caller_count >= 3 {
        ModelTier::Standard
    } else {
        ModelTier::Fast
    }
}

/// Whether an entity's name or path matches a safety-critical pattern.
pub fn is_safety_critical(entity: &CodeEntity) -> bool {
    let name = entity.name.to_lowercase();
    let path = entity.file_path.to_lowercase();
    SAFETY_CRITICAL_FRAGMENTS
        .iter()
        .any(|fragment| name.contains(fragment) || path.contains(fragment))
}

/// A heuristic hint derived from naming conventions alone.
#[derive(Debug, Clone)]
pub struct HeuristicHint {
    /// Suggested taxonomy.
    pub taxonomy: Taxonomy,
    /// Suggested feature tag.
    pub feature_tag: String,
    /// Canned purpose sentence.
    pub purpose: String,
    /// Hint strength in [0, 1].
    pub confidence: f64,
}

/// Naming patterns with high-confidence canned meanings. Matching is
/// on the lowercase entity name.
pub fn heuristic_hint(entity: &CodeEntity) -> Option<HeuristicHint> {
    let name = entity.name.to_lowercase();

    let utility = |purpose: &str, confidence: f64| HeuristicHint {
        taxonomy: Taxonomy::Utility,
        feature_tag: "infrastructure".into(),
        purpose: purpose.into(),
        confidence,
    };

    if name.starts_with("test_") || name.starts_with("test") && entity.file_path.contains("test") {
        return Some(utility("Automated test exercising production behavior.", 0.95));
    }
    if name == "tostring" || name == "to_string" || name == "__repr__" || name == "__str__" {
        return Some(utility("Formats the value for display or debugging.", 0.95));
    }
    if name == "main" {
        return Some(utility("Process entry point wiring up the application.", 0.9));
    }
    if name.starts_with("get_") && entity.end_line.saturating_sub(entity.start_line) <= 3 {
        return Some(utility("Trivial accessor exposing a field.", 0.9));
    }
    if name.starts_with("set_") && entity.end_line.saturating_sub(entity.start_line) <= 3 {
        return Some(utility("Trivial mutator assigning a field.", 0.9));
    }
    None
}

/// Whether the hint is strong enough to bypass the LLM for an entity
/// with zero inbound callers.
pub fn can_bypass(hint: &HeuristicHint, caller_count: usize) -> bool {
    hint.confidence >= 0.9 && caller_count == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, Language};

    fn entity(name: &str, path: &str, lines: u32) -> CodeEntity {
        CodeEntity {
            key: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            kind: EntityKind::Function,
            name: name.into(),
            file_path: path.into(),
            start_line: 1,
            end_line: lines,
            signature: name.into(),
            body: String::new(),
            documentation: None,
            language: Language::Rust,
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

    #[test]
    fn test_tier_by_caller_count() {
        let e = entity("compute", "src/calc.rs", 10);
        assert_eq!(route_tier(&e, 0), ModelTier::Fast);
        assert_eq!(route_tier(&e, 2), ModelTier::Fast);
        assert_eq!(route_tier(&e, 3), ModelTier::Standard);
        assert_eq!(route_tier(&e, 20), ModelTier::Standard);
        assert_eq!(route_tier(&e, 21), ModelTier::Premium);
    }

    #[test]
    fn test_safety_critical_forces_premium() {
        let e = entity("validate_password", "src/auth/login.rs", 10);
        assert_eq!(route_tier(&e, 0), ModelTier::Premium);
    }

    #[test]
    fn test_heuristic_bypass_accessor() {
        let e = entity("get_name", "src/user.rs", 2);
        let hint = heuristic_hint(&e).expect("hint");
        assert!(hint.confidence >= 0.9);
        assert!(can_bypass(&hint, 0));
        assert!(!can_bypass(&hint, 1), "callers disable the bypass");
    }

    #[test]
    fn test_no_hint_for_substantial_code() {
        let e = entity("reconcile_ledger", "src/billing.rs", 80);
        assert!(heuristic_hint(&e).is_none());
    }
}
