//! Staleness detection.
//!
//! An entity is skipped when the SHA-256 of its current body equals the
//! `body_hash` of its current-valid justification AND none of its
//! callees changed in a prior level. Changed IDs accumulate across
//! levels in a capped set; once the cap is reached the set saturates
//! and refuses further adds, and skipping is disabled from then on so
//! no stale justification can survive (extra LLM calls are the price,
//! never correctness).

use std::collections::HashSet;

use crate::keys;
use crate::types::{CodeEntity, Justification};

/// Accumulated changed-entity IDs with cap-saturation semantics.
#[derive(Debug)]
pub struct ChangedSet {
    ids: HashSet<String>,
    cap: usize,
    saturated: bool,
}

impl ChangedSet {
    /// Create a set with the given cap.
    pub fn new(cap: usize) -> Self {
        Self {
            ids: HashSet::new(),
            cap,
            saturated: false,
        }
    }

    /// Record a changed entity. Once the cap is hit the set saturates.
    pub fn record(&mut self, entity_key: &str) {
        if self.saturated {
            return;
        }
        if self.ids.len() >= self.cap {
            self.saturated = true;
            tracing::warn!(
                cap = self.cap,
                "changed-ID set saturated; staleness skipping disabled for remaining levels"
            );
            return;
        }
        self.ids.insert(entity_key.to_string());
    }

    /// Whether the entity is known-changed. When saturated, everything
    /// is treated as changed.
    pub fn contains(&self, entity_key: &str) -> bool {
        self.saturated || self.ids.contains(entity_key)
    }

    /// Whether the cap was reached.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Number of recorded IDs.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing changed yet.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && !self.saturated
    }
}

/// Whether an entity's current justification is still fresh.
pub fn is_fresh(
    entity: &CodeEntity,
    current: Option<&Justification>,
    callee_keys: &[String],
    changed: &ChangedSet,
) -> bool {
    let Some(justification) = current else {
        return false;
    };
    if changed.is_saturated() {
        return false;
    }
    if keys::body_hash(&entity.body) != justification.body_hash {
        return false;
    }
    !callee_keys.iter().any(|callee| changed.contains(callee))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConfidenceBreakdown, EntityKind, Language, ModelTier, Taxonomy, valid_to_infinity,
    };
    use chrono::Utc;

    fn entity(body: &str) -> CodeEntity {
        CodeEntity {
            key: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            kind: EntityKind::Function,
            name: "f".into(),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 1,
            signature: "f".into(),
            body: body.into(),
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

    fn justification_for(body: &str) -> Justification {
        Justification {
            entity_id: "k".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            taxonomy: Taxonomy::Utility,
            feature_tag: "infra".into(),
            business_purpose: String::new(),
            domain_concepts: vec![],
            semantic_triples: vec![],
            confidence: 0.5,
            calibrated_confidence: 0.5,
            confidence_breakdown: ConfidenceBreakdown::default(),
            reasoning: String::new(),
            model_used: "m".into(),
            model_tier: ModelTier::Fast,
            body_hash: crate::keys::body_hash(body),
            valid_from: Utc::now(),
            valid_to: valid_to_infinity(),
        }
    }

    #[test]
    fn test_fresh_when_hash_matches_and_no_callee_changed() {
        let entity = entity("fn f() {}");
        let just = justification_for("fn f() {}");
        let changed = ChangedSet::new(100);
        assert!(is_fresh(&entity, Some(&just), &["callee".into()], &changed));
    }

    #[test]
    fn test_stale_on_body_change() {
        let entity = entity("fn f() { new }");
        let just = justification_for("fn f() {}");
        let changed = ChangedSet::new(100);
        assert!(!is_fresh(&entity, Some(&just), &[], &changed));
    }

    #[test]
    fn test_stale_on_changed_callee() {
        let entity = entity("fn f() {}");
        let just = justification_for("fn f() {}");
        let mut changed = ChangedSet::new(100);
        changed.record("callee");
        assert!(!is_fresh(&entity, Some(&just), &["callee".into()], &changed));
        assert!(is_fresh(&entity, Some(&just), &["other".into()], &changed));
    }

    #[test]
    fn test_missing_justification_is_stale() {
        let entity = entity("fn f() {}");
        let changed = ChangedSet::new(100);
        assert!(!is_fresh(&entity, None, &[], &changed));
    }

    #[test]
    fn test_saturation_disables_skipping() {
        let mut changed = ChangedSet::new(2);
        changed.record("a");
        changed.record("b");
        assert!(!changed.is_saturated());
        // Third record hits the cap: saturate, refuse the add.
        changed.record("c");
        assert!(changed.is_saturated());
        assert_eq!(changed.len(), 2);
        // Everything now reads as changed.
        assert!(changed.contains("never-recorded"));

        let entity = entity("fn f() {}");
        let just = justification_for("fn f() {}");
        assert!(!is_fresh(&entity, Some(&just), &[], &changed));
    }
}
