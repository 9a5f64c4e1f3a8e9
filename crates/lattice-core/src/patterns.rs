//! Pattern detection and rule synthesis.
//!
//! The structural matcher sweeps the entity arena for recurring
//! conventions (naming suffixes, layer pairings, test coverage
//! pairing). Detected patterns are stored with exemplars; confirmed
//! patterns can be synthesized into enforcement rules evaluated by the
//! [`crate::stores::PatternEngine`] port.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::LatticeResult;
use crate::stores::{GraphStore, PatternEngine, RuleMatch};
use crate::types::{Enforcement, EntityKind, Pattern, Rule, RuleStatus, Tenant};

/// Minimum occurrences before a convention becomes a pattern.
const MIN_OCCURRENCES: usize = 3;
/// Exemplars stored per pattern.
const MAX_EXEMPLARS: usize = 5;

/// Naming suffixes that mark architectural layers.
const LAYER_SUFFIXES: &[&str] = &[
    "Service", "Repository", "Controller", "Handler", "Manager", "Factory", "Provider",
    "Middleware", "Validator", "Serializer", "Client", "Worker",
];

/// Outcome of the pattern stage.
#[derive(Debug, Clone, Default)]
pub struct PatternOutcome {
    /// Patterns detected and stored.
    pub patterns: usize,
    /// Rule matches found by scanning the workspace.
    pub rule_matches: usize,
}

/// Detect structural patterns across the repo's entities.
pub async fn detect_patterns(
    graph: &Arc<dyn GraphStore>,
    tenant: &Tenant,
) -> LatticeResult<Vec<Pattern>> {
    let entities = graph.get_all_entities(tenant).await?;
    let mut patterns = Vec::new();

    // Layer-suffix conventions: at least MIN_OCCURRENCES classes
    // sharing a suffix.
    let mut by_suffix: BTreeMap<&str, Vec<&crate::types::CodeEntity>> = BTreeMap::new();
    for entity in &entities {
        if entity.kind != EntityKind::Class {
            continue;
        }
        for suffix in LAYER_SUFFIXES {
            if entity.name.ends_with(suffix) && entity.name.len() > suffix.len() {
                by_suffix.entry(suffix).or_default().push(entity);
            }
        }
    }
    for (suffix, members) in by_suffix {
        if members.len() < MIN_OCCURRENCES {
            continue;
        }
        let mut exemplars: Vec<String> = members.iter().map(|e| e.key.clone()).collect();
        exemplars.sort();
        exemplars.truncate(MAX_EXEMPLARS);
        patterns.push(Pattern {
            id: format!("layer-suffix-{}", suffix.to_lowercase()),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            name: format!("{suffix} layer convention"),
            description: format!(
                "Classes named *{suffix} form a {} layer ({} occurrences).",
                suffix.to_lowercase(),
                members.len()
            ),
            exemplars,
            occurrences: members.len(),
            confirmed: false,
        });
    }

    // Test pairing: production files with a sibling test file.
    let mut test_paired = 0usize;
    let mut paired_exemplars = Vec::new();
    let files: std::collections::HashSet<&str> =
        entities.iter().map(|e| e.file_path.as_str()).collect();
    for entity in &entities {
        if entity.kind != EntityKind::File || entity.file_path.contains("test") {
            continue;
        }
        let stem = entity
            .file_path
            .rsplit_once('.')
            .map_or(entity.file_path.as_str(), |(stem, _)| stem);
        let has_test = files.iter().any(|f| {
            f.contains("test")
                && f.contains(stem.rsplit('/').next().unwrap_or(stem))
        });
        if has_test {
            test_paired += 1;
            if paired_exemplars.len() < MAX_EXEMPLARS {
                paired_exemplars.push(entity.key.clone());
            }
        }
    }
    if test_paired >= MIN_OCCURRENCES {
        patterns.push(Pattern {
            id: "test-pairing".into(),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            name: "test file pairing".into(),
            description: format!("{test_paired} production files carry a paired test file."),
            exemplars: paired_exemplars,
            occurrences: test_paired,
            confirmed: false,
        });
    }

    Ok(patterns)
}

/// Synthesize an enforcement rule from a confirmed pattern.
///
/// The synthesized rule starts at `suggest` with a low priority so
/// curated rules always win conflicts.
pub fn synthesize_rule(pattern: &Pattern) -> Option<Rule> {
    if !pattern.confirmed {
        return None;
    }
    let (rule_body, scope) = if let Some(suffix) = pattern.id.strip_prefix("layer-suffix-") {
        (
            format!("class $NAME{suffix}("),
            format!("new classes in the {suffix} layer should follow the suffix convention"),
        )
    } else if pattern.id == "test-pairing" {
        (
            "describe(...)".to_string(),
            "new production files should carry a paired test file".to_string(),
        )
    } else {
        return None;
    };

    Some(Rule {
        id: format!("synth-{}", pattern.id),
        org_id: pattern.org_id.clone(),
        repo_id: Some(pattern.repo_id.clone()),
        rule_body,
        semgrep_rule: Some(format!(
            "id: synth-{}\npattern: {}\nmessage: {}\n",
            pattern.id,
            pattern.name,
            pattern.description.replace('\n', " ")
        )),
        enforcement: Enforcement::Suggest,
        scope,
        priority: 1,
        status: RuleStatus::Proposed,
        languages: vec![],
    })
}

/// Run the pattern stage: detect and store patterns, then evaluate the
/// repo's active rules over the workspace when one is available.
pub async fn run_pattern_stage(
    graph: &Arc<dyn GraphStore>,
    engine: &Arc<dyn PatternEngine>,
    tenant: &Tenant,
    workspace: Option<&Path>,
) -> LatticeResult<PatternOutcome> {
    let mut outcome = PatternOutcome::default();

    let detected = detect_patterns(graph, tenant).await?;
    for pattern in &detected {
        graph.upsert_pattern(tenant, pattern).await?;
    }
    outcome.patterns = detected.len();

    if let Some(workspace) = workspace {
        let rules = graph.list_active_rules(tenant).await?;
        if !rules.is_empty() {
            let matches: Vec<RuleMatch> = engine.scan(workspace, &rules).await?;
            outcome.rule_matches = matches.len();
        }
    }

    tracing::info!(
        tenant = %tenant,
        patterns = outcome.patterns,
        rule_matches = outcome.rule_matches,
        "pattern stage complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryGraphStore;
    use crate::types::{CodeEntity, Language};

    fn class(tenant: &Tenant, name: &str) -> CodeEntity {
        CodeEntity {
            key: crate::keys::entity_key(
                &tenant.repo_id,
                "src/a.ts",
                EntityKind::Class,
                name,
                name,
            ),
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            kind: EntityKind::Class,
            name: name.into(),
            file_path: "src/a.ts".into(),
            start_line: 1,
            end_line: 10,
            signature: name.into(),
            body: String::new(),
            documentation: None,
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

    #[tokio::test]
    async fn test_layer_suffix_pattern_detected() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let tenant = Tenant::new("o", "r");
        graph
            .bulk_upsert_entities(
                &tenant,
                &[
                    class(&tenant, "OrderService"),
                    class(&tenant, "UserService"),
                    class(&tenant, "BillingService"),
                    class(&tenant, "Standalone"),
                ],
            )
            .await
            .expect("entities");

        let patterns = detect_patterns(&graph, &tenant).await.expect("detect");
        let service = patterns
            .iter()
            .find(|p| p.id == "layer-suffix-service")
            .expect("service pattern");
        assert_eq!(service.occurrences, 3);
        assert!(service.exemplars.len() <= 5);
    }

    #[tokio::test]
    async fn test_two_occurrences_is_not_a_pattern() {
        let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let tenant = Tenant::new("o", "r");
        graph
            .bulk_upsert_entities(
                &tenant,
                &[class(&tenant, "AHandler"), class(&tenant, "BHandler")],
            )
            .await
            .expect("entities");
        let patterns = detect_patterns(&graph, &tenant).await.expect("detect");
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_rule_synthesis_requires_confirmation() {
        let mut pattern = Pattern {
            id: "layer-suffix-service".into(),
            org_id: "o".into(),
            repo_id: "r".into(),
            name: "Service layer convention".into(),
            description: "desc".into(),
            exemplars: vec![],
            occurrences: 5,
            confirmed: false,
        };
        assert!(synthesize_rule(&pattern).is_none());

        pattern.confirmed = true;
        let rule = synthesize_rule(&pattern).expect("rule");
        assert_eq!(rule.enforcement, Enforcement::Suggest);
        assert_eq!(rule.status, RuleStatus::Proposed);
        assert_eq!(rule.repo_id.as_deref(), Some("r"));
        assert!(rule.semgrep_rule.is_some());
    }
}
