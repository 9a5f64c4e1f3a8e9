//! Health report: the 13-category risk scorecard.
//!
//! Each category scores 0-100 (higher is healthier) with entity
//! references as evidence and a narrative summary. Reports are
//! regenerated per index run and never mutated in place. When the
//! justification stage produced only fallback stubs, the report writes
//! an explicit "insufficient data" state instead of null metrics.

use std::sync::Arc;

use chrono::Utc;

use crate::error::LatticeResult;
use crate::stores::GraphStore;
use crate::types::{
    CodeEntity, EdgeKind, HealthCategory, HealthReport, Justification, RiskLevel, Tenant,
};

/// The 13 fixed categories.
pub const CATEGORIES: [&str; 13] = [
    "coupling",
    "fan_in_concentration",
    "cyclic_dependencies",
    "documentation",
    "test_coverage",
    "external_boundaries",
    "dead_code",
    "god_entities",
    "feature_cohesion",
    "confidence",
    "quarantine",
    "churn_risk",
    "naming",
];

/// Fraction of evidence entities cited per category.
const MAX_EVIDENCE: usize = 5;

/// Generate and store the health report for an index version.
pub async fn run_health_report(
    graph: &Arc<dyn GraphStore>,
    tenant: &Tenant,
    index_version: &str,
) -> LatticeResult<HealthReport> {
    let entities = graph.get_all_entities(tenant).await?;
    let edges = graph.get_all_edges(tenant).await?;
    let justifications = graph.get_current_justifications(tenant).await?;

    let report = if only_fallback_stubs(&justifications) {
        HealthReport {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            index_version: index_version.to_string(),
            categories: Vec::new(),
            summary: "Insufficient data: the justification stage produced only fallback \
                      stubs, so business-level health cannot be assessed. Re-run once the \
                      model provider is reachable."
                .into(),
            insufficient_data: true,
            generated_at: Utc::now(),
        }
    } else {
        let categories = score_categories(&entities, &edges, &justifications);
        let lowest: Vec<&HealthCategory> = {
            let mut sorted: Vec<&HealthCategory> = categories.iter().collect();
            sorted.sort_by_key(|c| c.score);
            sorted.into_iter().take(3).collect()
        };
        let summary = format!(
            "{} entities across {} edges. Weakest categories: {}.",
            entities.len(),
            edges.len(),
            lowest
                .iter()
                .map(|c| format!("{} ({})", c.category, c.score))
                .collect::<Vec<_>>()
                .join(", ")
        );
        HealthReport {
            org_id: tenant.org_id.clone(),
            repo_id: tenant.repo_id.clone(),
            index_version: index_version.to_string(),
            categories,
            summary,
            insufficient_data: false,
            generated_at: Utc::now(),
        }
    };

    graph.store_health_report(tenant, &report).await?;
    tracing::info!(
        tenant = %tenant,
        insufficient = report.insufficient_data,
        "health report stored"
    );
    Ok(report)
}

/// The guard condition: every justification is a low-confidence
/// unclassified stub.
fn only_fallback_stubs(justifications: &[Justification]) -> bool {
    !justifications.is_empty()
        && justifications
            .iter()
            .all(|j| j.confidence < 0.5 && j.feature_tag == crate::justify::UNCLASSIFIED)
}

fn score_categories(
    entities: &[CodeEntity],
    edges: &[crate::types::CodeEdge],
    justifications: &[Justification],
) -> Vec<HealthCategory> {
    let semantic: Vec<&CodeEntity> = entities.iter().filter(|e| e.kind.is_semantic()).collect();
    let total = semantic.len().max(1);

    let mut categories = Vec::with_capacity(13);
    let mut push = |category: &str, score: u32, evidence: Vec<String>, finding: String| {
        categories.push(HealthCategory {
            category: category.into(),
            score: score.min(100),
            entity_refs: evidence.into_iter().take(MAX_EVIDENCE).collect(),
            finding,
        });
    };

    // coupling: share of entities with high fan-out.
    let coupled: Vec<&&CodeEntity> = semantic
        .iter()
        .filter(|e| e.fan_out.unwrap_or(0) >= 10)
        .collect();
    push(
        "coupling",
        100u32.saturating_sub((coupled.len() * 200 / total) as u32),
        coupled.iter().map(|e| e.key.clone()).collect(),
        format!("{} entities call ten or more others", coupled.len()),
    );

    // fan_in_concentration: high-risk hubs.
    let hubs: Vec<&&CodeEntity> = semantic
        .iter()
        .filter(|e| e.risk_level == Some(RiskLevel::High))
        .collect();
    push(
        "fan_in_concentration",
        100u32.saturating_sub((hubs.len() * 300 / total) as u32),
        hubs.iter().map(|e| e.key.clone()).collect(),
        format!("{} high-risk hubs concentrate call traffic", hubs.len()),
    );

    // cyclic_dependencies: approximated by mutual call pairs.
    let mut call_pairs = std::collections::HashSet::new();
    let mut cycles = Vec::new();
    for edge in edges.iter().filter(|e| e.kind == EdgeKind::Calls) {
        if call_pairs.contains(&(edge.to_key.clone(), edge.from_key.clone())) {
            cycles.push(edge.from_key.clone());
        }
        call_pairs.insert((edge.from_key.clone(), edge.to_key.clone()));
    }
    push(
        "cyclic_dependencies",
        100u32.saturating_sub((cycles.len() * 10) as u32),
        cycles.clone(),
        format!("{} mutual call pairs detected", cycles.len()),
    );

    // documentation coverage.
    let documented = semantic.iter().filter(|e| e.documentation.is_some()).count();
    push(
        "documentation",
        (documented * 100 / total) as u32,
        vec![],
        format!("{documented}/{total} entities documented"),
    );

    // test_coverage: tests edges or test-file presence.
    let tested_files: std::collections::HashSet<&str> = entities
        .iter()
        .filter(|e| e.file_path.contains("test"))
        .map(|e| e.file_path.as_str())
        .collect();
    let file_count = entities
        .iter()
        .filter(|e| e.kind == crate::types::EntityKind::File)
        .count()
        .max(1);
    push(
        "test_coverage",
        ((tested_files.len() * 100 / file_count) as u32).min(100),
        vec![],
        format!("{} test files for {} files", tested_files.len(), file_count),
    );

    // external_boundaries: uncategorized external edges are a smell.
    let external: Vec<&crate::types::CodeEdge> = edges.iter().filter(|e| e.is_external).collect();
    let uncategorized = external
        .iter()
        .filter(|e| e.boundary_category.as_deref() == Some("library"))
        .count();
    push(
        "external_boundaries",
        100u32.saturating_sub((uncategorized * 100 / external.len().max(1)) as u32),
        vec![],
        format!(
            "{uncategorized}/{} external imports lack a boundary category",
            external.len()
        ),
    );

    // dead_code: semantic entities with no inbound edges at all.
    let referenced: std::collections::HashSet<&str> =
        edges.iter().map(|e| e.to_key.as_str()).collect();
    let dead: Vec<&&CodeEntity> = semantic
        .iter()
        .filter(|e| !referenced.contains(e.key.as_str()))
        .collect();
    push(
        "dead_code",
        100u32.saturating_sub((dead.len() * 100 / total) as u32),
        dead.iter().map(|e| e.key.clone()).collect(),
        format!("{} entities have no inbound references", dead.len()),
    );

    // god_entities: oversized declarations.
    let gods: Vec<&&CodeEntity> = semantic
        .iter()
        .filter(|e| e.end_line.saturating_sub(e.start_line) > 300)
        .collect();
    push(
        "god_entities",
        100u32.saturating_sub((gods.len() * 500 / total) as u32),
        gods.iter().map(|e| e.key.clone()).collect(),
        format!("{} entities exceed 300 lines", gods.len()),
    );

    // feature_cohesion: share of justified entities with a real tag.
    let tagged = justifications
        .iter()
        .filter(|j| j.feature_tag != crate::justify::UNCLASSIFIED)
        .count();
    push(
        "feature_cohesion",
        (tagged * 100 / justifications.len().max(1)) as u32,
        vec![],
        format!("{tagged}/{} justifications carry a feature tag", justifications.len()),
    );

    // confidence: mean calibrated confidence.
    let mean_confidence = justifications
        .iter()
        .map(|j| j.calibrated_confidence)
        .sum::<f64>()
        / justifications.len().max(1) as f64;
    push(
        "confidence",
        (mean_confidence * 100.0) as u32,
        vec![],
        format!("mean calibrated confidence {mean_confidence:.2}"),
    );

    // quarantine: files that failed parsing.
    let quarantined: Vec<&CodeEntity> = entities
        .iter()
        .filter(|e| e.quarantine_error.is_some())
        .collect();
    push(
        "quarantine",
        100u32.saturating_sub((quarantined.len() * 20) as u32),
        quarantined.iter().map(|e| e.key.clone()).collect(),
        format!("{} files quarantined by parse failures", quarantined.len()),
    );

    // churn_risk: high-risk entities without documentation.
    let risky_undocumented: Vec<&&CodeEntity> = semantic
        .iter()
        .filter(|e| e.risk_level == Some(RiskLevel::High) && e.documentation.is_none())
        .collect();
    push(
        "churn_risk",
        100u32.saturating_sub((risky_undocumented.len() * 300 / total) as u32),
        risky_undocumented.iter().map(|e| e.key.clone()).collect(),
        format!("{} undocumented high-risk entities", risky_undocumented.len()),
    );

    // naming: descriptive multi-term names.
    let descriptive = semantic
        .iter()
        .filter(|e| crate::ontology::split_identifier(&e.name).len() >= 2)
        .count();
    push(
        "naming",
        (descriptive * 100 / total) as u32,
        vec![],
        format!("{descriptive}/{total} entities carry descriptive names"),
    );

    categories
}
