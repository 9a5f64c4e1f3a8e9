//! Pattern engine port: structural rule evaluation over source code.
//!
//! Rules carry a structural pattern in a Semgrep-like syntax: `$VAR`
//! binds any identifier, `...` matches any span within a line. The
//! built-in evaluator handles the single-line subset the rule
//! synthesizer emits; a full Semgrep deployment can be slotted behind
//! the same port.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{LatticeError, LatticeResult};
use crate::types::Rule;

/// A rule match found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// ID of the matching rule.
    pub rule_id: String,
    /// File the match was found in, when scanning a workspace.
    pub file_path: Option<String>,
    /// 1-indexed line of the match.
    pub line: u32,
    /// The matching source line, trimmed.
    pub snippet: String,
}

/// Port over the pattern/rule evaluation engine.
#[async_trait]
pub trait PatternEngine: Send + Sync {
    /// Scan a workspace tree with a set of rules.
    async fn scan(&self, workspace_path: &Path, rules: &[Rule]) -> LatticeResult<Vec<RuleMatch>>;

    /// Evaluate one serialized rule against a code snippet.
    async fn match_rule(&self, code: &str, rule_yaml: &str) -> LatticeResult<Vec<RuleMatch>>;
}

// ---------------------------------------------------------------------------
// Built-in structural evaluator
// ---------------------------------------------------------------------------

/// Structural matcher over the single-line Semgrep-like subset.
#[derive(Default)]
pub struct StructuralPatternEngine;

impl StructuralPatternEngine {
    /// Create the evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Match one pattern against one line.
    ///
    /// The pattern is split on `...` into literal segments; each literal
    /// segment is further split on `$VAR` placeholders, which match a
    /// single identifier. Segments must appear left to right.
    fn line_matches(pattern: &str, line: &str) -> bool {
        let mut rest = line;
        let segments: Vec<&str> = pattern.split("...").collect();
        for (i, segment) in segments.iter().enumerate() {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match Self::match_segment(segment, rest) {
                Some(after) => rest = after,
                None => return false,
            }
            // The first segment must anchor within the line; later ones
            // only need to appear after the previous match.
            let _ = i;
        }
        true
    }

    /// Match a `...`-free segment (literals and `$VAR` placeholders)
    /// inside `haystack`. Returns the remainder after the match.
    fn match_segment<'a>(segment: &str, haystack: &'a str) -> Option<&'a str> {
        let parts: Vec<&str> = segment.split_whitespace().collect();
        let mut rest = haystack;
        for part in parts {
            if part.starts_with('$') {
                // A metavariable consumes one identifier.
                let trimmed = rest.trim_start();
                let ident_len = trimmed
                    .find(|c: char| !c.is_alphanumeric() && c != '_')
                    .unwrap_or(trimmed.len());
                if ident_len == 0 {
                    return None;
                }
                rest = &trimmed[ident_len..];
            } else {
                let idx = rest.find(part)?;
                rest = &rest[idx + part.len()..];
            }
        }
        Some(rest)
    }

    /// Extract the `pattern:` and `id:` fields from a rule document.
    fn parse_rule_yaml(rule_yaml: &str) -> LatticeResult<(String, String)> {
        let mut id = None;
        let mut pattern = None;
        for line in rule_yaml.lines() {
            let line = line.trim().trim_start_matches("- ");
            if let Some(value) = line.strip_prefix("id:") {
                id = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("pattern:") {
                pattern = Some(value.trim().trim_matches('"').to_string());
            }
        }
        match (id, pattern) {
            (Some(id), Some(pattern)) => Ok((id, pattern)),
            _ => Err(LatticeError::Internal(
                "rule document missing id or pattern".into(),
            )),
        }
    }

    fn match_pattern_in_code(rule_id: &str, pattern: &str, code: &str) -> Vec<RuleMatch> {
        code.lines()
            .enumerate()
            .filter(|(_, line)| Self::line_matches(pattern, line))
            .map(|(i, line)| RuleMatch {
                rule_id: rule_id.to_string(),
                file_path: None,
                line: i as u32 + 1,
                snippet: line.trim().to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl PatternEngine for StructuralPatternEngine {
    async fn scan(&self, workspace_path: &Path, rules: &[Rule]) -> LatticeResult<Vec<RuleMatch>> {
        let mut matches = Vec::new();
        let mut stack = vec![workspace_path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable dir");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let name = entry.file_name();
                    if name != ".git" && name != "node_modules" && name != "target" {
                        stack.push(path);
                    }
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let rel = path
                    .strip_prefix(workspace_path)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                for rule in rules {
                    for mut m in Self::match_pattern_in_code(&rule.id, &rule.rule_body, &content) {
                        m.file_path = Some(rel.clone());
                        matches.push(m);
                    }
                }
            }
        }
        Ok(matches)
    }

    async fn match_rule(&self, code: &str, rule_yaml: &str) -> LatticeResult<Vec<RuleMatch>> {
        let (id, pattern) = Self::parse_rule_yaml(rule_yaml)?;
        Ok(Self::match_pattern_in_code(&id, &pattern, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_matches() {
        assert!(StructuralPatternEngine::line_matches(
            "console.log(...)",
            "  console.log(\"debug\");"
        ));
        assert!(!StructuralPatternEngine::line_matches(
            "console.log(...)",
            "logger.info(\"fine\");"
        ));
    }

    #[test]
    fn test_metavariable_matches_identifier() {
        assert!(StructuralPatternEngine::line_matches(
            "eval( $X )",
            "result = eval(payload)"
        ));
        assert!(!StructuralPatternEngine::line_matches(
            "eval( $X )",
            "evaluate(payload)"
        ));
    }

    #[tokio::test]
    async fn test_match_rule_from_yaml() {
        let engine = StructuralPatternEngine::new();
        let rule = "id: no-console\npattern: console.log(...)\nmessage: use the logger\n";
        let code = "function f() {\n  console.log('x');\n  return 1;\n}\n";
        let matches = engine.match_rule(code, rule).await.expect("match");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id, "no-console");
        assert_eq!(matches[0].line, 2);
    }

    #[tokio::test]
    async fn test_scan_workspace_tags_files() {
        let dir = tempfile::tempdir().expect("tmp");
        std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        std::fs::write(dir.path().join("src/a.ts"), "console.log('hit')\n").expect("write");
        std::fs::write(dir.path().join("src/b.ts"), "logger.info('miss')\n").expect("write");

        let rule = Rule {
            id: "no-console".into(),
            org_id: "o".into(),
            repo_id: Some("r".into()),
            rule_body: "console.log(...)".into(),
            semgrep_rule: None,
            enforcement: crate::types::Enforcement::Warn,
            scope: "repo".into(),
            priority: 1,
            status: crate::types::RuleStatus::Active,
            languages: vec![],
        };

        let engine = StructuralPatternEngine::new();
        let matches = engine.scan(dir.path(), &[rule]).await.expect("scan");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file_path.as_deref(), Some("src/a.ts"));
    }
}
