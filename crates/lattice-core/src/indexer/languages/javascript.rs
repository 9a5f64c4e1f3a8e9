//! JavaScript fallback parser.
//!
//! Runs the shared TS/JS walker under the JavaScript grammar; the node
//! kinds the walker matches are identical across the two grammars.

use crate::error::LatticeResult;
use crate::types::Language;

use super::typescript::walk;
use super::{parse_tree, LanguagePlugin, ParsedFile};

/// Plugin for JavaScript source files.
pub struct JavaScriptPlugin;

impl LanguagePlugin for JavaScriptPlugin {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile> {
        let tree = parse_tree(self, source, file_path)?;
        let mut parsed = ParsedFile::default();
        walk(tree.root_node(), source, None, &mut parsed);
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    #[test]
    fn test_function_and_class() {
        let src = "function add(a, b) { return a + b }\nclass Queue { push(x) {} }\n";
        let parsed = JavaScriptPlugin
            .extract(src.as_bytes(), "test.js")
            .expect("parse");
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "add" && d.kind == EntityKind::Function));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Queue" && d.kind == EntityKind::Class));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "push" && d.parent.as_deref() == Some("Queue")));
    }

    #[test]
    fn test_commonjs_style_arrow() {
        let src = "const handler = (req, res) => res.end();\n";
        let parsed = JavaScriptPlugin
            .extract(src.as_bytes(), "test.js")
            .expect("parse");
        assert_eq!(parsed.declarations.len(), 1);
        assert_eq!(parsed.declarations[0].kind, EntityKind::Function);
    }
}
