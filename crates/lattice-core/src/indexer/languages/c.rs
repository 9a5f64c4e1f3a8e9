//! C fallback parser.
//!
//! Extracts function definitions, structs, enums, typedefs, and
//! `#include` directives. Function names sit inside nested declarator
//! nodes, so the walker drills through declarators to find them.

use crate::error::LatticeResult;
use crate::types::{EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport,
};

/// Plugin for C source files.
pub struct CPlugin;

impl LanguagePlugin for CPlugin {
    fn language(&self) -> Language {
        Language::C
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_c::LANGUAGE.into()
    }

    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile> {
        let tree = parse_tree(self, source, file_path)?;
        let mut parsed = ParsedFile::default();
        walk_c(tree.root_node(), source, &mut parsed);
        Ok(parsed)
    }
}

/// Walk a C/C++ translation unit. Shared with the C++ plugin for the
/// constructs both grammars name identically.
pub(crate) fn walk_c(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" => {
                if let Some(name) = declarator_name(child, source) {
                    let (start_line, end_line) = line_span(child);
                    parsed.declarations.push(RawDeclaration {
                        name,
                        kind: EntityKind::Function,
                        parent: None,
                        start_line,
                        end_line,
                        signature: signature_of(child, source),
                        body: node_text(child, source).to_string(),
                        documentation: preceding_comment(child, source),
                    });
                }
            }
            "struct_specifier" | "union_specifier" => {
                push_named(child, source, EntityKind::Class, parsed);
            }
            "enum_specifier" => {
                push_named(child, source, EntityKind::Enum, parsed);
            }
            "type_definition" => {
                // typedef struct {...} Name; the name is the last declarator.
                if let Some(declarator) = child.child_by_field_name("declarator") {
                    let (start_line, end_line) = line_span(child);
                    parsed.declarations.push(RawDeclaration {
                        name: node_text(declarator, source).to_string(),
                        kind: EntityKind::Type,
                        parent: None,
                        start_line,
                        end_line,
                        signature: signature_of(child, source),
                        body: node_text(child, source).to_string(),
                        documentation: None,
                    });
                }
            }
            "preproc_include" => {
                if let Some(path_node) = child.child_by_field_name("path") {
                    let module = node_text(path_node, source)
                        .trim_matches(|c| c == '"' || c == '<' || c == '>')
                        .to_string();
                    parsed.imports.push(RawImport {
                        module,
                        names: Vec::new(),
                        line: child.start_position().row as u32 + 1,
                    });
                }
            }
            _ => {
                if child.child_count() > 0 && child.kind() != "string_literal" {
                    walk_c(child, source, parsed);
                }
            }
        }
    }
}

/// Drill through pointer/function declarators to the identifier.
pub(crate) fn declarator_name(node: tree_sitter::Node<'_>, source: &[u8]) -> Option<String> {
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        match current.kind() {
            "identifier" | "field_identifier" => {
                return Some(node_text(current, source).to_string());
            }
            _ => match current
                .child_by_field_name("declarator")
                .or_else(|| current.named_child(0))
            {
                Some(next) => current = next,
                None => return None,
            },
        }
    }
}

fn push_named(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    kind: EntityKind,
    parsed: &mut ParsedFile,
) {
    // Anonymous structs/enums inside typedefs are picked up by the
    // surrounding type_definition instead.
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    // Forward declarations carry no body.
    if node.child_by_field_name("body").is_none() {
        return;
    }
    let (start_line, end_line) = line_span(node);
    parsed.declarations.push(RawDeclaration {
        name: node_text(name_node, source).to_string(),
        kind,
        parent: None,
        start_line,
        end_line,
        signature: signature_of(node, source),
        body: node_text(node, source).to_string(),
        documentation: preceding_comment(node, source),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_struct_include() {
        let src = r#"
#include <stdio.h>
#include "config.h"

struct buffer { char *data; };

static int grow(struct buffer *b) { return 0; }
"#;
        let parsed = CPlugin.extract(src.as_bytes(), "buf.c").expect("parse");
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "buffer" && d.kind == EntityKind::Class));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "grow" && d.kind == EntityKind::Function));
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].module, "stdio.h");
        assert_eq!(parsed.imports[1].module, "config.h");
    }

    #[test]
    fn test_pointer_returning_function() {
        let src = "char *dup_name(const char *s) { return 0; }\n";
        let parsed = CPlugin.extract(src.as_bytes(), "dup.c").expect("parse");
        assert_eq!(parsed.declarations.len(), 1);
        assert_eq!(parsed.declarations[0].name, "dup_name");
    }
}
