//! C++ fallback parser.
//!
//! Extends the C walker with classes, namespaces, and base-class
//! clauses. Methods defined inline inside a class body get the class as
//! parent; out-of-line definitions (`Type::method`) are parented by the
//! qualifier.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::c::declarator_name;
use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport, RawRelation,
};

/// Plugin for C++ source files.
pub struct CppPlugin;

impl LanguagePlugin for CppPlugin {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_cpp::LANGUAGE.into()
    }

    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile> {
        let tree = parse_tree(self, source, file_path)?;
        let mut parsed = ParsedFile::default();
        walk(tree.root_node(), source, None, &mut parsed);
        Ok(parsed)
    }
}

fn walk(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" => {
                if let Some(raw_name) = declarator_name(child, source) {
                    // Out-of-line `Type::method` definitions parent by
                    // the qualifier.
                    let qualified = node_text(child, source)
                        .lines()
                        .next()
                        .unwrap_or("")
                        .contains("::");
                    let (name, owner) = match raw_name.rsplit_once("::") {
                        Some((owner, name)) => (name.to_string(), Some(owner.to_string())),
                        None if qualified => {
                            (raw_name.clone(), qualifier_of(child, source))
                        }
                        None => (raw_name.clone(), parent.map(String::from)),
                    };
                    let (start_line, end_line) = line_span(child);
                    parsed.declarations.push(RawDeclaration {
                        kind: if owner.is_some() {
                            EntityKind::Method
                        } else {
                            EntityKind::Function
                        },
                        name,
                        parent: owner,
                        start_line,
                        end_line,
                        signature: signature_of(child, source),
                        body: node_text(child, source).to_string(),
                        documentation: preceding_comment(child, source),
                    });
                }
            }
            "class_specifier" | "struct_specifier" => {
                extract_class(child, source, parent, parsed);
            }
            "enum_specifier" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    if child.child_by_field_name("body").is_some() {
                        let (start_line, end_line) = line_span(child);
                        parsed.declarations.push(RawDeclaration {
                            name: node_text(name_node, source).to_string(),
                            kind: EntityKind::Enum,
                            parent: parent.map(String::from),
                            start_line,
                            end_line,
                            signature: signature_of(child, source),
                            body: node_text(child, source).to_string(),
                            documentation: preceding_comment(child, source),
                        });
                    }
                }
            }
            "namespace_definition" => {
                if let Some(body) = child.child_by_field_name("body") {
                    walk(body, source, parent, parsed);
                }
            }
            "preproc_include" => {
                if let Some(path_node) = child.child_by_field_name("path") {
                    parsed.imports.push(RawImport {
                        module: node_text(path_node, source)
                            .trim_matches(|c| c == '"' || c == '<' || c == '>')
                            .to_string(),
                        names: Vec::new(),
                        line: child.start_position().row as u32 + 1,
                    });
                }
            }
            _ => {
                if child.child_count() > 0 && child.kind() != "string_literal" {
                    walk(child, source, parent, parsed);
                }
            }
        }
    }
}

/// Scope qualifier of an out-of-line definition, when present.
fn qualifier_of(node: tree_sitter::Node<'_>, source: &[u8]) -> Option<String> {
    let first_line = node_text(node, source).lines().next()?;
    let before_paren = first_line.split('(').next()?;
    let qualified = before_paren.split_whitespace().last()?;
    qualified
        .rsplit_once("::")
        .map(|(owner, _)| owner.to_string())
}

fn extract_class(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    if node.child_by_field_name("body").is_none() {
        return;
    }
    let name = node_text(name_node, source).to_string();

    // Base classes: class Derived : public Base.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "base_class_clause" {
            let mut inner = child.walk();
            for base in child.children(&mut inner) {
                if matches!(base.kind(), "type_identifier" | "qualified_identifier") {
                    parsed.relations.push(RawRelation {
                        from_name: name.clone(),
                        to_name: node_text(base, source).to_string(),
                        kind: EdgeKind::Extends,
                    });
                }
            }
        }
    }

    let (start_line, end_line) = line_span(node);
    parsed.declarations.push(RawDeclaration {
        name: name.clone(),
        kind: EntityKind::Class,
        parent: parent.map(String::from),
        start_line,
        end_line,
        signature: signature_of(node, source),
        body: node_text(node, source).to_string(),
        documentation: preceding_comment(node, source),
    });

    if let Some(body) = node.child_by_field_name("body") {
        walk(body, source, Some(&name), parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_with_base_and_methods() {
        let src = r#"
#include <vector>

class Engine : public Machine {
public:
    void start() {}
};

void Engine::stop() {}
"#;
        let parsed = CppPlugin.extract(src.as_bytes(), "engine.cpp").expect("parse");
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Engine" && d.kind == EntityKind::Class));
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == EdgeKind::Extends && r.to_name == "Machine"));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "start" && d.parent.as_deref() == Some("Engine")));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "stop" && d.parent.as_deref() == Some("Engine")));
        assert_eq!(parsed.imports.len(), 1);
    }
}
