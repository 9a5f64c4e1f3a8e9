//! Go fallback parser.
//!
//! Extracts functions, methods (receiver type as parent), type
//! declarations (struct/interface/alias), consts, vars, and imports.

use crate::error::LatticeResult;
use crate::types::{EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport,
};

/// Plugin for Go source files.
pub struct GoPlugin;

impl LanguagePlugin for GoPlugin {
    fn language(&self) -> Language {
        Language::Go
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile> {
        let tree = parse_tree(self, source, file_path)?;
        let mut parsed = ParsedFile::default();
        let root = tree.root_node();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "function_declaration" => {
                    if let Some(decl) =
                        super::declaration_from_node(child, source, EntityKind::Function, None)
                    {
                        parsed.declarations.push(decl);
                    }
                }
                "method_declaration" => extract_method(child, source, &mut parsed),
                "type_declaration" => extract_types(child, source, &mut parsed),
                "const_declaration" | "var_declaration" => {
                    extract_values(child, source, &mut parsed);
                }
                "import_declaration" => extract_imports(child, source, &mut parsed),
                _ => {}
            }
        }
        Ok(parsed)
    }
}

fn extract_method(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let receiver = node.child_by_field_name("receiver").map(|r| {
        let text = node_text(r, source);
        text.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
            .split_whitespace()
            .last()
            .unwrap_or("")
            .trim_start_matches('*')
            .to_string()
    });
    let parent = receiver.as_deref().filter(|r| !r.is_empty());
    if let Some(decl) = super::declaration_from_node(node, source, EntityKind::Method, parent) {
        parsed.declarations.push(decl);
    }
}

fn extract_types(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "type_spec" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let kind = match child.child_by_field_name("type").map(|t| t.kind()) {
            Some("struct_type") => EntityKind::Class,
            Some("interface_type") => EntityKind::Interface,
            _ => EntityKind::Type,
        };
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
}

fn extract_values(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "const_spec" && child.kind() != "var_spec" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let (start_line, end_line) = line_span(child);
        parsed.declarations.push(RawDeclaration {
            name: node_text(name_node, source).to_string(),
            kind: EntityKind::Variable,
            parent: None,
            start_line,
            end_line,
            signature: signature_of(child, source),
            body: node_text(child, source).to_string(),
            documentation: None,
        });
    }
}

fn extract_imports(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            match child.kind() {
                "import_spec" => {
                    if let Some(path_node) = child.child_by_field_name("path") {
                        let module = node_text(path_node, source).trim_matches('"').to_string();
                        let names = child
                            .child_by_field_name("name")
                            .map(|n| vec![node_text(n, source).to_string()])
                            .unwrap_or_default();
                        if !module.is_empty() {
                            parsed.imports.push(RawImport {
                                module,
                                names,
                                line: child.start_position().row as u32 + 1,
                            });
                        }
                    }
                }
                "import_spec_list" => stack.push(child),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParsedFile {
        GoPlugin
            .extract(src.as_bytes(), "test.go")
            .expect("parse should succeed")
    }

    #[test]
    fn test_function_method_and_struct() {
        let src = r#"
package main

import (
    "fmt"
    pb "example.com/proto"
)

type Server struct{}

type Handler interface{ Serve() }

func NewServer() *Server { return &Server{} }

func (s *Server) Serve() { fmt.Println("ok") }
"#;
        let parsed = parse(src);
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Server" && d.kind == EntityKind::Class));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Handler" && d.kind == EntityKind::Interface));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "NewServer" && d.kind == EntityKind::Function));

        let method = parsed
            .declarations
            .iter()
            .find(|d| d.name == "Serve" && d.kind == EntityKind::Method)
            .expect("method");
        assert_eq!(method.parent.as_deref(), Some("Server"));

        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].module, "fmt");
        assert_eq!(parsed.imports[1].names, vec!["pb"]);
    }
}
