//! TypeScript fallback parser.
//!
//! Extracts functions, arrow functions bound to `const`/`let`, classes
//! with their methods, interfaces, type aliases, enums, imports, and
//! `extends`/`implements` clauses. The walker is shared with the
//! JavaScript plugin, which runs it under its own grammar.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport, RawRelation,
};

/// Plugin for TypeScript source files.
pub struct TypeScriptPlugin;

impl LanguagePlugin for TypeScriptPlugin {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    }

    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile> {
        let tree = parse_tree(self, source, file_path)?;
        let mut parsed = ParsedFile::default();
        walk(tree.root_node(), source, None, &mut parsed);
        Ok(parsed)
    }
}

/// Walk a TS/JS AST and collect declarations, imports, and relations.
/// Shared between the TypeScript and JavaScript plugins.
pub(crate) fn walk(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Function, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "class_declaration" => {
                extract_class(child, source, parent, parsed);
            }
            "interface_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Interface, parent)
                {
                    collect_heritage(child, source, &decl.name, parsed);
                    parsed.declarations.push(decl);
                }
            }
            "type_alias_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Type, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "enum_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Enum, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                extract_variables(child, source, parent, parsed);
            }
            "export_statement" => {
                // Unwrap and recurse; exported declarations are collected
                // by the arms above.
                walk(child, source, parent, parsed);
            }
            "import_statement" => {
                extract_import(child, source, parsed);
            }
            "method_definition" => {
                if let Some(mut decl) =
                    super::declaration_from_node(child, source, EntityKind::Method, parent)
                {
                    if parent.is_none() {
                        decl.kind = EntityKind::Function;
                    }
                    parsed.declarations.push(decl);
                }
            }
            _ => {
                if child.child_count() > 0
                    && child.kind() != "string"
                    && child.kind() != "template_string"
                {
                    walk(child, source, parent, parsed);
                }
            }
        }
    }
}

fn extract_class(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let Some(decl) = super::declaration_from_node(node, source, EntityKind::Class, parent) else {
        return;
    };
    collect_heritage(node, source, &decl.name, parsed);
    if let Some(body) = node.child_by_field_name("body") {
        walk(body, source, Some(&decl.name), parsed);
    }
    parsed.declarations.push(decl);
}

/// Collect `extends`/`implements` clauses from a class or interface.
fn collect_heritage(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    from_name: &str,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_heritage" | "extends_clause" | "implements_clause" => {
                let relation_kind = if child.kind() == "implements_clause" {
                    EdgeKind::Implements
                } else {
                    EdgeKind::Extends
                };
                collect_heritage_names(child, source, from_name, relation_kind, parsed);
            }
            _ => {}
        }
    }
}

fn collect_heritage_names(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    from_name: &str,
    default_kind: EdgeKind,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "identifier" | "type_identifier" => {
                parsed.relations.push(RawRelation {
                    from_name: from_name.to_string(),
                    to_name: node_text(child, source).to_string(),
                    kind: default_kind,
                });
            }
            "extends_clause" => {
                collect_heritage_names(child, source, from_name, EdgeKind::Extends, parsed);
            }
            "implements_clause" => {
                collect_heritage_names(child, source, from_name, EdgeKind::Implements, parsed);
            }
            _ => {
                if child.child_count() > 0 {
                    collect_heritage_names(child, source, from_name, default_kind, parsed);
                }
            }
        }
    }
}

/// Extract `const`/`let` declarators; arrow-function initializers count
/// as functions, everything else as variables.
fn extract_variables(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for declarator in node.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        if name_node.kind() != "identifier" {
            continue;
        }
        let name = node_text(name_node, source).to_string();
        let is_function = declarator
            .child_by_field_name("value")
            .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
            .unwrap_or(false);
        let (start_line, end_line) = line_span(node);
        parsed.declarations.push(RawDeclaration {
            name,
            kind: if is_function {
                EntityKind::Function
            } else {
                EntityKind::Variable
            },
            parent: parent.map(String::from),
            start_line,
            end_line,
            signature: signature_of(node, source),
            body: node_text(node, source).to_string(),
            documentation: preceding_comment(node, source),
        });
    }
}

fn extract_import(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let module = node_text(source_node, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    let mut names = Vec::new();
    collect_import_names(node, source, &mut names);
    parsed.imports.push(RawImport {
        module,
        names,
        line: node.start_position().row as u32 + 1,
    });
}

fn collect_import_names(node: tree_sitter::Node<'_>, source: &[u8], names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_specifier" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    names.push(node_text(name_node, source).to_string());
                }
            }
            "identifier" => {
                // Default import: `import React from "react"`.
                names.push(node_text(child, source).to_string());
            }
            "namespace_import" => {
                // `import * as fs from "fs"` binds the alias.
                let mut inner = child.walk();
                for grandchild in child.children(&mut inner) {
                    if grandchild.kind() == "identifier" {
                        names.push(node_text(grandchild, source).to_string());
                    }
                }
            }
            _ => {
                if child.child_count() > 0 {
                    collect_import_names(child, source, names);
                }
            }
        }
    }
}
