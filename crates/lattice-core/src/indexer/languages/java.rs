//! Java fallback parser.
//!
//! Extracts classes with methods and fields, interfaces, enums,
//! superclass/interface clauses, and imports.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{
    node_text, parse_tree, LanguagePlugin, ParsedFile, RawImport, RawRelation,
};

/// Plugin for Java source files.
pub struct JavaPlugin;

impl LanguagePlugin for JavaPlugin {
    fn language(&self) -> Language {
        Language::Java
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
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
            "class_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Class, parent)
                {
                    collect_heritage(child, source, &decl.name, parsed);
                    let name = decl.name.clone();
                    parsed.declarations.push(decl);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk(body, source, Some(&name), parsed);
                    }
                }
            }
            "interface_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Interface, parent)
                {
                    collect_heritage(child, source, &decl.name, parsed);
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
            "method_declaration" | "constructor_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Method, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "field_declaration" => {
                extract_field(child, source, parent, parsed);
            }
            "import_declaration" => {
                let text = node_text(child, source)
                    .trim_start_matches("import ")
                    .trim_start_matches("static ")
                    .trim_end_matches(';')
                    .trim()
                    .to_string();
                if !text.is_empty() {
                    let names = text
                        .rsplit('.')
                        .next()
                        .filter(|n| *n != "*")
                        .map(|n| vec![n.to_string()])
                        .unwrap_or_default();
                    parsed.imports.push(RawImport {
                        module: text,
                        names,
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

fn collect_heritage(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    from_name: &str,
    parsed: &mut ParsedFile,
) {
    if let Some(superclass) = node.child_by_field_name("superclass") {
        let mut cursor = superclass.walk();
        for child in superclass.children(&mut cursor) {
            if child.kind() == "type_identifier" {
                parsed.relations.push(RawRelation {
                    from_name: from_name.to_string(),
                    to_name: node_text(child, source).to_string(),
                    kind: EdgeKind::Extends,
                });
            }
        }
    }
    if let Some(interfaces) = node.child_by_field_name("interfaces") {
        collect_type_identifiers(interfaces, source, from_name, EdgeKind::Implements, parsed);
    }
}

fn collect_type_identifiers(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    from_name: &str,
    kind: EdgeKind,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "type_identifier" {
            parsed.relations.push(RawRelation {
                from_name: from_name.to_string(),
                to_name: node_text(child, source).to_string(),
                kind,
            });
        } else if child.child_count() > 0 {
            collect_type_identifiers(child, source, from_name, kind, parsed);
        }
    }
}

fn extract_field(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "variable_declarator" {
            continue;
        }
        if let Some(name_node) = child.child_by_field_name("name") {
            let (start_line, end_line) = super::line_span(node);
            parsed.declarations.push(super::RawDeclaration {
                name: node_text(name_node, source).to_string(),
                kind: EntityKind::Variable,
                parent: parent.map(String::from),
                start_line,
                end_line,
                signature: super::signature_of(node, source),
                body: node_text(node, source).to_string(),
                documentation: None,
            });
        }
    }
}
