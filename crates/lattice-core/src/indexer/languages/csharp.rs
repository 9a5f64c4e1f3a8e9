//! C# fallback parser.
//!
//! Extracts classes, interfaces, structs, enums, methods, base-list
//! relations, and `using` directives. The grammar does not distinguish
//! extends from implements in the base list; the `I`-prefix convention
//! decides.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{node_text, parse_tree, LanguagePlugin, ParsedFile, RawImport, RawRelation};

/// Plugin for C# source files.
pub struct CSharpPlugin;

impl LanguagePlugin for CSharpPlugin {
    fn language(&self) -> Language {
        Language::CSharp
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_c_sharp::LANGUAGE.into()
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
            "class_declaration" | "struct_declaration" | "record_declaration" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Class, parent)
                {
                    collect_bases(child, source, &decl.name, parsed);
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
                    collect_bases(child, source, &decl.name, parsed);
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
            "namespace_declaration" | "file_scoped_namespace_declaration" => {
                if let Some(body) = child.child_by_field_name("body") {
                    walk(body, source, parent, parsed);
                } else {
                    walk(child, source, parent, parsed);
                }
            }
            "using_directive" => {
                let text = node_text(child, source)
                    .trim_start_matches("global ")
                    .trim_start_matches("using ")
                    .trim_start_matches("static ")
                    .trim_end_matches(';')
                    .trim()
                    .to_string();
                if !text.is_empty() {
                    parsed.imports.push(RawImport {
                        module: text,
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

fn collect_bases(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    from_name: &str,
    parsed: &mut ParsedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "base_list" {
            continue;
        }
        let mut inner = child.walk();
        for base in child.children(&mut inner) {
            if matches!(base.kind(), "identifier" | "qualified_name" | "generic_name") {
                let name = node_text(base, source)
                    .split('<')
                    .next()
                    .unwrap_or("")
                    .to_string();
                if name.is_empty() {
                    continue;
                }
                // Interface names follow the I-prefix convention.
                let kind = if name.starts_with('I')
                    && name.chars().nth(1).is_some_and(|c| c.is_uppercase())
                {
                    EdgeKind::Implements
                } else {
                    EdgeKind::Extends
                };
                parsed.relations.push(RawRelation {
                    from_name: from_name.to_string(),
                    to_name: name,
                    kind,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_with_bases() {
        let src = r#"
using System.Collections.Generic;

namespace Shop {
    public class OrderService : BaseService, IBilling {
        public double Total() { return 0.0; }
    }
}
"#;
        let parsed = CSharpPlugin
            .extract(src.as_bytes(), "OrderService.cs")
            .expect("parse");

        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "OrderService" && d.kind == EntityKind::Class));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Total" && d.parent.as_deref() == Some("OrderService")));
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == EdgeKind::Extends && r.to_name == "BaseService"));
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == EdgeKind::Implements && r.to_name == "IBilling"));
        assert_eq!(parsed.imports.len(), 1);
    }
}
