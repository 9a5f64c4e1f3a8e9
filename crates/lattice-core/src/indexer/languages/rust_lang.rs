//! Rust fallback parser.
//!
//! Extracts free functions, structs, enums, traits, type aliases,
//! consts/statics, modules, impl-block methods (with the self type as
//! parent), trait-impl relations, and `use` imports.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport, RawRelation,
};

/// Plugin for Rust source files.
pub struct RustPlugin;

impl LanguagePlugin for RustPlugin {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
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
            "function_item" => {
                let kind = if parent.is_some() {
                    EntityKind::Method
                } else {
                    EntityKind::Function
                };
                if let Some(decl) = super::declaration_from_node(child, source, kind, parent) {
                    parsed.declarations.push(decl);
                }
            }
            "struct_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Class, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "enum_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Enum, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "trait_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Interface, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "type_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Type, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "const_item" | "static_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Variable, parent)
                {
                    parsed.declarations.push(decl);
                }
            }
            "mod_item" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Module, parent)
                {
                    let name = decl.name.clone();
                    parsed.declarations.push(decl);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk(body, source, Some(&name), parsed);
                    }
                }
            }
            "impl_item" => {
                extract_impl(child, source, parsed);
            }
            "use_declaration" => {
                extract_use(child, source, parsed);
            }
            _ => {
                if child.child_count() > 0 && child.kind() != "string_literal" {
                    walk(child, source, parent, parsed);
                }
            }
        }
    }
}

fn extract_impl(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let self_type = node
        .child_by_field_name("type")
        .map(|t| {
            // Strip generics: `Engine<T>` parents as `Engine`.
            let text = node_text(t, source);
            text.split('<').next().unwrap_or(text).trim().to_string()
        })
        .unwrap_or_default();

    // `impl Trait for Type` records an Implements relation.
    if let Some(trait_node) = node.child_by_field_name("trait") {
        let trait_name = node_text(trait_node, source)
            .split('<')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if !trait_name.is_empty() && !self_type.is_empty() {
            parsed.relations.push(RawRelation {
                from_name: self_type.clone(),
                to_name: trait_name,
                kind: EdgeKind::Implements,
            });
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        let parent = (!self_type.is_empty()).then_some(self_type.as_str());
        walk(body, source, parent, parsed);
    }
}

fn extract_use(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let text = node_text(node, source)
        .trim_start_matches("pub ")
        .trim_start_matches("use ")
        .trim_end_matches(';')
        .trim()
        .to_string();
    if text.is_empty() {
        return;
    }
    // `use a::b::{C, D}` -> module `a::b`, names C, D.
    let (module, names) = match text.split_once('{') {
        Some((prefix, rest)) => {
            let names = rest
                .trim_end_matches('}')
                .split(',')
                .map(|n| n.trim().split(" as ").next().unwrap_or("").to_string())
                .filter(|n| !n.is_empty() && n != "self")
                .collect();
            (prefix.trim_end_matches("::").to_string(), names)
        }
        None => {
            let last = text.rsplit("::").next().unwrap_or(&text).to_string();
            (text.clone(), vec![last])
        }
    };
    parsed.imports.push(RawImport {
        module,
        names,
        line: node.start_position().row as u32 + 1,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParsedFile {
        RustPlugin
            .extract(src.as_bytes(), "test.rs")
            .expect("parse should succeed")
    }

    #[test]
    fn test_function_and_struct() {
        let src = "/// Adds one.\npub fn add_one(x: u32) -> u32 { x + 1 }\n\npub struct Engine { id: u64 }\n";
        let parsed = parse(src);
        let func = parsed
            .declarations
            .iter()
            .find(|d| d.name == "add_one")
            .expect("fn");
        assert_eq!(func.kind, EntityKind::Function);
        assert_eq!(func.documentation.as_deref(), Some("Adds one."));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "Engine" && d.kind == EntityKind::Class));
    }

    #[test]
    fn test_impl_methods_and_trait_relation() {
        let src = r#"
struct Engine;
trait Run { fn run(&self); }
impl Run for Engine {
    fn run(&self) {}
}
impl Engine {
    fn helper(&self) {}
}
"#;
        let parsed = parse(src);
        let run = parsed
            .declarations
            .iter()
            .find(|d| d.name == "run" && d.parent.as_deref() == Some("Engine"))
            .expect("trait impl method");
        assert_eq!(run.kind, EntityKind::Method);
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "helper" && d.parent.as_deref() == Some("Engine")));
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == EdgeKind::Implements
                && r.from_name == "Engine"
                && r.to_name == "Run"));
    }

    #[test]
    fn test_use_imports() {
        let src = "use std::collections::{HashMap, HashSet};\nuse serde::Serialize;\n";
        let parsed = parse(src);
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].module, "std::collections");
        assert_eq!(parsed.imports[0].names, vec!["HashMap", "HashSet"]);
        assert_eq!(parsed.imports[1].names, vec!["Serialize"]);
    }
}
