//! Ruby fallback parser.
//!
//! Extracts methods, classes (with superclass), modules, and
//! `require`/`require_relative` imports.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, preceding_comment, signature_of, LanguagePlugin, ParsedFile,
    RawDeclaration, RawImport, RawRelation,
};

/// Plugin for Ruby source files.
pub struct RubyPlugin;

impl LanguagePlugin for RubyPlugin {
    fn language(&self) -> Language {
        Language::Ruby
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_ruby::LANGUAGE.into()
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
            "method" | "singleton_method" => {
                let kind = if parent.is_some() {
                    EntityKind::Method
                } else {
                    EntityKind::Function
                };
                if let Some(decl) = super::declaration_from_node(child, source, kind, parent) {
                    parsed.declarations.push(decl);
                }
            }
            "class" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let name = node_text(name_node, source).to_string();
                    if let Some(superclass) = child.child_by_field_name("superclass") {
                        let base = node_text(superclass, source)
                            .trim_start_matches('<')
                            .trim()
                            .to_string();
                        if !base.is_empty() {
                            parsed.relations.push(RawRelation {
                                from_name: name.clone(),
                                to_name: base,
                                kind: EdgeKind::Extends,
                            });
                        }
                    }
                    let (start_line, end_line) = line_span(child);
                    parsed.declarations.push(RawDeclaration {
                        name: name.clone(),
                        kind: EntityKind::Class,
                        parent: parent.map(String::from),
                        start_line,
                        end_line,
                        signature: signature_of(child, source),
                        body: node_text(child, source).to_string(),
                        documentation: preceding_comment(child, source),
                    });
                    walk(child, source, Some(&name), parsed);
                }
            }
            "module" => {
                if let Some(decl) =
                    super::declaration_from_node(child, source, EntityKind::Module, parent)
                {
                    let name = decl.name.clone();
                    parsed.declarations.push(decl);
                    walk(child, source, Some(&name), parsed);
                }
            }
            "call" => {
                extract_require(child, source, parsed);
            }
            _ => {
                if child.child_count() > 0 && child.kind() != "string" {
                    walk(child, source, parent, parsed);
                }
            }
        }
    }
}

fn extract_require(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let Some(method) = node.child_by_field_name("method") else {
        return;
    };
    let method_name = node_text(method, source);
    if method_name != "require" && method_name != "require_relative" {
        return;
    }
    let Some(args) = node.child_by_field_name("arguments") else {
        return;
    };
    let mut cursor = args.walk();
    for arg in args.children(&mut cursor) {
        if arg.kind() == "string" {
            let module = node_text(arg, source)
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            if !module.is_empty() {
                parsed.imports.push(RawImport {
                    module,
                    names: Vec::new(),
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_and_methods() {
        let src = r#"
require 'json'

class OrderService < BaseService
  def total
    0
  end
end

def helper
end
"#;
        let parsed = RubyPlugin.extract(src.as_bytes(), "order.rb").expect("parse");
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "OrderService" && d.kind == EntityKind::Class));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "total"
                && d.kind == EntityKind::Method
                && d.parent.as_deref() == Some("OrderService")));
        assert!(parsed
            .declarations
            .iter()
            .any(|d| d.name == "helper" && d.kind == EntityKind::Function));
        assert!(parsed
            .relations
            .iter()
            .any(|r| r.kind == EdgeKind::Extends && r.to_name == "BaseService"));
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].module, "json");
    }
}
