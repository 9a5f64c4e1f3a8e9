//! Python fallback parser.
//!
//! Extracts functions, classes with methods, module-level assignments,
//! imports (`import x`, `from x import y`), base classes, and
//! docstrings.

use crate::error::LatticeResult;
use crate::types::{EdgeKind, EntityKind, Language};

use super::{
    line_span, node_text, parse_tree, signature_of, LanguagePlugin, ParsedFile, RawDeclaration,
    RawImport, RawRelation,
};

/// Plugin for Python source files.
pub struct PythonPlugin;

impl LanguagePlugin for PythonPlugin {
    fn language(&self) -> Language {
        Language::Python
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
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
                extract_function(child, source, parent, parsed);
            }
            "class_definition" => {
                extract_class(child, source, parent, parsed);
            }
            "decorated_definition" => {
                // The decorator wraps the real definition; recurse into it
                // so the declaration's span starts at the decorator.
                if let Some(definition) = child.child_by_field_name("definition") {
                    match definition.kind() {
                        "function_definition" => {
                            extract_function(definition, source, parent, parsed);
                        }
                        "class_definition" => extract_class(definition, source, parent, parsed),
                        _ => {}
                    }
                }
            }
            "import_statement" | "import_from_statement" => {
                extract_import(child, source, parsed);
            }
            "expression_statement" | "block" | "module" => {
                walk(child, source, parent, parsed);
            }
            _ => {}
        }
    }
}

fn extract_function(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    parent: Option<&str>,
    parsed: &mut ParsedFile,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let kind = if parent.is_some() {
        EntityKind::Method
    } else {
        EntityKind::Function
    };
    let (start_line, end_line) = line_span(node);
    parsed.declarations.push(RawDeclaration {
        name,
        kind,
        parent: parent.map(String::from),
        start_line,
        end_line,
        signature: signature_of(node, source),
        body: node_text(node, source).to_string(),
        documentation: docstring(node, source),
    });
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
    let name = node_text(name_node, source).to_string();

    // Base classes: class Dog(Animal, Mixin)
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        let mut cursor = superclasses.walk();
        for base in superclasses.children(&mut cursor) {
            if matches!(base.kind(), "identifier" | "attribute") {
                parsed.relations.push(RawRelation {
                    from_name: name.clone(),
                    to_name: node_text(base, source).to_string(),
                    kind: EdgeKind::Extends,
                });
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
        documentation: docstring(node, source),
    });

    if let Some(body) = node.child_by_field_name("body") {
        walk(body, source, Some(&name), parsed);
    }
}

/// First statement of a body when it is a string literal.
fn docstring(node: tree_sitter::Node<'_>, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = node_text(expr, source);
    let cleaned = raw
        .trim_start_matches("r\"\"\"")
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn extract_import(node: tree_sitter::Node<'_>, source: &[u8], parsed: &mut ParsedFile) {
    let line = node.start_position().row as u32 + 1;
    if node.kind() == "import_from_statement" {
        let module = node
            .child_by_field_name("module_name")
            .map(|m| node_text(m, source).to_string())
            .unwrap_or_default();
        let mut names = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "dotted_name" {
                let text = node_text(child, source).to_string();
                if text != module {
                    names.push(text);
                }
            } else if child.kind() == "aliased_import" {
                if let Some(alias) = child.child_by_field_name("alias") {
                    names.push(node_text(alias, source).to_string());
                }
            }
        }
        parsed.imports.push(RawImport { module, names, line });
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "dotted_name" {
                parsed.imports.push(RawImport {
                    module: node_text(child, source).to_string(),
                    names: Vec::new(),
                    line,
                });
            } else if child.kind() == "aliased_import" {
                if let (Some(name), Some(alias)) = (
                    child.child_by_field_name("name"),
                    child.child_by_field_name("alias"),
                ) {
                    parsed.imports.push(RawImport {
                        module: node_text(name, source).to_string(),
                        names: vec![node_text(alias, source).to_string()],
                        line,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParsedFile {
        PythonPlugin
            .extract(src.as_bytes(), "test.py")
            .expect("parse should succeed")
    }

    #[test]
    fn test_simple_function_with_docstring() {
        let src = "def greet(name):\n    \"\"\"Say hello.\"\"\"\n    return name\n";
        let parsed = parse(src);
        assert_eq!(parsed.declarations.len(), 1);
        let func = &parsed.declarations[0];
        assert_eq!(func.name, "greet");
        assert_eq!(func.kind, EntityKind::Function);
        assert_eq!(func.documentation.as_deref(), Some("Say hello."));
    }

    #[test]
    fn test_class_with_methods() {
        let src = r#"
class UserService:
    """Service for managing users."""

    def __init__(self, db):
        self.db = db

    def get_user(self, user_id):
        return self.db.find(user_id)
"#;
        let parsed = parse(src);
        let class = parsed
            .declarations
            .iter()
            .find(|d| d.name == "UserService")
            .expect("class");
        assert_eq!(class.kind, EntityKind::Class);
        assert_eq!(
            class.documentation.as_deref(),
            Some("Service for managing users.")
        );

        let method = parsed
            .declarations
            .iter()
            .find(|d| d.name == "get_user")
            .expect("method");
        assert_eq!(method.kind, EntityKind::Method);
        assert_eq!(method.parent.as_deref(), Some("UserService"));
    }

    #[test]
    fn test_inheritance_relation() {
        let parsed = parse("class Dog(Animal):\n    pass\n");
        assert_eq!(parsed.relations.len(), 1);
        assert_eq!(parsed.relations[0].to_name, "Animal");
        assert_eq!(parsed.relations[0].kind, EdgeKind::Extends);
    }

    #[test]
    fn test_decorated_function() {
        let src = "@app.route('/users')\ndef list_users():\n    pass\n";
        let parsed = parse(src);
        assert_eq!(parsed.declarations.len(), 1);
        assert_eq!(parsed.declarations[0].name, "list_users");
    }

    #[test]
    fn test_imports() {
        let src = "import os.path\nfrom collections import OrderedDict\n";
        let parsed = parse(src);
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].module, "os.path");
        assert_eq!(parsed.imports[1].module, "collections");
        assert_eq!(parsed.imports[1].names, vec!["OrderedDict"]);
    }
}
