//! Per-language fallback parsers built on tree-sitter.
//!
//! Each language registers a plugin that maps tree-sitter AST nodes to
//! raw declarations, imports, and inheritance relations. The indexer
//! materializes entities and edges from the raw output, so plugins stay
//! free of tenancy and keying concerns.
//!
//! Parsing is stateless and safe to run from rayon worker threads.

pub mod c;
pub mod cpp;
pub mod csharp;
pub mod go;
pub mod java;
pub mod javascript;
pub mod python;
pub mod ruby;
pub mod rust_lang;
pub mod typescript;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{LatticeError, LatticeResult};
use crate::types::{EdgeKind, EntityKind, Language};

/// A declaration extracted from a source file, before keying.
#[derive(Debug, Clone)]
pub struct RawDeclaration {
    /// Short name of the declaration.
    pub name: String,
    /// What kind of declaration this is.
    pub kind: EntityKind,
    /// Enclosing class/struct name for methods and nested types.
    pub parent: Option<String>,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Signature, as written.
    pub signature: String,
    /// Full source text of the declaration.
    pub body: String,
    /// Extracted doc comment, if present.
    pub documentation: Option<String>,
}

/// An import statement extracted from a source file.
#[derive(Debug, Clone)]
pub struct RawImport {
    /// Raw module path (`react`, `./utils`, `crate::config`).
    pub module: String,
    /// Specific names imported, when listed.
    pub names: Vec<String>,
    /// Line number of the import.
    pub line: u32,
}

/// A syntactically explicit inheritance relation.
#[derive(Debug, Clone)]
pub struct RawRelation {
    /// Name of the declaring type.
    pub from_name: String,
    /// Name of the extended/implemented type.
    pub to_name: String,
    /// `Extends` or `Implements`.
    pub kind: EdgeKind,
}

/// Everything a plugin extracts from one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Declarations found in the file.
    pub declarations: Vec<RawDeclaration>,
    /// Import statements.
    pub imports: Vec<RawImport>,
    /// Extends/implements relations.
    pub relations: Vec<RawRelation>,
}

/// Plugin interface for one language.
pub trait LanguagePlugin: Send + Sync {
    /// The language this plugin handles.
    fn language(&self) -> Language;

    /// The tree-sitter grammar for this language.
    fn grammar(&self) -> tree_sitter::Language;

    /// Extract declarations, imports, and relations from file bytes.
    fn extract(&self, source: &[u8], file_path: &str) -> LatticeResult<ParsedFile>;
}

/// Parse `source` with the plugin's grammar, mapping failures to
/// [`LatticeError::Parse`].
pub fn parse_tree(
    plugin: &dyn LanguagePlugin,
    source: &[u8],
    file_path: &str,
) -> LatticeResult<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&plugin.grammar())
        .map_err(|e| LatticeError::Parse {
            path: file_path.into(),
            message: format!("failed to set grammar: {e}"),
        })?;
    parser.parse(source, None).ok_or_else(|| LatticeError::Parse {
        path: file_path.into(),
        message: "tree-sitter returned None (timeout or cancellation)".into(),
    })
}

/// UTF-8 text of a node, lossy on invalid spans.
pub(crate) fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

/// First line of a node's text, used as the declaration signature.
pub(crate) fn signature_of(node: tree_sitter::Node<'_>, source: &[u8]) -> String {
    let text = node_text(node, source);
    let mut sig = text.lines().next().unwrap_or("").trim().to_string();
    sig.truncate(300);
    sig
}

/// 1-indexed start and end lines of a node.
pub(crate) fn line_span(node: tree_sitter::Node<'_>) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// Collect the text of preceding `//`- or `#`-style comment siblings.
pub(crate) fn preceding_comment(
    node: tree_sitter::Node<'_>,
    source: &[u8],
) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if !sibling.kind().contains("comment") {
            break;
        }
        let text = node_text(sibling, source)
            .trim_start_matches("///")
            .trim_start_matches("//")
            .trim_start_matches("/*")
            .trim_end_matches("*/")
            .trim_start_matches('#')
            .trim()
            .to_string();
        lines.push(text);
        current = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// Build a declaration from a node with a `name` field.
pub(crate) fn declaration_from_node(
    node: tree_sitter::Node<'_>,
    source: &[u8],
    kind: EntityKind,
    parent: Option<&str>,
) -> Option<RawDeclaration> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, source).to_string();
    if name.is_empty() {
        return None;
    }
    let (start_line, end_line) = line_span(node);
    Some(RawDeclaration {
        name,
        kind,
        parent: parent.map(String::from),
        start_line,
        end_line,
        signature: signature_of(node, source),
        body: node_text(node, source).to_string(),
        documentation: preceding_comment(node, source),
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get the global plugin registry.
pub fn global_registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Registry of language plugins.
pub struct Registry {
    plugins: HashMap<Language, Box<dyn LanguagePlugin>>,
}

impl Registry {
    fn new() -> Self {
        let mut plugins: HashMap<Language, Box<dyn LanguagePlugin>> = HashMap::new();
        plugins.insert(Language::Python, Box::new(python::PythonPlugin));
        plugins.insert(Language::TypeScript, Box::new(typescript::TypeScriptPlugin));
        plugins.insert(Language::JavaScript, Box::new(javascript::JavaScriptPlugin));
        plugins.insert(Language::Rust, Box::new(rust_lang::RustPlugin));
        plugins.insert(Language::Go, Box::new(go::GoPlugin));
        plugins.insert(Language::Java, Box::new(java::JavaPlugin));
        plugins.insert(Language::C, Box::new(c::CPlugin));
        plugins.insert(Language::Cpp, Box::new(cpp::CppPlugin));
        plugins.insert(Language::CSharp, Box::new(csharp::CSharpPlugin));
        plugins.insert(Language::Ruby, Box::new(ruby::RubyPlugin));
        Self { plugins }
    }

    /// Get the plugin for a language, if registered.
    pub fn get(&self, language: Language) -> Option<&dyn LanguagePlugin> {
        self.plugins.get(&language).map(|p| p.as_ref())
    }

    /// All registered languages.
    pub fn languages(&self) -> Vec<Language> {
        self.plugins.keys().copied().collect()
    }
}

/// Parse a file with the registered plugin for its language.
///
/// Files in unsupported languages produce an empty [`ParsedFile`]; the
/// indexer still materializes a bare file entity for them.
pub fn parse_file(source: &[u8], file_path: &str, language: Language) -> LatticeResult<ParsedFile> {
    match global_registry().get(language) {
        Some(plugin) => plugin.extract(source, file_path),
        None => Ok(ParsedFile::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_ten_languages() {
        let registry = global_registry();
        for language in [
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Rust,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::CSharp,
            Language::Ruby,
        ] {
            assert!(registry.get(language).is_some(), "missing plugin: {language}");
        }
        assert!(registry.get(Language::Unknown).is_none());
    }

    #[test]
    fn test_unknown_language_yields_empty_parse() {
        let parsed = parse_file(b"whatever", "file.xyz", Language::Unknown).expect("parse");
        assert!(parsed.declarations.is_empty());
        assert!(parsed.imports.is_empty());
    }
}
