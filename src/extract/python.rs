//! Python extractor using tree-sitter-python.

use tree_sitter::Node;

use super::{field_text, Definition, LanguageExtractor};
use crate::hierarchy::EntityKind;

/// Python language extractor.
pub struct PythonExtractor;

impl PythonExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language_name(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &["py"]
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn definition(&self, node: Node<'_>, source: &[u8]) -> Option<Definition> {
        let kind = match node.kind() {
            "function_definition" => EntityKind::Function,
            "class_definition" => EntityKind::Class,
            _ => return None,
        };
        field_text(node, "name", source).map(|name| Definition::new(kind, name))
    }

    fn is_identifier(&self, kind: &str) -> bool {
        kind == "identifier"
    }
}
