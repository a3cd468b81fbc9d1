//! Rust extractor using tree-sitter-rust.

use tree_sitter::Node;

use super::{field_text, Definition, LanguageExtractor};
use crate::hierarchy::EntityKind;

/// Rust language extractor.
pub struct RustExtractor;

impl RustExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for RustExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for RustExtractor {
    fn language_name(&self) -> &str {
        "rust"
    }

    fn file_extensions(&self) -> &[&str] {
        &["rs"]
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn definition(&self, node: Node<'_>, source: &[u8]) -> Option<Definition> {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" => EntityKind::Function,
            "struct_item" | "enum_item" | "union_item" | "trait_item" => EntityKind::Class,
            // `mod foo;` declarations are documented through their own file.
            "mod_item" if node.child_by_field_name("body").is_some() => EntityKind::Module,
            _ => return None,
        };
        field_text(node, "name", source).map(|name| Definition::new(kind, name))
    }

    fn scope_name(&self, node: Node<'_>, source: &[u8]) -> Option<String> {
        if node.kind() != "impl_item" {
            return None;
        }
        let ty = field_text(node, "type", source)?;
        let base = ty.split('<').next().unwrap_or(&ty).trim();
        let base = base.rsplit("::").next().unwrap_or(base);
        Some(base.to_string())
    }

    fn is_identifier(&self, kind: &str) -> bool {
        matches!(kind, "identifier" | "type_identifier" | "field_identifier")
    }
}
