//! Go extractor using tree-sitter-go.

use tree_sitter::Node;

use super::{field_text, find_descendant, Definition, LanguageExtractor};
use crate::hierarchy::EntityKind;

/// Go language extractor.
pub struct GoExtractor;

impl GoExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for GoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageExtractor for GoExtractor {
    fn language_name(&self) -> &str {
        "go"
    }

    fn file_extensions(&self) -> &[&str] {
        &["go"]
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn definition(&self, node: Node<'_>, source: &[u8]) -> Option<Definition> {
        match node.kind() {
            "function_declaration" => {
                field_text(node, "name", source).map(|name| Definition::new(EntityKind::Function, name))
            }
            "method_declaration" => {
                let name = field_text(node, "name", source)?;
                let owner = node
                    .child_by_field_name("receiver")
                    .and_then(|receiver| find_descendant(receiver, "type_identifier"))
                    .and_then(|ty| ty.utf8_text(source).ok())
                    .map(str::to_string);
                Some(Definition {
                    kind: EntityKind::Method,
                    name,
                    owner,
                })
            }
            "type_spec" => {
                field_text(node, "name", source).map(|name| Definition::new(EntityKind::Class, name))
            }
            _ => None,
        }
    }

    fn is_identifier(&self, kind: &str) -> bool {
        matches!(kind, "identifier" | "type_identifier" | "field_identifier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;

    const SOURCE: &str = r"package store

type Store struct {
	items map[string]int
}

func NewStore() *Store {
	return &Store{items: map[string]int{}}
}

func (s *Store) Put(key string) {
	s.items[key] = count(s)
}

func count(s *Store) int {
	return len(s.items)
}
";

    #[test]
    fn test_extracts_declarations() {
        let drafts = extract(&GoExtractor::new(), "store/store.go", SOURCE.as_bytes()).unwrap();
        let summary: Vec<(EntityKind, &str)> = drafts
            .iter()
            .map(|d| (d.kind, d.qualified_path.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (EntityKind::Module, "store/store.go"),
                (EntityKind::Class, "store/store.go::Store"),
                (EntityKind::Function, "store/store.go::NewStore"),
                (EntityKind::Method, "store/store.go::Store::Put"),
                (EntityKind::Function, "store/store.go::count"),
            ]
        );
    }

    #[test]
    fn test_method_identifiers() {
        let drafts = extract(&GoExtractor::new(), "store/store.go", SOURCE.as_bytes()).unwrap();
        let put = &drafts[3];
        assert_eq!(put.name, "Put");
        assert!(put.identifiers.contains("count"));
        assert!(put.identifiers.contains("Store"));
    }
}
