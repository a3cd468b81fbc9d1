//! Entity extraction from syntax trees.
//!
//! Each supported language implements [`LanguageExtractor`], which only
//! classifies nodes. The shared walker in this module turns those
//! classifications into ordered [`EntityDraft`]s with spans, nesting,
//! content hashes, and the identifiers used inside each entity.

pub mod go;
pub mod python;
pub mod rust;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use tree_sitter::{Node, Parser};

use crate::error::ParseError;
use crate::hierarchy::{content_hash, EntityKind, Span};

/// A definition node recognised by a language extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub kind: EntityKind,
    pub name: String,
    /// Type the definition is attached to when it is declared outside it (Go methods).
    pub owner: Option<String>,
}

impl Definition {
    #[must_use]
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            owner: None,
        }
    }
}

/// Per-language node classification.
pub trait LanguageExtractor: Send + Sync {
    /// Returns the human-readable language name.
    fn language_name(&self) -> &str;

    /// Returns the file extensions this extractor handles.
    fn file_extensions(&self) -> &[&str];

    /// Returns the tree-sitter Language for configuring the parser.
    fn tree_sitter_language(&self) -> tree_sitter::Language;

    /// Classify `node` as a documentable definition.
    fn definition(&self, node: Node<'_>, source: &[u8]) -> Option<Definition>;

    /// Name of a scope that qualifies nested definitions without being an
    /// entity itself (a Rust `impl` block).
    fn scope_name(&self, _node: Node<'_>, _source: &[u8]) -> Option<String> {
        None
    }

    /// Whether nodes of this kind are identifier usages.
    fn is_identifier(&self, kind: &str) -> bool;
}

/// An entity discovered by a scan, before it is matched against the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub name: String,
    pub qualified_path: String,
    /// Index of the enclosing draft in the same file.
    pub parent: Option<usize>,
    pub span: Span,
    pub content_hash: String,
    pub code: String,
    /// Identifiers used directly inside this entity (not inside nested definitions).
    pub identifiers: BTreeSet<String>,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExtraction {
    pub path: String,
    pub file_hash: String,
    /// Drafts in document order; the file's module entity comes first.
    pub drafts: Vec<EntityDraft>,
}

/// Returns every built-in extractor.
#[must_use]
pub fn all_extractors() -> Vec<Box<dyn LanguageExtractor>> {
    vec![
        Box::new(python::PythonExtractor::new()),
        Box::new(rust::RustExtractor::new()),
        Box::new(go::GoExtractor::new()),
    ]
}

/// Selects an extractor by file extension.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn LanguageExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}

impl ExtractorRegistry {
    /// Create a registry with all built-in extractors.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: all_extractors(),
        }
    }

    #[must_use]
    pub fn languages(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.language_name()).collect()
    }

    /// Find the extractor for `path`'s extension.
    #[must_use]
    pub fn for_path(&self, path: &str) -> Option<&dyn LanguageExtractor> {
        let ext = Path::new(path).extension().and_then(|e| e.to_str())?;
        self.extractors
            .iter()
            .find(|e| {
                e.file_extensions()
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .map(AsRef::as_ref)
    }

    /// Extract drafts from a file's bytes.
    ///
    /// An unsupported extension yields no drafts.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the content is not UTF-8, the grammar
    /// cannot be loaded, or the syntax tree contains errors.
    pub fn extract(&self, rel_path: &str, bytes: &[u8]) -> Result<Vec<EntityDraft>, ParseError> {
        match self.for_path(rel_path) {
            Some(extractor) => extract(extractor, rel_path, bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Read `rel_path` under `root` and extract it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Unreadable`] if the file cannot be read, or any
    /// error from [`extract`](Self::extract).
    pub fn extract_file(&self, root: &Path, rel_path: &str) -> Result<FileExtraction, ParseError> {
        let bytes = std::fs::read(root.join(rel_path)).map_err(|e| ParseError::Unreadable {
            path: rel_path.to_string(),
            reason: e.to_string(),
        })?;
        let drafts = self.extract(rel_path, &bytes)?;
        Ok(FileExtraction {
            path: rel_path.to_string(),
            file_hash: content_hash(&bytes),
            drafts,
        })
    }
}

/// Parse `bytes` with `extractor` and walk the tree into drafts.
///
/// # Errors
///
/// Returns a [`ParseError`] if the content is not UTF-8, the grammar cannot
/// be loaded, or the syntax tree contains errors.
pub fn extract(
    extractor: &dyn LanguageExtractor,
    rel_path: &str,
    bytes: &[u8],
) -> Result<Vec<EntityDraft>, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Encoding {
        path: rel_path.to_string(),
    })?;

    let mut parser = Parser::new();
    parser
        .set_language(&extractor.tree_sitter_language())
        .map_err(|e| ParseError::Grammar {
            language: extractor.language_name().to_string(),
            reason: e.to_string(),
        })?;
    let tree = parser.parse(text, None).ok_or_else(|| ParseError::Syntax {
        path: rel_path.to_string(),
        line: 1,
    })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ParseError::Syntax {
            path: rel_path.to_string(),
            line: first_error_line(root),
        });
    }

    let module_name = Path::new(rel_path)
        .file_stem()
        .map_or_else(|| rel_path.to_string(), |s| s.to_string_lossy().into_owned());
    let module = EntityDraft {
        kind: EntityKind::Module,
        name: module_name,
        qualified_path: rel_path.to_string(),
        parent: None,
        span: Span {
            start_byte: 0,
            end_byte: text.len(),
            start_line: 1,
            end_line: text.lines().count().max(1),
        },
        content_hash: content_hash(bytes),
        code: text.to_string(),
        identifiers: BTreeSet::new(),
    };

    let mut walker = Walker {
        extractor,
        source: bytes,
        text,
        rel_path,
        drafts: vec![module],
        seen: HashMap::new(),
    };
    let mut scope = Vec::new();
    walker.visit(root, &mut scope, 0, false);
    Ok(walker.drafts)
}

struct Walker<'a> {
    extractor: &'a dyn LanguageExtractor,
    source: &'a [u8],
    text: &'a str,
    rel_path: &'a str,
    drafts: Vec<EntityDraft>,
    seen: HashMap<(EntityKind, String), usize>,
}

impl Walker<'_> {
    fn visit(&mut self, node: Node<'_>, scope: &mut Vec<String>, owner: usize, in_type: bool) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(definition) = self.extractor.definition(child, self.source) {
                let kind = match definition.kind {
                    EntityKind::Function if in_type || definition.owner.is_some() => {
                        EntityKind::Method
                    }
                    other => other,
                };
                let index = self.push_draft(child, kind, &definition, scope, owner);

                scope.extend(definition.owner.iter().cloned());
                scope.push(definition.name.clone());
                self.visit(child, scope, index, kind == EntityKind::Class);
                scope.pop();
                if definition.owner.is_some() {
                    scope.pop();
                }
            } else if let Some(name) = self.extractor.scope_name(child, self.source) {
                scope.push(name);
                self.visit(child, scope, owner, true);
                scope.pop();
            } else if self.extractor.is_identifier(child.kind()) {
                if let Ok(ident) = child.utf8_text(self.source) {
                    self.drafts[owner].identifiers.insert(ident.to_string());
                }
            } else {
                self.visit(child, scope, owner, in_type);
            }
        }
    }

    fn push_draft(
        &mut self,
        node: Node<'_>,
        kind: EntityKind,
        definition: &Definition,
        scope: &[String],
        owner: usize,
    ) -> usize {
        let mut segments: Vec<&str> = scope.iter().map(String::as_str).collect();
        if let Some(owner_type) = &definition.owner {
            segments.push(owner_type.as_str());
        }
        segments.push(definition.name.as_str());
        let mut qualified_path = format!("{}::{}", self.rel_path, segments.join("::"));

        let occurrences = self.seen.entry((kind, qualified_path.clone())).or_insert(0);
        *occurrences += 1;
        if *occurrences > 1 {
            qualified_path = format!("{qualified_path}#{occurrences}");
        }

        let span = Span {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        };
        let code = self
            .text
            .get(span.start_byte..span.end_byte)
            .unwrap_or_default()
            .to_string();

        self.drafts.push(EntityDraft {
            kind,
            name: definition.name.clone(),
            qualified_path,
            parent: Some(owner),
            span,
            content_hash: content_hash(code.as_bytes()),
            code,
            identifiers: BTreeSet::new(),
        });
        self.drafts.len() - 1
    }
}

/// Text of one of `node`'s fields.
pub(crate) fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

/// First descendant (preorder) of `node` with the given kind.
pub(crate) fn find_descendant<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == kind {
            return Some(current);
        }
        let mut cursor = current.walk();
        let children: Vec<Node<'t>> = current.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn first_error_line(root: Node<'_>) -> usize {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return node.start_position().row + 1;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    root.start_position().row + 1
}
