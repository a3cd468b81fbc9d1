//! Prompt construction for a single generation job.

use std::fmt::Write as _;

use serde::Serialize;

use crate::hierarchy::{Entity, EntityKind, Hierarchy};

/// Finalized documentation of one callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalleeDoc {
    pub qualified_path: String,
    pub name: String,
    pub doc: String,
}

/// Everything a backend sees for one entity.
///
/// Built from the entity's own source and its callees' finalized text only,
/// so two jobs for the same content and callee docs get the same prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    pub qualified_path: String,
    pub name: String,
    pub kind: EntityKind,
    pub file_path: String,
    pub code: String,
    pub content_hash: String,
    pub callees: Vec<CalleeDoc>,
    pub language: String,
}

impl PromptContext {
    /// Snapshot the prompt inputs for `entity`.
    ///
    /// Callees without finalized documentation are left out; callees are
    /// ordered by qualified path.
    #[must_use]
    pub fn from_entity(hierarchy: &Hierarchy, entity: &Entity, language: &str) -> Self {
        let mut callees: Vec<CalleeDoc> = entity
            .outgoing_refs()
            .iter()
            .filter_map(|id| hierarchy.entity(id))
            .filter_map(|callee| {
                callee.doc_text().map(|doc| CalleeDoc {
                    qualified_path: callee.qualified_path.clone(),
                    name: callee.name.clone(),
                    doc: doc.to_string(),
                })
            })
            .collect();
        callees.sort_by(|a, b| a.qualified_path.cmp(&b.qualified_path));

        Self {
            qualified_path: entity.qualified_path.clone(),
            name: entity.name.clone(),
            kind: entity.kind,
            file_path: entity.file_path.clone(),
            code: entity.code.clone(),
            content_hash: entity.content_hash.clone(),
            callees,
            language: language.to_string(),
        }
    }

    /// System instructions for chat-style backends.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        format!(
            "You are an expert technical writer documenting source code. \
             Write concise, accurate documentation in {}. \
             Describe what the code does, its {} and how it relates to the code it calls. \
             Do not invent behaviour that is not visible in the code.",
            self.language,
            self.parameters_or_attributes()
        )
    }

    /// User prompt text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.code.len() + 512);
        let _ = writeln!(
            out,
            "Document the {} `{}` defined in `{}` (object path `{}`).",
            self.kind_label(),
            self.name,
            self.file_path,
            self.qualified_path
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Raw code:");
        let _ = writeln!(out, "{}", self.code);

        if !self.callees.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "The code calls the following objects:");
            for callee in &self.callees {
                let _ = writeln!(out, "obj: {}", callee.qualified_path);
                let _ = writeln!(out, "Document:");
                let _ = writeln!(out, "{}", callee.doc);
                let _ = writeln!(out, "{}", "=".repeat(10));
            }
            let _ = writeln!(
                out,
                "Include the relationship with these callees where it helps the reader."
            );
        }

        let _ = writeln!(out);
        let _ = write!(
            out,
            "Start with a one-sentence summary of the {}, then describe its {} and behaviour. \
             Answer in {}.",
            self.kind_label(),
            self.parameters_or_attributes(),
            self.language
        );
        out
    }

    const fn kind_label(&self) -> &'static str {
        match self.kind {
            EntityKind::Module => "module",
            EntityKind::Class => "type",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
        }
    }

    const fn parameters_or_attributes(&self) -> &'static str {
        match self.kind {
            EntityKind::Class | EntityKind::Module => "attributes",
            EntityKind::Function | EntityKind::Method => "parameters",
        }
    }
}
