//! Offline generator used for dry runs.

use futures::future::{BoxFuture, FutureExt};

use super::{Generator, PromptContext};
use crate::error::GenerationError;

/// Deterministic generator that never touches the network.
///
/// Output depends only on the entity and the callees it was given, so a dry
/// run exercises the full pipeline and store format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderGenerator;

impl PlaceholderGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Generator for PlaceholderGenerator {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn generate<'a>(
        &'a self,
        ctx: &'a PromptContext,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        let mut text = format!(
            "{} `{}` in `{}` (content {}).",
            ctx.kind,
            ctx.name,
            ctx.file_path,
            ctx.content_hash.get(..12).unwrap_or(&ctx.content_hash)
        );
        if !ctx.callees.is_empty() {
            let names: Vec<&str> = ctx.callees.iter().map(|c| c.name.as_str()).collect();
            text.push_str(&format!(" Calls {}.", names.join(", ")));
        }
        async move { Ok(text) }.boxed()
    }
}
