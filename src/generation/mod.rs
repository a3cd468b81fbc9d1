//! Text-generation collaborators.
//!
//! A [`Generator`] turns a [`PromptContext`] into documentation text. The
//! scheduler only awaits the returned future; retries, timeouts and
//! cancellation are handled around it.

mod openai;
mod placeholder;
mod prompt;

pub use openai::{OpenAiGenerator, API_KEY_ENV, FALLBACK_API_KEY_ENV};
pub use placeholder::PlaceholderGenerator;
pub use prompt::{CalleeDoc, PromptContext};

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::GenerationError;
use crate::{Config, Result};

/// Produces documentation text for one entity.
pub trait Generator: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Generate documentation for `ctx`.
    fn generate<'a>(
        &'a self,
        ctx: &'a PromptContext,
    ) -> BoxFuture<'a, std::result::Result<String, GenerationError>>;
}

/// Build the generator selected by configuration.
///
/// `dry_run` selects the deterministic placeholder backend.
///
/// # Errors
///
/// Returns a configuration error if the network backend has no API key or
/// its HTTP client cannot be built.
pub fn build_generator(config: &Config, dry_run: bool) -> Result<Arc<dyn Generator>> {
    if dry_run {
        tracing::info!("Dry run: using placeholder generator");
        return Ok(Arc::new(PlaceholderGenerator::new()));
    }
    let generator = OpenAiGenerator::from_env(config)?;
    tracing::info!(model = %config.model, base_url = %config.base_url, "Using OpenAI-compatible generator");
    Ok(Arc::new(generator))
}
