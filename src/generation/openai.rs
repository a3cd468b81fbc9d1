//! OpenAI-compatible chat-completions backend.

use std::fmt;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};

use super::{Generator, PromptContext};
use crate::error::GenerationError;
use crate::{Config, Error, Result};

/// Primary environment variable holding the API key.
pub const API_KEY_ENV: &str = "REPODOC_API_KEY";

/// Fallback environment variable holding the API key.
pub const FALLBACK_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Generator backed by any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiGenerator {
    /// Create a generator for the configured model and endpoint.
    ///
    /// The per-job timeout is enforced by the scheduler, not the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &Config, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("repodoc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }

    /// Create a generator reading the API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if neither key variable is set.
    pub fn from_env(config: &Config) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .or_else(|_| std::env::var(FALLBACK_API_KEY_ENV))
            .map_err(|_| {
                Error::config(format!(
                    "no API key: set {API_KEY_ENV} or {FALLBACK_API_KEY_ENV}, or use --dry-run"
                ))
            })?;
        Self::new(config, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, ctx: &PromptContext) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": ctx.system_prompt() },
                { "role": "user", "content": ctx.render() },
            ],
        })
    }

    async fn complete(&self, ctx: &PromptContext) -> std::result::Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(ctx))
            .send()
            .await
            .map_err(|e| GenerationError::Backend(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "status {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("invalid response: {e}")))?;

        if let Some(tokens) = body.pointer("/usage/total_tokens").and_then(Value::as_u64) {
            tracing::debug!(entity = %ctx.qualified_path, tokens, "Generation usage");
        }

        extract_content(&body)
    }
}

/// Text of the first choice, trimmed.
fn extract_content(body: &Value) -> std::result::Result<String, GenerationError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text.to_string())
}

impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate<'a>(
        &'a self,
        ctx: &'a PromptContext,
    ) -> BoxFuture<'a, std::result::Result<String, GenerationError>> {
        self.complete(ctx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::EntityKind;

    fn context() -> PromptContext {
        PromptContext {
            qualified_path: "a.py::foo".to_string(),
            name: "foo".to_string(),
            kind: EntityKind::Function,
            file_path: "a.py".to_string(),
            code: "def foo(): pass".to_string(),
            content_hash: "h".to_string(),
            callees: Vec::new(),
            language: "English".to_string(),
        }
    }

    #[test]
    fn test_debug_hides_key() {
        let generator = OpenAiGenerator::new(&Config::default(), "sk-secret").unwrap();
        let debug = format!("{generator:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("gpt-4o-mini"));
    }

    #[test]
    fn test_endpoint_and_body() {
        let config = Config {
            base_url: "http://localhost:8000/v1/".to_string(),
            ..Config::default()
        };
        let generator = OpenAiGenerator::new(&config, "k").unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8000/v1/chat/completions");

        let body = generator.request_body(&context());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("def foo(): pass"));
    }

    #[test]
    fn test_extract_content() {
        let body = json!({ "choices": [ { "message": { "content": "  Does foo.\n" } } ] });
        assert_eq!(extract_content(&body).unwrap(), "Does foo.");

        let empty = json!({ "choices": [ { "message": { "content": "   " } } ] });
        assert_eq!(extract_content(&empty), Err(GenerationError::EmptyResponse));
        assert_eq!(extract_content(&json!({})), Err(GenerationError::EmptyResponse));
    }
}
