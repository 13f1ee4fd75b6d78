//! Strategy providers.
//!
//! [`OpenAiStrategyProvider`] asks an OpenAI-compatible chat endpoint to
//! write a Rhai `extract_tools` function for a page it has not seen before.
//! The reply is free text, so the fenced code block is pulled out of it; the
//! caller is expected to run the result through the sandbox before trusting it.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::Source;
use crate::storage::StrategyProvider;
use crate::{CatalogError, Result};

/// Document preview length sent to the model (bytes).
const PREVIEW_BYTES: usize = 10_000;

const SYSTEM_PROMPT: &str = r#"You are an expert web scraper. Write a Rhai function that extracts MCP (Model Context Protocol) tools from a document.

The function must be named `extract_tools`, take the raw document text as its only parameter and return an array of object maps:

```rhai
fn extract_tools(html) {
    let tools = [];
    // ...
    tools.push(#{ name: "...", description: "...", url: "..." });
    tools
}
```

Only core Rhai and these helpers are available:
- regex_is_match(text, pattern) -> bool
- regex_find_all(text, pattern) -> array of strings
- regex_captures(text, pattern) -> array of arrays of groups (group 0 is the full match)
- regex_replace(text, pattern, replacement) -> string
- markdown_links(text) -> array of #{ text, url, rest }
- html_links(text) -> array of #{ text, href }
- strip_tags(html) -> string
- lines(text) -> array of strings

There is no network, file or environment access. Reply with a single fenced code block."#;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*\n(.*?)```").expect("static fenced block pattern")
});

static BARE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(fn\s+extract_tools\b.*)").expect("static bare function pattern")
});

/// Connection settings for [`OpenAiStrategyProvider`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Generates strategies with an OpenAI-compatible chat completion API.
#[derive(Debug, Clone)]
pub struct OpenAiStrategyProvider {
    client: Client,
    config: GeneratorConfig,
}

impl OpenAiStrategyProvider {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CatalogError::GenerationFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl StrategyProvider for OpenAiStrategyProvider {
    async fn generate(&self, source: &Source, document: &str) -> Result<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(CatalogError::GenerationFailed(
                "no API key configured for strategy generation".to_string(),
            ));
        };

        let preview = crate::fetcher::truncate_at_char_boundary(document.to_string(), PREVIEW_BYTES);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Generate a crawler function for: {}\n\nDocument preview:\n{}",
                        source.url, preview
                    ),
                },
            ],
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        tracing::info!(source_id = %source.id, url = %source.url, "Generating strategy");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CatalogError::GenerationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::GenerationFailed(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::GenerationFailed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CatalogError::GenerationFailed("empty completion".to_string()))?;

        extract_strategy(&content)
    }
}

/// Pull strategy text out of a model reply.
///
/// Prefers the first fenced block that defines `extract_tools`, then falls
/// back to everything from a bare `fn extract_tools` onward.
pub fn extract_strategy(reply: &str) -> Result<String> {
    let fenced = FENCED_BLOCK
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|code| code.contains("fn extract_tools"));

    if let Some(code) = fenced {
        return Ok(code.to_string());
    }

    BARE_FUNCTION
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('`').trim().to_string())
        .ok_or_else(|| {
            CatalogError::GenerationFailed(
                "reply does not contain an extract_tools function".to_string(),
            )
        })
}

/// Returns the same strategy text for every source.
#[derive(Debug, Clone)]
pub struct StaticStrategyProvider {
    implementation: String,
}

impl StaticStrategyProvider {
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
        }
    }
}

#[async_trait]
impl StrategyProvider for StaticStrategyProvider {
    async fn generate(&self, _source: &Source, _document: &str) -> Result<String> {
        Ok(self.implementation.clone())
    }
}
