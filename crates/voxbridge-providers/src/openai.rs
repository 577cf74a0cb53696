//! OpenAI Chat Completions API client.
//!
//! Issues one non-streaming `/v1/chat/completions` request per prompt. Works
//! against any OpenAI-compatible endpoint via `completion.base_url`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use voxbridge_core::config::CompletionConfig;

use crate::CompletionClient;

pub struct OpenAiCompletionClient {
    pub base_url: String,
    pub model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompletionClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(&config.base_url, &config.model, config.resolve_api_key())
    }

    async fn request(&self, prompt: &str) -> anyhow::Result<String> {
        let body = ChatRequest::user_prompt(&self.model, prompt);

        debug!(model = %body.model, base_url = %self.base_url, "Requesting completion");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("authorization", format!("Bearer {api_key}"));
        }

        let response = req_builder.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        let parsed: ChatResponse = response.json().await?;
        Ok(parsed.first_content())
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatRequest {
    fn user_prompt(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    fn id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> String {
        match self.request(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%e, "Completion failed, speaking nothing this turn");
                String::new()
            }
        }
    }
}
