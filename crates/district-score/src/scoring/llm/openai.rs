use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{LanguageModel, LlmError};

/// Client for an OpenAI-compatible `chat/completions` endpoint (OpenRouter by default).
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatibleModel {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

impl std::fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.request_body(prompt))
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        message_content(&text)
    }
}

fn message_content(response_text: &str) -> Result<String, LlmError> {
    let payload: Value = serde_json::from_str(response_text)
        .map_err(|err| LlmError::Format(format!("invalid JSON response: {err}")))?;

    payload
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            let preview: String = response_text.chars().take(200).collect();
            LlmError::Format(preview)
        })
}
