//! Language-model seam shared by the planner, evaluator, and extractor.
//!
//! Replies carry no guarantee of well-formed JSON, so every call site parses through
//! [`parse_json_reply`] and falls back to its own conservative default.

mod openai;
mod reply;

pub use openai::OpenAiCompatibleModel;
pub use reply::{extract_json_block, parse_json_reply};

use async_trait::async_trait;

/// Errors that can occur when calling a language model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("model returned status {0}")]
    Status(u16),
    #[error("unexpected response format: {0}")]
    Format(String),
    #[error("model request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Textual, non-streaming completion at deterministic temperature.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}
