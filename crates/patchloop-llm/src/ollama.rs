//! Ollama-compatible HTTP chat backend.
//!
//! Issues a single non-streaming `POST <base_url>/api/chat` per generation.
//! The HTTP client is async; a private current-thread runtime drives it so the
//! rest of the engine stays synchronous.

use patchloop_utils::error::LlmError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::types::{Generator, Message};

pub struct OllamaGenerator {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaGenerator {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the model is empty or the HTTP
    /// client or runtime cannot be built.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        if model.trim().is_empty() {
            return Err(LlmError::Misconfiguration(
                "llm.model must name an Ollama model".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("HTTP client: {e}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("async runtime: {e}")))?;

        Ok(Self {
            client,
            runtime,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chat(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Ollama response: {e}")))?;
        let message = parsed.message.ok_or_else(|| {
            LlmError::InvalidResponse("Ollama response has no message".to_string())
        })?;
        Ok(message.content.trim().to_string())
    }

    fn classify(&self, error: &reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout {
                duration: self.timeout,
            }
        } else {
            LlmError::Transport(format!("{}: {error}", self.endpoint))
        }
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        debug!(
            provider = "ollama",
            model = %self.model,
            endpoint = %self.endpoint,
            timeout_secs = self.timeout.as_secs(),
            "Invoking Ollama backend"
        );
        let messages = vec![Message::system(system), Message::user(user)];
        self.runtime.block_on(self.chat(messages))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
