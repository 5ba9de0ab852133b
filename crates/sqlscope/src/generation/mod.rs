use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::GenerationSettings;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("generation backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation backend response could not be decoded: {0}")]
    Decode(String),

    #[error("generation backend returned no content")]
    EmptyResponse,
}

pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Sends `prompt` and returns the raw response text. Must give up once
    /// `timeout` has elapsed.
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError>;
}

pub struct OpenAiBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(settings: &GenerationSettings, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("failed to build HTTP client for the generation backend")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError> {
        let body = json!({
            "model": &self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut request = self.client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|error| classify(error, timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response
            .json::<ChatCompletion>()
            .map_err(|error| {
                if error.is_timeout() {
                    GenerationError::Timeout(timeout)
                } else {
                    GenerationError::Decode(error.to_string())
                }
            })?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Transport(error.to_string())
    }
}

#[derive(Debug, Default)]
pub struct FixedResponseBackend {
    response: String,
    last_prompt: Mutex<Option<String>>,
}

impl FixedResponseBackend {
    #[must_use]
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            last_prompt: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl GenerationBackend for FixedResponseBackend {
    fn name(&self) -> &str {
        "fixed"
    }

    fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, GenerationError> {
        *self
            .last_prompt
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(prompt.to_string());
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FixedResponseBackend, GenerationBackend, OpenAiBackend};
    use crate::config::GenerationSettings;

    #[test]
    fn endpoint_joins_base_url() {
        let settings = GenerationSettings {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..GenerationSettings::default()
        };
        let backend = OpenAiBackend::new(&settings, None).expect("client should build");
        assert_eq!(backend.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(backend.name(), "gpt-4o-mini");
    }

    #[test]
    fn fixed_backend_records_prompt() {
        let backend = FixedResponseBackend::new("```sql\nSELECT 1\n```");
        let answer = backend
            .generate("prompt text", Duration::from_secs(1))
            .expect("fixed backend never fails");

        assert_eq!(answer, "```sql\nSELECT 1\n```");
        assert_eq!(backend.last_prompt().as_deref(), Some("prompt text"));
    }
}
