//! Text-generation service boundary.
//!
//! Agents depend on the [`TextGenerator`] trait; [`ChatClient`] is the
//! production implementation against an OpenAI-compatible chat completions
//! endpoint (Groq by default).

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::io::config::{LlmConfig, ModelSettings};

/// One completion request.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub model: &'a str,
    pub temperature: f32,
    pub prompt: &'a str,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(settings: &'a ModelSettings, prompt: &'a str) -> Self {
        Self {
            model: &settings.model,
            temperature: settings.temperature,
            prompt,
        }
    }
}

/// Abstraction over the text-generation service to enable test doubles.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

/// API key read once at startup.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Read the credential from `var`. Missing or blank values are an error.
    pub fn from_env(var: &str) -> Result<Self> {
        let value = std::env::var(var)
            .map_err(|_| anyhow!("environment variable {var} is not set"))?;
        Self::new(value).with_context(|| format!("environment variable {var}"))
    }

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            bail!("credential is empty");
        }
        Ok(Self(value))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Blocking chat completions client.
#[derive(Debug)]
pub struct ChatClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    credential: Credential,
}

impl ChatClient {
    pub fn new(config: &LlmConfig, credential: Credential) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: chat_endpoint(&config.base_url),
            credential,
        })
    }
}

impl TextGenerator for ChatClient {
    #[instrument(skip_all, fields(model = request.model, prompt_chars = request.prompt.len()))]
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let body = chat_body(request);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.credential.expose())
            .json(&body)
            .send()
            .with_context(|| format!("send chat request to {}", self.endpoint))?;

        let status = response.status();
        let body = response.text().context("read chat response")?;
        let text = parse_response(status, &body)?;
        debug!(response_chars = text.len(), "chat completion received");
        Ok(text)
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn chat_body(request: &GenerationRequest<'_>) -> Value {
    json!({
        "model": request.model,
        "temperature": request.temperature,
        "messages": [
            { "role": "user", "content": request.prompt }
        ]
    })
}

const ERROR_BODY_LIMIT: usize = 500;

/// Check the status before decoding; error bodies are often not JSON.
fn parse_response(status: StatusCode, body: &str) -> Result<String> {
    if !status.is_success() {
        warn!(%status, "chat request rejected");
        bail!("chat request failed with {status}: {}", excerpt(body));
    }
    let payload: Value = serde_json::from_str(body)
        .with_context(|| format!("decode chat response: {}", excerpt(body)))?;
    completion_text(&payload)
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}

fn completion_text(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("chat response has no choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_chat_path_once() {
        assert_eq!(
            chat_endpoint("https://api.groq.com/openai/v1/"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:8080/v1"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn body_carries_model_temperature_and_prompt() {
        let settings = ModelSettings::new("qwen/qwen3-32b", 0.5);
        let body = chat_body(&GenerationRequest::new(&settings, "hello"));
        assert_eq!(body["model"], "qwen/qwen3-32b");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn extracts_first_choice_content() {
        let payload = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(completion_text(&payload).expect("text"), "hi");
        assert!(completion_text(&json!({"choices": []})).is_err());
    }

    #[test]
    fn rejected_status_reports_the_plain_text_body() {
        let err = parse_response(StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded\n")
            .expect_err("rejected");
        let message = format!("{err:#}");
        assert!(message.contains("503"));
        assert!(message.contains("upstream overloaded"));
    }

    #[test]
    fn rejected_status_bounds_long_bodies() {
        let body = "x".repeat(ERROR_BODY_LIMIT * 4);
        let err = parse_response(StatusCode::TOO_MANY_REQUESTS, &body).expect_err("rejected");
        assert!(format!("{err:#}").len() < ERROR_BODY_LIMIT * 2);
    }

    #[test]
    fn accepted_status_decodes_the_completion() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        assert_eq!(parse_response(StatusCode::OK, body).expect("text"), "ok");
        assert!(parse_response(StatusCode::OK, "<html>gateway</html>").is_err());
    }

    #[test]
    fn credential_rejects_blank_and_redacts_debug() {
        assert!(Credential::new("  ").is_err());
        let credential = Credential::new("secret-key").expect("credential");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    }
}
