use crate::error::LlmError;
use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt, PromptError};
use rig::prelude::*;
use rig::providers::{gemini, groq, openai};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// A single completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u64,
    pub temperature: f64,
    /// Expected JSON shape. Backends with a JSON mode enforce it; the others
    /// get it only through the prompt text.
    pub json_schema: Option<Value>,
}

/// Completion capability. Implementations own their transport concerns
/// (timeouts, retries); callers only see success or a classified `LlmError`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;

    fn supports_json_mode(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    Gemini,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "deepseek-r1-distill-llama-70b",
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::OpenAi => "gpt-4o-mini",
        }
    }
}

#[derive(Clone)]
enum ProviderClient {
    Groq(groq::Client),
    Gemini(gemini::Client),
    OpenAi(openai::Client),
}

/// Backend over the rig provider clients. The provider is fixed at
/// construction; the API key is passed in explicitly.
#[derive(Clone)]
pub struct RigBackend {
    client: ProviderClient,
    provider: LlmProvider,
    model: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl RigBackend {
    pub fn new(provider: LlmProvider, api_key: &str, model: impl Into<String>) -> Self {
        let client = match provider {
            LlmProvider::Groq => ProviderClient::Groq(groq::Client::new(api_key)),
            LlmProvider::Gemini => ProviderClient::Gemini(gemini::Client::new(api_key)),
            LlmProvider::OpenAi => ProviderClient::OpenAi(openai::Client::new(api_key)),
        };
        Self {
            client,
            provider,
            model: model.into(),
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per request, at least one.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn json_mode_params(&self, request: &LlmRequest) -> Option<Value> {
        if request.json_schema.is_some() && self.supports_json_mode() {
            Some(json!({ "response_format": { "type": "json_object" } }))
        } else {
            None
        }
    }

    async fn complete_once(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let params = self.json_mode_params(request);
        let call = async {
            match &self.client {
                ProviderClient::Groq(client) => {
                    prompt_agent(client.agent(&self.model), request, params).await
                }
                ProviderClient::Gemini(client) => {
                    prompt_agent(client.agent(&self.model), request, params).await
                }
                ProviderClient::OpenAi(client) => {
                    prompt_agent(client.agent(&self.model), request, params).await
                }
            }
        };

        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| classify_prompt_error(self.provider, e))?;

        if response.trim().is_empty() {
            return Err(LlmError::MalformedResponse {
                message: "empty completion".to_string(),
            });
        }
        Ok(response)
    }
}

async fn prompt_agent<M>(
    builder: AgentBuilder<M>,
    request: &LlmRequest,
    params: Option<Value>,
) -> Result<String, PromptError>
where
    M: CompletionModel,
{
    let mut builder = builder
        .preamble(&request.system)
        .max_tokens(request.max_tokens)
        .temperature(request.temperature);
    if let Some(params) = params {
        builder = builder.additional_params(params);
    }
    let agent = builder.build();
    agent.prompt(request.prompt.as_str()).await
}

fn classify_prompt_error(provider: LlmProvider, err: PromptError) -> LlmError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("invalid api key")
    {
        LlmError::Auth {
            provider: provider.as_str().to_string(),
        }
    } else if lowered.contains("429") || lowered.contains("rate limit") {
        LlmError::RateLimited {
            provider: provider.as_str().to_string(),
        }
    } else if lowered.contains("json") || lowered.contains("deserializ") {
        LlmError::MalformedResponse { message }
    } else {
        LlmError::Request { message }
    }
}

#[async_trait]
impl LlmBackend for RigBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let mut attempt = 1;
        loop {
            match self.complete_once(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        provider = self.provider.as_str(),
                        attempt,
                        max_retries = self.max_retries,
                        "LLM request failed: {}; retrying",
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Gemini's generation config is not reachable through rig's additional
    // params without clobbering it, so it gets prompt-level JSON only.
    fn supports_json_mode(&self) -> bool {
        matches!(self.provider, LlmProvider::Groq | LlmProvider::OpenAi)
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

/// Recover a JSON value from a model response: the whole text, a fenced code
/// block, or the outermost `{...}` span, after dropping any `<think>` block.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let text = strip_reasoning(raw);

    let mut candidates = vec![text.trim().to_string()];
    if let Some(fenced) = fenced_block(text) {
        candidates.push(fenced);
    }
    if let Some(object) = outermost_object(text) {
        candidates.push(object);
    }

    let mut last_error = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }

    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no JSON found".to_string());
    debug!("Unparsable model response: {}", raw);
    Err(LlmError::MalformedResponse { message })
}

pub(crate) fn strip_reasoning(raw: &str) -> &str {
    match raw.find("</think>") {
        Some(end) => &raw[end + "</think>".len()..],
        None => raw,
    }
}

fn fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the opening fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

fn outermost_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        learnings: Vec<String>,
    }

    #[test]
    fn parses_plain_json() {
        let parsed: Sample = parse_json_response(r#"{"learnings": ["a"]}"#).unwrap();
        assert_eq!(parsed.learnings, vec!["a"]);
    }

    #[test]
    fn parses_fenced_json_with_language_tag() {
        let raw = "Here you go:\n```json\n{\"learnings\": [\"a\", \"b\"]}\n```\nDone.";
        let parsed: Sample = parse_json_response(raw).unwrap();
        assert_eq!(parsed.learnings, vec!["a", "b"]);
    }

    #[test]
    fn parses_json_embedded_in_prose_after_reasoning() {
        let raw = "<think>the user wants {json}</think>Sure! {\"learnings\": [\"c\"]} hope it helps";
        let parsed: Sample = parse_json_response(raw).unwrap();
        assert_eq!(parsed.learnings, vec!["c"]);
    }

    #[test]
    fn reports_malformed_response() {
        let err = parse_json_response::<Sample>("no structure here").unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse { .. }));
    }

    #[test]
    fn gemini_has_no_json_mode() {
        let gemini = RigBackend::new(LlmProvider::Gemini, "key", "gemini-2.0-flash");
        let groq = RigBackend::new(LlmProvider::Groq, "key", "llama-3.3-70b-versatile");
        assert!(!gemini.supports_json_mode());
        assert!(groq.supports_json_mode());

        let request = LlmRequest {
            system: String::new(),
            prompt: String::new(),
            max_tokens: 16,
            temperature: 0.0,
            json_schema: Some(json!({"type": "object"})),
        };
        assert!(gemini.json_mode_params(&request).is_none());
        assert!(groq.json_mode_params(&request).is_some());
    }

    #[test]
    fn provider_names_round_trip_through_serde() {
        let provider: LlmProvider = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(provider, LlmProvider::Gemini);
        assert_eq!(provider.as_str(), "gemini");
    }
}
