//! Error types for the research pipeline.
//!
//! Per-item failures (search, fetch, extraction) are absorbed by the
//! orchestrator and only logged; `InvalidInput` and `Synthesis` reach the caller.

/// Errors surfaced by the research orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("invalid research input: {0}")]
    InvalidInput(String),

    #[error("planning failed: {0}")]
    Planning(#[source] LlmError),

    #[error("extraction failed: {0}")]
    Extraction(#[source] LlmError),

    #[error("report synthesis failed: {0}")]
    Synthesis(#[source] LlmError),
}

/// Errors from LLM backends. Variants are kept distinguishable so callers can
/// tell a timeout from bad credentials or an unusable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("rate limited by provider {provider}")]
    RateLimited { provider: String },

    #[error("request failed: {message}")]
    Request { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
}

impl LlmError {
    /// Whether the transport may try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout { .. } | LlmError::RateLimited { .. } | LlmError::Request { .. }
        )
    }
}

/// Errors from a search provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search provider returned status {status}")]
    Status { status: u16 },

    #[error("failed to parse search response: {0}")]
    Parse(String),

    #[error("search provider not configured: {0}")]
    NotConfigured(String),
}

/// Per-URL fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("http status {status}")]
    Status { status: u16 },

    #[error("request failed: {0}")]
    Request(String),

    #[error("unparsable content: {0}")]
    Unparsable(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("missing API key for {0}")]
    MissingApiKey(&'static str),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Timeout { timeout_secs: 5 }.is_retryable());
        assert!(LlmError::Request { message: "reset".into() }.is_retryable());
        assert!(!LlmError::Auth { provider: "groq".into() }.is_retryable());
        assert!(!LlmError::MalformedResponse { message: "x".into() }.is_retryable());
    }

    #[test]
    fn research_error_messages_include_cause() {
        let err = ResearchError::Synthesis(LlmError::Timeout { timeout_secs: 30 });
        assert_eq!(
            err.to_string(),
            "report synthesis failed: request timed out after 30s"
        );
    }
}
