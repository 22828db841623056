//! Service configuration.
//!
//! Layered with `figment`: built-in defaults, then `DEEP_RESEARCH_*`
//! environment variables (nested keys split on `__`), then provider API keys
//! from their conventional variables. Only the binary reads the environment;
//! everything below it receives explicit values.

use crate::error::ConfigError;
use crate::tasks::ResearchOptions;
use crate::tools::llm::LlmProvider;
use crate::tools::search::SafeSearch;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Falls back to the provider's default model.
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            model: None,
            api_key: None,
            timeout_secs: 120,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

impl LlmConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProvider {
    DuckDuckGo,
    Tavily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    pub max_results: usize,
    pub region: String,
    pub safe_search: SafeSearch,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchProvider::DuckDuckGo,
            max_results: 5,
            region: "wt-wt".to_string(),
            safe_search: SafeSearch::Moderate,
            timeout_secs: 15,
            api_key: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Defaults for requests that omit breadth/depth, plus the researcher's
/// limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub breadth: usize,
    pub depth: usize,
    pub concurrency_limit: usize,
    pub fetch_timeout_secs: u64,
    pub plan_token_budget: usize,
    pub page_token_budget: usize,
    pub report_token_budget: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            breadth: 3,
            depth: 3,
            concurrency_limit: 2,
            fetch_timeout_secs: 20,
            plan_token_budget: 25_000,
            page_token_budget: 25_000,
            report_token_budget: 150_000,
        }
    }
}

impl ResearchConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    /// Load from `.env`, the process environment and defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("DEEP_RESEARCH_").split("__"));
        Self::from_figment(figment, |name| std::env::var(name).ok())
    }

    /// Extract from `figment`, fill missing API keys through `lookup`, and
    /// validate.
    pub fn from_figment<F>(figment: Figment, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: AppConfig = figment.extract().map_err(Box::new)?;

        if config.llm.api_key.is_none() {
            let var = match config.llm.provider {
                LlmProvider::Groq => "GROQ_API_KEY",
                LlmProvider::Gemini => "GEMINI_API_KEY",
                LlmProvider::OpenAi => "OPENAI_API_KEY",
            };
            config.llm.api_key = lookup(var);
        }
        if config.search.provider == SearchProvider::Tavily && config.search.api_key.is_none() {
            config.search.api_key = lookup("TAVILY_API_KEY");
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let has_key = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.trim().is_empty());

        if !has_key(&self.llm.api_key) {
            return Err(ConfigError::MissingApiKey(self.llm.provider.as_str()));
        }
        if self.search.provider == SearchProvider::Tavily && !has_key(&self.search.api_key) {
            return Err(ConfigError::MissingApiKey("tavily"));
        }
        let positive = [
            ("research.breadth", self.research.breadth),
            ("research.depth", self.research.depth),
            ("research.concurrency_limit", self.research.concurrency_limit),
            ("research.plan_token_budget", self.research.plan_token_budget),
            ("research.page_token_budget", self.research.page_token_budget),
            ("research.report_token_budget", self.research.report_token_budget),
            ("search.max_results", self.search.max_results),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn research_options(&self) -> ResearchOptions {
        ResearchOptions {
            concurrency_limit: self.research.concurrency_limit,
            max_results_per_query: self.search.max_results,
            plan_token_budget: self.research.plan_token_budget,
            page_token_budget: self.research.page_token_budget,
            report_token_budget: self.research.report_token_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    #[test]
    fn provider_key_comes_from_its_own_variable() {
        let figment = defaults().merge(Serialized::default("llm.provider", "groq"));
        let config = AppConfig::from_figment(figment, |name| {
            (name == "GROQ_API_KEY").then(|| "gsk-test".to_string())
        })
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Groq);
        assert_eq!(config.llm.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.llm.model_name(), "deepseek-r1-distill-llama-70b");
    }

    #[test]
    fn missing_llm_key_is_rejected() {
        let err = AppConfig::from_figment(defaults(), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey("gemini")));
    }

    #[test]
    fn tavily_requires_its_key() {
        let figment = defaults()
            .merge(Serialized::default("search.provider", "tavily"))
            .merge(Serialized::default("llm.api_key", "k"));
        let err = AppConfig::from_figment(figment, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey("tavily")));
    }

    #[test]
    fn zero_breadth_is_invalid() {
        let figment = defaults()
            .merge(Serialized::default("llm.api_key", "k"))
            .merge(Serialized::default("research.breadth", 0));
        let err = AppConfig::from_figment(figment, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "research.breadth", .. }));
    }

    #[test]
    fn overrides_flow_into_research_options() {
        let figment = defaults()
            .merge(Serialized::default("llm.api_key", "k"))
            .merge(Serialized::default("research.concurrency_limit", 4))
            .merge(Serialized::default("search.max_results", 8));
        let config = AppConfig::from_figment(figment, |_| None).unwrap();
        let options = config.research_options();
        assert_eq!(options.concurrency_limit, 4);
        assert_eq!(options.max_results_per_query, 8);
        assert_eq!(options.page_token_budget, 25_000);
    }
}
