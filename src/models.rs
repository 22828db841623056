use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub breadth: Option<usize>,
    #[serde(default)]
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub session_id: String,
    pub query: String,
    pub learnings: Vec<Learning>,
    pub visited_urls: Vec<String>,
    pub iterations: usize,
    pub report: String,
    pub total_time_ms: u64,
    pub stage_times: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One planned search, with the reason the planner wants it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub query: String,
    #[serde(default, rename = "researchGoal")]
    pub research_goal: Option<String>,
}

impl ResearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            research_goal: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: String,
    /// 1-based position in the provider's relevance order.
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub status: FetchStatus,
}

impl FetchedPage {
    pub fn content(&self) -> Option<&str> {
        match &self.status {
            FetchStatus::Ok(content) => Some(content),
            FetchStatus::Failed(_) => None,
        }
    }
}

/// An atomic fact extracted from a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    pub source_url: String,
}

impl Learning {
    pub fn new(text: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_url: source_url.into(),
        }
    }

    /// Dedup key: trimmed, lowercased, inner whitespace collapsed.
    pub fn normalized(&self) -> String {
        normalize_text(&self.text)
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Planner output for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchPlan {
    pub queries: Vec<ResearchQuery>,
    /// The planner considers the gathered learnings enough to answer the query.
    pub sufficient: bool,
}

/// Extractor output for one page. Learnings carry no source here; the
/// orchestrator attaches the page URL when merging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub learnings: Vec<String>,
    pub follow_up_questions: Vec<String>,
}

/// Inputs the planner sees for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub original_query: &'a str,
    pub breadth: usize,
    pub learnings: &'a [Learning],
    pub follow_up_questions: &'a [String],
    pub issued_queries: &'a [String],
}

/// Result of a `deep_research` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub learnings: Vec<Learning>,
    pub visited_urls: Vec<String>,
    pub iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilySearchRequest {
    pub query: String,
    pub max_results: u32,
    pub search_depth: String,
    pub include_raw_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilySearchResponse {
    pub results: Vec<TavilyResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}
