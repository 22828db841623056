use crate::error::SearchError;
use crate::models::{SearchResult, TavilySearchRequest, TavilySearchResponse};
use crate::tools::search::SearchGateway;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Search through the Tavily API.
#[derive(Clone)]
pub struct TavilySearch {
    client: Client,
    api_key: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SearchError::NotConfigured("TAVILY_API_KEY not set".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl SearchGateway for TavilySearch {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let request = TavilySearchRequest {
            query: query.to_string(),
            max_results: max_results as u32,
            search_depth: "advanced".to_string(),
            include_raw_content: false,
        };

        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Request(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
            });
        }

        let search_response: TavilySearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        debug!("Tavily returned {} results", search_response.results.len());
        Ok(into_search_results(search_response, max_results))
    }
}

fn into_search_results(response: TavilySearchResponse, max_results: usize) -> Vec<SearchResult> {
    response
        .results
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .take(max_results)
        .enumerate()
        .map(|(i, r)| SearchResult {
            url: r.url,
            title: (!r.title.is_empty()).then_some(r.title),
            snippet: r.content,
            rank: i as u32 + 1,
        })
        .collect()
}
