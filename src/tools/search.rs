use crate::error::SearchError;
use crate::models::SearchResult;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const DDG_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Ranked web search. A failure means "no results for this query" to the
/// orchestrator; it never aborts a session.
#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError>;
}

/// Searches DuckDuckGo's HTML endpoint and scrapes the result list.
#[derive(Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    region: String,
    safe_search: SafeSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    On,
    Moderate,
    Off,
}

impl SafeSearch {
    fn kp(&self) -> &'static str {
        match self {
            SafeSearch::On => "1",
            SafeSearch::Moderate => "-1",
            SafeSearch::Off => "-2",
        }
    }
}

impl DuckDuckGoSearch {
    pub fn new(region: impl Into<String>, safe_search: SafeSearch, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; deep-research/0.1)")
            .build()
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(Self {
            client,
            region: region.into(),
            safe_search,
        })
    }
}

#[async_trait]
impl SearchGateway for DuckDuckGoSearch {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let response = self
            .client
            .post(DDG_HTML_ENDPOINT)
            .form(&[
                ("q", query),
                ("kl", self.region.as_str()),
                ("kp", self.safe_search.kp()),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let results = parse_ddg_results(&html, max_results);
        debug!("DuckDuckGo returned {} results", results.len());
        Ok(results)
    }
}

fn text_content(elem: ElementRef<'_>) -> String {
    elem.text().collect::<Vec<_>>().join(" ")
}

pub(crate) fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve result hrefs to absolute destination URLs, unwrapping
/// `duckduckgo.com/l/?uddg=` redirects.
fn normalize_result_href(href: &str) -> Option<String> {
    let trimmed = href.trim();
    let absolute = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else if trimmed.starts_with("/l/") {
        format!("https://duckduckgo.com{}", trimmed)
    } else {
        trimmed.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();

    if host.ends_with("duckduckgo.com") {
        if !parsed.path().starts_with("/l/") {
            return None;
        }
        let target = parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.to_string())?;
        let mut dest = Url::parse(target.trim()).ok()?;
        if !matches!(dest.scheme(), "http" | "https") {
            return None;
        }
        dest.set_fragment(None);
        return Some(dest.to_string());
    }

    matches!(parsed.scheme(), "http" | "https").then_some(absolute)
}

pub(crate) fn parse_ddg_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let (Ok(container_sel), Ok(anchor_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result, div.web-result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut out: Vec<SearchResult> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for container in document.select(&container_sel) {
        if out.len() >= limit {
            break;
        }
        // Sponsored entries carry the ad class alongside `result`.
        if container.value().classes().any(|c| c == "result--ad") {
            continue;
        }
        let Some(anchor) = container.select(&anchor_sel).next() else {
            continue;
        };
        let Some(url) = anchor.value().attr("href").and_then(normalize_result_href) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let title = compact_ws(&text_content(anchor));
        let snippet = container
            .select(&snippet_sel)
            .next()
            .map(|s| compact_ws(&text_content(s)))
            .unwrap_or_default();

        out.push(SearchResult {
            url,
            title: (!title.is_empty()).then_some(title),
            snippet,
            rank: out.len() as u32 + 1,
        });
    }

    out
}
