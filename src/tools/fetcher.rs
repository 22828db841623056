use crate::error::FetchError;
use crate::models::{FetchStatus, FetchedPage};
use crate::tools::search::compact_ws;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{header, redirect, Client};
use scraper::{Html, Node, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Loads the readable text of one page.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetches pages over HTTP and reduces HTML to its readable text.
#[derive(Clone)]
pub struct HttpPageLoader {
    client: Client,
    max_body_bytes: usize,
}

impl HttpPageLoader {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .user_agent("Mozilla/5.0 (compatible; deep-research/0.1)")
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        let Some(kind) = BodyKind::from_content_type(&content_type) else {
            return Err(FetchError::Unparsable(format!(
                "unsupported content type {}",
                content_type
            )));
        };

        let body = read_capped(response, self.max_body_bytes).await?;
        let text = match kind {
            BodyKind::Html => extract_readable_text(&body),
            BodyKind::Text => body.trim().to_string(),
        };

        if text.is_empty() {
            return Err(FetchError::Unparsable("no readable text".to_string()));
        }
        Ok(text)
    }
}

/// Default body cap. Longer bodies are cut off and the prefix is used.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Html,
    Text,
}

impl BodyKind {
    fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.contains("html") {
            Some(BodyKind::Html)
        } else if content_type.starts_with("text/") {
            Some(BodyKind::Text)
        } else {
            None
        }
    }
}

async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<String, FetchError> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::Request(e.to_string()))?
    {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            debug!(limit, "Response body truncated");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Readable text of an HTML document: headings, paragraphs, list items and
/// similar blocks from the article (or main, or body), one block per
/// paragraph. Falls back to all visible text when no blocks are found.
pub fn extract_readable_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let root = ["article", "main", "body"].iter().find_map(|name| {
        Selector::parse(name)
            .ok()
            .and_then(|sel| document.select(&sel).next())
    });
    let Some(root) = root else {
        return String::new();
    };

    let mut blocks: Vec<String> = Vec::new();
    if let Ok(block_sel) = Selector::parse("h1, h2, h3, h4, p, li, blockquote, pre, td") {
        let mut seen = HashSet::new();
        for elem in root.select(&block_sel) {
            let text = compact_ws(&elem.text().collect::<Vec<_>>().join(" "));
            if text.is_empty() || !seen.insert(text.clone()) {
                continue;
            }
            blocks.push(text);
        }
    }

    if !blocks.is_empty() {
        return blocks.join("\n\n");
    }

    let visible = root
        .descendants()
        .filter_map(|node| {
            let text = match node.value() {
                Node::Text(text) => text,
                _ => return None,
            };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element())
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false);
            (!hidden).then(|| text.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ");
    compact_ws(&visible)
}

/// Concurrent page retrieval with a per-page timeout.
#[derive(Clone)]
pub struct ContentFetcher {
    loader: Arc<dyn PageLoader>,
    timeout: Duration,
}

impl ContentFetcher {
    pub fn new(loader: Arc<dyn PageLoader>, timeout: Duration) -> Self {
        Self { loader, timeout }
    }

    /// Fetch every distinct URL, at most `concurrency_limit` at a time.
    /// Exactly one entry per input URL is returned; a failure only affects
    /// its own entry.
    #[instrument(skip(self, urls), fields(count = urls.len()))]
    pub async fn fetch_all(
        &self,
        urls: &[String],
        concurrency_limit: usize,
    ) -> HashMap<String, FetchedPage> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls
            .iter()
            .filter(|u| seen.insert(u.as_str()))
            .cloned()
            .collect();

        let pages: HashMap<String, FetchedPage> = stream::iter(unique)
            .map(|url| {
                let fetcher = self.clone();
                async move {
                    let page = fetcher.fetch_one(&url).await;
                    (url, page)
                }
            })
            .buffer_unordered(concurrency_limit.max(1))
            .collect()
            .await;

        let failed = pages.values().filter(|p| p.content().is_none()).count();
        debug!("Fetched {} pages ({} failed)", pages.len(), failed);
        pages
    }

    async fn fetch_one(&self, url: &str) -> FetchedPage {
        let result = match tokio::time::timeout(self.timeout, self.loader.load(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let status = match result {
            Ok(content) => FetchStatus::Ok(content),
            Err(e) => {
                warn!(url, "Fetch failed: {}", e);
                FetchStatus::Failed(e.to_string())
            }
        };
        FetchedPage {
            url: url.to_string(),
            status,
        }
    }
}
