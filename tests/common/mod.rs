#![allow(dead_code)]

use async_trait::async_trait;
use deep_research::error::{FetchError, LlmError, SearchError};
use deep_research::models::{Extraction, Learning, PlanContext, ResearchPlan, ResearchQuery, SearchResult};
use deep_research::tasks::ExtractContext;
use deep_research::tools::{ContentFetcher, PageLoader, SearchGateway};
use deep_research::{DeepResearcher, ResearchModel, ResearchOptions, TextBudgeter};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the planner was shown on one call.
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    pub learnings: Vec<String>,
    pub follow_ups: Vec<String>,
    pub issued: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedModel {
    plans: Mutex<VecDeque<Result<ResearchPlan, LlmError>>>,
    extractions: HashMap<String, Result<Extraction, LlmError>>,
    extract_delay: Option<Duration>,
    synthesis: Option<Result<String, LlmError>>,
    pub plan_calls: Mutex<Vec<PlanSnapshot>>,
    pub extract_calls: Mutex<Vec<String>>,
    pub synthesized: Mutex<Vec<Vec<Learning>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(self, queries: &[&str]) -> Self {
        self.plan_result(Ok(ResearchPlan {
            queries: queries.iter().map(|q| ResearchQuery::new(*q)).collect(),
            sufficient: false,
        }))
    }

    pub fn sufficient_plan(self, queries: &[&str]) -> Self {
        self.plan_result(Ok(ResearchPlan {
            queries: queries.iter().map(|q| ResearchQuery::new(*q)).collect(),
            sufficient: true,
        }))
    }

    pub fn plan_result(self, plan: Result<ResearchPlan, LlmError>) -> Self {
        self.plans.lock().unwrap().push_back(plan);
        self
    }

    pub fn page(mut self, url: &str, learnings: &[&str], follow_ups: &[&str]) -> Self {
        self.extractions.insert(
            url.to_string(),
            Ok(Extraction {
                learnings: learnings.iter().map(|s| s.to_string()).collect(),
                follow_up_questions: follow_ups.iter().map(|s| s.to_string()).collect(),
            }),
        );
        self
    }

    pub fn failing_page(mut self, url: &str) -> Self {
        self.extractions.insert(
            url.to_string(),
            Err(LlmError::MalformedResponse {
                message: "not json".to_string(),
            }),
        );
        self
    }

    pub fn extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = Some(delay);
        self
    }

    pub fn synthesis(mut self, result: Result<String, LlmError>) -> Self {
        self.synthesis = Some(result);
        self
    }

    pub fn plan_count(&self) -> usize {
        self.plan_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ResearchModel for ScriptedModel {
    async fn plan(&self, context: &PlanContext<'_>) -> Result<ResearchPlan, LlmError> {
        self.plan_calls.lock().unwrap().push(PlanSnapshot {
            learnings: context.learnings.iter().map(|l| l.text.clone()).collect(),
            follow_ups: context.follow_up_questions.to_vec(),
            issued: context.issued_queries.to_vec(),
        });
        let next = self.plans.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ResearchPlan::default()))
    }

    async fn extract(
        &self,
        context: &ExtractContext<'_>,
        _page_text: &str,
    ) -> Result<Extraction, LlmError> {
        if let Some(delay) = self.extract_delay {
            tokio::time::sleep(delay).await;
        }
        self.extract_calls.lock().unwrap().push(context.url.to_string());
        self.extractions
            .get(context.url)
            .cloned()
            .unwrap_or_else(|| Ok(Extraction::default()))
    }

    async fn synthesize(&self, _original_query: &str, learnings: &[Learning]) -> Result<String, LlmError> {
        self.synthesized.lock().unwrap().push(learnings.to_vec());
        self.synthesis
            .clone()
            .unwrap_or_else(|| Ok("# Findings\n\nSynthesized findings.".to_string()))
    }
}

#[derive(Default)]
pub struct ScriptedSearch {
    results: HashMap<String, Result<Vec<SearchResult>, SearchError>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(mut self, query: &str, urls: &[&str]) -> Self {
        let results = urls
            .iter()
            .enumerate()
            .map(|(i, url)| SearchResult {
                url: url.to_string(),
                title: None,
                snippet: format!("snippet for {}", url),
                rank: i as u32 + 1,
            })
            .collect();
        self.results.insert(query.to_string(), Ok(results));
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.results
            .insert(query.to_string(), Err(SearchError::Status { status: 503 }));
        self
    }
}

#[async_trait]
impl SearchGateway for ScriptedSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        self.calls.lock().unwrap().push(query.to_string());
        match self.results.get(query) {
            Some(Ok(results)) => Ok(results.iter().take(max_results).cloned().collect()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(SearchError::Request(format!("no script for {}", query))),
        }
    }
}

#[derive(Default)]
pub struct ScriptedLoader {
    failures: HashMap<String, FetchError>,
    delays: HashMap<String, Duration>,
    pub loads: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, url: &str, error: FetchError) -> Self {
        self.failures.insert(url.to_string(), error);
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn load_count(&self, url: &str) -> usize {
        self.loads.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl PageLoader for ScriptedLoader {
    async fn load(&self, url: &str) -> Result<String, FetchError> {
        self.loads.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        match self.failures.get(url) {
            Some(e) => Err(e.clone()),
            None => Ok(format!("Readable text of {}", url)),
        }
    }
}

pub fn options() -> ResearchOptions {
    ResearchOptions {
        concurrency_limit: 3,
        max_results_per_query: 5,
        plan_token_budget: 10_000,
        page_token_budget: 2_000,
        report_token_budget: 10_000,
    }
}

pub fn researcher(
    model: Arc<ScriptedModel>,
    search: Arc<ScriptedSearch>,
    loader: Arc<ScriptedLoader>,
) -> DeepResearcher {
    researcher_with(model, search, loader, options())
}

pub fn researcher_with(
    model: Arc<ScriptedModel>,
    search: Arc<ScriptedSearch>,
    loader: Arc<ScriptedLoader>,
    options: ResearchOptions,
) -> DeepResearcher {
    DeepResearcher::new(
        model,
        search,
        ContentFetcher::new(loader, Duration::from_secs(5)),
        TextBudgeter::new().expect("o200k_base encoding"),
        options,
    )
}
