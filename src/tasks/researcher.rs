use crate::budget::TextBudgeter;
use crate::error::ResearchError;
use crate::models::{Extraction, Learning, PlanContext, ResearchOutcome, ResearchPlan};
use crate::session::{ResearchPhase, ResearchSession};
use crate::tasks::extractor::ExtractContext;
use crate::tasks::{planner, reporter, ResearchModel};
use crate::tools::fetcher::ContentFetcher;
use crate::tools::search::SearchGateway;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Per-researcher limits. Supplied by the caller; nothing here has a default.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    /// Upper bound on concurrent searches, fetches and extractions.
    pub concurrency_limit: usize,
    pub max_results_per_query: usize,
    /// Token budget for the learnings block of a planning prompt.
    pub plan_token_budget: usize,
    /// Token budget for one page's text in an extraction prompt.
    pub page_token_budget: usize,
    /// Token budget for the learnings block of the report prompt.
    pub report_token_budget: usize,
}

/// Drives research sessions: plan, search, fetch, extract, merge, repeat.
pub struct DeepResearcher {
    model: Arc<dyn ResearchModel>,
    search: Arc<dyn SearchGateway>,
    fetcher: ContentFetcher,
    budgeter: TextBudgeter,
    options: ResearchOptions,
}

/// A page selected for fetching, with the query that surfaced it.
struct Target {
    url: String,
    query: String,
}

struct IterationSummary {
    new_learnings: usize,
    sufficient: bool,
}

impl DeepResearcher {
    pub fn new(
        model: Arc<dyn ResearchModel>,
        search: Arc<dyn SearchGateway>,
        fetcher: ContentFetcher,
        budgeter: TextBudgeter,
        options: ResearchOptions,
    ) -> Self {
        Self {
            model,
            search,
            fetcher,
            budgeter,
            options,
        }
    }

    /// Research `query` for at most `depth` iterations of `breadth` planned
    /// searches each.
    pub async fn deep_research(
        &self,
        query: &str,
        breadth: usize,
        depth: usize,
    ) -> Result<ResearchOutcome, ResearchError> {
        let mut session = ResearchSession::new(query, breadth, depth)?;
        self.run(&mut session).await;
        Ok(session.to_outcome())
    }

    /// Run the loop on a caller-owned session until a stop condition holds.
    ///
    /// The future may be dropped at any await point; the session then holds
    /// every page merged so far and nothing partial.
    #[instrument(skip(self, session), fields(session_id = %session.id, query = session.original_query()))]
    pub async fn run(&self, session: &mut ResearchSession) {
        if session.phase() != ResearchPhase::Planning {
            warn!(phase = session.phase().as_str(), "Session is not ready for planning");
            return;
        }

        loop {
            info!(
                "--- Iteration {} of {} ---",
                session.current_depth() + 1,
                session.max_depth()
            );
            let summary = self.run_iteration(session).await;
            session.advance_depth();

            info!(
                new_learnings = summary.new_learnings,
                total_learnings = session.learnings().len(),
                visited_urls = session.visited_urls().len(),
                "Iteration {} done",
                session.current_depth()
            );

            let stop_reason = if session.depth_exhausted() {
                Some("depth budget exhausted")
            } else if summary.new_learnings == 0 {
                Some("no new learnings")
            } else if summary.sufficient {
                Some("planner reported sufficient learnings")
            } else {
                None
            };

            match stop_reason {
                Some(reason) => {
                    info!("Stopping research: {}", reason);
                    session.transition(ResearchPhase::Reporting);
                    break;
                }
                None => session.transition(ResearchPhase::Planning),
            }
        }
    }

    async fn run_iteration(&self, session: &mut ResearchSession) -> IterationSummary {
        let concurrency = self.options.concurrency_limit.max(1);
        let original_query = session.original_query().to_string();

        // Plan
        let started = Instant::now();
        let plan = self.plan(session).await;
        let queries = planner::select_queries(
            plan.as_ref().map(|p| p.queries.clone()).unwrap_or_default(),
            session.issued_queries(),
            session.breadth(),
        );
        let sufficient = plan.as_ref().map(|p| p.sufficient).unwrap_or(false);
        if plan.is_some() {
            session.clear_pending_queries();
        }
        for query in &queries {
            session.record_issued(&query.query);
        }
        info!(
            queries = queries.len(),
            sufficient,
            "Planned: {:?}",
            queries.iter().map(|q| q.query.as_str()).collect::<Vec<_>>()
        );
        session.record_stage_time(ResearchPhase::Planning, started.elapsed().as_millis() as u64);
        session.transition(ResearchPhase::Searching);

        // Search
        let started = Instant::now();
        let max_results = self.options.max_results_per_query;
        let searches = stream::iter(queries)
            .map(|query| {
                let search = Arc::clone(&self.search);
                async move {
                    let result = search.search(&query.query, max_results).await;
                    (query, result)
                }
            })
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut targets: Vec<Target> = Vec::new();
        let mut collected: HashSet<String> = HashSet::new();
        for (query, result) in searches {
            match result {
                Ok(results) => {
                    debug!(query = %query.query, "Search returned {} results", results.len());
                    for hit in results {
                        if session.visited_urls().contains(&hit.url) || !collected.insert(hit.url.clone()) {
                            continue;
                        }
                        targets.push(Target {
                            url: hit.url,
                            query: query.query.clone(),
                        });
                    }
                }
                Err(e) => warn!(query = %query.query, "Search failed, skipping query: {}", e),
            }
        }
        session.record_stage_time(ResearchPhase::Searching, started.elapsed().as_millis() as u64);
        session.transition(ResearchPhase::Fetching);

        // Fetch
        let started = Instant::now();
        let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();
        let mut pages = self.fetcher.fetch_all(&urls, concurrency).await;
        session.record_stage_time(ResearchPhase::Fetching, started.elapsed().as_millis() as u64);
        session.transition(ResearchPhase::Extracting);

        // Extract, consumed in request order regardless of completion order.
        let started = Instant::now();
        let page_budget = self.options.page_token_budget;
        let extractions: Vec<(Target, Option<Extraction>)> = stream::iter(targets)
            .map(|target| {
                let page_text = pages
                    .remove(&target.url)
                    .and_then(|page| page.content().map(|text| self.budgeter.trim(text, page_budget)));
                let model = Arc::clone(&self.model);
                let original_query = original_query.clone();
                async move {
                    let Some(page_text) = page_text else {
                        return (target, None);
                    };
                    let context = ExtractContext {
                        original_query: &original_query,
                        search_query: &target.query,
                        url: &target.url,
                    };
                    match model.extract(&context, &page_text).await {
                        Ok(extraction) => (target, Some(extraction)),
                        Err(e) => {
                            let e = ResearchError::Extraction(e);
                            warn!(url = %target.url, "{}", e);
                            (target, None)
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;
        session.record_stage_time(ResearchPhase::Extracting, started.elapsed().as_millis() as u64);
        session.transition(ResearchPhase::Merging);

        // Merge, one page at a time.
        let started = Instant::now();
        let mut new_learnings = 0;
        for (target, extraction) in extractions {
            new_learnings += session.merge_page(&target.url, extraction.unwrap_or_default());
        }
        session.record_stage_time(ResearchPhase::Merging, started.elapsed().as_millis() as u64);

        IterationSummary {
            new_learnings,
            sufficient,
        }
    }

    async fn plan(&self, session: &ResearchSession) -> Option<ResearchPlan> {
        let learnings = self.recent_learnings(session.learnings());
        if learnings.len() < session.learnings().len() {
            debug!(
                kept = learnings.len(),
                omitted = session.learnings().len() - learnings.len(),
                "Learnings exceed the plan budget; keeping the most recent"
            );
        }
        let context = PlanContext {
            original_query: session.original_query(),
            breadth: session.breadth(),
            learnings,
            follow_up_questions: session.pending_queries(),
            issued_queries: session.issued_queries(),
        };
        match self.model.plan(&context).await {
            Ok(plan) => Some(plan),
            Err(e) => {
                let e = ResearchError::Planning(e);
                warn!("{}; continuing with no new queries", e);
                None
            }
        }
    }

    /// The longest suffix of `learnings` that fits the plan budget.
    fn recent_learnings<'a>(&self, learnings: &'a [Learning]) -> &'a [Learning] {
        let rendered: Vec<String> = learnings.iter().rev().map(planner::render_plan_learning).collect();
        let fitted = self
            .budgeter
            .fit_leading(rendered.iter().map(String::as_str), self.options.plan_token_budget);
        &learnings[learnings.len() - fitted..]
    }

    /// Synthesize the Markdown report: title, synthesis and every visited
    /// URL as a source. Learnings beyond the report budget are left out
    /// latest-first.
    #[instrument(skip(self, learnings, visited_urls), fields(learnings = learnings.len(), sources = visited_urls.len()))]
    pub async fn write_final_report(
        &self,
        original_query: &str,
        learnings: &[Learning],
        visited_urls: &[String],
    ) -> Result<String, ResearchError> {
        if original_query.trim().is_empty() {
            return Err(ResearchError::InvalidInput("query must not be empty".to_string()));
        }

        let rendered: Vec<String> = learnings.iter().map(reporter::render_learning).collect();
        let fitted = self.budgeter.fit_leading(
            rendered.iter().map(String::as_str),
            self.options.report_token_budget,
        );
        if fitted < learnings.len() {
            warn!(
                kept = fitted,
                omitted = learnings.len() - fitted,
                "Learnings exceed the report budget; keeping the earliest"
            );
        }

        let body = self
            .model
            .synthesize(original_query, &learnings[..fitted])
            .await
            .map_err(ResearchError::Synthesis)?;

        let report = reporter::assemble_report(original_query, &body, visited_urls);
        info!("Generated report with {} characters", report.len());
        Ok(report)
    }

    /// Write the report for a session that has finished researching and
    /// close it.
    pub async fn report(&self, session: &mut ResearchSession) -> Result<String, ResearchError> {
        if session.phase() != ResearchPhase::Reporting {
            return Err(ResearchError::InvalidInput(format!(
                "session is {}, not ready for reporting",
                session.phase().as_str()
            )));
        }

        let started = Instant::now();
        let report = self
            .write_final_report(
                session.original_query(),
                session.learnings(),
                session.visited_urls().as_slice(),
            )
            .await?;
        session.record_stage_time(ResearchPhase::Reporting, started.elapsed().as_millis() as u64);
        session.transition(ResearchPhase::Done);
        Ok(report)
    }
}
