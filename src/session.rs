//! Working state of one research run.
//!
//! A session is owned by a single task and mutated only by the orchestrator.
//! Every mutation here is synchronous, so a run cancelled at an await point
//! never leaves a half-merged page behind.

use crate::error::ResearchError;
use crate::models::{normalize_text, Extraction, Learning, ResearchOutcome};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Planning,
    Searching,
    Fetching,
    Extracting,
    Merging,
    Reporting,
    Done,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Searching => "searching",
            ResearchPhase::Fetching => "fetching",
            ResearchPhase::Extracting => "extracting",
            ResearchPhase::Merging => "merging",
            ResearchPhase::Reporting => "reporting",
            ResearchPhase::Done => "done",
        }
    }

    pub fn can_transition_to(&self, next: ResearchPhase) -> bool {
        use ResearchPhase::*;
        matches!(
            (self, next),
            (Planning, Searching)
                | (Searching, Fetching)
                | (Fetching, Extracting)
                | (Extracting, Merging)
                | (Merging, Planning)
                | (Merging, Reporting)
                | (Reporting, Done)
        )
    }
}

/// Insertion-ordered URL set that only grows.
#[derive(Debug, Clone, Default)]
pub struct VisitedUrls {
    order: Vec<String>,
    index: HashSet<String>,
}

impl VisitedUrls {
    /// Returns false when the URL was already present.
    pub fn insert(&mut self, url: &str) -> bool {
        if self.index.contains(url) {
            return false;
        }
        self.index.insert(url.to_string());
        self.order.push(url.to_string());
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains(url)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }
}

#[derive(Debug, Clone)]
pub struct ResearchSession {
    pub id: Uuid,
    original_query: String,
    current_depth: usize,
    max_depth: usize,
    breadth: usize,
    learnings: Vec<Learning>,
    learning_keys: HashSet<String>,
    visited_urls: VisitedUrls,
    pending_queries: Vec<String>,
    issued_queries: Vec<String>,
    phase: ResearchPhase,
    phase_history: Vec<ResearchPhase>,
    stage_times: HashMap<String, u64>,
}

impl ResearchSession {
    pub fn new(query: &str, breadth: usize, depth: usize) -> Result<Self, ResearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchError::InvalidInput("query must not be empty".to_string()));
        }
        if breadth == 0 {
            return Err(ResearchError::InvalidInput("breadth must be at least 1".to_string()));
        }
        if depth == 0 {
            return Err(ResearchError::InvalidInput("depth must be at least 1".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            original_query: query.to_string(),
            current_depth: 0,
            max_depth: depth,
            breadth,
            learnings: Vec::new(),
            learning_keys: HashSet::new(),
            visited_urls: VisitedUrls::default(),
            pending_queries: Vec::new(),
            issued_queries: Vec::new(),
            phase: ResearchPhase::Planning,
            phase_history: vec![ResearchPhase::Planning],
            stage_times: HashMap::new(),
        })
    }

    /// Continue earlier research: `learnings` are kept (deduplicated) and
    /// `visited_urls`, together with every learning's source, are never
    /// fetched again.
    pub fn with_prior<I>(
        query: &str,
        breadth: usize,
        depth: usize,
        learnings: Vec<Learning>,
        visited_urls: I,
    ) -> Result<Self, ResearchError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut session = Self::new(query, breadth, depth)?;
        let sources = learnings.iter().map(|l| l.source_url.clone());
        for url in visited_urls.into_iter().chain(sources.collect::<Vec<_>>()) {
            let url = url.trim();
            if !url.is_empty() {
                session.visited_urls.insert(url);
            }
        }
        for learning in learnings {
            session.push_learning(Learning::new(learning.text.trim(), learning.source_url));
        }
        Ok(session)
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn current_depth(&self) -> usize {
        self.current_depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn breadth(&self) -> usize {
        self.breadth
    }

    pub fn learnings(&self) -> &[Learning] {
        &self.learnings
    }

    pub fn visited_urls(&self) -> &VisitedUrls {
        &self.visited_urls
    }

    pub fn pending_queries(&self) -> &[String] {
        &self.pending_queries
    }

    pub fn issued_queries(&self) -> &[String] {
        &self.issued_queries
    }

    pub fn phase(&self) -> ResearchPhase {
        self.phase
    }

    pub fn phase_history(&self) -> &[ResearchPhase] {
        &self.phase_history
    }

    pub fn stage_times(&self) -> &HashMap<String, u64> {
        &self.stage_times
    }

    pub fn depth_exhausted(&self) -> bool {
        self.current_depth >= self.max_depth
    }

    pub(crate) fn transition(&mut self, next: ResearchPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(
                from = self.phase.as_str(),
                to = next.as_str(),
                "Unexpected research phase transition"
            );
            debug_assert!(false, "invalid transition {:?} -> {:?}", self.phase, next);
        }
        self.phase = next;
        self.phase_history.push(next);
    }

    pub(crate) fn record_stage_time(&mut self, phase: ResearchPhase, elapsed_ms: u64) {
        *self.stage_times.entry(phase.as_str().to_string()).or_insert(0) += elapsed_ms;
    }

    pub(crate) fn record_issued(&mut self, query: &str) {
        self.issued_queries.push(query.to_string());
    }

    pub(crate) fn clear_pending_queries(&mut self) {
        self.pending_queries.clear();
    }

    /// Merge one page's extraction. Learnings whose normalized text is
    /// already known are skipped; follow-up questions are queued for the
    /// next plan. Returns the number of learnings added.
    pub(crate) fn merge_page(&mut self, url: &str, extraction: Extraction) -> usize {
        self.visited_urls.insert(url);

        let mut added = 0;
        for text in extraction.learnings {
            if self.push_learning(Learning::new(text.trim(), url)) {
                added += 1;
            }
        }

        for question in extraction.follow_up_questions {
            let question = question.trim();
            if question.is_empty() {
                continue;
            }
            let key = normalize_text(question);
            let known = self
                .pending_queries
                .iter()
                .chain(self.issued_queries.iter())
                .any(|q| normalize_text(q) == key);
            if !known {
                self.pending_queries.push(question.to_string());
            }
        }

        added
    }

    fn push_learning(&mut self, learning: Learning) -> bool {
        if learning.text.is_empty() || !self.learning_keys.insert(learning.normalized()) {
            return false;
        }
        self.learnings.push(learning);
        true
    }

    pub(crate) fn advance_depth(&mut self) {
        if self.current_depth < self.max_depth {
            self.current_depth += 1;
        }
    }

    pub fn to_outcome(&self) -> ResearchOutcome {
        ResearchOutcome {
            learnings: self.learnings.clone(),
            visited_urls: self.visited_urls.as_slice().to_vec(),
            iterations: self.current_depth,
        }
    }
}
