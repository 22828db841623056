mod extractor;
mod planner;
mod reporter;
mod researcher;

pub use extractor::ExtractContext;
pub use planner::{is_near_duplicate, select_queries};
pub use reporter::assemble_report;
pub use researcher::{DeepResearcher, ResearchOptions};

use crate::error::LlmError;
use crate::models::{Extraction, Learning, PlanContext, ResearchPlan};
use crate::tools::llm::LlmBackend;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The three model-backed steps of a research run. The orchestrator only
/// depends on this trait, never on a concrete backend.
#[async_trait]
pub trait ResearchModel: Send + Sync {
    async fn plan(&self, context: &PlanContext<'_>) -> Result<ResearchPlan, LlmError>;

    async fn extract(
        &self,
        context: &ExtractContext<'_>,
        page_text: &str,
    ) -> Result<Extraction, LlmError>;

    /// Markdown body of the final report; the caller adds title and sources.
    async fn synthesize(&self, original_query: &str, learnings: &[Learning]) -> Result<String, LlmError>;
}

/// `ResearchModel` over any completion backend.
#[derive(Clone)]
pub struct LlmResearchModel {
    backend: Arc<dyn LlmBackend>,
}

impl LlmResearchModel {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResearchModel for LlmResearchModel {
    #[instrument(skip(self, context), fields(backend = self.backend.name()))]
    async fn plan(&self, context: &PlanContext<'_>) -> Result<ResearchPlan, LlmError> {
        let request = planner::plan_request(context);
        debug!("Plan prompt:\n{}", request.prompt);
        let raw = self.backend.complete(&request).await?;
        debug!("Plan response:\n{}", raw);
        planner::parse_plan(&raw)
    }

    #[instrument(skip(self, context, page_text), fields(backend = self.backend.name(), url = context.url))]
    async fn extract(
        &self,
        context: &ExtractContext<'_>,
        page_text: &str,
    ) -> Result<Extraction, LlmError> {
        let request = extractor::extract_request(context, page_text);
        let raw = self.backend.complete(&request).await?;
        debug!("Extraction response:\n{}", raw);
        extractor::parse_extraction(&raw)
    }

    #[instrument(skip(self, learnings), fields(backend = self.backend.name(), learnings = learnings.len()))]
    async fn synthesize(&self, original_query: &str, learnings: &[Learning]) -> Result<String, LlmError> {
        let request = reporter::report_request(original_query, learnings);
        let raw = self.backend.complete(&request).await?;
        Ok(reporter::parse_report(&raw))
    }
}

pub(crate) fn system_prompt() -> String {
    let now = chrono::Utc::now().to_rfc3339();
    format!(
        r#"You are an expert researcher. Today is {}. Follow these instructions when responding:
- Assume that the user is a highly experienced analyst.
- Be as detailed, organized, and accurate as possible.
- Always keep the original user query in context and do not deviate from it.
- Use all previously gathered learnings to decide if further research is needed.
- Respond with JSON exactly in the requested structure when one is given."#,
        now
    )
}
