use crate::error::LlmError;
use crate::models::{normalize_text, Learning, PlanContext, ResearchPlan, ResearchQuery};
use crate::tasks::system_prompt;
use crate::tools::llm::{parse_json_response, LlmRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

const PLAN_MAX_TOKENS: u64 = 1024;
const PLAN_TEMPERATURE: f64 = 0.6;
/// Token-set overlap at or above which two queries count as the same search.
const NEAR_DUPLICATE_JACCARD: f64 = 0.8;

pub(crate) fn render_plan_learning(learning: &Learning) -> String {
    format!("- {}", learning.text)
}

pub(crate) fn plan_request(context: &PlanContext<'_>) -> LlmRequest {
    let learnings = if context.learnings.is_empty() {
        "No prior learnings.".to_string()
    } else {
        context
            .learnings
            .iter()
            .map(render_plan_learning)
            .collect::<Vec<_>>()
            .join("\n")
    };
    let follow_ups = if context.follow_up_questions.is_empty() {
        "None.".to_string()
    } else {
        context
            .follow_up_questions
            .iter()
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let issued = if context.issued_queries.is_empty() {
        "None.".to_string()
    } else {
        context
            .issued_queries
            .iter()
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let prompt = format!(
        r#"You are deciding how to conduct further research.

Original query: {query}

Learnings from previous research steps:
{learnings}

Open follow-up questions from previous steps:
{follow_ups}

Search queries already issued (do not repeat or rephrase these):
{issued}

Plan at most {breadth} new web search queries that would add the most value for answering the original query. Use the learnings and follow-up questions to go deeper where the research is thin. If the learnings already answer the original query, set "sufficient" to true and return an empty "queries" list.

Return valid JSON with this structure:
{{
  "sufficient": <true if no further research is needed>,
  "queries": [
    {{"query": "<search query>", "researchGoal": "<what this query should achieve>"}}
  ]
}}

Do not deviate from the original query."#,
        query = context.original_query,
        learnings = learnings,
        follow_ups = follow_ups,
        issued = issued,
        breadth = context.breadth,
    );

    LlmRequest {
        system: system_prompt(),
        prompt,
        max_tokens: PLAN_MAX_TOKENS,
        temperature: PLAN_TEMPERATURE,
        json_schema: Some(json!({
            "type": "object",
            "properties": {
                "sufficient": { "type": "boolean" },
                "queries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "researchGoal": { "type": "string" }
                        },
                        "required": ["query"]
                    }
                }
            },
            "required": ["queries"]
        })),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuery {
    Text(String),
    Planned(ResearchQuery),
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    queries: Option<Vec<Value>>,
    #[serde(default)]
    sufficient: Option<bool>,
    /// Older prompt contract: remaining depth, 0 meaning done.
    #[serde(default)]
    depth: Option<i64>,
}

/// Parse a plan response. Entries that are neither a string nor a
/// `{query, researchGoal}` object are skipped on their own.
pub(crate) fn parse_plan(raw: &str) -> Result<ResearchPlan, LlmError> {
    let plan: RawPlan = parse_json_response(raw)?;
    let queries = plan
        .queries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawQuery>(entry.clone()) {
            Ok(RawQuery::Text(query)) => Some(ResearchQuery::new(query)),
            Ok(RawQuery::Planned(query)) => Some(query),
            Err(e) => {
                debug!("Skipping unusable plan entry {}: {}", entry, e);
                None
            }
        })
        .filter(|q| !q.query.trim().is_empty())
        .collect();

    Ok(ResearchPlan {
        queries,
        sufficient: plan.sufficient.unwrap_or(false) || plan.depth == Some(0),
    })
}

fn query_tokens(query: &str) -> Vec<String> {
    normalize_text(query)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Two queries are near-duplicates when their word sequences match after
/// normalization or their word sets overlap by at least 80%.
pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    let a_tokens = query_tokens(a);
    let b_tokens = query_tokens(b);
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return a_tokens == b_tokens;
    }
    if a_tokens == b_tokens {
        return true;
    }

    let a_set: HashSet<&str> = a_tokens.iter().map(String::as_str).collect();
    let b_set: HashSet<&str> = b_tokens.iter().map(String::as_str).collect();
    let intersection = a_set.intersection(&b_set).count() as f64;
    let union = a_set.union(&b_set).count() as f64;
    intersection / union >= NEAR_DUPLICATE_JACCARD
}

/// Keep at most `breadth` planned queries, dropping any that repeat an
/// already issued query or an earlier query of the same plan.
pub fn select_queries(
    candidates: Vec<ResearchQuery>,
    issued: &[String],
    breadth: usize,
) -> Vec<ResearchQuery> {
    let mut selected: Vec<ResearchQuery> = Vec::new();
    for candidate in candidates {
        if selected.len() >= breadth {
            break;
        }
        let query = candidate.query.trim();
        if query.is_empty() {
            continue;
        }
        let repeated = issued
            .iter()
            .map(String::as_str)
            .chain(selected.iter().map(|q| q.query.as_str()))
            .any(|seen| is_near_duplicate(seen, query));
        if repeated {
            continue;
        }
        selected.push(ResearchQuery {
            query: query.to_string(),
            research_goal: candidate.research_goal,
        });
    }
    selected
}
