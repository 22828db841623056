use crate::error::LlmError;
use crate::models::Extraction;
use crate::tasks::system_prompt;
use crate::tools::llm::{parse_json_response, LlmRequest};
use serde::Deserialize;
use serde_json::json;

const EXTRACT_MAX_TOKENS: u64 = 2048;
const EXTRACT_TEMPERATURE: f64 = 0.6;

/// What the extractor knows about the page it is reading.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub original_query: &'a str,
    pub search_query: &'a str,
    pub url: &'a str,
}

pub(crate) fn extract_request(context: &ExtractContext<'_>, page_text: &str) -> LlmRequest {
    let prompt = format!(
        r#"We have the following page from a web search.
<query>{search_query}</query>
<url>{url}</url>

<content>
{page_text}
</content>

The overall research question is: {original_query}

Extract the key learnings from this content that help answer the research question. Each learning must be a single, self-contained, atomic fact; include concrete numbers, names and dates where present. Return no more than 5 learnings, and none if the page is irrelevant. Also suggest up to 3 follow-up questions that would clarify or extend the research.

Return valid JSON, for example:
{{
  "learnings": ["...", "..."],
  "followUpQuestions": ["...", "..."]
}}"#,
        search_query = context.search_query,
        url = context.url,
        page_text = page_text,
        original_query = context.original_query,
    );

    LlmRequest {
        system: system_prompt(),
        prompt,
        max_tokens: EXTRACT_MAX_TOKENS,
        temperature: EXTRACT_TEMPERATURE,
        json_schema: Some(json!({
            "type": "object",
            "properties": {
                "learnings": { "type": "array", "items": { "type": "string" } },
                "followUpQuestions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["learnings"]
        })),
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default, rename = "followUpQuestions", alias = "follow_up_questions")]
    follow_up_questions: Vec<String>,
}

pub(crate) fn parse_extraction(raw: &str) -> Result<Extraction, LlmError> {
    let parsed: RawExtraction = parse_json_response(raw)?;
    Ok(Extraction {
        learnings: parsed
            .learnings
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        follow_up_questions: parsed
            .follow_up_questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect(),
    })
}
