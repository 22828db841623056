use crate::models::Learning;
use crate::tasks::system_prompt;
use crate::tools::llm::{parse_json_response, strip_reasoning, LlmRequest};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

const REPORT_MAX_TOKENS: u64 = 10_000;
const REPORT_TEMPERATURE: f64 = 0.6;

/// One learning as it appears in the report prompt.
pub(crate) fn render_learning(learning: &Learning) -> String {
    format!(
        "<learning source=\"{}\">\n{}\n</learning>\n",
        learning.source_url, learning.text
    )
}

pub(crate) fn report_request(original_query: &str, learnings: &[Learning]) -> LlmRequest {
    let compiled = if learnings.is_empty() {
        "No learnings were gathered.".to_string()
    } else {
        learnings.iter().map(render_learning).collect::<String>()
    };

    let prompt = format!(
        r#"We have completed our research. Write a response to the original query based on the compiled learnings.

- If the query is a direct question, answer it concisely first.
- Then give a structured, in-depth report in Markdown: headings, bullet points or tables as needed, key findings and recommendations where applicable.
- Incorporate all relevant learnings and cite their source URLs inline where useful.
- State any assumptions or remaining open questions.
- Do not add a sources section; it is appended separately.

Return valid JSON with the report under the key "reportMarkdown":
{{
  "reportMarkdown": "<the report in Markdown>"
}}

**Original query:** {original_query}

<learnings>
{compiled}</learnings>"#,
        original_query = original_query,
        compiled = compiled,
    );

    LlmRequest {
        system: system_prompt(),
        prompt,
        max_tokens: REPORT_MAX_TOKENS,
        temperature: REPORT_TEMPERATURE,
        json_schema: Some(json!({
            "type": "object",
            "properties": { "reportMarkdown": { "type": "string" } },
            "required": ["reportMarkdown"]
        })),
    }
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(rename = "reportMarkdown", alias = "report_markdown")]
    report_markdown: String,
}

/// The Markdown body from a synthesis response: the `reportMarkdown` field
/// when present, otherwise the response text itself.
pub(crate) fn parse_report(raw: &str) -> String {
    match parse_json_response::<RawReport>(raw) {
        Ok(report) => report.report_markdown.trim().to_string(),
        Err(_) => strip_reasoning(raw).trim().to_string(),
    }
}

/// Final document: a title, the synthesis, and every visited URL as a source.
pub fn assemble_report(original_query: &str, body: &str, visited_urls: &[String]) -> String {
    let body = body.trim();
    let (model_title, synthesis) = match body.lines().next() {
        Some(first) if first.starts_with("# ") || first.trim_end() == "#" => (
            first.trim_start_matches('#').trim(),
            body[first.len()..].trim(),
        ),
        _ => ("", body),
    };
    let title = if model_title.is_empty() {
        format!("Research Report: {}", original_query.trim())
    } else {
        model_title.to_string()
    };

    let mut report = format!("# {}\n\n## Synthesis\n\n", title);
    if synthesis.is_empty() {
        report.push_str("_No findings could be synthesized for this query._\n");
    } else {
        report.push_str(synthesis);
        report.push('\n');
    }

    report.push_str("\n## Sources\n\n");
    let mut listed = HashSet::new();
    let mut index = 0;
    for url in visited_urls {
        if !listed.insert(url.as_str()) {
            continue;
        }
        index += 1;
        report.push_str(&format!("{}. {}\n", index, url));
    }
    if index == 0 {
        report.push_str("_No sources were visited._\n");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn uses_model_title_when_present() {
        let body = "# Caffeine and Sleep\n\nCaffeine delays sleep onset.";
        let urls = vec!["https://a.example".to_string(), "https://b.example".to_string()];
        let report = assemble_report("impact of caffeine on sleep", body, &urls);
        assert_eq!(
            report,
            "# Caffeine and Sleep\n\n## Synthesis\n\nCaffeine delays sleep onset.\n\n## Sources\n\n1. https://a.example\n2. https://b.example\n"
        );
    }

    #[test]
    fn blank_model_title_falls_back_to_query() {
        for body in ["#  \n\nBody text.", "#\nBody text."] {
            let report = assemble_report("impact of caffeine on sleep", body, &[]);
            assert!(
                report.starts_with("# Research Report: impact of caffeine on sleep\n\n## Synthesis\n\nBody text.\n"),
                "{}",
                report
            );
        }
    }

    #[test]
    fn falls_back_to_query_title() {
        let report = assemble_report("impact of caffeine on sleep", "Short answer.", &[]);
        assert!(report.starts_with("# Research Report: impact of caffeine on sleep\n"));
        assert!(report.contains("## Synthesis\n\nShort answer.\n"));
        assert!(report.contains("_No sources were visited._"));
    }

    #[test]
    fn lists_each_url_once() {
        let urls = vec![
            "https://a.example".to_string(),
            "https://a.example".to_string(),
            "https://failed.example/404".to_string(),
        ];
        let report = assemble_report("q", "", &urls);
        assert_eq!(report.matches("https://a.example").count(), 1);
        assert!(report.contains("2. https://failed.example/404"));
        assert!(report.contains("_No findings could be synthesized"));
    }

    #[test]
    fn parse_report_prefers_json_field() {
        assert_eq!(
            parse_report(r###"{"reportMarkdown": "## Findings\n- a"}"###),
            "## Findings\n- a"
        );
        assert_eq!(
            parse_report("<think>plan</think>\n## Findings\n- raw markdown"),
            "## Findings\n- raw markdown"
        );
    }
}
