use serde_json::{Value, json};

use crate::facts::ReportFacts;

fn example_output() -> Value {
    json!({
        "headline": "Health Checks",
        "notable_events": [
            {"time": null, "summary": "X failed to connect.", "severity": "warn"}
        ],
        "current_issues": [
            {"summary": "Dashboards disk usage high (91.7%).", "suggestion": ""}
        ],
        "recommendations": ["Check Ollama-lab connection."]
    })
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// First-pass prompt: facts plus an explicit output contract.
pub fn build_report_prompt(facts: &ReportFacts, schema: &Value) -> String {
    format!(
        "Generate a concise operations report from provided facts only.\n\
         Output a single JSON object.\n\
         ONLY these top-level keys: headline, notable_events, current_issues, recommendations.\n\
         If unknown, use empty arrays/empty strings.\n\
         No additional keys. No prose.\n\
         Example output:\n{example}\n\n\
         Internal facts:\n```json\n{facts}\n```\n\
         Respond ONLY with a JSON object that strictly conforms to this schema:\n{schema}",
        example = pretty(&example_output()),
        facts = pretty(facts),
        schema = compact(schema),
    )
}

/// Repair prompt: asks the model to coerce its own bad output into the schema.
pub fn build_repair_prompt(bad_output: &str, schema: &Value) -> String {
    format!(
        "The following blob must be converted into a valid JSON object matching this schema.\n\
         Return ONLY the JSON.\n\
         Blob:\n```text\n{bad_output}\n```\n\
         Schema:\n{schema}",
        schema = compact(schema),
    )
}
