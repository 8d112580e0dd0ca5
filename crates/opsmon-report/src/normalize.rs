//! Untrusted model output → validated [`ReportData`].
//!
//! The raw text is decoded into a generic JSON tree first and mapped onto
//! the canonical shape by hand. Known aliases are accepted, scalar list
//! entries are coerced into the object form, and every unrecognised key
//! is dropped.

use serde_json::{Map, Value};

use crate::error::ReportError;
use crate::schema::{
    CurrentIssue, DEFAULT_HEADLINE, MAX_HEADLINE_LEN, MAX_ITEMS, MAX_TEXT_LEN, NotableEvent,
    ReportData, Severity,
};

/// Decode, normalize and sanitize one model response.
pub fn parse_report_data(raw: &str) -> Result<ReportData, ReportError> {
    let value = decode(raw)?;
    sanitize(normalize_report_value(&value)?)
}

/// [`parse_report_data`] followed by the validity gate.
pub fn parse_and_validate(raw: &str) -> Result<ReportData, ReportError> {
    let report = parse_report_data(raw)?;
    validate_report_data(&report)?;
    Ok(report)
}

/// Parse `raw` as JSON, unwrapping one level of stringified JSON. Falls
/// back to the first balanced `{...}` in the text.
fn decode(raw: &str) -> Result<Value, ReportError> {
    let direct = serde_json::from_str::<Value>(raw).and_then(|value| match value {
        Value::String(inner) => serde_json::from_str(&inner),
        other => Ok(other),
    });
    match direct {
        Ok(value) => Ok(value),
        Err(_) => extract_first_json_object(raw).map(Value::Object),
    }
}

/// Find the first balanced JSON object in free text.
///
/// Braces inside string literals do not count, and escapes inside
/// strings are honoured.
pub fn extract_first_json_object(raw: &str) -> Result<Map<String, Value>, ReportError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return Ok(map);
    }

    let start = raw.find('{').ok_or(ReportError::NoJsonObject)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaping = false;
    let mut end = None;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            if escaping {
                escaping = false;
            } else if ch == '\\' {
                escaping = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + ch.len_utf8());
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or(ReportError::Unterminated)?;
    match serde_json::from_str::<Value>(&raw[start..end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ReportError::NotAnObject),
        Err(e) => Err(ReportError::InvalidJson(e.to_string())),
    }
}

// ── Normalization ─────────────────────────────────────────────────

/// Map a decoded JSON tree onto the canonical report shape.
pub fn normalize_report_value(value: &Value) -> Result<ReportData, ReportError> {
    let Value::Object(payload) = value else {
        return Err(ReportError::NotAnObject);
    };

    let headline = match top_level(payload, "headline", &["title", "heading"]) {
        None | Some(Value::Null) => String::new(),
        Some(value) => coerce_text(Some(value)),
    };
    let headline = if headline.is_empty() {
        DEFAULT_HEADLINE.to_string()
    } else {
        headline
    };

    let notable_events = coerce_list(top_level(payload, "notable_events", &["events", "notable"]))
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => NotableEvent {
                time: first_truthy(map, &["time", "ts"]).map(|t| coerce_text(Some(t))),
                summary: coerce_text(first_truthy(map, &["summary", "text", "message"])),
                severity: Severity::from_label(&coerce_text(first_truthy(
                    map,
                    &["severity", "level"],
                ))),
            },
            other => NotableEvent {
                time: None,
                summary: coerce_text(Some(other)),
                severity: Severity::Info,
            },
        })
        .collect();

    let current_issues = coerce_list(top_level(payload, "current_issues", &["issues", "current"]))
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => CurrentIssue {
                summary: coerce_text(first_truthy(map, &["summary", "text", "issue"])),
                suggestion: coerce_text(first_truthy(
                    map,
                    &["suggestion", "recommendation", "action"],
                )),
            },
            other => CurrentIssue {
                summary: coerce_text(Some(other)),
                suggestion: String::new(),
            },
        })
        .collect();

    let recommendations = coerce_list(top_level(payload, "recommendations", &["recs", "actions"]))
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                first_truthy(map, &["text", "recommendation", "suggestion", "summary"])
                    .map(|text| coerce_text(Some(text)))
            }
            other => Some(coerce_text(Some(other))),
        })
        .collect();

    Ok(ReportData {
        headline,
        notable_events,
        current_issues,
        recommendations,
    })
}

fn top_level<'a>(
    payload: &'a Map<String, Value>,
    canonical: &str,
    aliases: &[&str],
) -> Option<&'a Value> {
    payload
        .get(canonical)
        .or_else(|| aliases.iter().find_map(|alias| payload.get(*alias)))
}

/// First value under `keys` that is present and non-empty.
fn first_truthy<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| truthy(value))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn coerce_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn coerce_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

// ── Sanitize & validate ───────────────────────────────────────────

fn truncate(text: &str) -> String {
    text.chars().take(MAX_TEXT_LEN).collect()
}

/// Apply the size caps. An overlong headline rejects the whole report;
/// everything else is truncated.
pub fn sanitize(report: ReportData) -> Result<ReportData, ReportError> {
    if report.headline.chars().count() > MAX_HEADLINE_LEN {
        return Err(ReportError::HeadlineTooLong);
    }

    let notable_events = report
        .notable_events
        .into_iter()
        .take(MAX_ITEMS)
        .map(|event| NotableEvent {
            time: event
                .time
                .as_deref()
                .map(truncate)
                .filter(|t| !t.is_empty()),
            summary: truncate(&event.summary),
            severity: event.severity,
        })
        .collect();

    let current_issues = report
        .current_issues
        .into_iter()
        .take(MAX_ITEMS)
        .map(|issue| CurrentIssue {
            summary: truncate(&issue.summary),
            suggestion: truncate(&issue.suggestion),
        })
        .collect();

    let recommendations = report
        .recommendations
        .iter()
        .take(MAX_ITEMS)
        .map(|r| truncate(r))
        .filter(|r| !r.is_empty())
        .collect();

    Ok(ReportData {
        headline: report.headline,
        notable_events,
        current_issues,
        recommendations,
    })
}

/// A report is usable when it has a headline and something to act on.
pub fn validate_report_data(report: &ReportData) -> Result<(), ReportError> {
    if report.headline.trim().is_empty() {
        return Err(ReportError::Invalid("headline is empty".to_string()));
    }

    let has_recommendation = report.recommendations.iter().any(|r| !r.trim().is_empty());
    let has_issue = report
        .current_issues
        .iter()
        .any(|i| !i.summary.trim().is_empty());
    let has_event = report
        .notable_events
        .iter()
        .any(|e| !e.summary.trim().is_empty());

    if has_recommendation || has_issue || has_event {
        Ok(())
    } else {
        Err(ReportError::Invalid(
            "missing actionable content (recommendations/current_issues/notable_events summaries)"
                .to_string(),
        ))
    }
}
