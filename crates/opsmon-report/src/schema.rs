//! Canonical report shape and the JSON schema handed to the model.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const MAX_HEADLINE_LEN: usize = 200;
pub const MAX_ITEMS: usize = 20;
pub const MAX_TEXT_LEN: usize = 500;
pub const DEFAULT_HEADLINE: &str = "Ops Report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Crit,
}

impl Severity {
    /// Map a free-form severity label. Unrecognised labels are `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "warn" | "warning" => Severity::Warn,
            "crit" | "critical" | "error" => Severity::Crit,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Crit => "crit",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotableEvent {
    pub time: Option<String>,
    pub summary: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentIssue {
    pub summary: String,
    pub suggestion: String,
}

/// A validated report. Built per request and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    pub headline: String,
    pub notable_events: Vec<NotableEvent>,
    pub current_issues: Vec<CurrentIssue>,
    pub recommendations: Vec<String>,
}

impl ReportData {
    /// Deterministic report used when no model output could be used.
    pub fn fallback(reason: &str) -> Self {
        Self {
            headline: DEFAULT_HEADLINE.to_string(),
            notable_events: Vec::new(),
            current_issues: vec![CurrentIssue {
                summary: "LLM report generation failed".to_string(),
                suggestion: reason.to_string(),
            }],
            recommendations: Vec::new(),
        }
    }
}

/// JSON schema of [`ReportData`], sent as the model's output format.
pub fn report_json_schema() -> Value {
    let text = json!({"type": "string", "maxLength": MAX_TEXT_LEN});
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["headline", "notable_events", "current_issues", "recommendations"],
        "properties": {
            "headline": {"type": "string", "maxLength": MAX_HEADLINE_LEN},
            "notable_events": {
                "type": "array",
                "maxItems": MAX_ITEMS,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["time", "summary", "severity"],
                    "properties": {
                        "time": {"type": ["string", "null"], "maxLength": MAX_TEXT_LEN},
                        "summary": text,
                        "severity": {"type": "string", "enum": ["info", "warn", "crit"]}
                    }
                }
            },
            "current_issues": {
                "type": "array",
                "maxItems": MAX_ITEMS,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["summary", "suggestion"],
                    "properties": {
                        "summary": text,
                        "suggestion": text
                    }
                }
            },
            "recommendations": {
                "type": "array",
                "maxItems": MAX_ITEMS,
                "items": text
            }
        }
    })
}
