use std::time::Duration;

use thiserror::Error;

/// Why a model response could not be turned into a report.
///
/// The display text is what ends up in the `parse_error` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("No JSON object found")]
    NoJsonObject,

    #[error("Unterminated JSON object")]
    Unterminated,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Report output is not a JSON object")]
    NotAnObject,

    #[error("Report headline too long")]
    HeadlineTooLong,

    #[error("{0}")]
    Invalid(String),
}

/// Transport failures talking to the generative model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Ollama API timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ollama API connection error: {0}")]
    Connection(String),

    #[error("Ollama API returned HTTP {status}: {snippet}")]
    Http { status: u16, snippet: String },

    #[error("Ollama API returned invalid JSON envelope: {0}")]
    Envelope(String),
}
