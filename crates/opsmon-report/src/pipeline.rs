//! Report synthesis: facts → model → validated report → markdown.
//!
//! The model is an untrusted producer. A synthesis run makes at most
//! two model calls: a transport failure on the first pass earns one
//! retry with a longer timeout, and an unusable first-pass response
//! earns one repair pass. Whatever happens the run ends in a report,
//! falling back to a fixed one when every attempt failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use opsmon_core::{MonitorConfig, OllamaConfig};
use opsmon_state::StateStore;

use crate::error::ModelError;
use crate::facts::{ReportFacts, SourcesInfo};
use crate::model::{GenerateRequest, ReportModel};
use crate::normalize::parse_and_validate;
use crate::prompt::{build_repair_prompt, build_report_prompt};
use crate::render::render_report_markdown;
use crate::schema::{ReportData, report_json_schema};

/// Lower bound for the retry timeout after a failed first pass.
const MIN_RETRY_TIMEOUT: Duration = Duration::from_secs(90);

pub fn retry_timeout(timeout: Duration) -> Duration {
    timeout.saturating_mul(2).max(MIN_RETRY_TIMEOUT)
}

/// Result of one synthesis run. `parse_error` is set whenever the
/// report did not come straight from a clean model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub report: ReportData,
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRange {
    pub range_minutes: u32,
}

/// Body of `POST /api/reports/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub ok: bool,
    pub generated_at: String,
    pub range: ReportRange,
    pub markdown: String,
    pub report_json: ReportData,
    pub parse_error: Option<String>,
    pub sources: SourcesInfo,
}

pub struct ReportPipeline<M> {
    model: M,
    timeout: Duration,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl<M: ReportModel> ReportPipeline<M> {
    pub fn new(model: M, config: &OllamaConfig) -> Self {
        Self {
            model,
            timeout: config.timeout(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn request(&self, prompt: String, schema: &Value, timeout: Duration) -> GenerateRequest {
        GenerateRequest {
            prompt,
            schema: schema.clone(),
            timeout,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// First pass, retried once on a transport failure.
    async fn first_pass(&self, prompt: String, schema: &Value) -> Result<String, ModelError> {
        let request = self.request(prompt, schema, self.timeout);
        match self.model.generate(request.clone()).await {
            Ok(raw) => Ok(raw),
            Err(e) => {
                let timeout = retry_timeout(self.timeout);
                warn!(error = %e, retry_timeout_s = timeout.as_secs(), "report model call failed, retrying");
                self.model
                    .generate(GenerateRequest { timeout, ..request })
                    .await
            }
        }
    }

    pub async fn synthesize(&self, facts: &ReportFacts) -> Synthesis {
        let schema = report_json_schema();

        let raw = match self.first_pass(build_report_prompt(facts, &schema), &schema).await {
            Ok(raw) => raw,
            Err(e) => {
                let reason = format!("model call failed: {e}");
                error!(error = %e, "report model unavailable, using fallback report");
                return Synthesis {
                    report: ReportData::fallback(&reason),
                    parse_error: Some(reason),
                };
            }
        };

        let reason = match parse_and_validate(&raw) {
            Ok(report) => {
                return Synthesis {
                    report,
                    parse_error: None,
                };
            }
            Err(e) => e.to_string(),
        };
        error!(error = %reason, "Failed to parse report JSON output");

        let repair = self
            .model
            .generate(self.request(build_repair_prompt(&raw, &schema), &schema, self.timeout))
            .await;
        let repaired = match repair {
            Ok(raw) => parse_and_validate(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match repaired {
            Ok(report) => {
                info!(first_error = %reason, "report repaired via second pass");
                Synthesis {
                    report,
                    parse_error: Some(format!("{reason}; repaired via second pass")),
                }
            }
            Err(second) => {
                let reason = format!("{reason}; repair failed: {second}");
                error!(error = %reason, "report repair failed, using fallback report");
                Synthesis {
                    report: ReportData::fallback(&reason),
                    parse_error: Some(reason),
                }
            }
        }
    }

    /// Gather facts, synthesize and render one report.
    pub async fn generate(
        &self,
        store: &StateStore,
        config: &MonitorConfig,
        range_minutes: u32,
        now: DateTime<Utc>,
    ) -> ReportResponse {
        let facts = ReportFacts::collect(store, config, range_minutes, now);
        let sources = facts.sources();
        let synthesis = self.synthesize(&facts).await;
        let markdown = render_report_markdown(
            &synthesis.report,
            &facts.generated_at,
            range_minutes,
            &facts.status_summary,
            &sources,
        );

        ReportResponse {
            ok: true,
            generated_at: facts.generated_at,
            range: ReportRange { range_minutes },
            markdown,
            report_json: synthesis.report,
            parse_error: synthesis.parse_error,
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmon_core::{CheckKind, ProbeOutcome};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every request it saw.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReportModel for ScriptedModel {
        async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Connection("script exhausted".to_string())))
        }
    }

    fn pipeline(replies: Vec<Result<String, ModelError>>) -> ReportPipeline<ScriptedModel> {
        ReportPipeline::new(ScriptedModel::new(replies), &OllamaConfig::default())
    }

    fn calls(pipeline: &ReportPipeline<ScriptedModel>) -> Vec<GenerateRequest> {
        pipeline.model.seen.lock().unwrap().clone()
    }

    fn valid_report() -> String {
        json!({
            "headline": "Overall ok",
            "notable_events": [],
            "current_issues": [],
            "recommendations": ["Investigate service"]
        })
        .to_string()
    }

    fn facts() -> ReportFacts {
        let store = StateStore::open_in_memory(50).unwrap();
        ReportFacts::collect(&store, &MonitorConfig::default(), 1440, Utc::now())
    }

    fn timeout() -> ModelError {
        ModelError::Timeout(Duration::from_secs(30))
    }

    #[test]
    fn retry_timeout_has_floor() {
        assert_eq!(retry_timeout(Duration::from_secs(30)), Duration::from_secs(90));
        assert_eq!(retry_timeout(Duration::from_secs(60)), Duration::from_secs(120));
    }

    #[test]
    fn retry_timeout_saturates_on_huge_timeouts() {
        let huge = OllamaConfig {
            timeout_s: u64::MAX,
            ..OllamaConfig::default()
        };
        assert_eq!(retry_timeout(huge.timeout()), Duration::MAX);
    }

    #[tokio::test]
    async fn clean_response_needs_one_call() {
        let pipeline = pipeline(vec![Ok(valid_report())]);
        let synthesis = pipeline.synthesize(&facts()).await;
        assert_eq!(synthesis.report.headline, "Overall ok");
        assert!(synthesis.parse_error.is_none());
        assert_eq!(calls(&pipeline).len(), 1);
    }

    #[tokio::test]
    async fn alias_drift_is_accepted_without_repair() {
        let drift = json!({
            "title": "Health Checks",
            "events": ["A happened"],
            "issues": ["Disk high"],
            "recs": [{"text": "Do X"}]
        })
        .to_string();
        let pipeline = pipeline(vec![Ok(serde_json::to_string(&drift).unwrap())]);

        let synthesis = pipeline.synthesize(&facts()).await;
        assert_eq!(synthesis.report.headline, "Health Checks");
        assert_eq!(synthesis.report.notable_events[0].summary, "A happened");
        assert_eq!(synthesis.report.current_issues[0].summary, "Disk high");
        assert_eq!(synthesis.report.recommendations, vec!["Do X"]);
        assert!(synthesis.parse_error.is_none());
        assert_eq!(calls(&pipeline).len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_retries_with_longer_timeout() {
        let pipeline = pipeline(vec![Err(timeout()), Ok(valid_report())]);
        let synthesis = pipeline.synthesize(&facts()).await;

        assert!(synthesis.parse_error.is_none());
        let seen = calls(&pipeline);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].timeout, Duration::from_secs(30));
        assert_eq!(seen[1].timeout, Duration::from_secs(90));
        assert_eq!(seen[0].prompt, seen[1].prompt);
    }

    #[tokio::test]
    async fn two_transport_failures_fall_back_without_repair() {
        let pipeline = pipeline(vec![
            Err(timeout()),
            Err(ModelError::Connection("refused".to_string())),
        ]);
        let synthesis = pipeline.synthesize(&facts()).await;

        let parse_error = synthesis.parse_error.unwrap();
        assert!(parse_error.starts_with("model call failed: "));
        assert!(parse_error.contains("refused"));
        assert_eq!(synthesis.report.headline, "Ops Report");
        assert_eq!(
            synthesis.report.current_issues[0].summary,
            "LLM report generation failed"
        );
        assert_eq!(calls(&pipeline).len(), 2);
    }

    #[tokio::test]
    async fn overlong_headline_is_repaired() {
        let first = json!({
            "headline": "x".repeat(300),
            "notable_events": [],
            "current_issues": [],
            "recommendations": []
        })
        .to_string();
        let pipeline = pipeline(vec![Ok(first.clone()), Ok(valid_report())]);

        let synthesis = pipeline.synthesize(&facts()).await;
        assert_eq!(synthesis.report.headline, "Overall ok");
        assert_eq!(
            synthesis.parse_error.as_deref(),
            Some("Report headline too long; repaired via second pass")
        );

        let seen = calls(&pipeline);
        assert_eq!(seen.len(), 2);
        assert!(seen[1].prompt.contains(&first));
        assert!(seen[1].prompt.starts_with("The following blob"));
    }

    #[tokio::test]
    async fn invalid_repair_falls_back() {
        let empty = json!({
            "headline": "Overall ok",
            "notable_events": [],
            "current_issues": [],
            "recommendations": []
        })
        .to_string();
        let pipeline = pipeline(vec![Ok(empty.clone()), Ok(empty)]);

        let synthesis = pipeline.synthesize(&facts()).await;
        let parse_error = synthesis.parse_error.unwrap();
        assert!(parse_error.contains("; repair failed: missing actionable content"));
        assert_eq!(
            synthesis.report.current_issues[0].summary,
            "LLM report generation failed"
        );
        assert_eq!(synthesis.report.current_issues[0].suggestion, parse_error);
        assert_eq!(calls(&pipeline).len(), 2);
    }

    #[tokio::test]
    async fn repair_transport_failure_falls_back() {
        let pipeline = pipeline(vec![Ok("not valid json".to_string()), Err(timeout())]);
        let synthesis = pipeline.synthesize(&facts()).await;
        assert_eq!(
            synthesis.parse_error.as_deref(),
            Some("No JSON object found; repair failed: Ollama API timed out after 30s")
        );
        assert_eq!(calls(&pipeline).len(), 2);
    }

    #[tokio::test]
    async fn generate_renders_markdown_from_store() {
        let store = StateStore::open_in_memory(50).unwrap();
        store.ensure("wiki", CheckKind::Http, 1).unwrap();
        store.update("wiki", &ProbeOutcome::down(12, "refused")).unwrap();

        let pipeline = pipeline(vec![Ok(valid_report())]);
        let response = pipeline
            .generate(&store, &MonitorConfig::default(), 60, Utc::now())
            .await;

        assert!(response.ok);
        assert_eq!(response.range.range_minutes, 60);
        assert!(response.parse_error.is_none());
        assert!(response.markdown.contains("**Overall:** Overall ok"));
        assert!(response.markdown.contains("- Down checks: wiki"));
        assert!(response.markdown.contains("- Window: last 60 minutes"));
        assert!(!response.sources.proxmox_included);
        assert!(calls(&pipeline)[0].prompt.contains("\"range_minutes\": 60"));
    }

    #[tokio::test]
    async fn generate_is_ok_even_when_model_is_down() {
        let store = StateStore::open_in_memory(50).unwrap();
        let pipeline = pipeline(Vec::new());
        let response = pipeline
            .generate(&store, &MonitorConfig::default(), 1440, Utc::now())
            .await;

        assert!(response.ok);
        assert!(response.parse_error.unwrap().contains("model call failed"));
        assert!(response.markdown.contains("LLM report generation failed"));
    }
}
