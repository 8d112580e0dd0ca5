//! proxmox-stats health summary client.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use opsmon_core::ProxmoxConfig;
use opsmon_state::FetchResult;

const SUMMARY_PATH: &str = "/api/metrics/health-summary";

pub const NOT_CONFIGURED: &str = "proxmox-stats base url is not configured";

/// Fetches the dependency's health summary. Never fails: every problem
/// becomes `FetchResult::Unavailable`.
#[derive(Clone)]
pub struct ProxmoxClient {
    client: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl ProxmoxClient {
    pub fn new(config: &ProxmoxConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url().map(str::to_string),
            timeout: config.timeout(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn fetch_summary(&self) -> FetchResult {
        let Some(base_url) = &self.base_url else {
            return FetchResult::Unavailable(NOT_CONFIGURED.to_string());
        };
        let url = summary_url(base_url);

        let resp = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(%url, error = %e, "proxmox-stats request failed");
                return FetchResult::Unavailable(e.to_string());
            }
        };

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return FetchResult::Unavailable(format!(
                "proxmox-stats returned HTTP {}",
                status.as_u16()
            ));
        }

        match resp.json::<Value>().await {
            Ok(payload @ Value::Object(_)) => FetchResult::Payload(payload),
            Ok(_) => FetchResult::Unavailable(
                "proxmox-stats payload is not a JSON object".to_string(),
            ),
            Err(e) => FetchResult::Unavailable(format!("invalid JSON: {e}")),
        }
    }
}

/// The summary endpoint, unless `base_url` already names a path.
pub fn summary_url(base_url: &str) -> String {
    let has_path = reqwest::Url::parse(base_url)
        .map(|url| !matches!(url.path(), "" | "/"))
        .unwrap_or(false);
    if has_path {
        base_url.to_string()
    } else {
        format!("{}{SUMMARY_PATH}", base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_port, serve};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn client_for(base_url: &str) -> ProxmoxClient {
        ProxmoxClient::new(&ProxmoxConfig {
            base_url: Some(base_url.to_string()),
            timeout_s: 1.0,
        })
    }

    #[test]
    fn summary_url_appends_path_only_to_bare_hosts() {
        assert_eq!(
            summary_url("http://stats.lan:8000"),
            "http://stats.lan:8000/api/metrics/health-summary"
        );
        assert_eq!(
            summary_url("http://stats.lan/"),
            "http://stats.lan/api/metrics/health-summary"
        );
        assert_eq!(
            summary_url("http://stats.lan/custom/summary"),
            "http://stats.lan/custom/summary"
        );
    }

    #[tokio::test]
    async fn unconfigured_is_unavailable() {
        let client = ProxmoxClient::new(&ProxmoxConfig::default());
        assert!(!client.is_configured());
        assert_eq!(
            client.fetch_summary().await,
            FetchResult::Unavailable(NOT_CONFIGURED.to_string())
        );
    }

    #[tokio::test]
    async fn object_payload_is_returned() {
        let base = serve(Router::new().route(
            "/api/metrics/health-summary",
            get(|| async { Json(json!({"status": "ok", "issues": []})) }),
        ))
        .await;
        assert_eq!(
            client_for(&base).fetch_summary().await,
            FetchResult::Payload(json!({"status": "ok", "issues": []}))
        );
    }

    #[tokio::test]
    async fn http_error_is_unavailable() {
        let base = serve(Router::new().route(
            "/api/metrics/health-summary",
            get(|| async { StatusCode::BAD_GATEWAY }),
        ))
        .await;
        assert_eq!(
            client_for(&base).fetch_summary().await,
            FetchResult::Unavailable("proxmox-stats returned HTTP 502".to_string())
        );
    }

    #[tokio::test]
    async fn non_object_and_invalid_json_are_unavailable() {
        let base = serve(
            Router::new()
                .route("/list", get(|| async { Json(json!([1, 2, 3])) }))
                .route("/text", get(|| async { "not json" })),
        )
        .await;

        let list = client_for(&format!("{base}/list")).fetch_summary().await;
        assert_eq!(
            list,
            FetchResult::Unavailable("proxmox-stats payload is not a JSON object".to_string())
        );

        let text = client_for(&format!("{base}/text")).fetch_summary().await;
        assert!(matches!(text, FetchResult::Unavailable(e) if e.starts_with("invalid JSON")));
    }

    #[tokio::test]
    async fn connection_failure_is_unavailable() {
        let port = closed_port().await;
        let result = client_for(&format!("http://127.0.0.1:{port}"))
            .fetch_summary()
            .await;
        assert!(matches!(result, FetchResult::Unavailable(_)));
    }
}
