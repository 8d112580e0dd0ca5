//! ntfy push notifications.

use std::time::Duration;

use chrono::SecondsFormat;
use thiserror::Error;
use tracing::debug;

use opsmon_core::{NormalizedCheck, NtfyConfig};
use opsmon_state::{CheckState, Event, EventKind};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

const TAGS_DOWN: &str = "rotating_light,down";
const TAGS_UP: &str = "white_check_mark,up";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("ntfy request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ntfy returned HTTP {0}")]
    Status(u16),
}

#[derive(Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
    config: NtfyConfig,
}

impl NtfyNotifier {
    pub fn new(config: NtfyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn topic_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.topic
        )
    }

    async fn post(
        &self,
        title: &str,
        message: &str,
        priority: u8,
        tags: &str,
    ) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.topic_url())
            .timeout(NOTIFY_TIMEOUT)
            .header("Title", title)
            .header("Priority", priority.to_string())
            .header("Tags", tags)
            .body(message.to_string())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(%title, priority, "ntfy notification sent");
        Ok(())
    }

    pub async fn send_down(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.post(title, message, self.config.priority_down, TAGS_DOWN)
            .await
    }

    pub async fn send_up(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.post(title, message, self.config.priority_up, TAGS_UP)
            .await
    }

    /// Push the notification matching a transition. `Init` is not notified.
    pub async fn send_transition(
        &self,
        event: &Event,
        check: &NormalizedCheck,
        state: &CheckState,
    ) -> Result<(), NotifyError> {
        let (title, message) = format_transition(event, check, state);
        match event.event {
            EventKind::Down => self.send_down(&title, &message).await,
            EventKind::Up => self.send_up(&title, &message).await,
            EventKind::Init => Ok(()),
        }
    }
}

/// Render the notification title and plain-text body for a transition.
pub fn format_transition(
    event: &Event,
    check: &NormalizedCheck,
    state: &CheckState,
) -> (String, String) {
    let title = format!("[{}] {}", event.event, check.id);

    let latency_ms = state.latency_ms.unwrap_or(event.latency_ms);
    let mut lines = vec![
        format!("Check: {} ({})", check.id, check.kind()),
        format!("Target: {}", check.target.describe()),
        format!("Latency: {latency_ms} ms"),
    ];
    if let Some(code) = state.status_code {
        lines.push(format!("HTTP: {code}"));
    }
    if let Some(error) = state.error.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("Error: {error}"));
    }
    lines.push(format!(
        "Time: {}",
        event.ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    (title, lines.join("\n"))
}
