//! Internal facts handed to the model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use opsmon_core::MonitorConfig;
use opsmon_state::{Event, StateStore, StatusSummary};

use crate::ops::{OpsSummary, serialize_ts, summarize_view};

/// Newest events included in the facts bundle.
pub const REPORT_EVENTS_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ProxmoxFacts {
    /// Cached payload, or an empty object when none was ever fetched.
    pub last_payload: Value,
    pub last_fetch_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportFacts {
    pub ops_summary: OpsSummary,
    pub status_summary: StatusSummary,
    pub events: Vec<Event>,
    pub proxmox: ProxmoxFacts,
    pub generated_at: String,
    pub range_minutes: u32,
}

/// Which inputs went into a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcesInfo {
    pub ops_summary_included: bool,
    pub status_summary_included: bool,
    pub events_limit: usize,
    pub proxmox_included: bool,
}

impl ReportFacts {
    pub fn collect(
        store: &StateStore,
        config: &MonitorConfig,
        range_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        // One view feeds every section so they agree with each other.
        let view = store.view(REPORT_EVENTS_LIMIT);
        let ops_summary = summarize_view(&view, config, now);
        let status_summary = view.summary();
        let last_payload = match view.proxmox.last_payload {
            Some(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Map::new()),
        };

        Self {
            ops_summary,
            status_summary,
            events: view.events,
            proxmox: ProxmoxFacts {
                last_payload,
                last_fetch_ts: view.proxmox.last_fetch_ts,
                last_error: view.proxmox.last_error,
            },
            generated_at: serialize_ts(now),
            range_minutes,
        }
    }

    pub fn sources(&self) -> SourcesInfo {
        let proxmox_included = self
            .proxmox
            .last_payload
            .as_object()
            .is_some_and(|map| !map.is_empty());
        SourcesInfo {
            ops_summary_included: true,
            status_summary_included: true,
            events_limit: REPORT_EVENTS_LIMIT,
            proxmox_included,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmon_core::{CheckKind, ProbeOutcome};
    use opsmon_state::FetchResult;
    use serde_json::json;

    #[test]
    fn facts_without_proxmox_payload() {
        let store = StateStore::open_in_memory(50).unwrap();
        store.ensure("wiki", CheckKind::Http, 1).unwrap();
        store.update("wiki", &ProbeOutcome::down(5, "refused")).unwrap();

        let facts = ReportFacts::collect(&store, &MonitorConfig::default(), 60, Utc::now());
        assert_eq!(facts.range_minutes, 60);
        assert_eq!(facts.status_summary.down, 1);
        assert_eq!(facts.events.len(), 1);
        assert_eq!(facts.proxmox.last_payload, json!({}));

        let sources = facts.sources();
        assert!(sources.ops_summary_included);
        assert_eq!(sources.events_limit, 200);
        assert!(!sources.proxmox_included);
    }

    #[test]
    fn sections_agree_with_each_other() {
        let store = StateStore::open_in_memory(500).unwrap();
        store.ensure("svc", CheckKind::Tcp, 1).unwrap();
        for i in 0..30 {
            let outcome = if i % 2 == 0 {
                ProbeOutcome::up(5)
            } else {
                ProbeOutcome::down(5, "refused")
            };
            store.update("svc", &outcome).unwrap();
        }

        let facts = ReportFacts::collect(&store, &MonitorConfig::default(), 60, Utc::now());
        assert_eq!(facts.events.len(), 30);
        assert_eq!(facts.ops_summary.recent_events.len(), 20);
        assert_eq!(facts.ops_summary.recent_events[..], facts.events[..20]);
        assert_eq!(facts.status_summary.down, facts.ops_summary.services.down);
    }

    #[test]
    fn facts_serialize_with_expected_keys() {
        let store = StateStore::open_in_memory(50).unwrap();
        store
            .update_proxmox_stats(&FetchResult::Payload(json!({"status": "ok"})), Utc::now())
            .unwrap();

        let facts = ReportFacts::collect(&store, &MonitorConfig::default(), 1440, Utc::now());
        assert!(facts.sources().proxmox_included);

        let value = serde_json::to_value(&facts).unwrap();
        for key in [
            "ops_summary",
            "status_summary",
            "events",
            "proxmox",
            "generated_at",
            "range_minutes",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["proxmox"]["last_payload"]["status"], "ok");
    }
}
