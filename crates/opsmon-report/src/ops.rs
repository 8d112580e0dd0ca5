//! Read-only ops projections over the state store.
//!
//! Neither projection touches the network: they read the check snapshot
//! and whatever the poll loop last cached for proxmox-stats.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use opsmon_core::MonitorConfig;
use opsmon_state::{Event, Freshness, Health, StateStore, StoreView};

/// Events included in the ops summary.
pub const RECENT_EVENTS: usize = 20;

pub fn serialize_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Ok,
    Warn,
    Crit,
}

pub fn compute_overall(core_down: bool, non_core_down: bool, proxmox_status: &str) -> Overall {
    if core_down {
        Overall::Crit
    } else if proxmox_status == "warn" || non_core_down {
        Overall::Warn
    } else {
        Overall::Ok
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicesSummary {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub down_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxmoxSummary {
    pub status: String,
    pub issues: Vec<Value>,
    pub last_fetch_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpsSummary {
    pub generated_at: String,
    pub overall: Overall,
    pub services: ServicesSummary,
    pub proxmox: ProxmoxSummary,
    pub recent_events: Vec<Event>,
}

pub fn ops_summary(store: &StateStore, config: &MonitorConfig, now: DateTime<Utc>) -> OpsSummary {
    summarize_view(&store.view(RECENT_EVENTS), config, now)
}

/// Build the ops summary from an already-taken store view.
pub fn summarize_view(view: &StoreView, config: &MonitorConfig, now: DateTime<Utc>) -> OpsSummary {
    let snapshot = &view.states;

    let mut services = ServicesSummary {
        total: snapshot.len(),
        up: 0,
        down: 0,
        unknown: 0,
        down_list: Vec::new(),
    };
    let mut core_down = false;
    let mut non_core_down = false;
    for (check_id, state) in snapshot {
        match state.health() {
            Health::Up => services.up += 1,
            Health::Unknown => services.unknown += 1,
            Health::Down => {
                services.down += 1;
                services.down_list.push(check_id.clone());
                if config.is_core_check(check_id) {
                    core_down = true;
                } else {
                    non_core_down = true;
                }
            }
        }
    }

    let cache = &view.proxmox;
    let status = match &cache.last_payload {
        Some(_) => cache.payload_status().unwrap_or("unknown").to_string(),
        None => "unknown".to_string(),
    };
    let issues = cache
        .last_payload
        .as_ref()
        .and_then(|p| p.get("issues"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    OpsSummary {
        generated_at: serialize_ts(now),
        overall: compute_overall(core_down, non_core_down, &status),
        services,
        proxmox: ProxmoxSummary {
            status,
            issues,
            last_fetch_ts: cache.last_fetch_ts,
            last_error: cache.last_error.clone(),
        },
        recent_events: view.events.iter().take(RECENT_EVENTS).cloned().collect(),
    }
}

// ── Dependency health ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Ok,
    Unknown,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub status: DependencyStatus,
    pub last_fetch_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dependencies {
    pub proxmox_stats: DependencyHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpsHealth {
    pub generated_at: String,
    pub dependencies: Dependencies,
}

pub fn ops_health(store: &StateStore, poll_interval: Duration, now: DateTime<Utc>) -> OpsHealth {
    let cache = store.proxmox_stats_snapshot();
    let (status, note) = match cache.freshness(now, poll_interval) {
        Freshness::NeverPolled => (
            DependencyStatus::Unknown,
            Some("proxmox-stats not polled yet"),
        ),
        Freshness::Stale => (
            DependencyStatus::Unknown,
            Some("stale proxmox-stats poll data"),
        ),
        Freshness::Fresh if cache.last_error.is_some() => (DependencyStatus::Unavailable, None),
        Freshness::Fresh => (DependencyStatus::Ok, None),
    };

    OpsHealth {
        generated_at: serialize_ts(now),
        dependencies: Dependencies {
            proxmox_stats: DependencyHealth {
                status,
                last_fetch_ts: cache.last_fetch_ts,
                last_error: cache.last_error,
                note: note.map(str::to_string),
            },
        },
    }
}
