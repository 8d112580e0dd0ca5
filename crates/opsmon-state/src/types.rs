//! Domain types for the opsmon state store.
//!
//! These types are the persisted state of registered checks, the bounded
//! transition log, and the dependency cache. All of them are serializable
//! to/from JSON for storage in redb tables and for the REST facade.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use opsmon_core::CheckKind;

// ── Check state ───────────────────────────────────────────────────

/// Health state of one registered check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckState {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CheckKind,
    /// `None` until the check is declared up or down.
    pub ok: Option<bool>,
    /// Consecutive failures since the last success.
    #[serde(default)]
    pub fail_count: u32,
    /// Consecutive failures required to declare the check down.
    #[serde(default = "default_down_threshold")]
    pub down_threshold: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_ok: Option<DateTime<Utc>>,
    pub last_change: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

fn default_down_threshold() -> u32 {
    1
}

impl CheckState {
    /// A never-probed check.
    pub fn new(id: &str, kind: CheckKind, down_threshold: u32) -> Self {
        Self {
            id: id.to_string(),
            kind,
            ok: None,
            fail_count: 0,
            down_threshold: down_threshold.max(1),
            last_run: None,
            last_ok: None,
            last_change: None,
            latency_ms: None,
            status_code: None,
            error: None,
        }
    }

    pub fn health(&self) -> Health {
        match self.ok {
            Some(true) => Health::Up,
            Some(false) => Health::Down,
            None => Health::Unknown,
        }
    }
}

/// Declared health of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Up,
    Down,
    Unknown,
}

// ── Events ────────────────────────────────────────────────────────

/// Kind of transition recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// First outcome ever observed for a check.
    Init,
    Up,
    Down,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Init => "INIT",
            EventKind::Up => "UP",
            EventKind::Down => "DOWN",
        };
        f.write_str(s)
    }
}

/// Immutable transition record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(rename = "id")]
    pub check_id: String,
    pub event: EventKind,
    /// The probe outcome that produced this event.
    pub ok: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

// ── Summary ───────────────────────────────────────────────────────

/// Aggregate counts over all known checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSummary {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub down_checks: Vec<CheckState>,
}

impl StatusSummary {
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a CheckState>) -> Self {
        let mut summary = StatusSummary::default();
        for state in states {
            summary.total += 1;
            match state.health() {
                Health::Up => summary.up += 1,
                Health::Unknown => summary.unknown += 1,
                Health::Down => {
                    summary.down += 1;
                    summary.down_checks.push(state.clone());
                }
            }
        }
        summary
    }

    pub fn down_ids(&self) -> Vec<&str> {
        self.down_checks.iter().map(|c| c.id.as_str()).collect()
    }
}

// ── Dependency cache ──────────────────────────────────────────────

/// Last known proxmox-stats health summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProxmoxStatsCache {
    /// Last successfully fetched payload; survives later failed fetches.
    pub last_payload: Option<Value>,
    /// Time of the last fetch attempt, successful or not.
    pub last_fetch_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ── Consistent read ───────────────────────────────────────────────

/// Check states, recent events and the proxmox-stats cache taken at one
/// instant, so no update lands between the three reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreView {
    pub states: BTreeMap<String, CheckState>,
    /// Newest first.
    pub events: Vec<Event>,
    pub proxmox: ProxmoxStatsCache,
}

impl StoreView {
    pub fn summary(&self) -> StatusSummary {
        StatusSummary::from_states(self.states.values())
    }
}

/// Outcome of one dependency fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Payload(Value),
    Unavailable(String),
}
