//! Dependency cache transition and freshness rules.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{FetchResult, ProxmoxStatsCache};

/// Minimum age a cached fetch may reach before it counts as stale.
pub const MIN_FRESHNESS_WINDOW: Duration = Duration::from_secs(120);

/// How current the cached dependency data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    NeverPolled,
    Stale,
    Fresh,
}

/// Fold one fetch attempt into the cache.
///
/// A failed fetch keeps the previous payload so a transient outage does
/// not erase known-good data. The fetch timestamp moves on every attempt.
pub fn apply_fetch_result(
    current: &ProxmoxStatsCache,
    result: &FetchResult,
    fetch_ts: DateTime<Utc>,
) -> ProxmoxStatsCache {
    match result {
        FetchResult::Payload(payload) => ProxmoxStatsCache {
            last_payload: Some(payload.clone()),
            last_fetch_ts: Some(fetch_ts),
            last_error: None,
        },
        FetchResult::Unavailable(error) => ProxmoxStatsCache {
            last_payload: current.last_payload.clone(),
            last_fetch_ts: Some(fetch_ts),
            last_error: Some(error.clone()),
        },
    }
}

/// `max(2 * poll_interval, 120s)`.
pub fn freshness_window(poll_interval: Duration) -> Duration {
    (poll_interval * 2).max(MIN_FRESHNESS_WINDOW)
}

impl ProxmoxStatsCache {
    pub fn freshness(&self, now: DateTime<Utc>, poll_interval: Duration) -> Freshness {
        let Some(fetched) = self.last_fetch_ts else {
            return Freshness::NeverPolled;
        };
        let age = now.signed_duration_since(fetched);
        // A fetch stamped in the future counts as zero age.
        let age = age.to_std().unwrap_or(Duration::ZERO);
        if age <= freshness_window(poll_interval) {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// The `status` field of the cached payload, if any.
    pub fn payload_status(&self) -> Option<&str> {
        self.last_payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(|s| s.as_str())
    }
}
