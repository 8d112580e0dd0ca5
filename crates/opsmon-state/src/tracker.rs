//! Threshold-gated transition logic.
//!
//! A check is declared down only after `down_threshold` consecutive
//! failures; a single success declares it up and resets the failure
//! count. Failures below the threshold leave the declared state alone,
//! which is what keeps a flapping endpoint from producing an event on
//! every poll.

use chrono::{DateTime, Utc};
use tracing::debug;

use opsmon_core::ProbeOutcome;

use crate::types::{CheckState, EventKind};

impl CheckState {
    /// Apply one probe outcome and return the transition it caused, if any.
    ///
    /// The very first outcome for a check always yields `Init`. After
    /// that, `Up` and `Down` are emitted only when the declared state
    /// actually changes.
    pub fn record(&mut self, outcome: &ProbeOutcome, now: DateTime<Utc>) -> Option<EventKind> {
        let first_observation = self.last_run.is_none();
        let prev = self.ok;
        let mut transition = None;

        if outcome.ok {
            self.fail_count = 0;
            if prev != Some(true) {
                self.ok = Some(true);
                transition = Some(EventKind::Up);
            }
            self.last_ok = Some(now);
        } else {
            self.fail_count = self.fail_count.saturating_add(1);
            if self.fail_count >= self.down_threshold {
                if prev != Some(false) {
                    self.ok = Some(false);
                    transition = Some(EventKind::Down);
                }
            } else {
                debug!(
                    check_id = %self.id,
                    failures = self.fail_count,
                    threshold = self.down_threshold,
                    "failure below down threshold"
                );
            }
        }

        self.last_run = Some(now);
        self.latency_ms = Some(outcome.latency_ms);
        self.status_code = outcome.status_code;
        self.error = outcome.error.clone();

        let event = if first_observation {
            Some(EventKind::Init)
        } else {
            transition
        };
        if event.is_some() {
            self.last_change = Some(now);
        }
        event
    }
}
