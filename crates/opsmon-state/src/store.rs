//! StateStore: redb-backed check state engine.
//!
//! Holds the live check states, the bounded event log and the dependency
//! cache in memory, and mirrors every change to redb before it becomes
//! visible. One write transaction covers the state row, the event it
//! produced and the log trim, so a crash never leaves an event without
//! its row or the other way round.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::{debug, info, warn};

use opsmon_core::{CheckKind, ProbeOutcome};

use crate::cache::apply_fetch_result;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// In-memory view of the check tables.
#[derive(Default)]
struct CheckBook {
    states: BTreeMap<String, CheckState>,
    /// Ids registered since this process started.
    registered: HashSet<String>,
    /// Oldest first.
    events: VecDeque<Event>,
    next_seq: u64,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    book: Arc<Mutex<CheckBook>>,
    proxmox: Arc<Mutex<ProxmoxStatsCache>>,
    max_events: usize,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path, max_events: usize) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::load(db, max_events)?;
        debug!(?path, checks = store.book().states.len(), "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory(max_events: usize) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::load(db, max_events)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn load(db: Database, max_events: usize) -> StateResult<Self> {
        let max_events = max_events.max(1);

        // Create missing tables and drop events beyond the cap, which may
        // have shrunk since the database was last written.
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CHECK_STATES).map_err(map_err!(Table))?;
        txn.open_table(DEPENDENCY_CACHE).map_err(map_err!(Table))?;
        let next_seq = {
            let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let last = table.last().map_err(map_err!(Read))?;
            last.map(|(key, _)| key.value() + 1).unwrap_or(0)
        };
        trim_events(&txn, next_seq.saturating_sub(max_events as u64))?;
        txn.commit().map_err(map_err!(Transaction))?;

        let mut book = CheckBook {
            next_seq,
            ..CheckBook::default()
        };
        let mut proxmox = ProxmoxStatsCache::default();
        {
            let txn = db.begin_read().map_err(map_err!(Transaction))?;

            let table = txn.open_table(CHECK_STATES).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let state: CheckState =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                book.states.insert(key.value().to_string(), state);
            }

            let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))?.rev().take(max_events) {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let event: Event =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                book.events.push_front(event);
            }

            let table = txn.open_table(DEPENDENCY_CACHE).map_err(map_err!(Table))?;
            if let Some(guard) = table.get(PROXMOX_KEY).map_err(map_err!(Read))? {
                proxmox =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            }
        }

        Ok(Self {
            db: Arc::new(db),
            book: Arc::new(Mutex::new(book)),
            proxmox: Arc::new(Mutex::new(proxmox)),
            max_events,
        })
    }

    fn book(&self) -> MutexGuard<'_, CheckBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn proxmox(&self) -> MutexGuard<'_, ProxmoxStatsCache> {
        self.proxmox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Checks ─────────────────────────────────────────────────────

    /// Make sure a state row exists for `check_id`.
    ///
    /// The first call for an id in this process wins: a new row is
    /// created, or a row loaded from disk has its kind and threshold
    /// refreshed from the registry. Later calls are no-ops.
    pub fn ensure(&self, check_id: &str, kind: CheckKind, down_threshold: u32) -> StateResult<()> {
        let mut book = self.book();
        if book.registered.contains(check_id) {
            return Ok(());
        }

        let down_threshold = down_threshold.max(1);
        let next = match book.states.get(check_id) {
            Some(existing)
                if existing.kind == kind && existing.down_threshold == down_threshold =>
            {
                None
            }
            Some(existing) => {
                let mut refreshed = existing.clone();
                refreshed.kind = kind;
                refreshed.down_threshold = down_threshold;
                Some(refreshed)
            }
            None => Some(CheckState::new(check_id, kind, down_threshold)),
        };

        if let Some(state) = next {
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            put_state(&txn, &state)?;
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(%check_id, %kind, down_threshold, "check registered");
            book.states.insert(check_id.to_string(), state);
        }
        book.registered.insert(check_id.to_string());
        Ok(())
    }

    /// Apply one probe outcome to a registered check.
    ///
    /// Returns the event the outcome produced, if any. Nothing changes in
    /// memory unless the write transaction commits.
    pub fn update(&self, check_id: &str, outcome: &ProbeOutcome) -> StateResult<Option<Event>> {
        let now = Utc::now();
        let mut book = self.book();
        let mut state = book
            .states
            .get(check_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(check_id.to_string()))?;

        let event = state.record(outcome, now).map(|kind| Event {
            ts: now,
            check_id: check_id.to_string(),
            event: kind,
            ok: outcome.ok,
            latency_ms: outcome.latency_ms,
            status_code: outcome.status_code,
            error: outcome.error.clone(),
        });

        let seq = book.next_seq;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        put_state(&txn, &state)?;
        if let Some(event) = &event {
            let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
            {
                let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
                table
                    .insert(seq, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            trim_events(&txn, (seq + 1).saturating_sub(self.max_events as u64))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        book.states.insert(check_id.to_string(), state);
        if let Some(event) = &event {
            book.next_seq = seq + 1;
            book.events.push_back(event.clone());
            while book.events.len() > self.max_events {
                book.events.pop_front();
            }
            match event.event {
                EventKind::Down => warn!(
                    %check_id,
                    error = event.error.as_deref().unwrap_or(""),
                    latency_ms = event.latency_ms,
                    "check down"
                ),
                kind => info!(%check_id, event = %kind, latency_ms = event.latency_ms, "check transition"),
            }
        }
        Ok(event)
    }

    /// All check states keyed by id.
    pub fn snapshot(&self) -> BTreeMap<String, CheckState> {
        self.book().states.clone()
    }

    pub fn check_state(&self, check_id: &str) -> Option<CheckState> {
        self.book().states.get(check_id).cloned()
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary::from_states(self.book().states.values())
    }

    /// Up to `limit` events, newest first.
    pub fn events(&self, limit: usize) -> Vec<Event> {
        self.book().events.iter().rev().take(limit).cloned().collect()
    }

    /// States, up to `event_limit` newest events and the proxmox-stats
    /// cache, read while holding both locks.
    pub fn view(&self, event_limit: usize) -> StoreView {
        let book = self.book();
        let proxmox = self.proxmox();
        StoreView {
            states: book.states.clone(),
            events: book.events.iter().rev().take(event_limit).cloned().collect(),
            proxmox: proxmox.clone(),
        }
    }

    // ── Dependency cache ───────────────────────────────────────────

    pub fn proxmox_stats_snapshot(&self) -> ProxmoxStatsCache {
        self.proxmox().clone()
    }

    /// Fold a fetch attempt into the proxmox-stats cache and persist it.
    pub fn update_proxmox_stats(
        &self,
        result: &FetchResult,
        fetch_ts: DateTime<Utc>,
    ) -> StateResult<ProxmoxStatsCache> {
        let mut cache = self.proxmox();
        let next = apply_fetch_result(&cache, result, fetch_ts);

        let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPENDENCY_CACHE).map_err(map_err!(Table))?;
            table
                .insert(PROXMOX_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        *cache = next.clone();
        Ok(next)
    }
}

fn put_state(txn: &WriteTransaction, state: &CheckState) -> StateResult<()> {
    let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
    let mut table = txn.open_table(CHECK_STATES).map_err(map_err!(Table))?;
    table
        .insert(state.id.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Remove every event whose sequence is below `floor`.
fn trim_events(txn: &WriteTransaction, floor: u64) -> StateResult<()> {
    let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
    loop {
        let oldest = match table.first().map_err(map_err!(Read))? {
            Some((key, _)) => key.value(),
            None => break,
        };
        if oldest >= floor {
            break;
        }
        table.remove(oldest).map_err(map_err!(Write))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> ProbeOutcome {
        ProbeOutcome::up(12).with_status(200)
    }

    fn fail() -> ProbeOutcome {
        ProbeOutcome::down(40, "connection refused")
    }

    #[test]
    fn ensure_creates_unknown_state() {
        let store = StateStore::open_in_memory(100).unwrap();
        store.ensure("wiki", CheckKind::Http, 2).unwrap();

        let state = store.check_state("wiki").unwrap();
        assert_eq!(state.ok, None);
        assert_eq!(state.fail_count, 0);
        assert_eq!(state.down_threshold, 2);
        assert!(state.last_run.is_none());

        let summary = store.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.unknown, 1);
    }

    #[test]
    fn first_registration_wins() {
        let store = StateStore::open_in_memory(100).unwrap();
        store.ensure("wiki", CheckKind::Http, 2).unwrap();
        store.ensure("wiki", CheckKind::Tcp, 5).unwrap();

        let state = store.check_state("wiki").unwrap();
        assert_eq!(state.kind, CheckKind::Http);
        assert_eq!(state.down_threshold, 2);
    }

    #[test]
    fn update_unknown_check_is_not_found() {
        let store = StateStore::open_in_memory(100).unwrap();
        let err = store.update("ghost", &ok()).unwrap_err();
        assert!(matches!(err, StateError::NotFound(id) if id == "ghost"));
        assert!(store.events(10).is_empty());
    }

    #[test]
    fn update_records_events_newest_first() {
        let store = StateStore::open_in_memory(100).unwrap();
        store.ensure("wiki", CheckKind::Http, 1).unwrap();

        let init = store.update("wiki", &ok()).unwrap().unwrap();
        assert_eq!(init.event, EventKind::Init);
        assert!(init.ok);
        assert_eq!(init.status_code, Some(200));

        assert!(store.update("wiki", &ok()).unwrap().is_none());

        let down = store.update("wiki", &fail()).unwrap().unwrap();
        assert_eq!(down.event, EventKind::Down);
        assert_eq!(down.error.as_deref(), Some("connection refused"));

        let events = store.events(50);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, EventKind::Down);
        assert_eq!(events[1].event, EventKind::Init);
        assert_eq!(store.events(1).len(), 1);

        let summary = store.summary();
        assert_eq!(summary.down, 1);
        assert_eq!(summary.down_ids(), vec!["wiki"]);
    }

    #[test]
    fn event_log_is_bounded() {
        let store = StateStore::open_in_memory(3).unwrap();
        store.ensure("svc", CheckKind::Tcp, 1).unwrap();
        store.update("svc", &ok()).unwrap();
        for _ in 0..4 {
            store.update("svc", &fail()).unwrap();
            store.update("svc", &ok()).unwrap();
        }

        let events = store.events(100);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, EventKind::Up);
        assert_eq!(events[1].event, EventKind::Down);
        assert_eq!(events[2].event, EventKind::Up);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&path, 100).unwrap();
            store.ensure("wiki", CheckKind::Http, 2).unwrap();
            store.update("wiki", &ok()).unwrap();
            store.update("wiki", &fail()).unwrap();
            store
                .update_proxmox_stats(
                    &FetchResult::Payload(serde_json::json!({"status": "ok"})),
                    Utc::now(),
                )
                .unwrap();
        }

        let store = StateStore::open(&path, 100).unwrap();
        let state = store.check_state("wiki").unwrap();
        assert_eq!(state.ok, Some(true));
        assert_eq!(state.fail_count, 1);
        assert_eq!(state.down_threshold, 2);
        assert_eq!(store.events(10).len(), 1);
        assert_eq!(
            store.proxmox_stats_snapshot().payload_status(),
            Some("ok")
        );

        // Hysteresis continues from the persisted count.
        let down = store.update("wiki", &fail()).unwrap().unwrap();
        assert_eq!(down.event, EventKind::Down);
    }

    #[test]
    fn reopen_reproduces_snapshot_and_event_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        let (snapshot, events) = {
            let store = StateStore::open(&path, 4).unwrap();
            store.ensure("wiki", CheckKind::Http, 1).unwrap();
            store.ensure("db", CheckKind::Tcp, 2).unwrap();
            store.ensure("idle", CheckKind::Tcp, 1).unwrap();
            for outcome in [ok(), fail(), ok(), fail()] {
                store.update("wiki", &outcome).unwrap();
                store.update("db", &fail()).unwrap();
            }
            (store.snapshot(), store.events(100))
        };
        assert_eq!(events.len(), 4);

        let store = StateStore::open(&path, 4).unwrap();
        assert_eq!(store.snapshot(), snapshot);
        assert_eq!(store.events(100), events);
        assert_eq!(store.check_state("idle").unwrap().ok, None);
    }

    #[test]
    fn reopen_with_smaller_cap_trims_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&path, 100).unwrap();
            store.ensure("svc", CheckKind::Http, 1).unwrap();
            store.update("svc", &ok()).unwrap();
            for _ in 0..3 {
                store.update("svc", &fail()).unwrap();
                store.update("svc", &ok()).unwrap();
            }
            assert_eq!(store.events(100).len(), 7);
        }

        {
            let store = StateStore::open(&path, 2).unwrap();
            let events = store.events(100);
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].event, EventKind::Up);
            assert_eq!(events[1].event, EventKind::Down);

            // New events keep counting after the surviving ones.
            store.update("svc", &fail()).unwrap();
            assert_eq!(store.events(100)[0].event, EventKind::Down);
        }

        let db = Database::create(&path).unwrap();
        let txn = db.begin_read().unwrap();
        let table = txn.open_table(EVENTS).unwrap();
        assert_eq!(table.iter().unwrap().count(), 2);
    }

    #[test]
    fn restart_refreshes_threshold_from_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&path, 100).unwrap();
            store.ensure("wiki", CheckKind::Http, 1).unwrap();
            store.update("wiki", &ok()).unwrap();
        }

        let store = StateStore::open(&path, 100).unwrap();
        store.ensure("wiki", CheckKind::Http, 3).unwrap();
        let state = store.check_state("wiki").unwrap();
        assert_eq!(state.down_threshold, 3);
        assert_eq!(state.ok, Some(true));
    }

    #[test]
    fn legacy_rows_get_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let db = Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(CHECK_STATES).unwrap();
                let row = serde_json::json!({
                    "id": "old",
                    "type": "tcp",
                    "ok": false,
                    "last_run": "2025-06-01T00:00:00Z",
                    "last_ok": null,
                    "last_change": "2025-06-01T00:00:00Z",
                    "latency_ms": 3000,
                    "status_code": null,
                    "error": "timeout"
                });
                let bytes = serde_json::to_vec(&row).unwrap();
                table.insert("old", bytes.as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = StateStore::open(&path, 100).unwrap();
        let state = store.check_state("old").unwrap();
        assert_eq!(state.fail_count, 0);
        assert_eq!(state.down_threshold, 1);
        assert_eq!(state.ok, Some(false));

        // A success after restart is a real transition, not INIT.
        store.ensure("old", CheckKind::Tcp, 1).unwrap();
        let up = store.update("old", &ok()).unwrap().unwrap();
        assert_eq!(up.event, EventKind::Up);
    }

    #[test]
    fn failed_fetch_keeps_cached_payload() {
        let store = StateStore::open_in_memory(10).unwrap();
        let t0 = Utc::now();
        store
            .update_proxmox_stats(
                &FetchResult::Payload(serde_json::json!({"status": "warn", "issues": []})),
                t0,
            )
            .unwrap();
        let t1 = t0 + chrono::Duration::seconds(30);
        let cache = store
            .update_proxmox_stats(&FetchResult::Unavailable("timeout".to_string()), t1)
            .unwrap();

        assert_eq!(cache.payload_status(), Some("warn"));
        assert_eq!(cache.last_fetch_ts, Some(t1));
        assert_eq!(store.proxmox_stats_snapshot(), cache);
    }

    #[test]
    fn view_matches_individual_reads() {
        let store = StateStore::open_in_memory(10).unwrap();
        store.ensure("wiki", CheckKind::Http, 1).unwrap();
        store.ensure("db", CheckKind::Tcp, 1).unwrap();
        store.update("wiki", &ok()).unwrap();
        store.update("db", &fail()).unwrap();
        store
            .update_proxmox_stats(
                &FetchResult::Payload(serde_json::json!({"status": "ok"})),
                Utc::now(),
            )
            .unwrap();

        let view = store.view(1);
        assert_eq!(view.states, store.snapshot());
        assert_eq!(view.events, store.events(1));
        assert_eq!(view.events[0].check_id, "db");
        assert_eq!(view.proxmox, store.proxmox_stats_snapshot());
        assert_eq!(view.summary(), store.summary());
    }
}
