//! Poll loop: probes every registered check once per interval.
//!
//! Each pass registers the checks with the state store, probes them all
//! concurrently, applies the outcomes in registry order, and refreshes
//! the proxmox-stats cache. The loop paces itself: it sleeps only what is
//! left of the interval after the pass, so slow probes shorten the sleep
//! but never push it negative.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use opsmon_core::NormalizedCheck;
use opsmon_state::{CheckState, Event, EventKind, FetchResult, StateStore};

use crate::probe::Prober;
use crate::proxmox::ProxmoxClient;

/// Callback invoked for every UP or DOWN transition.
///
/// Failures must be handled inside the callback; the loop never sees them.
pub type TransitionCallback = Arc<dyn Fn(Transition) -> BoxFuture + Send + Sync>;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A transition together with the check and the state it left behind.
#[derive(Debug, Clone)]
pub struct Transition {
    pub event: Event,
    pub check: NormalizedCheck,
    pub state: CheckState,
}

pub struct Poller<P> {
    store: StateStore,
    checks: Arc<Vec<NormalizedCheck>>,
    prober: Arc<P>,
    interval: Duration,
    proxmox: Option<ProxmoxClient>,
    on_transition: Option<TransitionCallback>,
}

impl<P: Prober> Poller<P> {
    pub fn new(
        store: StateStore,
        checks: Vec<NormalizedCheck>,
        prober: P,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            checks: Arc::new(checks),
            prober: Arc::new(prober),
            interval,
            proxmox: None,
            on_transition: None,
        }
    }

    /// Refresh the proxmox-stats cache at the end of every pass.
    pub fn with_proxmox(mut self, client: ProxmoxClient) -> Self {
        self.proxmox = Some(client);
        self
    }

    pub fn with_callback(mut self, callback: TransitionCallback) -> Self {
        self.on_transition = Some(callback);
        self
    }

    /// Run one full pass and return the events it produced.
    pub async fn run_once(&self) -> Vec<Event> {
        for check in self.checks.iter() {
            if let Err(e) = self
                .store
                .ensure(&check.id, check.kind(), check.down_threshold)
            {
                error!(check_id = %check.id, error = %e, "failed to register check");
            }
        }

        // No lock is held here: probes only touch the network.
        let outcomes = join_all(self.checks.iter().map(|check| self.prober.probe(check))).await;

        let mut events = Vec::new();
        for (check, outcome) in self.checks.iter().zip(outcomes) {
            match self.store.update(&check.id, &outcome) {
                Ok(Some(event)) => {
                    self.notify(check, &event).await;
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(check_id = %check.id, error = %e, "failed to record probe outcome");
                }
            }
        }

        if let Some(client) = &self.proxmox {
            let result = client.fetch_summary().await;
            if let FetchResult::Unavailable(reason) = &result {
                warn!(error = %reason, "proxmox-stats unavailable");
            }
            if let Err(e) = self.store.update_proxmox_stats(&result, Utc::now()) {
                error!(error = %e, "failed to store proxmox-stats result");
            }
        }

        events
    }

    async fn notify(&self, check: &NormalizedCheck, event: &Event) {
        if event.event == EventKind::Init {
            return;
        }
        let Some(callback) = &self.on_transition else {
            return;
        };
        let Some(state) = self.store.check_state(&check.id) else {
            return;
        };
        callback(Transition {
            event: event.clone(),
            check: check.clone(),
            state,
        })
        .await;
    }

    /// Poll until `shutdown` flips or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            checks = self.checks.len(),
            interval_s = self.interval.as_secs(),
            proxmox = self.proxmox.as_ref().is_some_and(ProxmoxClient::is_configured),
            "poll loop starting"
        );

        loop {
            let started = Instant::now();
            tokio::select! {
                events = self.run_once() => {
                    debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        events = events.len(),
                        "poll pass complete"
                    );
                }
                _ = shutdown.changed() => break,
            }

            let pause = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("poll loop shutting down");
    }

    /// Spawn the loop and hand back the handle that stops it.
    pub fn start(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        PollerHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Owned by the process entry point; stopping it ends the poll loop.
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "poll loop task failed");
        }
        info!("poll loop stopped");
    }
}
