//! Run mode: opens the store, starts the poll loop and serves the API
//! until Ctrl-C.
//!
//! Shutdown order: the API server drains first, then the poll loop is
//! stopped and awaited so no update is cut off mid-commit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use opsmon_api::{ApiState, build_router};
use opsmon_core::{MonitorConfig, Registry};
use opsmon_health::{
    BoxFuture, NetProber, NtfyNotifier, Poller, ProxmoxClient, Transition, TransitionCallback,
};
use opsmon_report::{OllamaClient, ReportPipeline};
use opsmon_state::StateStore;

pub async fn run(
    config_path: Option<PathBuf>,
    checks_path: PathBuf,
    port: u16,
    data_dir: PathBuf,
) -> anyhow::Result<()> {
    info!("opsmon daemon starting");

    // ── Configuration ──────────────────────────────────────────

    let config = match &config_path {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let registry = Registry::from_file(&checks_path)
        .with_context(|| format!("load check registry {}", checks_path.display()))?;
    info!(
        checks = registry.checks.len(),
        interval_s = config.interval().as_secs(),
        "configuration loaded"
    );

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("opsmon.redb");
    let store = StateStore::open(&db_path, config.max_events)?;
    info!(path = ?db_path, "state store opened");

    // ── Poll loop ──────────────────────────────────────────────

    let notifier = config.ntfy_settings().cloned().map(NtfyNotifier::new);
    let proxmox = ProxmoxClient::new(&config.proxmox);
    if !proxmox.is_configured() {
        info!("proxmox-stats base url not set, dependency will report unavailable");
    }

    let checks = registry.normalized();
    let prober = NetProber::for_checks(&checks);
    let mut poller =
        Poller::new(store.clone(), checks, prober, config.interval()).with_proxmox(proxmox);
    match &notifier {
        Some(notifier) => {
            info!(topic_url = %notifier.topic_url(), "ntfy notifications enabled");
            poller = poller.with_callback(ntfy_callback(notifier.clone()));
        }
        None => info!("ntfy not configured, transitions are not pushed"),
    }
    let poller = poller.start();

    // ── API server ─────────────────────────────────────────────

    let pipeline = ReportPipeline::new(OllamaClient::new(&config.ollama), &config.ollama);
    let router = build_router(ApiState {
        store,
        config: Arc::new(config),
        registry: Arc::new(registry),
        pipeline: Arc::new(pipeline),
        notifier,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    poller.stop().await;
    info!("opsmon daemon stopped");
    Ok(())
}

/// Push UP/DOWN transitions to ntfy. Failures are logged and dropped.
fn ntfy_callback(notifier: NtfyNotifier) -> TransitionCallback {
    Arc::new(move |transition: Transition| -> BoxFuture {
        let notifier = notifier.clone();
        Box::pin(async move {
            let Transition {
                event,
                check,
                state,
            } = transition;
            if let Err(e) = notifier.send_transition(&event, &check, &state).await {
                warn!(check_id = %check.id, error = %e, "transition notification failed");
            }
        })
    })
}
