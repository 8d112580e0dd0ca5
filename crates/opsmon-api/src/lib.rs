//! opsmon-api: REST API for opsmon.
//!
//! Thin axum handlers over the state store, the ops projections and the
//! report pipeline. No decision logic lives here.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Liveness |
//! | GET | `/config` | Effective integration settings |
//! | GET | `/api/registry` | Normalized check registry |
//! | GET | `/api/status/checks` | Per-check state snapshot |
//! | GET | `/api/status/summary` | Aggregate up/down counts |
//! | GET | `/api/status/events` | Newest transition events (`?limit=50`) |
//! | GET | `/api/ops/summary` | Overall status with dependency data |
//! | GET | `/api/ops/health` | Dependency freshness |
//! | POST | `/api/alerts/test/{check_id}` | Send a test notification |
//! | POST | `/api/reports/generate` | Synthesize an ops report |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use opsmon_core::{MonitorConfig, Registry};
use opsmon_health::NtfyNotifier;
use opsmon_report::{ReportModel, ReportPipeline};
use opsmon_state::StateStore;

/// Shared state for API handlers.
pub struct ApiState<M> {
    pub store: StateStore,
    pub config: Arc<MonitorConfig>,
    pub registry: Arc<Registry>,
    pub pipeline: Arc<ReportPipeline<M>>,
    /// `None` when ntfy is not configured.
    pub notifier: Option<NtfyNotifier>,
}

impl<M> Clone for ApiState<M> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
            pipeline: self.pipeline.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

/// Build the complete API router.
pub fn build_router<M: ReportModel>(state: ApiState<M>) -> Router {
    let api_routes = Router::new()
        .route("/registry", get(handlers::registry::<M>))
        .route("/status/checks", get(handlers::status_checks::<M>))
        .route("/status/summary", get(handlers::status_summary::<M>))
        .route("/status/events", get(handlers::status_events::<M>))
        .route("/ops/summary", get(handlers::ops_summary::<M>))
        .route("/ops/health", get(handlers::ops_health::<M>))
        .route("/alerts/test/{check_id}", post(handlers::alerts_test::<M>))
        .route("/reports/generate", post(handlers::generate_report::<M>));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::config::<M>))
        .nest("/api", api_routes)
        .with_state(state)
}
