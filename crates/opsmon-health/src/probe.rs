//! Probe executors.
//!
//! Probes are time-bounded and never fail past their own boundary: every
//! transport problem comes back as a `ProbeOutcome` with `ok = false` and
//! the error text.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, warn};

use opsmon_core::{CheckTarget, NormalizedCheck, ProbeOutcome};

/// Runs the probe for one check.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, check: &NormalizedCheck) -> impl Future<Output = ProbeOutcome> + Send;
}

/// HTTP and TCP probes over the real network.
///
/// reqwest sets the connect timeout per client, so one client is built
/// for each distinct `connect_timeout_s` up front and reused every pass.
#[derive(Clone)]
pub struct NetProber {
    client: reqwest::Client,
    connect_clients: Arc<HashMap<Duration, reqwest::Client>>,
}

impl NetProber {
    /// A prober without per-check connect timeouts.
    pub fn new() -> Self {
        Self::for_checks(&[])
    }

    /// A prober with a client ready for every connect timeout in `checks`.
    pub fn for_checks(checks: &[NormalizedCheck]) -> Self {
        let mut connect_clients = HashMap::new();
        for connect_timeout in checks.iter().filter_map(NormalizedCheck::connect_timeout) {
            if connect_clients.contains_key(&connect_timeout) {
                continue;
            }
            match build_client(Some(connect_timeout)) {
                Ok(client) => {
                    connect_clients.insert(connect_timeout, client);
                }
                Err(e) => {
                    warn!(?connect_timeout, error = %e, "failed to build http client, using default");
                }
            }
        }
        Self {
            client: build_client(None).unwrap_or_else(|_| reqwest::Client::new()),
            connect_clients: Arc::new(connect_clients),
        }
    }

    /// Client for a check: the shared one unless it sets a connect timeout.
    fn client_for(&self, check: &NormalizedCheck) -> reqwest::Result<reqwest::Client> {
        match check.connect_timeout() {
            None => Ok(self.client.clone()),
            Some(connect_timeout) => match self.connect_clients.get(&connect_timeout) {
                Some(client) => Ok(client.clone()),
                None => build_client(Some(connect_timeout)),
            },
        }
    }
}

impl Default for NetProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for NetProber {
    async fn probe(&self, check: &NormalizedCheck) -> ProbeOutcome {
        match &check.target {
            CheckTarget::Http { url } => match self.client_for(check) {
                Ok(client) => http_probe(&client, url, check.timeout()).await,
                Err(e) => ProbeOutcome::down(0, e.to_string()),
            },
            CheckTarget::Tcp { host, port } => tcp_probe(host, *port, check.timeout()).await,
        }
    }
}

fn build_client(connect_timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder =
        reqwest::Client::builder().user_agent(concat!("opsmon/", env!("CARGO_PKG_VERSION")));
    if let Some(connect_timeout) = connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    builder.build()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn timed_out(timeout: Duration) -> String {
    format!("timed out after {:.1}s", timeout.as_secs_f64())
}

/// GET `url`; success iff the response status is 2xx.
pub async fn http_probe(client: &reqwest::Client, url: &str, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) => {
            let latency_ms = elapsed_ms(start);
            let status = resp.status();
            if status.is_success() {
                ProbeOutcome::up(latency_ms).with_status(status.as_u16())
            } else {
                debug!(%url, %status, "http probe non-2xx");
                ProbeOutcome {
                    ok: false,
                    latency_ms,
                    status_code: Some(status.as_u16()),
                    error: None,
                }
            }
        }
        Err(e) if e.is_timeout() => {
            debug!(%url, "http probe timed out");
            ProbeOutcome::down(elapsed_ms(start), timed_out(timeout))
        }
        Err(e) => {
            debug!(%url, error = %e, "http probe failed");
            ProbeOutcome::down(elapsed_ms(start), e.to_string())
        }
    }
}

/// Connect to `host:port` within `timeout`.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => ProbeOutcome::up(elapsed_ms(start)),
        Ok(Err(e)) => {
            debug!(%host, port, error = %e, "tcp probe failed");
            ProbeOutcome::down(elapsed_ms(start), e.to_string())
        }
        Err(_) => ProbeOutcome::down(elapsed_ms(start), timed_out(timeout)),
    }
}
