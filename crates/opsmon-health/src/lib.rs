//! opsmon-health: probes and the poll loop for opsmon.
//!
//! # Architecture
//!
//! ```text
//! PollerHandle (owned by opsmond)
//!   └── Poller background task, once per interval
//!       ├── StateStore::ensure for every registered check
//!       ├── Prober::probe for all checks, concurrently
//!       ├── StateStore::update in registry order → Event
//!       │   └── TransitionCallback for UP / DOWN (ntfy)
//!       └── ProxmoxClient::fetch_summary → dependency cache
//! ```

pub mod notify;
pub mod poller;
pub mod probe;
pub mod proxmox;

#[cfg(test)]
mod testing;

pub use notify::{NotifyError, NtfyNotifier, format_transition};
pub use poller::{BoxFuture, Poller, PollerHandle, Transition, TransitionCallback};
pub use probe::{NetProber, Prober, http_probe, tcp_probe};
pub use proxmox::{ProxmoxClient, summary_url};
