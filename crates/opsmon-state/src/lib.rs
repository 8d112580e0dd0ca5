//! opsmon-state: check state engine for opsmon.
//!
//! Backed by [redb](https://docs.rs/redb). Tracks the declared health of
//! every registered check with per-check down thresholds, keeps a bounded
//! log of transitions, and caches the last proxmox-stats summary.
//!
//! # Architecture
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns. Readers get
//! clones of the in-memory view, which only moves after the matching write
//! transaction has committed.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` and can be shared across
//! async tasks.

pub mod cache;
pub mod error;
pub mod store;
pub mod tables;
pub mod tracker;
pub mod types;

pub use cache::{Freshness, apply_fetch_result, freshness_window};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
