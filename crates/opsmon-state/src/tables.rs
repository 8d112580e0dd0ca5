//! redb table definitions for the opsmon state store.
//!
//! Values are JSON-serialized rows. Fields added after a row was written
//! are filled from serde defaults on load, so older databases open cleanly.

use redb::TableDefinition;

/// Check state rows keyed by check id.
pub const CHECK_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("check_states");

/// Transition events keyed by insertion sequence.
pub const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

/// Dependency cache snapshots keyed by dependency name.
pub const DEPENDENCY_CACHE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("dependency_cache");

/// Key of the proxmox-stats row in [`DEPENDENCY_CACHE`].
pub const PROXMOX_KEY: &str = "proxmox_stats";
