pub mod config;
pub mod registry;
pub mod types;

pub use config::{MonitorConfig, NtfyConfig, OllamaConfig, ProxmoxConfig};
pub use registry::{CheckSpec, CheckTarget, Defaults, NormalizedCheck, Registry, RegistryError};
pub use types::*;
