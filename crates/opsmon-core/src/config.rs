//! opsmon.toml configuration parser.
//!
//! The daemon builds one `MonitorConfig` at startup and hands it (or the
//! relevant section) to each component. Nothing reads settings from a
//! global after that point.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Floor applied to the configured poll interval.
const MIN_INTERVAL_SECS: u64 = 1;

const MIN_PROXMOX_TIMEOUT_SECS: f64 = 0.1;
const DEFAULT_PROXMOX_TIMEOUT_SECS: f64 = 2.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between the start of two poll passes.
    pub interval_s: u64,
    /// Global cap on retained transition events.
    pub max_events: usize,
    /// Checks whose failure makes the overall status critical.
    pub core_check_ids: Vec<String>,
    pub portainer_base_url: Option<String>,
    pub ntfy: Option<NtfyConfig>,
    pub proxmox: ProxmoxConfig,
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NtfyConfig {
    pub base_url: String,
    pub topic: String,
    #[serde(default = "default_priority_down")]
    pub priority_down: u8,
    #[serde(default = "default_priority_up")]
    pub priority_up: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxmoxConfig {
    /// Base URL of the proxmox-stats service. Fetches report unavailable when unset.
    pub base_url: Option<String>,
    pub timeout_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_s: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

fn default_priority_down() -> u8 {
    4
}

fn default_priority_up() -> u8 {
    2
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_s: 30,
            max_events: 500,
            core_check_ids: Vec::new(),
            portainer_base_url: None,
            ntfy: None,
            proxmox: ProxmoxConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_s: DEFAULT_PROXMOX_TIMEOUT_SECS,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_s: 30,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot be turned into timeouts.
    pub fn validate(&self) -> anyhow::Result<()> {
        let timeout_s = self.proxmox.timeout_s;
        if !timeout_s.is_finite() || Duration::try_from_secs_f64(timeout_s.max(0.0)).is_err() {
            anyhow::bail!("proxmox.timeout_s must be a finite number of seconds, got {timeout_s}");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s.max(MIN_INTERVAL_SECS))
    }

    /// Notification settings, if both the URL and topic are non-empty.
    pub fn ntfy_settings(&self) -> Option<&NtfyConfig> {
        self.ntfy
            .as_ref()
            .filter(|n| !n.base_url.trim().is_empty() && !n.topic.trim().is_empty())
    }

    pub fn is_core_check(&self, check_id: &str) -> bool {
        self.core_check_ids.iter().any(|id| id == check_id)
    }
}

impl ProxmoxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_s.max(MIN_PROXMOX_TIMEOUT_SECS))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_PROXMOX_TIMEOUT_SECS))
    }

    /// Configured base URL with blank values treated as unset.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s.max(1))
    }
}
