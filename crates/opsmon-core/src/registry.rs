//! checks.toml registry loader.
//!
//! The registry is decoded once, at startup, into the closed `CheckTarget`
//! sum type. Everything downstream works on `NormalizedCheck`, which has
//! the registry defaults already applied.
//!
//! ```toml
//! [defaults]
//! timeout_s = 3
//! down_threshold = 1
//!
//! [[checks]]
//! id = "wiki"
//! type = "http"
//! url = "http://wiki.lan/health"
//! down_threshold = 2
//!
//! [[checks]]
//! id = "db"
//! type = "tcp"
//! host = "10.0.0.5"
//! port = 5432
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CheckKind;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse registry: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("check id must not be empty")]
    EmptyId,

    #[error("duplicate check id: {0}")]
    DuplicateId(String),

    #[error("check {id}: {reason}")]
    Invalid { id: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Defaults {
    pub timeout_s: u64,
    pub down_threshold: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_s: 3,
            down_threshold: 1,
        }
    }
}

/// What a check probes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckTarget {
    Http { url: String },
    Tcp { host: String, port: u16 },
}

impl CheckTarget {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckTarget::Http { .. } => CheckKind::Http,
            CheckTarget::Tcp { .. } => CheckKind::Tcp,
        }
    }

    /// Human-readable target: the URL, or `host:port`.
    pub fn describe(&self) -> String {
        match self {
            CheckTarget::Http { url } => url.clone(),
            CheckTarget::Tcp { host, port } => format!("{host}:{port}"),
        }
    }
}

/// A check as declared in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSpec {
    pub id: String,
    #[serde(flatten)]
    pub target: CheckTarget,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timeout_s: Option<u64>,
    /// Connect-phase timeout for HTTP checks, when it should differ from `timeout_s`.
    pub connect_timeout_s: Option<f64>,
    pub down_threshold: Option<u32>,
}

/// A check with registry defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedCheck {
    pub id: String,
    #[serde(flatten)]
    pub target: CheckTarget,
    pub tags: Vec<String>,
    pub timeout_s: u64,
    pub connect_timeout_s: Option<f64>,
    pub down_threshold: u32,
}

impl NormalizedCheck {
    pub fn kind(&self) -> CheckKind {
        self.target.kind()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    /// `None` when unset or not representable as a `Duration`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_s
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Registry {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

impl Registry {
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let registry: Registry = toml::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for check in &self.checks {
            if check.id.trim().is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if !seen.insert(check.id.as_str()) {
                return Err(RegistryError::DuplicateId(check.id.clone()));
            }
            let invalid = |reason: &str| RegistryError::Invalid {
                id: check.id.clone(),
                reason: reason.to_string(),
            };
            if check.down_threshold == Some(0) {
                return Err(invalid("down_threshold must be at least 1"));
            }
            if let Some(t) = check.connect_timeout_s {
                if !(t > 0.0) || Duration::try_from_secs_f64(t).is_err() {
                    return Err(invalid("connect_timeout_s must be a finite positive number"));
                }
            }
            match &check.target {
                CheckTarget::Http { url } => {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(invalid("url must start with http:// or https://"));
                    }
                }
                CheckTarget::Tcp { host, port } => {
                    if host.trim().is_empty() {
                        return Err(invalid("host must not be empty"));
                    }
                    if *port == 0 {
                        return Err(invalid("port must be between 1 and 65535"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply defaults, keeping declaration order.
    pub fn normalized(&self) -> Vec<NormalizedCheck> {
        self.checks
            .iter()
            .map(|c| NormalizedCheck {
                id: c.id.clone(),
                target: c.target.clone(),
                tags: c.tags.clone(),
                timeout_s: c.timeout_s.unwrap_or(self.defaults.timeout_s).max(1),
                connect_timeout_s: c.connect_timeout_s,
                down_threshold: c
                    .down_threshold
                    .unwrap_or(self.defaults.down_threshold)
                    .max(1),
            })
            .collect()
    }

    pub fn find(&self, check_id: &str) -> Option<NormalizedCheck> {
        self.normalized().into_iter().find(|c| c.id == check_id)
    }
}
