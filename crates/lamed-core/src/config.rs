//! Lamed configuration system.
//!
//! Settings come from an optional TOML file (`~/.lamed/config.toml` by
//! default) overlaid by environment variables, which is how hosting
//! platforms inject secrets. Only the database location and credential are
//! required; [`LamedConfig::validate`] reports their absence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LamedError, Result};

pub const ENV_DATABASE_URL: &str = "LAMED_DATABASE_URL";
pub const ENV_DATABASE_AUTH: &str = "LAMED_DATABASE_AUTH";
pub const ENV_DELIVERY_URL: &str = "LAMED_DELIVERY_URL";
pub const ENV_ROUTING_FIELD: &str = "LAMED_ROUTING_FIELD";
pub const ENV_SUPPORT_CONTACT: &str = "LAMED_SUPPORT_CONTACT";
pub const ENV_PORT: &str = "PORT";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LamedConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl LamedConfig {
    /// Load config from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LamedError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LamedError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Lamed home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lamed")
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(auth) = get(ENV_DATABASE_AUTH) {
            self.database.auth = auth;
        }
        if let Some(url) = get(ENV_DELIVERY_URL) {
            self.delivery.endpoint = Some(url);
        }
        if let Some(field) = get(ENV_ROUTING_FIELD) {
            self.listener.routing_field = field;
        }
        if let Some(contact) = get(ENV_SUPPORT_CONTACT) {
            self.listener.support_contact = contact;
        }
        if let Some(port) = get(ENV_PORT) {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("⚠️ Ignoring invalid {ENV_PORT}={port}"),
            }
        }
    }

    /// Check that everything required to start is present.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(LamedError::Config(format!(
                "database URL not set (set {ENV_DATABASE_URL} or [database].url)"
            )));
        }
        if self.database.auth.trim().is_empty() {
            return Err(LamedError::Config(format!(
                "database credential not set (set {ENV_DATABASE_AUTH} or [database].auth)"
            )));
        }
        if self.reminders.thresholds.iter().any(|t| t.minutes == 0 || t.flag.trim().is_empty()) {
            return Err(LamedError::Config(
                "reminder thresholds need a positive window and a flag name".into(),
            ));
        }
        Ok(())
    }
}

/// Realtime database location and credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    /// Database secret or access token.
    #[serde(default)]
    pub auth: String,
    /// Query parameter carrying the credential (`auth` or `access_token`).
    #[serde(default = "default_auth_param")]
    pub auth_param: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_auth_param() -> String { "auth".into() }
fn default_request_timeout() -> u64 { 30 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth: String::new(),
            auth_param: default_auth_param(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Push delivery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

fn default_delivery_timeout() -> u64 { 10 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Appointment reminder scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Evaluated in the order given.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdConfig>,
}

/// One reminder window and the appointment flag that records it was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub minutes: u32,
    pub flag: String,
}

fn bool_true() -> bool { true }
fn default_scan_interval() -> u64 { 60 }
fn default_thresholds() -> Vec<ThresholdConfig> {
    vec![
        ThresholdConfig { minutes: 20, flag: "reminder20Sent".into() },
        ThresholdConfig { minutes: 10, flag: "reminder10Sent".into() },
    ]
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: default_scan_interval(),
            thresholds: default_thresholds(),
        }
    }
}

/// What to do with events that arrive before a path's initial read resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreBootstrapPolicy {
    /// Discard them.
    #[default]
    Drop,
    /// Buffer them and replay those not already present in the initial read.
    Reconcile,
}

/// Change listeners and the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Field under `/users/{id}` holding the device routing id.
    #[serde(default = "default_routing_field")]
    pub routing_field: String,
    #[serde(default = "default_support_contact")]
    pub support_contact: String,
    #[serde(default)]
    pub pre_bootstrap: PreBootstrapPolicy,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
}

fn default_routing_field() -> String { "oneSignalPlayerId".into() }
fn default_support_contact() -> String { "support".into() }
fn default_max_concurrent() -> usize { 32 }

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            routing_field: default_routing_field(),
            support_contact: default_support_contact(),
            pre_bootstrap: PreBootstrapPolicy::default(),
            max_concurrent_tasks: default_max_concurrent(),
        }
    }
}

/// Liveness endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 3000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}
