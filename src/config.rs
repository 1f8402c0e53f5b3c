// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Keystone-style credentials for the compute-cloud auth service (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoneConfig {
    pub admin_user: String,
    pub admin_password: String,
    pub auth_uri: String,
    pub admin_tenant_name: String,
}

/// The compute region passed on every inventory request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaConfig {
    pub region: String,
}

/// The role-management service's local endpoint (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResmgrConfig {
    pub base_url: String,
    #[serde(default = "default_role_name")]
    pub role_name: String,
}

fn default_role_name() -> String {
    "pf9-ha-slave".to_string()
}

/// Tunables for the reconciliation engine itself (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaMgrConfig {
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
    #[serde(default = "default_min_host_count")]
    pub min_host_count: usize,
    #[serde(with = "humantime_serde", default = "default_role_conflict_retry")]
    pub role_conflict_retry: Duration,
    #[serde(with = "humantime_serde", default = "default_role_removal_poll")]
    pub role_removal_poll: Duration,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(120)
}
fn default_min_host_count() -> usize {
    3
}
fn default_role_conflict_retry() -> Duration {
    Duration::from_secs(120)
}
fn default_role_removal_poll() -> Duration {
    Duration::from_secs(300)
}

/// Bind address for the out-of-scope HTTP routing layer (spec.md §6); carried
/// here only because the binary needs somewhere to bind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8480
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    keystone: KeystoneConfig,
    nova: NovaConfig,
    resmgr: ResmgrConfig,
    #[serde(default = "default_hamgr_config")]
    hamgr: HaMgrConfig,
    #[serde(default = "default_server_config")]
    server: ServerConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    log: LogConfig,
}

fn default_hamgr_config() -> HaMgrConfig {
    HaMgrConfig {
        reconcile_interval: default_reconcile_interval(),
        min_host_count: default_min_host_count(),
        role_conflict_retry: default_role_conflict_retry(),
        role_removal_poll: default_role_removal_poll(),
    }
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

/// The final, validated configuration (spec.md §6, expanded §10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub keystone: KeystoneConfig,
    pub nova: NovaConfig,
    pub resmgr: ResmgrConfig,
    pub hamgr: HaMgrConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
}

impl Config {
    /// Reads and parses a TOML file into a validated `Config`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            keystone: raw.keystone,
            nova: raw.nova,
            resmgr: raw.resmgr,
            hamgr: raw.hamgr,
            server: raw.server,
            metrics: raw.metrics,
            log: raw.log,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects nonsensical values that would otherwise surface as confusing
    /// runtime failures deep in the reconciliation engine.
    fn validate(&self) -> Result<()> {
        if self.keystone.admin_user.trim().is_empty() {
            return Err(anyhow!("keystone.admin_user cannot be empty"));
        }
        if self.keystone.auth_uri.trim().is_empty() {
            return Err(anyhow!("keystone.auth_uri cannot be empty"));
        }
        if self.resmgr.base_url.trim().is_empty() {
            return Err(anyhow!("resmgr.base_url cannot be empty"));
        }
        if self.resmgr.role_name.trim().is_empty() {
            return Err(anyhow!("resmgr.role_name cannot be empty"));
        }
        if self.hamgr.reconcile_interval.is_zero() {
            return Err(anyhow!("hamgr.reconcile_interval_secs cannot be 0"));
        }
        if self.hamgr.min_host_count < 3 {
            return Err(anyhow!("hamgr.min_host_count must be at least 3"));
        }
        if self.hamgr.role_conflict_retry.is_zero() {
            return Err(anyhow!("hamgr.role_conflict_retry_secs cannot be 0"));
        }
        if self.hamgr.role_removal_poll.is_zero() {
            return Err(anyhow!("hamgr.role_removal_poll_secs cannot be 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow!("server.port cannot be 0"));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.server.port {
                return Err(anyhow!("metrics.port cannot be the same as server.port"));
            }
        }
        if self.hamgr.reconcile_interval < Duration::from_secs(10) {
            warn!(
                secs = self.hamgr.reconcile_interval.as_secs(),
                "reconcile_interval is very short; this may create excessive load on upstream services"
            );
        }
        Ok(())
    }
}
