// src/core/clients/role.rs

//! The Role Client (spec §4.3, §6): idempotently attaches/detaches the HA
//! role on a host via HTTP PUT/DELETE to the local resource-manager endpoint,
//! with conflict-retry and a polling wait for role removal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::core::clients::token::TokenProvider;
use crate::core::errors::HaMgrError;
use crate::core::metrics::ROLE_FAILURES_TOTAL;
use crate::core::types::Role;

/// Interval between retries of a conflicting role-attach/detach request, and
/// between polls while waiting for role removal. Matches spec §4.3.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait RoleClient: Send + Sync {
    /// Attaches `role` on `host`, idempotent from the caller's viewpoint.
    async fn attach(
        &self,
        host: &str,
        role: Role,
        join_ip: &str,
        host_ip: &str,
        bootstrap_expect: u32,
    ) -> Result<(), HaMgrError>;

    /// Detaches the HA role from `host`, idempotent from the caller's viewpoint.
    async fn detach(&self, host: &str) -> Result<(), HaMgrError>;

    /// Polls `host`'s role document until it reports the role removed, bounded
    /// by a wall-clock budget. Fails with `RoleConvergeFailed` on timeout.
    async fn wait_for_removal(&self, host: &str) -> Result<(), HaMgrError>;
}

pub struct HttpRoleClient {
    client: reqwest::Client,
    base_url: String,
    role_name: String,
    tokens: Arc<dyn TokenProvider>,
    /// Wall-clock budget for the conflict-retry loop, from the first attempt.
    conflict_retry_budget: Duration,
    /// Wall-clock budget for `wait_for_removal`, per host.
    removal_poll_budget: Duration,
}

impl HttpRoleClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        role_name: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        conflict_retry_budget: Duration,
        removal_poll_budget: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            role_name: role_name.into(),
            tokens,
            conflict_retry_budget,
            removal_poll_budget,
        }
    }

    fn role_url(&self, host: &str) -> String {
        format!(
            "{}/{}/roles/{}",
            self.base_url.trim_end_matches('/'),
            host,
            self.role_name
        )
    }

    fn host_url(&self, host: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), host)
    }
}

#[async_trait]
impl RoleClient for HttpRoleClient {
    async fn attach(
        &self,
        host: &str,
        role: Role,
        join_ip: &str,
        host_ip: &str,
        bootstrap_expect: u32,
    ) -> Result<(), HaMgrError> {
        let token = self.tokens.token().await?;
        let body = serde_json::json!({
            "join": join_ip,
            "ip_address": host_ip,
            "bootstrap_expect": bootstrap_expect,
        });
        let url = self.role_url(host);
        // The deadline is set at entry, before the first attempt — fixes the
        // known source defect (spec §9(b)) where the equivalent timer was
        // referenced before being assigned.
        let deadline = tokio::time::Instant::now() + self.conflict_retry_budget;

        loop {
            let resp = self
                .client
                .put(&url)
                .header("X-Auth-Token", &token)
                .json(&body)
                .send()
                .await?;
            let status = resp.status();

            if status == StatusCode::NOT_FOUND {
                let text = resp.text().await.unwrap_or_default();
                ROLE_FAILURES_TOTAL.with_label_values(&["attach"]).inc();
                if text.contains("HostDown") {
                    return Err(HaMgrError::HostOffline(host.to_string()));
                }
                return Err(HaMgrError::Upstream(format!(
                    "unexpected 404 attaching {role} role to {host}: {text}"
                )));
            }

            if status == StatusCode::CONFLICT {
                if tokio::time::Instant::now() >= deadline {
                    ROLE_FAILURES_TOTAL.with_label_values(&["attach"]).inc();
                    return Err(HaMgrError::Upstream(format!(
                        "role attach on {host} stayed in conflict past the retry budget"
                    )));
                }
                warn!(%host, %role, "role attach conflict, retrying in 5s");
                tokio::time::sleep(RETRY_INTERVAL).await;
                continue;
            }

            if !status.is_success() {
                return Err(HaMgrError::Upstream(format!(
                    "attaching {role} role to {host} failed: {status}"
                )));
            }

            info!(%host, %role, bootstrap_expect, "role attached");
            return Ok(());
        }
    }

    async fn detach(&self, host: &str) -> Result<(), HaMgrError> {
        let token = self.tokens.token().await?;
        let url = self.role_url(host);
        let deadline = tokio::time::Instant::now() + self.conflict_retry_budget;

        loop {
            let resp = self
                .client
                .delete(&url)
                .header("X-Auth-Token", &token)
                .send()
                .await?;
            let status = resp.status();

            if status == StatusCode::CONFLICT {
                if tokio::time::Instant::now() >= deadline {
                    ROLE_FAILURES_TOTAL.with_label_values(&["detach"]).inc();
                    return Err(HaMgrError::Upstream(format!(
                        "role detach on {host} stayed in conflict past the retry budget"
                    )));
                }
                warn!(%host, "role detach conflict, retrying in 5s");
                tokio::time::sleep(RETRY_INTERVAL).await;
                continue;
            }

            if !status.is_success() {
                return Err(HaMgrError::Upstream(format!(
                    "detaching role from {host} failed: {status}"
                )));
            }

            info!(%host, "role detached");
            return Ok(());
        }
    }

    async fn wait_for_removal(&self, host: &str) -> Result<(), HaMgrError> {
        let deadline = tokio::time::Instant::now() + self.removal_poll_budget;
        let url = self.host_url(host);

        loop {
            let token = self.tokens.token().await?;
            let resp = self
                .client
                .get(&url)
                .header("X-Auth-Token", &token)
                .send()
                .await?
                .error_for_status()?;
            let doc: RoleDocument = resp.json().await?;

            let removed = doc.role_status == "ok" && !doc.roles.iter().any(|r| r == &self.role_name);
            if removed {
                info!(%host, "role removal converged");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HaMgrError::RoleConvergeFailed(host.to_string()));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct RoleDocument {
    role_status: String,
    roles: Vec<String>,
}
