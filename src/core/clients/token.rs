// src/core/clients/token.rs

//! The credential/token acquisition helper (spec §1, out-of-scope collaborator;
//! only its interface and caching contract are specified here).
//!
//! Tokens are cached and refreshed lazily on expiry (spec §5). Every client in
//! `core::clients` asks a `TokenProvider` for a fresh token before each
//! external call rather than reading a possibly-stale cached value directly —
//! this is the fix for the known source defect in spec §9(d), where the
//! original interrogates a stale token before ensuring it's fresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::KeystoneConfig;
use crate::core::errors::HaMgrError;
use crate::core::metrics::TOKEN_REFRESH_TOTAL;

/// How long before expiry a cached token is considered stale and refreshed.
const REFRESH_GRACE: ChronoDuration = ChronoDuration::seconds(30);

/// Supplies an auth token for the role, inventory, and segment clients.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token guaranteed valid for at least `REFRESH_GRACE` longer,
    /// refreshing it first if necessary.
    async fn token(&self) -> Result<String, HaMgrError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Fetches and caches a Keystone-style token for the configured admin
/// credentials, refreshing it lazily when it has expired or is about to.
pub struct KeystoneTokenProvider {
    client: reqwest::Client,
    config: KeystoneConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl KeystoneTokenProvider {
    pub fn new(client: reqwest::Client, config: KeystoneConfig) -> Self {
        Self {
            client,
            config,
            cached: Mutex::new(None),
        }
    }

    fn still_valid(cached: &Option<CachedToken>) -> Option<String> {
        match cached {
            Some(t) if t.expires_at - Utc::now() > REFRESH_GRACE => Some(t.value.clone()),
            _ => None,
        }
    }

    async fn fetch(&self) -> Result<CachedToken, HaMgrError> {
        debug!(auth_uri = %self.config.auth_uri, "fetching fresh auth token");
        let resp = self
            .client
            .post(format!("{}/tokens", self.config.auth_uri.trim_end_matches('/')))
            .json(&serde_json::json!({
                "auth": {
                    "tenantName": self.config.admin_tenant_name,
                    "passwordCredentials": {
                        "username": self.config.admin_user,
                        "password": self.config.admin_password,
                    }
                }
            }))
            .send()
            .await?;
        let resp = resp.error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let token = body["access"]["token"]["id"]
            .as_str()
            .ok_or_else(|| HaMgrError::Upstream("token response missing access.token.id".into()))?
            .to_string();
        let expires_at = body["access"]["token"]["expires"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(1));
        Ok(CachedToken {
            value: token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenProvider for KeystoneTokenProvider {
    async fn token(&self) -> Result<String, HaMgrError> {
        {
            let cached = self.cached.lock();
            if let Some(token) = Self::still_valid(&cached) {
                return Ok(token);
            }
        }
        let fresh = match self.fetch().await {
            Ok(fresh) => fresh,
            Err(e) => {
                TOKEN_REFRESH_TOTAL.with_label_values(&["failure"]).inc();
                return Err(e);
            }
        };
        TOKEN_REFRESH_TOTAL.with_label_values(&["success"]).inc();
        let value = fresh.value.clone();
        *self.cached.lock() = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_token_is_not_reused() {
        let expired = Some(CachedToken {
            value: "old".into(),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        });
        assert!(KeystoneTokenProvider::still_valid(&expired).is_none());
    }

    #[test]
    fn token_within_grace_window_is_refreshed_anyway() {
        let almost_expired = Some(CachedToken {
            value: "old".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(5),
        });
        assert!(KeystoneTokenProvider::still_valid(&almost_expired).is_none());
    }

    #[test]
    fn comfortably_valid_token_is_reused() {
        let fresh = Some(CachedToken {
            value: "fresh".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(10),
        });
        assert_eq!(
            KeystoneTokenProvider::still_valid(&fresh),
            Some("fresh".to_string())
        );
    }
}
