// src/core/clients/segment.rs

//! The Segment Client (spec §4.4, §6): creates/deletes failover segments and
//! posts host up/down notifications to the downstream HA-notification
//! service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::info;

use crate::core::clients::token::TokenProvider;
use crate::core::errors::HaMgrError;
use crate::core::types::{NotificationType, SegmentHost};

#[async_trait]
pub trait SegmentClient: Send + Sync {
    async fn create_segment(&self, name: &str, hosts: &[String]) -> Result<(), HaMgrError>;

    /// A missing segment is not an error.
    async fn delete_segment(&self, name: &str) -> Result<(), HaMgrError>;

    /// Fails with `SegmentNotFound` if `name` doesn't exist.
    async fn list_hosts_in_segment(&self, name: &str) -> Result<Vec<SegmentHost>, HaMgrError>;

    async fn notify(
        &self,
        kind: NotificationType,
        host: &str,
        time: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<(), HaMgrError>;
}

pub struct HttpSegmentClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSegmentClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }

    fn segments_url(&self, name: &str) -> String {
        format!("{}/segments/{}", self.base_url.trim_end_matches('/'), name)
    }
}

#[async_trait]
impl SegmentClient for HttpSegmentClient {
    async fn create_segment(&self, name: &str, hosts: &[String]) -> Result<(), HaMgrError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/segments", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("X-Auth-Token", &token)
            .json(&serde_json::json!({
                "name": name,
                "recovery_method": "auto",
                "service_type": "COMPUTE",
                "hosts": hosts,
            }))
            .send()
            .await?
            .error_for_status()?;
        info!(segment = name, hosts = hosts.len(), "failover segment created");
        Ok(())
    }

    async fn delete_segment(&self, name: &str) -> Result<(), HaMgrError> {
        let token = self.tokens.token().await?;
        let resp = self
            .client
            .delete(self.segments_url(name))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()?;
        info!(segment = name, "failover segment deleted");
        Ok(())
    }

    async fn list_hosts_in_segment(&self, name: &str) -> Result<Vec<SegmentHost>, HaMgrError> {
        let token = self.tokens.token().await?;
        let resp = self
            .client
            .get(format!("{}/hosts", self.segments_url(name)))
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(HaMgrError::SegmentNotFound(name.to_string()));
        }
        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        let hosts = body["hosts"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|h| serde_json::from_value(h).ok())
            .collect();
        Ok(hosts)
    }

    async fn notify(
        &self,
        kind: NotificationType,
        host: &str,
        time: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<(), HaMgrError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/notifications", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("X-Auth-Token", &token)
            .json(&serde_json::json!({
                "notification_type": kind,
                "hostname": host,
                "generated_time": time.to_rfc3339(),
                "payload": payload,
            }))
            .send()
            .await?
            .error_for_status()?;
        info!(%host, ?kind, "notification posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn token(&self) -> Result<String, HaMgrError> {
            Ok("t".to_string())
        }
    }

    fn client(base_url: String) -> HttpSegmentClient {
        HttpSegmentClient::new(reqwest::Client::new(), base_url, Arc::new(StaticToken))
    }

    #[tokio::test]
    async fn delete_missing_segment_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/segments/a1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(server.uri()).delete_segment("a1").await.unwrap();
    }

    #[tokio::test]
    async fn list_hosts_missing_segment_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/segments/a1/hosts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(server.uri())
            .list_hosts_in_segment("a1")
            .await
            .unwrap_err();
        assert!(matches!(err, HaMgrError::SegmentNotFound(n) if n == "a1"));
    }

    #[tokio::test]
    async fn list_hosts_parses_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/segments/a1/hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hosts": [{"name": "a1-h1", "host": "h1"}, {"name": "a1-h2", "host": "h2"}]
            })))
            .mount(&server)
            .await;

        let hosts = client(server.uri()).list_hosts_in_segment("a1").await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "h1");
    }
}
