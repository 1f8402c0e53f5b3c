// src/core/clients/inventory.rs

//! The Inventory Client (spec §4.2, §6): lists aggregates, their member
//! hosts, per-host liveness, and per-host IP from the compute-cloud inventory
//! service.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::clients::token::TokenProvider;
use crate::core::errors::HaMgrError;
use crate::core::types::{Aggregate, HostLiveness, Hypervisor};

#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn list_aggregates(&self) -> Result<Vec<Aggregate>, HaMgrError>;

    /// Fails with `AggregateNotFound` if `id` doesn't exist.
    async fn get_aggregate(&self, id: &str) -> Result<Aggregate, HaMgrError>;

    async fn list_hypervisors(&self) -> Result<Vec<Hypervisor>, HaMgrError>;

    /// Fails with `HostNotFound` if zero or more than one HA-relevant compute
    /// service record matches `host`.
    async fn service_state(&self, host: &str) -> Result<HostLiveness, HaMgrError>;
}

pub struct NovaInventoryClient {
    client: reqwest::Client,
    base_url: String,
    region: String,
    tokens: Arc<dyn TokenProvider>,
}

impl NovaInventoryClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        region: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            region: region.into(),
            tokens,
        }
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, HaMgrError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .header("X-Auth-Token", &token)
            .query(&[("region", self.region.as_str())])
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl InventoryClient for NovaInventoryClient {
    async fn list_aggregates(&self) -> Result<Vec<Aggregate>, HaMgrError> {
        let body = self.get_json("os-aggregates").await?;
        let aggregates = body["aggregates"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(parse_aggregate)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aggregates)
    }

    async fn get_aggregate(&self, id: &str) -> Result<Aggregate, HaMgrError> {
        let path = format!("os-aggregates/{id}");
        let token = self.tokens.token().await?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .header("X-Auth-Token", &token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HaMgrError::AggregateNotFound(id.to_string()));
        }
        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_aggregate(body["aggregate"].clone())
    }

    async fn list_hypervisors(&self) -> Result<Vec<Hypervisor>, HaMgrError> {
        let body = self.get_json("os-hypervisors/detail").await?;
        let hypervisors = body["hypervisors"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|h| {
                let host = h["service"]["host"].as_str()?.to_string();
                let ip = h["host_ip"].as_str()?.to_string();
                Some(Hypervisor { host, ip })
            })
            .collect();
        Ok(hypervisors)
    }

    async fn service_state(&self, host: &str) -> Result<HostLiveness, HaMgrError> {
        let token = self.tokens.token().await?;
        let url = format!("{}/os-services", self.base_url.trim_end_matches('/'));
        let body: serde_json::Value = self
            .client
            .get(&url)
            .header("X-Auth-Token", &token)
            .query(&[("binary", "nova-compute"), ("host", host)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let services = body["services"].as_array().cloned().unwrap_or_default();
        match services.as_slice() {
            [single] => {
                let state = single["state"].as_str().unwrap_or("down");
                Ok(if state == "up" {
                    HostLiveness::Up
                } else {
                    HostLiveness::Down
                })
            }
            _ => Err(HaMgrError::HostNotFound(host.to_string())),
        }
    }
}

fn parse_aggregate(value: serde_json::Value) -> Result<Aggregate, HaMgrError> {
    let id = value["id"]
        .as_str()
        .map(str::to_string)
        .or_else(|| value["id"].as_i64().map(|i| i.to_string()))
        .ok_or_else(|| HaMgrError::Upstream("aggregate response missing id".into()))?;
    let hosts: BTreeSet<String> = value["hosts"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| h.as_str().map(str::to_string))
        .collect();
    Ok(Aggregate { id, hosts })
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

    fn client(base_url: String) -> NovaInventoryClient {
        NovaInventoryClient::new(reqwest::Client::new(), base_url, "RegionOne", Arc::new(StaticToken))
    }

    #[tokio::test]
    async fn get_aggregate_missing_surfaces_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/os-aggregates/a1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(server.uri()).get_aggregate("a1").await.unwrap_err();
        assert!(matches!(err, HaMgrError::AggregateNotFound(id) if id == "a1"));
    }

    #[tokio::test]
    async fn get_aggregate_parses_hosts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/os-aggregates/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "aggregate": {"id": "a1", "hosts": ["h1", "h2", "h3"]}
            })))
            .mount(&server)
            .await;

        let aggregate = client(server.uri()).get_aggregate("a1").await.unwrap();
        assert_eq!(aggregate.hosts.len(), 3);
    }

    #[tokio::test]
    async fn service_state_multiple_matches_is_host_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/os-services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "services": [{"state": "up"}, {"state": "down"}]
            })))
            .mount(&server)
            .await;

        let err = client(server.uri()).service_state("h1").await.unwrap_err();
        assert!(matches!(err, HaMgrError::HostNotFound(h) if h == "h1"));
    }
}
