// src/core/reconciler.rs

//! The Drift Reconciler (spec §4.7): periodically compares each enabled
//! cluster's aggregate membership against its failover segment membership
//! and reshapes the cluster to converge on the administrator-declared view.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::clients::inventory::InventoryClient;
use crate::core::clients::segment::SegmentClient;
use crate::core::controller::Controller;
use crate::core::errors::HaMgrError;
use crate::core::metrics::{
    ACTIVE_CLUSTERS, RECONCILE_CYCLE_SECONDS, RECONCILE_FAILURES_TOTAL, RECONCILE_RESHAPES_TOTAL,
};
use crate::core::store::ClusterStore;
use crate::core::types::{HostLiveness, TaskState};

pub struct DriftReconciler {
    store: Arc<dyn ClusterStore>,
    inventory: Arc<dyn InventoryClient>,
    segments: Arc<dyn SegmentClient>,
    controller: Arc<Controller>,
}

impl DriftReconciler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        inventory: Arc<dyn InventoryClient>,
        segments: Arc<dyn SegmentClient>,
        controller: Arc<Controller>,
    ) -> Self {
        Self {
            store,
            inventory,
            segments,
            controller,
        }
    }

    /// One reconciliation tick over every active cluster. A single cluster's
    /// failure is logged and does not stop the rest of the fleet.
    pub async fn run_once(&self) {
        let timer = RECONCILE_CYCLE_SECONDS.start_timer();
        let records = match self.store.get_all_active().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to list active clusters for drift reconciliation");
                return;
            }
        };
        ACTIVE_CLUSTERS.set(records.len() as f64);

        for record in records {
            match self.reconcile_cluster(&record.name).await {
                Ok(reshaped) => {
                    if reshaped {
                        RECONCILE_RESHAPES_TOTAL.inc();
                    }
                }
                Err(HaMgrError::ClusterBusy { .. }) => {
                    // Another actor owns this cluster right now; skip silently.
                }
                Err(e) => {
                    RECONCILE_FAILURES_TOTAL.with_label_values(&["reconcile_error"]).inc();
                    warn!(cluster = %record.name, error = %e, "drift reconciliation failed for cluster");
                }
            }
        }
        timer.observe_duration();
    }

    async fn reconcile_cluster(&self, cluster_id: &str) -> Result<bool, HaMgrError> {
        let record = self.store.get(cluster_id).await?;
        if matches!(record.task_state, TaskState::Migrating | TaskState::Updating) {
            return Ok(false);
        }

        let aggregate = self.inventory.get_aggregate(cluster_id).await?;
        let segment_hosts: HashSet<String> = match self.segments.list_hosts_in_segment(cluster_id).await {
            Ok(hosts) => hosts.into_iter().map(|h| h.host).collect(),
            Err(HaMgrError::SegmentNotFound(_)) => {
                info!(cluster = cluster_id, "segment missing, skipping this tick");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let mut up = HashSet::new();
        let mut down = HashSet::new();
        for host in &aggregate.hosts {
            match self.inventory.service_state(host).await {
                Ok(HostLiveness::Up) => {
                    up.insert(host.clone());
                }
                Ok(HostLiveness::Down) => {
                    down.insert(host.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let new: HashSet<&String> = up.difference(&segment_hosts).collect();
        let active: HashSet<&String> = up.intersection(&segment_hosts).collect();
        let inactive: HashSet<&String> = down.intersection(&segment_hosts).collect();

        if new.is_empty() {
            return Ok(false);
        }
        if !inactive.is_empty() {
            info!(cluster = cluster_id, "deferring drift reshape: inactive member present");
            return Ok(false);
        }

        let mut target: Vec<String> = active.into_iter().chain(new).cloned().collect();
        target.sort();

        self.controller.disable(cluster_id, true).await?;
        self.controller.enable(cluster_id, Some(target)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    use crate::core::store::InMemoryClusterStore;
    use crate::core::types::{Aggregate, Hypervisor, Role, SegmentHost};

    struct FakeInventory {
        aggregate: Aggregate,
        down: HashSet<String>,
    }

    #[async_trait]
    impl InventoryClient for FakeInventory {
        async fn list_aggregates(&self) -> Result<Vec<Aggregate>, HaMgrError> {
            Ok(vec![self.aggregate.clone()])
        }
        async fn get_aggregate(&self, id: &str) -> Result<Aggregate, HaMgrError> {
            if id == self.aggregate.id {
                Ok(self.aggregate.clone())
            } else {
                Err(HaMgrError::AggregateNotFound(id.to_string()))
            }
        }
        async fn list_hypervisors(&self) -> Result<Vec<Hypervisor>, HaMgrError> {
            Ok(self
                .aggregate
                .hosts
                .iter()
                .map(|h| Hypervisor {
                    host: h.clone(),
                    ip: format!("10.0.0.{}", h.trim_start_matches('h')),
                })
                .collect())
        }
        async fn service_state(&self, host: &str) -> Result<HostLiveness, HaMgrError> {
            Ok(if self.down.contains(host) {
                HostLiveness::Down
            } else {
                HostLiveness::Up
            })
        }
    }

    #[derive(Default)]
    struct FakeSegment {
        hosts: Mutex<Vec<String>>,
        create_calls: Mutex<usize>,
    }

    #[async_trait]
    impl SegmentClient for FakeSegment {
        async fn create_segment(&self, _name: &str, hosts: &[String]) -> Result<(), HaMgrError> {
            *self.hosts.lock() = hosts.to_vec();
            *self.create_calls.lock() += 1;
            Ok(())
        }
        async fn delete_segment(&self, _name: &str) -> Result<(), HaMgrError> {
            Ok(())
        }
        async fn list_hosts_in_segment(&self, name: &str) -> Result<Vec<SegmentHost>, HaMgrError> {
            let hosts = self.hosts.lock();
            if hosts.is_empty() {
                return Err(HaMgrError::SegmentNotFound(name.to_string()));
            }
            Ok(hosts
                .iter()
                .map(|h| SegmentHost {
                    name: name.to_string(),
                    host: h.clone(),
                })
                .collect())
        }
        async fn notify(
            &self,
            _kind: crate::core::types::NotificationType,
            _host: &str,
            _time: chrono::DateTime<chrono::Utc>,
            _payload: serde_json::Value,
        ) -> Result<(), HaMgrError> {
            Ok(())
        }
    }

    struct NoopRole;

    #[async_trait]
    impl crate::core::clients::role::RoleClient for NoopRole {
        async fn attach(
            &self,
            _host: &str,
            _role: Role,
            _join_ip: &str,
            _host_ip: &str,
            _bootstrap_expect: u32,
        ) -> Result<(), HaMgrError> {
            Ok(())
        }
        async fn detach(&self, _host: &str) -> Result<(), HaMgrError> {
            Ok(())
        }
        async fn wait_for_removal(&self, _host: &str) -> Result<(), HaMgrError> {
            Ok(())
        }
    }

    fn aggregate(hosts: &[&str]) -> Aggregate {
        Aggregate {
            id: "agg1".to_string(),
            hosts: hosts.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn reshapes_when_new_hosts_appear_and_all_up() {
        let store = Arc::new(InMemoryClusterStore::new());
        let inventory = Arc::new(FakeInventory {
            aggregate: aggregate(&["h1", "h2", "h3", "h4"]),
            down: HashSet::new(),
        });
        let segments = Arc::new(FakeSegment::default());
        let controller = Arc::new(Controller::new(
            store.clone(),
            inventory.clone(),
            Arc::new(NoopRole),
            segments.clone(),
        ));
        controller.enable("agg1", Some(vec!["h1".into(), "h2".into(), "h3".into()])).await.unwrap();
        assert_eq!(*segments.create_calls.lock(), 1);

        let reconciler = DriftReconciler::new(store.clone(), inventory, segments.clone(), controller);
        reconciler.run_once().await;

        assert_eq!(*segments.create_calls.lock(), 2);
        let hosts = segments.hosts.lock().clone();
        assert_eq!(hosts, vec!["h1", "h2", "h3", "h4"]);
    }

    #[tokio::test]
    async fn defers_when_an_active_member_is_down() {
        let store = Arc::new(InMemoryClusterStore::new());
        let mut down = HashSet::new();
        down.insert("h2".to_string());
        let inventory = Arc::new(FakeInventory {
            aggregate: aggregate(&["h1", "h2", "h3", "h4"]),
            down,
        });
        let segments = Arc::new(FakeSegment::default());
        let controller = Arc::new(Controller::new(
            store.clone(),
            inventory.clone(),
            Arc::new(NoopRole),
            segments.clone(),
        ));
        controller.enable("agg1", Some(vec!["h1".into(), "h2".into(), "h3".into()])).await.unwrap();
        assert_eq!(*segments.create_calls.lock(), 1);

        let reconciler = DriftReconciler::new(store, inventory, segments.clone(), controller);
        reconciler.run_once().await;

        // h4 is new, but h2 (an existing, down, segment member) makes the
        // cluster inactive-non-empty — defer, no second create_segment call.
        assert_eq!(*segments.create_calls.lock(), 1);
    }

    #[tokio::test]
    async fn second_tick_with_no_changes_makes_no_writes() {
        let store = Arc::new(InMemoryClusterStore::new());
        let inventory = Arc::new(FakeInventory {
            aggregate: aggregate(&["h1", "h2", "h3"]),
            down: HashSet::new(),
        });
        let segments = Arc::new(FakeSegment::default());
        let controller = Arc::new(Controller::new(
            store.clone(),
            inventory.clone(),
            Arc::new(NoopRole),
            segments.clone(),
        ));
        controller.enable("agg1", None).await.unwrap();
        assert_eq!(*segments.create_calls.lock(), 1);

        let reconciler = DriftReconciler::new(store, inventory, segments.clone(), controller);
        reconciler.run_once().await;
        assert_eq!(*segments.create_calls.lock(), 1);
    }
}
