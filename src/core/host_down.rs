// src/core/host_down.rs

//! The Host-Down Coordinator (spec §4.8): reacts to host up/down events,
//! gating a cluster reshape on a quorum of explicitly-reported down hosts so
//! a correlated multi-host failure isn't reshaped around piecemeal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::core::clients::inventory::InventoryClient;
use crate::core::clients::segment::SegmentClient;
use crate::core::controller::Controller;
use crate::core::errors::HaMgrError;
use crate::core::metrics::HOST_DOWN_RESHAPES_TOTAL;
use crate::core::scheduler::Scheduler;
use crate::core::store::ClusterStore;
use crate::core::types::{HostEvent, HostLiveness, NotificationType, TaskState};

/// In-memory, per-cluster map of currently-down hosts and whether each has
/// been reported via an explicit host-down event (spec §3). Advisory only —
/// never persisted, re-derivable from aggregate membership and liveness.
pub struct HostDownCoordinator {
    store: Arc<dyn ClusterStore>,
    inventory: Arc<dyn InventoryClient>,
    segments: Arc<dyn SegmentClient>,
    controller: Arc<Controller>,
    scheduler: Arc<Scheduler>,
    trackers: DashMap<String, HashMap<String, bool>>,
}

impl HostDownCoordinator {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        inventory: Arc<dyn InventoryClient>,
        segments: Arc<dyn SegmentClient>,
        controller: Arc<Controller>,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            inventory,
            segments,
            controller,
            scheduler,
            trackers: DashMap::new(),
        })
    }

    /// Handles a host-down event (spec §4.8, steps 1-4).
    pub async fn host_down(self: &Arc<Self>, event: HostEvent) -> Result<(), HaMgrError> {
        let cluster_id = self.locate_cluster(&event.host).await?;
        self.store.begin_migrating(&cluster_id).await?;

        self.segments
            .notify(
                NotificationType::ComputeHost,
                &event.host,
                event.time,
                serde_json::json!({
                    "event": "STOPPED",
                    "host_status": "NORMAL",
                    "cluster_status": "OFFLINE",
                }),
            )
            .await?;

        let this = self.clone();
        let host = event.host.clone();
        let cluster_for_task = cluster_id.clone();
        self.scheduler.add_one_shot(move || async move {
            if let Err(e) = this.remove_host_from_cluster(&cluster_for_task, &host).await {
                error!(cluster = %cluster_for_task, %host, error = %e, "remove_host_from_cluster failed");
            }
        });

        Ok(())
    }

    /// Handles a host-up event: posts a recovery notification and defers to
    /// the drift reconciler's next tick to pick the host back up (spec §4.8).
    pub async fn host_up(&self, event: HostEvent) -> Result<(), HaMgrError> {
        self.segments
            .notify(
                NotificationType::ComputeHost,
                &event.host,
                event.time,
                serde_json::json!({
                    "event": "STARTED",
                    "cluster_status": "ONLINE",
                }),
            )
            .await
    }

    async fn locate_cluster(&self, host: &str) -> Result<String, HaMgrError> {
        for record in self.store.get_all_active().await? {
            match self.inventory.get_aggregate(&record.name).await {
                Ok(aggregate) if aggregate.hosts.contains(host) => return Ok(record.name),
                Ok(_) => continue,
                Err(HaMgrError::AggregateNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(HaMgrError::HostNotFound(host.to_string()))
    }

    async fn remove_host_from_cluster(&self, cluster_id: &str, host: &str) -> Result<(), HaMgrError> {
        let record = self.store.get(cluster_id).await?;
        if record.task_state != TaskState::Migrating {
            return Err(HaMgrError::ClusterBusy {
                name: cluster_id.to_string(),
                state: record.task_state,
            });
        }

        let outcome = self.reconcile_tracker_and_maybe_reshape(cluster_id, host).await;
        if let Err(e) = &outcome {
            warn!(cluster = cluster_id, host, error = %e, "remove_host_from_cluster step failed");
        }

        // Step 6: unconditionally, whatever the reshape's own outcome.
        if let Err(e) = self.store.set_task_state(cluster_id, TaskState::Completed).await {
            error!(cluster = cluster_id, error = %e, "failed to reset task_state to COMPLETED");
        }
        outcome
    }

    async fn reconcile_tracker_and_maybe_reshape(&self, cluster_id: &str, host: &str) -> Result<(), HaMgrError> {
        let aggregate = self.inventory.get_aggregate(cluster_id).await?;
        let segment_hosts: HashSet<String> = match self.segments.list_hosts_in_segment(cluster_id).await {
            Ok(hosts) => hosts.into_iter().map(|h| h.host).collect(),
            Err(HaMgrError::SegmentNotFound(_)) => HashSet::new(),
            Err(e) => return Err(e),
        };

        let mut down_hosts = HashSet::new();
        for member in &aggregate.hosts {
            if matches!(self.inventory.service_state(member).await, Ok(HostLiveness::Down)) {
                down_hosts.insert(member.clone());
            }
        }

        let (quorum, target_hosts) = {
            let mut tracker = self.trackers.entry(cluster_id.to_string()).or_default();

            for down in &down_hosts {
                if segment_hosts.contains(down) && !tracker.contains_key(down) {
                    tracker.insert(down.clone(), false);
                }
            }
            // A member observed up again is dropped from the tracker — the
            // correct resolution of the malformed branch in the original
            // source (spec §9(a)).
            let recovered: Vec<String> = tracker
                .keys()
                .filter(|h| !down_hosts.contains(*h))
                .cloned()
                .collect();
            for h in recovered {
                tracker.remove(&h);
            }
            tracker.insert(host.to_string(), true);

            let quorum = !tracker.is_empty() && tracker.values().all(|reported| *reported);
            let target_hosts = if quorum {
                let excluded: HashSet<&String> = tracker.keys().collect();
                let hosts = aggregate
                    .hosts
                    .iter()
                    .filter(|h| !excluded.contains(h))
                    .cloned()
                    .collect();
                tracker.clear();
                Some(hosts)
            } else {
                None
            };
            (quorum, target_hosts)
        };

        if !quorum {
            info!(cluster = cluster_id, "host-down quorum not yet reached, waiting for further events");
            return Ok(());
        }

        let target_hosts = target_hosts.expect("quorum implies target_hosts is set");
        info!(cluster = cluster_id, remaining = target_hosts.len(), "host-down quorum reached, reshaping");
        self.controller.disable_unlocked(cluster_id, true).await?;
        self.controller.enable(cluster_id, Some(target_hosts)).await?;
        HOST_DOWN_RESHAPES_TOTAL.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    use crate::core::store::InMemoryClusterStore;
    use crate::core::types::{Aggregate, Hypervisor, Role, SegmentHost};

    struct FakeInventory {
        aggregate: Mutex<Aggregate>,
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl InventoryClient for FakeInventory {
        async fn list_aggregates(&self) -> Result<Vec<Aggregate>, HaMgrError> {
            Ok(vec![self.aggregate.lock().clone()])
        }
        async fn get_aggregate(&self, id: &str) -> Result<Aggregate, HaMgrError> {
            let agg = self.aggregate.lock();
            if agg.id == id {
                Ok(agg.clone())
            } else {
                Err(HaMgrError::AggregateNotFound(id.to_string()))
            }
        }
        async fn list_hypervisors(&self) -> Result<Vec<Hypervisor>, HaMgrError> {
            Ok(self
                .aggregate
                .lock()
                .hosts
                .iter()
                .map(|h| Hypervisor {
                    host: h.clone(),
                    ip: format!("10.0.0.{}", h.trim_start_matches('h')),
                })
                .collect())
        }
        async fn service_state(&self, host: &str) -> Result<HostLiveness, HaMgrError> {
            Ok(if self.down.lock().contains(host) {
                HostLiveness::Down
            } else {
                HostLiveness::Up
            })
        }
    }

    #[derive(Default)]
    struct FakeSegment {
        hosts: Mutex<Vec<String>>,
        notifications: Mutex<Vec<(NotificationType, String)>>,
    }

    #[async_trait]
    impl SegmentClient for FakeSegment {
        async fn create_segment(&self, _name: &str, hosts: &[String]) -> Result<(), HaMgrError> {
            *self.hosts.lock() = hosts.to_vec();
            Ok(())
        }
        async fn delete_segment(&self, _name: &str) -> Result<(), HaMgrError> {
            Ok(())
        }
        async fn list_hosts_in_segment(&self, name: &str) -> Result<Vec<SegmentHost>, HaMgrError> {
            Ok(self
                .hosts
                .lock()
                .iter()
                .map(|h| SegmentHost {
                    name: name.to_string(),
                    host: h.clone(),
                })
                .collect())
        }
        async fn notify(
            &self,
            kind: NotificationType,
            host: &str,
            _time: chrono::DateTime<Utc>,
            _payload: serde_json::Value,
        ) -> Result<(), HaMgrError> {
            self.notifications.lock().push((kind, host.to_string()));
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

    fn five_host_aggregate() -> Aggregate {
        Aggregate {
            id: "agg1".to_string(),
            hosts: BTreeSet::from(["h1", "h2", "h3", "h4", "h5"].map(String::from)),
        }
    }

    async fn setup() -> (
        Arc<InMemoryClusterStore>,
        Arc<FakeInventory>,
        Arc<FakeSegment>,
        Arc<Controller>,
        Arc<HostDownCoordinator>,
    ) {
        let store = Arc::new(InMemoryClusterStore::new());
        let inventory = Arc::new(FakeInventory {
            aggregate: Mutex::new(five_host_aggregate()),
            down: Mutex::new(HashSet::new()),
        });
        let segments = Arc::new(FakeSegment::default());
        let controller = Arc::new(Controller::new(
            store.clone(),
            inventory.clone(),
            Arc::new(NoopRole),
            segments.clone(),
        ));
        controller.enable("agg1", None).await.unwrap();

        let scheduler = Scheduler::new();
        let coordinator = HostDownCoordinator::new(
            store.clone(),
            inventory.clone(),
            segments.clone(),
            controller.clone(),
            scheduler,
        );
        (store, inventory, segments, controller, coordinator)
    }

    #[tokio::test]
    async fn host_down_transitions_to_migrating_and_notifies() {
        let (store, _inventory, segments, _controller, coordinator) = setup().await;

        coordinator
            .host_down(HostEvent {
                host: "h2".to_string(),
                time: Utc::now(),
            })
            .await
            .unwrap();

        // The scheduler runs the deferred reshape asynchronously; give it a
        // moment, then check the notification was posted synchronously.
        assert_eq!(segments.notifications.lock().len(), 1);
        assert_eq!(segments.notifications.lock()[0].1, "h2");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // Single isolated down host reaches quorum trivially and reshapes;
        // state settles back to COMPLETED either way (step 6).
        assert_eq!(store.get("agg1").await.unwrap().task_state, TaskState::Completed);
    }

    #[tokio::test]
    async fn host_down_on_unknown_host_fails() {
        let (_store, _inventory, _segments, _controller, coordinator) = setup().await;
        let err = coordinator
            .host_down(HostEvent {
                host: "ghost".to_string(),
                time: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HaMgrError::HostNotFound(h) if h == "ghost"));
    }

    #[tokio::test]
    async fn quorum_gate_waits_for_every_down_host_to_be_reported() {
        let (store, inventory, _segments, _controller, coordinator) = setup().await;
        inventory.down.lock().insert("h2".to_string());
        inventory.down.lock().insert("h3".to_string());

        store.set_task_state("agg1", TaskState::Migrating).await.unwrap();
        coordinator
            .reconcile_tracker_and_maybe_reshape("agg1", "h2")
            .await
            .unwrap();

        // Only h2 has been explicitly reported; h3 is down but unreported.
        let tracker = coordinator.trackers.get("agg1").unwrap();
        assert_eq!(tracker.get("h2"), Some(&true));
        assert_eq!(tracker.get("h3"), Some(&false));
    }
}
