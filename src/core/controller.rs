// src/core/controller.rs

//! The Cluster Controller (spec §4.6): the enable/disable workflow per
//! aggregate, owning every task-state transition and the enable rollback.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use crate::core::clients::inventory::InventoryClient;
use crate::core::clients::role::RoleClient;
use crate::core::clients::segment::SegmentClient;
use crate::core::errors::HaMgrError;
use crate::core::metrics::{DISABLE_TOTAL, ENABLE_TOTAL};
use crate::core::store::ClusterStore;
use crate::core::topology;
use crate::core::types::{AggregateView, TaskState};

/// Owns the topology planner and the three RPC clients; every workflow that
/// mutates a cluster's state goes through here.
pub struct Controller {
    store: Arc<dyn ClusterStore>,
    inventory: Arc<dyn InventoryClient>,
    role: Arc<dyn RoleClient>,
    segments: Arc<dyn SegmentClient>,
    min_host_count: usize,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        inventory: Arc<dyn InventoryClient>,
        role: Arc<dyn RoleClient>,
        segments: Arc<dyn SegmentClient>,
    ) -> Self {
        Self::with_min_host_count(store, inventory, role, segments, topology::MIN_HOSTS)
    }

    pub fn with_min_host_count(
        store: Arc<dyn ClusterStore>,
        inventory: Arc<dyn InventoryClient>,
        role: Arc<dyn RoleClient>,
        segments: Arc<dyn SegmentClient>,
        min_host_count: usize,
    ) -> Self {
        Self {
            store,
            inventory,
            role,
            segments,
            min_host_count,
        }
    }

    /// Read path (spec §11): a single aggregate's view, or every aggregate's
    /// view. Always consults the inventory client first — an aggregate that
    /// exists there but was never HA-enabled still reports `enabled: false`,
    /// `task_state: null` rather than 404ing; only an aggregate the inventory
    /// doesn't know about at all is `AggregateNotFound`.
    pub async fn get(&self, aggregate_id: Option<&str>) -> Result<Vec<AggregateView>, HaMgrError> {
        let aggregates = match aggregate_id {
            Some(id) => vec![self.inventory.get_aggregate(id).await?],
            None => self.inventory.list_aggregates().await?,
        };

        let mut views = Vec::with_capacity(aggregates.len());
        for aggregate in aggregates {
            let record = match self.store.get(&aggregate.id).await {
                Ok(r) => Some(r),
                Err(HaMgrError::ClusterNotFound(_)) => None,
                Err(e) => return Err(e),
            };
            views.push(match record {
                Some(r) => AggregateView {
                    id: r.name,
                    enabled: r.enabled,
                    task_state: r.enabled.then(|| r.task_state.to_string().to_lowercase()),
                },
                None => AggregateView {
                    id: aggregate.id,
                    enabled: false,
                    task_state: None,
                },
            });
        }
        Ok(views)
    }

    /// The enable workflow (spec §4.6.1).
    pub async fn enable(&self, aggregate_id: &str, hosts: Option<Vec<String>>) -> Result<(), HaMgrError> {
        let existed = self.store.begin_enable(aggregate_id).await?;
        let mut record_created = existed.is_some();

        let result: Result<(), HaMgrError> = async {
            let aggregate = self.inventory.get_aggregate(aggregate_id).await?;
            let chosen: Vec<String> = match &hosts {
                Some(h) => h.clone(),
                None => aggregate.hosts.iter().cloned().collect(),
            };
            let topo = topology::plan_with_minimum(chosen, self.min_host_count)?;

            let hypervisors = self.inventory.list_hypervisors().await?;
            let ip_of: HashMap<&str, &str> =
                hypervisors.iter().map(|h| (h.host.as_str(), h.ip.as_str())).collect();
            let leader_ip = ip_of
                .get(topo.leader.as_str())
                .copied()
                .ok_or_else(|| HaMgrError::HostNotFound(topo.leader.clone()))?
                .to_string();

            // Servers (leader included) before agents — assignments() orders
            // them that way, matching the ordering guarantee in spec §5.
            for assignment in topo.assignments() {
                let host_ip = ip_of
                    .get(assignment.host.as_str())
                    .copied()
                    .ok_or_else(|| HaMgrError::HostNotFound(assignment.host.clone()))?;
                self.role
                    .attach(
                        &assignment.host,
                        assignment.role,
                        &leader_ip,
                        host_ip,
                        assignment.bootstrap_expect,
                    )
                    .await?;
            }

            if !record_created {
                self.store.create_if_absent(aggregate_id, TaskState::Creating).await?;
                record_created = true;
            }

            self.segments.create_segment(aggregate_id, &topo.all_hosts()).await?;

            self.store.set_enabled(aggregate_id, true).await?;
            self.store.set_task_state(aggregate_id, TaskState::Completed).await?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => ENABLE_TOTAL.with_label_values(&["completed"]).inc(),
            Err(err) => {
                // Spec §4.6.1: rollback applies only once the record exists —
                // a failure before the record was ever created just surfaces.
                if record_created {
                    warn!(cluster = aggregate_id, error = %err, "enable failed, rolling back");
                    match self.disable_unlocked(aggregate_id, false).await {
                        Ok(()) => ENABLE_TOTAL.with_label_values(&["rolled_back"]).inc(),
                        Err(rollback_err) => {
                            error!(cluster = aggregate_id, error = %rollback_err, "rollback also failed");
                            ENABLE_TOTAL.with_label_values(&["rollback_failed"]).inc();
                        }
                    }
                } else {
                    ENABLE_TOTAL.with_label_values(&["rejected"]).inc();
                }
            }
        }
        result
    }

    /// The disable workflow (spec §4.6.2).
    pub async fn disable(&self, aggregate_id: &str, synchronize: bool) -> Result<(), HaMgrError> {
        match self.store.begin_disable(aggregate_id).await? {
            None => {
                if let Err(e) = self.cleanup_segment_and_roles(aggregate_id, synchronize).await {
                    warn!(
                        cluster = aggregate_id,
                        error = %e,
                        "best-effort disable cleanup failed for an aggregate with no cluster record"
                    );
                }
                Ok(())
            }
            Some(_before) => self.finish_disable(aggregate_id, synchronize).await,
        }
    }

    /// Disables a cluster the caller already holds the lock on (its
    /// `task_state` is some non-`COMPLETED` working state, e.g. `CREATING` on
    /// an `enable` rollback or `MIGRATING` from the host-down coordinator).
    /// Skips `begin_disable`'s gate, which would otherwise reject the very
    /// state this is meant to unwind.
    pub(crate) async fn disable_unlocked(&self, aggregate_id: &str, synchronize: bool) -> Result<(), HaMgrError> {
        self.store.set_task_state(aggregate_id, TaskState::Removing).await?;
        self.finish_disable(aggregate_id, synchronize).await
    }

    /// Steps 4-8 of disable, shared by the public workflow and the enable
    /// rollback path. Writes exactly one of `COMPLETED` or `ERROR_REMOVING`
    /// at the end — never both, fixing the known source defect (spec §9(c)).
    async fn finish_disable(&self, aggregate_id: &str, synchronize: bool) -> Result<(), HaMgrError> {
        match self.cleanup_segment_and_roles(aggregate_id, synchronize).await {
            Ok(()) => {
                self.store.set_enabled(aggregate_id, false).await?;
                self.store.set_task_state(aggregate_id, TaskState::Completed).await?;
                DISABLE_TOTAL.with_label_values(&["completed"]).inc();
                Ok(())
            }
            Err(e) => {
                self.store
                    .set_task_state(aggregate_id, TaskState::ErrorRemoving)
                    .await?;
                DISABLE_TOTAL.with_label_values(&["error_removing"]).inc();
                Err(e)
            }
        }
    }

    /// Deletes the segment and detaches the role from its members (spec
    /// §4.6.2 steps 4-6). A missing segment is treated as already clean.
    async fn cleanup_segment_and_roles(&self, aggregate_id: &str, synchronize: bool) -> Result<(), HaMgrError> {
        let hosts = match self.segments.list_hosts_in_segment(aggregate_id).await {
            Ok(hosts) => hosts,
            Err(HaMgrError::SegmentNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        self.segments.delete_segment(aggregate_id).await?;

        for h in &hosts {
            self.role.detach(&h.host).await?;
        }
        if synchronize {
            for h in &hosts {
                self.role.wait_for_removal(&h.host).await?;
            }
        }
        Ok(())
    }
}
