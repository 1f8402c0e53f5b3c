// src/core/store.rs

//! The Cluster Store: persists one record per aggregate (spec §4.1).
//!
//! The real deployment backs this with the relational persistence layer named
//! in spec §1 as an out-of-scope collaborator; that layer is modeled here as a
//! transactional key-value of cluster records behind the `ClusterStore` trait.
//! `InMemoryClusterStore` is the trait's only implementation in this crate —
//! sufficient for tests and for a single-process deployment — and every
//! mutation it exposes is atomic with respect to concurrent callers, which is
//! what lets the task-state gate in §5 double as a lock.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::core::errors::HaMgrError;
use crate::core::types::{ClusterRecord, TaskState};

/// Persistence operations over cluster records (spec §4.1).
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetches the record for `name`. Fails with `ClusterNotFound` if absent.
    async fn get(&self, name: &str) -> Result<ClusterRecord, HaMgrError>;

    /// All records with `enabled = true`.
    async fn get_all_active(&self) -> Result<Vec<ClusterRecord>, HaMgrError>;

    /// Creates a record for `name` in `initial_task_state` if one doesn't
    /// already exist; otherwise returns the existing record unchanged.
    async fn create_if_absent(
        &self,
        name: &str,
        initial_task_state: TaskState,
    ) -> Result<ClusterRecord, HaMgrError>;

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), HaMgrError>;

    async fn set_task_state(&self, name: &str, state: TaskState) -> Result<(), HaMgrError>;

    /// Atomically claims the `enable` lock: if a record for `name` exists, its
    /// task state must satisfy `TaskState::allows_enable`, and is flipped to
    /// `Creating` as part of the same atomic step. Returns `Ok(None)` if no
    /// record exists yet (the caller is responsible for creating one later in
    /// the enable workflow). Returns `ClusterBusy` if a record exists but is
    /// mid-transition.
    async fn begin_enable(&self, name: &str) -> Result<Option<ClusterRecord>, HaMgrError>;

    /// Atomically claims the `disable` lock: if a record for `name` exists,
    /// its task state must satisfy `TaskState::allows_disable`, and is flipped
    /// to `Removing` as part of the same atomic step. Returns `Ok(None)` if no
    /// record exists (the caller proceeds with best-effort cleanup only).
    async fn begin_disable(&self, name: &str) -> Result<Option<ClusterRecord>, HaMgrError>;

    /// Atomically claims the host-down-coordinator lock: `name` must exist in
    /// `Completed`, and is flipped to `Migrating` as part of the same atomic
    /// step. Fails with `ClusterNotFound` or `ClusterBusy`.
    async fn begin_migrating(&self, name: &str) -> Result<(), HaMgrError>;
}

/// In-memory `ClusterStore`, backed by a sharded concurrent map.
///
/// Every mutating operation uses `DashMap::entry`, which holds the shard's
/// write lock for the duration of the closure — no observer ever sees an
/// in-between state, matching the invariant in spec §3.
#[derive(Debug, Default)]
pub struct InMemoryClusterStore {
    records: DashMap<String, ClusterRecord>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn get(&self, name: &str) -> Result<ClusterRecord, HaMgrError> {
        self.records
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| HaMgrError::ClusterNotFound(name.to_string()))
    }

    async fn get_all_active(&self) -> Result<Vec<ClusterRecord>, HaMgrError> {
        Ok(self
            .records
            .iter()
            .filter(|e| e.value().enabled)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn create_if_absent(
        &self,
        name: &str,
        initial_task_state: TaskState,
    ) -> Result<ClusterRecord, HaMgrError> {
        let record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cluster = name, state = %initial_task_state, "creating cluster record");
                ClusterRecord {
                    id: uuid::Uuid::new_v4(),
                    name: name.to_string(),
                    enabled: false,
                    task_state: initial_task_state,
                }
            })
            .clone();
        Ok(record)
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), HaMgrError> {
        let mut entry = self
            .records
            .get_mut(name)
            .ok_or_else(|| HaMgrError::ClusterNotFound(name.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    async fn set_task_state(&self, name: &str, state: TaskState) -> Result<(), HaMgrError> {
        let mut entry = self
            .records
            .get_mut(name)
            .ok_or_else(|| HaMgrError::ClusterNotFound(name.to_string()))?;
        entry.task_state = state;
        Ok(())
    }

    async fn begin_enable(&self, name: &str) -> Result<Option<ClusterRecord>, HaMgrError> {
        let Some(mut entry) = self.records.get_mut(name) else {
            return Ok(None);
        };
        if !entry.task_state.allows_enable() {
            return Err(HaMgrError::ClusterBusy {
                name: name.to_string(),
                state: entry.task_state,
            });
        }
        let before = entry.clone();
        entry.task_state = TaskState::Creating;
        Ok(Some(before))
    }

    async fn begin_disable(&self, name: &str) -> Result<Option<ClusterRecord>, HaMgrError> {
        let Some(mut entry) = self.records.get_mut(name) else {
            return Ok(None);
        };
        if !entry.task_state.allows_disable() {
            return Err(HaMgrError::ClusterBusy {
                name: name.to_string(),
                state: entry.task_state,
            });
        }
        let before = entry.clone();
        entry.task_state = TaskState::Removing;
        Ok(Some(before))
    }

    async fn begin_migrating(&self, name: &str) -> Result<(), HaMgrError> {
        let mut entry = self
            .records
            .get_mut(name)
            .ok_or_else(|| HaMgrError::ClusterNotFound(name.to_string()))?;
        if entry.task_state != TaskState::Completed {
            return Err(HaMgrError::ClusterBusy {
                name: name.to_string(),
                state: entry.task_state,
            });
        }
        entry.task_state = TaskState::Migrating;
        Ok(())
    }
}
