// src/core/types.rs

//! The data model shared across the store, clients, controller, and reconciler.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// The phase of a cluster's lifecycle state machine (spec §3).
///
/// `COMPLETED` is the only state from which `enable`/`disable` may begin;
/// `ERROR_REMOVING` additionally permits `disable` to retry cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Completed,
    Creating,
    Updating,
    Migrating,
    Removing,
    ErrorRemoving,
}

impl TaskState {
    /// Whether `enable()` may start from this state.
    pub fn allows_enable(self) -> bool {
        matches!(self, TaskState::Completed)
    }

    /// Whether `disable()` may start from this state.
    pub fn allows_disable(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::ErrorRemoving)
    }
}

/// One per-aggregate cluster record, keyed by aggregate id.
///
/// Exists if and only if HA has ever been enabled for the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub enabled: bool,
    pub task_state: TaskState,
}

/// An administrator-defined host aggregate, as read from the inventory service.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub id: String,
    pub hosts: BTreeSet<String>,
}

/// Liveness of a single host's HA-relevant compute service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLiveness {
    Up,
    Down,
}

/// A hypervisor's management IP, as reported by the inventory service.
#[derive(Debug, Clone)]
pub struct Hypervisor {
    pub host: String,
    pub ip: String,
}

/// A host's role in the HA substrate topology (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Server,
    Agent,
}

/// The host-down / host-up event delivered by the out-of-scope compute-service notifier.
#[derive(Debug, Clone)]
pub struct HostEvent {
    pub host: String,
    pub time: DateTime<Utc>,
}

/// One entry in a failover segment's host list, as returned by the HA notification service.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentHost {
    pub name: String,
    pub host: String,
}

/// The kind of notification posted to the HA notification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ComputeHost,
}

/// The external, read-only view of an aggregate's HA status (spec §6 `GET /aggregate`).
#[derive(Debug, Clone, Serialize)]
pub struct AggregateView {
    pub id: String,
    pub enabled: bool,
    /// `"completed"` when enabled and idle, `null` when not enabled, the lowercase
    /// task-state name otherwise.
    pub task_state: Option<String>,
}
