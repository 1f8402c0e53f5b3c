// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

use crate::core::types::TaskState;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum HaMgrError {
    #[error("aggregate '{0}' not found")]
    AggregateNotFound(String),

    #[error("failover segment '{0}' not found")]
    SegmentNotFound(String),

    #[error("host '{0}' not found")]
    HostNotFound(String),

    #[error("host '{0}' is offline")]
    HostOffline(String),

    #[error("at least 3 hosts are required, found {0}")]
    InsufficientHosts(usize),

    #[error("cluster '{name}' is busy running task {state:?}")]
    ClusterBusy { name: String, state: TaskState },

    #[error("role did not converge to removed on host '{0}' within the poll budget")]
    RoleConvergeFailed(String),

    #[error("cluster record '{0}' not found")]
    ClusterNotFound(String),

    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for HaMgrError {
    fn from(e: reqwest::Error) -> Self {
        HaMgrError::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for HaMgrError {
    fn from(e: serde_json::Error) -> Self {
        HaMgrError::Upstream(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<std::io::Error> for HaMgrError {
    fn from(e: std::io::Error) -> Self {
        HaMgrError::Upstream(format!("IO error: {e}"))
    }
}

impl From<anyhow::Error> for HaMgrError {
    fn from(e: anyhow::Error) -> Self {
        HaMgrError::Upstream(e.to_string())
    }
}
