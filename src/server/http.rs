// src/server/http.rs

//! The thin, out-of-scope-per-spec HTTP routing layer (spec §6) sitting on
//! top of the core: `GET /aggregate[/id]`, `PUT /aggregate/:id?method=enable|disable`,
//! and the host up/down notification intake that feeds the Host-Down
//! Coordinator.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::core::controller::Controller;
use crate::core::errors::HaMgrError;
use crate::core::host_down::HostDownCoordinator;
use crate::core::types::HostEvent;

#[derive(Clone)]
pub struct HttpState {
    pub controller: Arc<Controller>,
    pub host_down: Arc<HostDownCoordinator>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/aggregate", get(get_all_aggregates))
        .route("/aggregate/{id}", get(get_one_aggregate))
        .route("/aggregate/{id}", put(put_aggregate))
        .route("/events/host-down", post(post_host_down))
        .route("/events/host-up", post(post_host_up))
        .with_state(state)
}

impl IntoResponse for HaMgrError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            HaMgrError::AggregateNotFound(_)
            | HaMgrError::ClusterNotFound(_)
            | HaMgrError::HostNotFound(_)
            | HaMgrError::SegmentNotFound(_) => StatusCode::NOT_FOUND,
            HaMgrError::InsufficientHosts(_) => StatusCode::BAD_REQUEST,
            HaMgrError::ClusterBusy { .. } => StatusCode::CONFLICT,
            HaMgrError::HostOffline(_) | HaMgrError::RoleConvergeFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            HaMgrError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

async fn get_all_aggregates(
    State(state): State<HttpState>,
) -> Result<impl IntoResponse, HaMgrError> {
    let views = state.controller.get(None).await?;
    Ok(Json(views))
}

async fn get_one_aggregate(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HaMgrError> {
    let views = state.controller.get(Some(&id)).await?;
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
struct PutAggregateQuery {
    method: PutMethod,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PutMethod {
    Enable,
    Disable,
}

#[derive(Debug, Deserialize, Default)]
struct PutAggregateBody {
    hosts: Option<Vec<String>>,
    #[serde(default)]
    synchronize: bool,
}

async fn put_aggregate(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(query): Query<PutAggregateQuery>,
    body: Option<Json<PutAggregateBody>>,
) -> Result<impl IntoResponse, HaMgrError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match query.method {
        PutMethod::Enable => state.controller.enable(&id, body.hosts).await?,
        PutMethod::Disable => state.controller.disable(&id, body.synchronize).await?,
    }
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct HostEventBody {
    host: String,
}

async fn post_host_down(
    State(state): State<HttpState>,
    Json(body): Json<HostEventBody>,
) -> Result<impl IntoResponse, HaMgrError> {
    crate::core::metrics::HOST_DOWN_EVENTS_TOTAL.inc();
    state
        .host_down
        .host_down(HostEvent {
            host: body.host,
            time: Utc::now(),
        })
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn post_host_up(
    State(state): State<HttpState>,
    Json(body): Json<HostEventBody>,
) -> Result<impl IntoResponse, HaMgrError> {
    crate::core::metrics::HOST_UP_EVENTS_TOTAL.inc();
    if let Err(e) = state
        .host_down
        .host_up(HostEvent {
            host: body.host,
            time: Utc::now(),
        })
        .await
    {
        warn!(error = %e, "host-up notification failed");
    }
    Ok(StatusCode::ACCEPTED)
}
