// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator routes. All of them sit behind the admin bearer token.

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::IntoResponse,
	Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use vigil_server_db::{EdgeCameraStatus, EdgeRecord, EdgeStatus, TrainingEligibility};
use vigil_server_jobs::JobError;
use vigil_server_wgtunnel::{ClientConfig, ConnectionSnapshot, PeerSnapshot};

use crate::api::AppState;
use crate::error::{ErrorResponse, ServerError};

#[derive(Debug, Serialize, ToSchema)]
pub struct BootstrapTokenResponse {
	/// Shown once. Only a digest is kept on the server.
	pub token: String,
	pub issued_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EdgeDetailResponse {
	pub edge: EdgeRecord,
	pub client_config: ClientConfig,
	pub connection: Option<ConnectionSnapshot>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetEdgeStatusRequest {
	pub status: EdgeStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthenticateEdgeRequest {
	pub public_key: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CameraQuery {
	/// Only cameras in this state.
	pub eligibility: Option<TrainingEligibility>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrainingResponse {
	/// False when the camera was already training.
	pub changed: bool,
	pub camera: EdgeCameraStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerJobResponse {
	pub job_id: String,
	pub run_id: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelJobResponse {
	pub job_id: String,
	pub cancelled: bool,
}

#[utoipa::path(
    post,
    path = "/admin/bootstrap-tokens",
    responses(
        (status = 201, description = "Token issued", body = BootstrapTokenResponse),
        (status = 401, description = "Missing or invalid admin token")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(state))]
pub async fn issue_bootstrap_token(State(state): State<AppState>) -> impl IntoResponse {
	let issued = state.services.registrar.generate_bootstrap_token();
	(
		StatusCode::CREATED,
		Json(BootstrapTokenResponse {
			token: issued.token.expose().clone(),
			issued_at: issued.issued_at,
			expires_at: issued.expires_at,
		}),
	)
}

#[utoipa::path(
    get,
    path = "/admin/edges",
    responses(
        (status = 200, description = "All registered edges", body = Vec<EdgeRecord>),
        (status = 401, description = "Missing or invalid admin token")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_edges(
	State(state): State<AppState>,
) -> Result<Json<Vec<EdgeRecord>>, ServerError> {
	Ok(Json(state.services.registrar.list_edges().await?))
}

#[utoipa::path(
    get,
    path = "/admin/edges/{edge_id}",
    params(("edge_id" = String, Path, description = "Edge ID")),
    responses(
        (status = 200, description = "Edge, its client config and live connection", body = EdgeDetailResponse),
        (status = 404, description = "Unknown edge", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn get_edge(
	State(state): State<AppState>,
	Path(edge_id): Path<String>,
) -> Result<Json<EdgeDetailResponse>, ServerError> {
	let registrar = &state.services.registrar;
	let edge = registrar.get_edge(&edge_id).await?;
	let registration = registrar.get_registration(&edge_id).await?;
	let connection = state.services.gateway.connections().get(&edge_id).await;

	Ok(Json(EdgeDetailResponse {
		edge,
		client_config: registration.client_config,
		connection,
	}))
}

#[utoipa::path(
    put,
    path = "/admin/edges/{edge_id}/status",
    params(("edge_id" = String, Path, description = "Edge ID")),
    request_body = SetEdgeStatusRequest,
    responses(
        (status = 200, description = "Updated edge", body = EdgeRecord),
        (status = 404, description = "Unknown edge", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(state, payload), fields(status = %payload.status))]
pub async fn set_edge_status(
	State(state): State<AppState>,
	Path(edge_id): Path<String>,
	Json(payload): Json<SetEdgeStatusRequest>,
) -> Result<Json<EdgeRecord>, ServerError> {
	let edge = state
		.services
		.registrar
		.set_edge_status(&edge_id, payload.status)
		.await?;
	Ok(Json(edge))
}

#[utoipa::path(
    delete,
    path = "/admin/edges/{edge_id}/peer",
    params(("edge_id" = String, Path, description = "Edge ID")),
    responses(
        (status = 200, description = "Peer removed and edge disabled", body = EdgeRecord),
        (status = 404, description = "Unknown edge", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(state))]
pub async fn deregister_edge(
	State(state): State<AppState>,
	Path(edge_id): Path<String>,
) -> Result<Json<EdgeRecord>, ServerError> {
	Ok(Json(state.services.registrar.deregister_edge(&edge_id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/edges/authenticate",
    request_body = AuthenticateEdgeRequest,
    responses(
        (status = 200, description = "Active edge owning the key", body = EdgeRecord),
        (status = 400, description = "Malformed key", body = ErrorResponse),
        (status = 401, description = "Unknown or disabled edge", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn authenticate_edge(
	State(state): State<AppState>,
	Json(payload): Json<AuthenticateEdgeRequest>,
) -> Result<Json<EdgeRecord>, ServerError> {
	Ok(Json(
		state
			.services
			.registrar
			.authenticate_edge(&payload.public_key)
			.await?,
	))
}

#[utoipa::path(
    get,
    path = "/admin/edges/{edge_id}/cameras",
    params(("edge_id" = String, Path, description = "Edge ID"), CameraQuery),
    responses(
        (status = 200, description = "Camera capability snapshots", body = Vec<EdgeCameraStatus>),
        (status = 404, description = "Unknown edge", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_cameras(
	State(state): State<AppState>,
	Path(edge_id): Path<String>,
	Query(query): Query<CameraQuery>,
) -> Result<Json<Vec<EdgeCameraStatus>>, ServerError> {
	state.services.registrar.get_edge(&edge_id).await?;

	let capabilities = &state.services.capabilities;
	let cameras = match query.eligibility {
		Some(eligibility) => {
			capabilities
				.list_by_eligibility(Some(&edge_id), eligibility)
				.await?
		}
		None => capabilities.list_camera_statuses(&edge_id).await?,
	};
	Ok(Json(cameras))
}

#[utoipa::path(
    post,
    path = "/admin/edges/{edge_id}/cameras/{camera_id}/training",
    params(
        ("edge_id" = String, Path, description = "Edge ID"),
        ("camera_id" = String, Path, description = "Camera ID")
    ),
    responses(
        (status = 200, description = "Camera marked as training", body = TrainingResponse),
        (status = 404, description = "Unknown camera", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(state))]
pub async fn start_training(
	State(state): State<AppState>,
	Path((edge_id, camera_id)): Path<(String, String)>,
) -> Result<Json<TrainingResponse>, ServerError> {
	let capabilities = &state.services.capabilities;
	let transition = capabilities
		.set_training_in_progress(&edge_id, &camera_id)
		.await?;
	let camera = capabilities.get_camera_status(&edge_id, &camera_id).await?;

	Ok(Json(TrainingResponse {
		changed: transition.is_some(),
		camera,
	}))
}

#[utoipa::path(
    get,
    path = "/admin/peers",
    responses(
        (status = 200, description = "Tunnel peers", body = Vec<PeerSnapshot>)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerSnapshot>> {
	Json(state.services.interface.list_peers().await)
}

#[utoipa::path(
    get,
    path = "/admin/connections",
    responses(
        (status = 200, description = "Live edge RPC connections", body = Vec<ConnectionSnapshot>)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionSnapshot>> {
	Json(state.services.gateway.connections().list().await)
}

/// GET /admin/jobs - Health of every background job.
pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
	let scheduler = state
		.job_scheduler
		.as_ref()
		.ok_or_else(|| ServerError::ServiceUnavailable("job scheduler not running".to_string()))?;
	Ok(Json(scheduler.health_status()))
}

/// POST /admin/jobs/{job_id}/run - Run a job now, outside its schedule.
#[instrument(skip(state))]
pub async fn trigger_job(
	State(state): State<AppState>,
	Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
	let scheduler = state
		.job_scheduler
		.as_ref()
		.ok_or_else(|| ServerError::ServiceUnavailable("job scheduler not running".to_string()))?;

	let run_id = scheduler.trigger_job(&job_id).await.map_err(|e| match e {
		JobError::NotFound(id) => ServerError::NotFound(format!("job {id}")),
		JobError::Cancelled => ServerError::Conflict(format!("job {job_id} is cancelled")),
		other => ServerError::Internal(other.to_string()),
	})?;
	info!(%job_id, run_id, "job triggered manually");

	Ok((
		StatusCode::ACCEPTED,
		Json(TriggerJobResponse { job_id, run_id }),
	))
}

/// POST /admin/jobs/{job_id}/cancel - Stop a job's scheduled and manual runs.
#[instrument(skip(state))]
pub async fn cancel_job(
	State(state): State<AppState>,
	Path(job_id): Path<String>,
) -> Result<Json<CancelJobResponse>, ServerError> {
	let scheduler = state
		.job_scheduler
		.as_ref()
		.ok_or_else(|| ServerError::ServiceUnavailable("job scheduler not running".to_string()))?;

	scheduler.cancel_job(&job_id).map_err(|e| match e {
		JobError::NotFound(id) => ServerError::NotFound(format!("job {id}")),
		other => ServerError::Internal(other.to_string()),
	})?;
	info!(%job_id, "job cancelled");

	Ok(Json(CancelJobResponse {
		job_id,
		cancelled: true,
	}))
}
