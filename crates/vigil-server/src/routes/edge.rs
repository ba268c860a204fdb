// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `edge.v1` RPC handlers.
//!
//! Callers are authenticated by [`edge_auth_middleware`](crate::middleware::edge_auth_middleware)
//! before any handler runs. Collaborator failures are reported in the body with
//! `success: false`, never as an HTTP error.

use axum::{extract::State, Extension, Json};
use vigil_server_wgtunnel::rpc::{
	AckResponse, GetConfigRequest, GetConfigResponse, HeartbeatRequest, HeartbeatResponse,
	RestartServiceRequest, SendEventRequest, SendEventResponse, SendEventsRequest,
	SendEventsResponse, SendTelemetryRequest, SendTelemetryResponse, SyncCapabilitiesRequest,
	UpdateConfigRequest,
};
use vigil_server_wgtunnel::EdgeIdentity;

use crate::api::AppState;

#[utoipa::path(
    post,
    path = "/edge.v1.EventService/SendEvent",
    request_body = SendEventRequest,
    responses(
        (status = 200, description = "Event handed to the receiver", body = SendEventResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn send_event(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<SendEventRequest>,
) -> Json<SendEventResponse> {
	Json(state.services.gateway.send_event(&identity, &request).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.EventService/SendEvents",
    request_body = SendEventsRequest,
    responses(
        (status = 200, description = "Batch handed to the receiver", body = SendEventsResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn send_events(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<SendEventsRequest>,
) -> Json<SendEventsResponse> {
	Json(state.services.gateway.send_events(&identity, &request).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.TelemetryService/SendTelemetry",
    request_body = SendTelemetryRequest,
    responses(
        (status = 200, description = "Telemetry accepted", body = SendTelemetryResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn send_telemetry(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<SendTelemetryRequest>,
) -> Json<SendTelemetryResponse> {
	Json(state.services.gateway.send_telemetry(&identity, &request).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.TelemetryService/Heartbeat",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat recorded", body = HeartbeatResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn heartbeat(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
	Json(state.services.gateway.heartbeat(&identity, &request).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.ControlService/GetConfig",
    request_body = GetConfigRequest,
    responses(
        (status = 200, description = "Configuration for the calling edge", body = GetConfigResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn get_config(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(_request): Json<GetConfigRequest>,
) -> Json<GetConfigResponse> {
	Json(state.services.gateway.get_config(&identity).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.ControlService/UpdateConfig",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Update acknowledged", body = AckResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn update_config(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<UpdateConfigRequest>,
) -> Json<AckResponse> {
	Json(state.services.gateway.update_config(&identity, &request).await)
}

#[utoipa::path(
    post,
    path = "/edge.v1.ControlService/RestartService",
    request_body = RestartServiceRequest,
    responses(
        (status = 200, description = "Restart acknowledged", body = AckResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn restart_service(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<RestartServiceRequest>,
) -> Json<AckResponse> {
	Json(
		state
			.services
			.gateway
			.restart_service(&identity, &request)
			.await,
	)
}

#[utoipa::path(
    post,
    path = "/edge.v1.ControlService/SyncCapabilities",
    request_body = SyncCapabilitiesRequest,
    responses(
        (status = 200, description = "Camera capabilities stored", body = AckResponse),
        (status = 401, description = "Caller is not a registered tunnel peer")
    ),
    tag = "edge"
)]
pub async fn sync_capabilities(
	State(state): State<AppState>,
	Extension(identity): Extension<EdgeIdentity>,
	Json(request): Json<SyncCapabilitiesRequest>,
) -> Json<AckResponse> {
	Json(
		state
			.services
			.gateway
			.sync_capabilities(&identity, &request)
			.await,
	)
}
