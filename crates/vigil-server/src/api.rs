// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and the two routers.
//!
//! The management router serves registration, health and admin routes. The
//! RPC router serves the `edge.v1` services and is meant to listen on the
//! tunnel address only.

use std::sync::Arc;

use axum::{
	middleware,
	routing::{delete, get, post, put},
	Router,
};
use sqlx::SqlitePool;
use vigil_common_secret::SecretString;
use vigil_server_jobs::JobScheduler;
use vigil_server_wgtunnel::TunnelGatewayServices;

use crate::middleware::{admin_auth_middleware, edge_auth_middleware};
use crate::routes;

#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub services: TunnelGatewayServices,
	pub admin_token: Option<SecretString>,
	pub job_scheduler: Option<Arc<JobScheduler>>,
}

pub fn create_app_state(
	pool: SqlitePool,
	services: TunnelGatewayServices,
	admin_token: Option<SecretString>,
) -> AppState {
	AppState {
		pool,
		services,
		admin_token,
		job_scheduler: None,
	}
}

/// Registration, health, docs and admin routes.
pub fn create_router(state: AppState) -> Router {
	let admin = Router::new()
		.route(
			"/admin/bootstrap-tokens",
			post(routes::admin::issue_bootstrap_token),
		)
		.route("/admin/edges", get(routes::admin::list_edges))
		.route(
			"/admin/edges/authenticate",
			post(routes::admin::authenticate_edge),
		)
		.route("/admin/edges/{edge_id}", get(routes::admin::get_edge))
		.route(
			"/admin/edges/{edge_id}/status",
			put(routes::admin::set_edge_status),
		)
		.route(
			"/admin/edges/{edge_id}/peer",
			delete(routes::admin::deregister_edge),
		)
		.route(
			"/admin/edges/{edge_id}/cameras",
			get(routes::admin::list_cameras),
		)
		.route(
			"/admin/edges/{edge_id}/cameras/{camera_id}/training",
			post(routes::admin::start_training),
		)
		.route("/admin/peers", get(routes::admin::list_peers))
		.route("/admin/connections", get(routes::admin::list_connections))
		.route("/admin/jobs", get(routes::admin::list_jobs))
		.route("/admin/jobs/{job_id}/run", post(routes::admin::trigger_job))
		.route("/admin/jobs/{job_id}/cancel", post(routes::admin::cancel_job))
		.layer(middleware::from_fn_with_state(
			state.admin_token.clone(),
			admin_auth_middleware,
		));

	Router::new()
		.route("/health", get(routes::health::health_check))
		.route("/api-docs/openapi.json", get(routes::docs::openapi_json))
		.route(
			"/v1/edges/register",
			post(routes::registration::register_edge),
		)
		.merge(admin)
		.with_state(state)
}

/// The `edge.v1` RPC surface. Every request, including unknown paths, must
/// come from a registered, active tunnel peer.
pub fn create_rpc_router(state: AppState) -> Router {
	Router::new()
		.route(
			"/edge.v1.EventService/SendEvent",
			post(routes::edge::send_event),
		)
		.route(
			"/edge.v1.EventService/SendEvents",
			post(routes::edge::send_events),
		)
		.route(
			"/edge.v1.TelemetryService/SendTelemetry",
			post(routes::edge::send_telemetry),
		)
		.route(
			"/edge.v1.TelemetryService/Heartbeat",
			post(routes::edge::heartbeat),
		)
		.route(
			"/edge.v1.ControlService/GetConfig",
			post(routes::edge::get_config),
		)
		.route(
			"/edge.v1.ControlService/UpdateConfig",
			post(routes::edge::update_config),
		)
		.route(
			"/edge.v1.ControlService/RestartService",
			post(routes::edge::restart_service),
		)
		.route(
			"/edge.v1.ControlService/SyncCapabilities",
			post(routes::edge::sync_capabilities),
		)
		.layer(middleware::from_fn_with_state(
			state.clone(),
			edge_auth_middleware,
		))
		.with_state(state)
}
