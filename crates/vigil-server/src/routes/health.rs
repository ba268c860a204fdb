// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use vigil_server_jobs::{HealthState, JobScheduler, JobsHealthStatus};
use vigil_server_wgtunnel::InterfaceManager;

use crate::api::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DatabaseHealth {
	pub status: HealthStatus,
	pub latency_ms: u64,
	pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TunnelHealth {
	pub interface: String,
	pub public_key: String,
	pub listen_port: u16,
	pub gateway_address: String,
	pub peer_count: usize,
	pub connected_peers: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthComponents {
	pub database: DatabaseHealth,
	pub tunnel: TunnelHealth,
	/// Edges with a live RPC connection.
	pub edge_connections: usize,
	#[schema(value_type = Option<Object>)]
	pub jobs: Option<JobsHealthStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
	pub status: HealthStatus,
	pub timestamp: String,
	pub version: String,
	pub components: HealthComponents,
}

async fn check_database(pool: &SqlitePool) -> DatabaseHealth {
	let start = Instant::now();
	let result = sqlx::query("SELECT 1").execute(pool).await;
	let latency_ms = start.elapsed().as_millis() as u64;

	match result {
		Ok(_) => DatabaseHealth {
			status: HealthStatus::Healthy,
			latency_ms,
			error: None,
		},
		Err(e) => DatabaseHealth {
			status: HealthStatus::Unhealthy,
			latency_ms,
			error: Some(e.to_string()),
		},
	}
}

async fn check_tunnel(interface: &InterfaceManager) -> TunnelHealth {
	let peers = interface.list_peers().await;
	TunnelHealth {
		interface: interface.interface_name().to_string(),
		public_key: interface.public_key().to_string(),
		listen_port: interface.listen_port(),
		gateway_address: interface.gateway_address().to_string(),
		peer_count: peers.len(),
		connected_peers: peers.iter().filter(|p| p.connected).count(),
	}
}

fn check_jobs(scheduler: Option<&std::sync::Arc<JobScheduler>>) -> Option<JobsHealthStatus> {
	scheduler.map(|s| s.health_status())
}

fn aggregate_status(components: &HealthComponents) -> HealthStatus {
	if components.database.status == HealthStatus::Unhealthy {
		return HealthStatus::Unhealthy;
	}
	match components.jobs.as_ref().map(|j| j.status) {
		Some(HealthState::Degraded) | Some(HealthState::Unhealthy) => HealthStatus::Degraded,
		_ => HealthStatus::Healthy,
	}
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Gateway is healthy or degraded", body = HealthResponse),
        (status = 503, description = "Gateway is unhealthy", body = HealthResponse)
    ),
    tag = "health"
)]
/// GET /health - Database, tunnel and job health.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let (database, tunnel, edge_connections) = tokio::join!(
		check_database(&state.pool),
		check_tunnel(&state.services.interface),
		state.services.gateway.connections().len(),
	);

	let components = HealthComponents {
		database,
		tunnel,
		edge_connections,
		jobs: check_jobs(state.job_scheduler.as_ref()),
	};
	let status = aggregate_status(&components);

	let response = HealthResponse {
		status,
		timestamp: chrono::Utc::now().to_rfc3339(),
		version: env!("CARGO_PKG_VERSION").to_string(),
		components,
	};

	let http_status = match status {
		HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
		HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};

	(http_status, Json(response))
}
