// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenAPI documentation for vigil-server.
//!
//! The raw JSON document is served at `/api-docs/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vigil Tunnel Gateway API",
        version = "1.0.0",
        description = "Edge registration over WireGuard, operator administration and the edge.v1 RPC services.",
        license(name = "Proprietary"),
        contact(
            name = "Geoffrey Huntley",
            email = "ghuntley@ghuntley.com",
            url = "https://ghuntley.com"
        )
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    tags(
        (name = "health", description = "Health checks and system status"),
        (name = "registration", description = "Edge self-registration with bootstrap tokens"),
        (name = "admin", description = "Operator management of edges, peers and cameras"),
        (name = "edge", description = "edge.v1 RPC services, reachable only through the tunnel")
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::registration::register_edge,
        crate::routes::admin::issue_bootstrap_token,
        crate::routes::admin::list_edges,
        crate::routes::admin::get_edge,
        crate::routes::admin::set_edge_status,
        crate::routes::admin::deregister_edge,
        crate::routes::admin::authenticate_edge,
        crate::routes::admin::list_cameras,
        crate::routes::admin::start_training,
        crate::routes::admin::list_peers,
        crate::routes::admin::list_connections,
        crate::routes::edge::send_event,
        crate::routes::edge::send_events,
        crate::routes::edge::send_telemetry,
        crate::routes::edge::heartbeat,
        crate::routes::edge::get_config,
        crate::routes::edge::update_config,
        crate::routes::edge::restart_service,
        crate::routes::edge::sync_capabilities,
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            crate::routes::health::HealthResponse,
            crate::routes::health::HealthComponents,
            crate::routes::health::HealthStatus,
            crate::routes::health::DatabaseHealth,
            crate::routes::health::TunnelHealth,
            crate::routes::registration::RegisterEdgeRequest,
            crate::routes::admin::BootstrapTokenResponse,
            crate::routes::admin::EdgeDetailResponse,
            crate::routes::admin::SetEdgeStatusRequest,
            crate::routes::admin::AuthenticateEdgeRequest,
            crate::routes::admin::TrainingResponse,
            vigil_server_db::EdgeRecord,
            vigil_server_db::EdgeStatus,
            vigil_server_db::EdgeCameraStatus,
            vigil_server_db::CameraCapability,
            vigil_server_db::TrainingEligibility,
            vigil_server_wgtunnel::ClientConfig,
            vigil_server_wgtunnel::EdgeRegistration,
            vigil_server_wgtunnel::ConnectionSnapshot,
            vigil_server_wgtunnel::PeerSnapshot,
            vigil_server_wgtunnel::rpc::EdgeEvent,
            vigil_server_wgtunnel::rpc::SendEventRequest,
            vigil_server_wgtunnel::rpc::SendEventResponse,
            vigil_server_wgtunnel::rpc::SendEventsRequest,
            vigil_server_wgtunnel::rpc::SendEventsResponse,
            vigil_server_wgtunnel::rpc::TelemetryData,
            vigil_server_wgtunnel::rpc::SendTelemetryRequest,
            vigil_server_wgtunnel::rpc::SendTelemetryResponse,
            vigil_server_wgtunnel::rpc::HeartbeatRequest,
            vigil_server_wgtunnel::rpc::HeartbeatResponse,
            vigil_server_wgtunnel::rpc::GetConfigRequest,
            vigil_server_wgtunnel::rpc::GetConfigResponse,
            vigil_server_wgtunnel::rpc::UpdateConfigRequest,
            vigil_server_wgtunnel::rpc::RestartServiceRequest,
            vigil_server_wgtunnel::rpc::SyncCapabilitiesRequest,
            vigil_server_wgtunnel::rpc::AckResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the admin bearer scheme referenced by the admin routes.
struct SecurityAddon;

impl Modify for SecurityAddon {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		if let Some(components) = openapi.components.as_mut() {
			components.add_security_scheme(
				"bearer",
				SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_openapi_spec_generates_valid_json() {
		let spec = ApiDoc::openapi();
		let json = serde_json::to_string_pretty(&spec).expect("should serialize to JSON");

		assert!(json.contains("\"openapi\""));
		assert!(json.contains("Vigil Tunnel Gateway API"));
		assert!(json.contains("/edge.v1.TelemetryService/Heartbeat"));
		assert!(json.contains("/v1/edges/register"));
	}

	#[test]
	fn test_openapi_spec_has_all_tags() {
		let spec = ApiDoc::openapi();
		let json = serde_json::to_string(&spec).expect("should serialize");

		for tag in ["health", "registration", "admin", "edge"] {
			assert!(json.contains(tag), "Missing tag: {tag}");
		}
	}

	#[test]
	fn test_admin_security_scheme_registered() {
		let spec = ApiDoc::openapi();
		let schemes = spec
			.components
			.expect("components")
			.security_schemes;
		assert!(schemes.contains_key("bearer"));
	}
}
