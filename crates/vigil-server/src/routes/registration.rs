// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge self-registration with a bootstrap token.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use vigil_common_secret::SecretString;
use vigil_server_wgtunnel::EdgeRegistration;

use crate::api::AppState;
use crate::error::{ErrorResponse, ServerError};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterEdgeRequest {
	#[schema(value_type = String)]
	pub token: SecretString,
	pub name: String,
	/// Base64 WireGuard public key generated on the edge.
	pub public_key: String,
}

#[utoipa::path(
    post,
    path = "/v1/edges/register",
    request_body = RegisterEdgeRequest,
    responses(
        (status = 201, description = "Edge registered", body = EdgeRegistration),
        (status = 200, description = "Key already registered; existing edge returned", body = EdgeRegistration),
        (status = 400, description = "Malformed key or name", body = ErrorResponse),
        (status = 401, description = "Invalid, used or expired token", body = ErrorResponse),
        (status = 503, description = "No tunnel address left", body = ErrorResponse)
    ),
    tag = "registration"
)]
#[instrument(skip(state, payload), fields(name = %payload.name))]
pub async fn register_edge(
	State(state): State<AppState>,
	Json(payload): Json<RegisterEdgeRequest>,
) -> Result<impl IntoResponse, ServerError> {
	let registration = state
		.services
		.registrar
		.register_edge(payload.token.expose(), &payload.name, &payload.public_key)
		.await?;

	let status = if registration.created {
		StatusCode::CREATED
	} else {
		StatusCode::OK
	};
	Ok((status, Json(registration)))
}
