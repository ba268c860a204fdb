// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request authentication.
//!
//! - [`admin_auth_middleware`]: static bearer token for operator routes
//! - [`edge_auth_middleware`]: tunnel identity for edge RPC routes

use std::net::SocketAddr;

use axum::{
	extract::{ConnectInfo, Request, State},
	http::StatusCode,
	middleware::Next,
	response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use vigil_common_secret::SecretString;

use crate::api::AppState;
use crate::error::ServerError;

pub async fn admin_auth_middleware(
	State(expected_token): State<Option<SecretString>>,
	request: Request,
	next: Next,
) -> Result<Response, StatusCode> {
	let Some(expected) = expected_token else {
		warn!("admin auth failed: no admin token configured");
		return Err(StatusCode::UNAUTHORIZED);
	};

	let auth_header = request
		.headers()
		.get("Authorization")
		.and_then(|h| h.to_str().ok());

	let Some(auth_value) = auth_header else {
		warn!("admin auth failed: missing Authorization header");
		return Err(StatusCode::UNAUTHORIZED);
	};

	let Some(token) = auth_value.strip_prefix("Bearer ").map(str::trim) else {
		warn!("admin auth failed: invalid Authorization format");
		return Err(StatusCode::UNAUTHORIZED);
	};

	let expected_bytes = expected.expose().as_bytes();
	let token_bytes = token.as_bytes();

	if expected_bytes.len() != token_bytes.len() {
		warn!("admin auth failed: token length mismatch");
		return Err(StatusCode::UNAUTHORIZED);
	}

	if expected_bytes.ct_eq(token_bytes).into() {
		Ok(next.run(request).await)
	} else {
		warn!("admin auth failed: invalid token");
		Err(StatusCode::UNAUTHORIZED)
	}
}

/// Resolve the calling edge from the tunnel address the request came from and
/// attach its [`EdgeIdentity`](vigil_server_wgtunnel::EdgeIdentity) as an
/// extension. No credential is read.
pub async fn edge_auth_middleware(
	State(state): State<AppState>,
	ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
	mut request: Request,
	next: Next,
) -> Response {
	match state.services.gateway.authenticate(peer_addr).await {
		Ok(identity) => {
			debug!(edge_id = %identity.edge_id(), path = %request.uri().path(), "edge call authenticated");
			request.extensions_mut().insert(identity);
			next.run(request).await
		}
		// Storage failures during resolution reject the call too.
		Err(e) => {
			warn!(%peer_addr, error = %e, "edge call rejected");
			ServerError::Unauthorized(e.to_string()).into_response()
		}
	}
}
