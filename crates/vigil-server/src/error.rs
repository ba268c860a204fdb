// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP error mapping.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use vigil_server_db::DbError;
use vigil_server_wgtunnel::TunnelError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("bad request: {0}")]
	BadRequest(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("service unavailable: {0}")]
	ServiceUnavailable(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl From<DbError> for ServerError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::NotFound(msg) => ServerError::NotFound(msg),
			DbError::Conflict(msg) => ServerError::Conflict(msg),
			other => ServerError::Internal(other.to_string()),
		}
	}
}

impl From<TunnelError> for ServerError {
	fn from(e: TunnelError) -> Self {
		match e {
			TunnelError::Unauthenticated(msg) => ServerError::Unauthorized(msg),
			TunnelError::InvalidArgument(msg) => ServerError::BadRequest(msg),
			TunnelError::Key(e) => ServerError::BadRequest(e.to_string()),
			TunnelError::NotFound(msg) => ServerError::NotFound(msg),
			TunnelError::Database(e) => e.into(),
			e @ TunnelError::AddressExhausted(_) => ServerError::ServiceUnavailable(e.to_string()),
			e @ TunnelError::StorageTimeout(_) => ServerError::ServiceUnavailable(e.to_string()),
			other => ServerError::Internal(other.to_string()),
		}
	}
}

impl ServerError {
	fn parts(&self) -> (StatusCode, &'static str, &str) {
		match self {
			ServerError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
			ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
			ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
			ServerError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
			ServerError::ServiceUnavailable(msg) => {
				(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
			}
			ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, error, message) = self.parts();
		if status.is_server_error() {
			tracing::error!(%status, message, "request failed");
		}
		(
			status,
			Json(ErrorResponse {
				error: error.to_string(),
				message: message.to_string(),
			}),
		)
			.into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tunnel_errors_keep_their_meaning() {
		let status = |e: TunnelError| ServerError::from(e).parts().0;

		assert_eq!(
			status(TunnelError::Unauthenticated("x".into())),
			StatusCode::UNAUTHORIZED
		);
		assert_eq!(
			status(TunnelError::InvalidArgument("x".into())),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(status(TunnelError::NotFound("x".into())), StatusCode::NOT_FOUND);
		assert_eq!(
			status(TunnelError::Database(DbError::Conflict("dup".into()))),
			StatusCode::CONFLICT
		);
		assert_eq!(
			status(TunnelError::AddressExhausted("10.0.0.0/30".into())),
			StatusCode::SERVICE_UNAVAILABLE
		);
		assert_eq!(
			status(TunnelError::Internal("x".into())),
			StatusCode::INTERNAL_SERVER_ERROR
		);
	}
}
