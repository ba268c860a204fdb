// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vigil tunnel gateway server.
//!
//! Registers edge devices as WireGuard peers, serves the operator admin API and
//! authenticates `edge.v1` RPC calls by the tunnel address they arrive from.

pub mod api;
pub mod api_docs;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;

pub use api::{create_app_state, create_router, create_rpc_router, AppState};
pub use api_docs::ApiDoc;
pub use error::{ErrorResponse, ServerError};
pub use vigil_server_config::ServerConfig;
