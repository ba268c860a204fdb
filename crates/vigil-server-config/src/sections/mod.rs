// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for vigil-server.

pub mod database;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod registration;
pub mod tunnel;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use gateway::{GatewayConfig, GatewayConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use registration::{RegistrationConfig, RegistrationConfigLayer};
pub use tunnel::{TunnelBackend, TunnelConfig, TunnelConfigLayer};
