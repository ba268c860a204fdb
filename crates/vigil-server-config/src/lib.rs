// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Vigil tunnel gateway.
//!
//! Sources are merged in precedence order: built-in defaults, then a TOML
//! file (`/etc/vigil/server.toml` unless overridden), then `VIGIL_SERVER_*`
//! environment variables. The admin token is a secret and is only read from
//! `VIGIL_SERVER_ADMIN_TOKEN` or `VIGIL_SERVER_ADMIN_TOKEN_FILE`.

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;

use tracing::{debug, info};

pub const ADMIN_TOKEN_ENV: &str = "VIGIL_SERVER_ADMIN_TOKEN";

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub tunnel: TunnelConfig,
	pub registration: RegistrationConfig,
	pub gateway: GatewayConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	/// Address for the registration and admin listener.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}

	/// Address for the edge RPC listener.
	pub fn rpc_socket_addr(&self) -> String {
		format!("{}:{}", self.gateway.rpc_host, self.gateway.rpc_port)
	}
}

/// Load configuration from the system config file and the environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let admin_token = vigil_common_secret::load_secret_env(ADMIN_TOKEN_ENV)?;
	finalize(merged, admin_token)
}

fn finalize(
	layer: ServerConfigLayer,
	admin_token: Option<vigil_common_secret::SecretString>,
) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let tunnel = layer.tunnel.unwrap_or_default().finalize()?;
	let registration = layer.registration.unwrap_or_default().finalize(admin_token);
	let gateway = layer.gateway.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	let config = ServerConfig {
		http,
		database,
		tunnel,
		registration,
		gateway,
		logging,
	};
	validate_config(&config)?;

	info!(
		http = %config.socket_addr(),
		rpc = %config.rpc_socket_addr(),
		database = %config.database.url,
		interface = %config.tunnel.interface,
		network = %config.tunnel.network,
		backend = ?config.tunnel.backend,
		admin_api = config.registration.admin_token.is_some(),
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.http.host == config.gateway.rpc_host && config.http.port == config.gateway.rpc_port {
		return Err(ConfigError::Validation(format!(
			"registration and RPC listeners both bind {}",
			config.socket_addr()
		)));
	}

	if config.gateway.heartbeat_timeout_secs == 0 || config.tunnel.handshake_window_secs == 0 {
		return Err(ConfigError::Validation(
			"heartbeat timeout and handshake window must be non-zero".to_string(),
		));
	}

	if config.gateway.liveness_interval_secs == 0
		|| config.tunnel.peer_monitor_interval_secs == 0
		|| config.registration.token_cleanup_interval_secs == 0
	{
		return Err(ConfigError::Validation(
			"background job intervals must be non-zero".to_string(),
		));
	}

	if config.registration.token_ttl_secs == 0 {
		return Err(ConfigError::Validation(
			"bootstrap token TTL must be non-zero".to_string(),
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_are_valid() {
		let config = finalize(ServerConfigLayer::default(), None).unwrap();
		assert_eq!(config.socket_addr(), "0.0.0.0:8080");
		assert_eq!(config.rpc_socket_addr(), "0.0.0.0:50051");
	}

	#[test]
	fn test_rejects_shared_listener() {
		let layer = ServerConfigLayer {
			gateway: Some(GatewayConfigLayer {
				rpc_port: Some(8080),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(matches!(
			finalize(layer, None),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn test_rejects_zero_heartbeat_timeout() {
		let layer = ServerConfigLayer {
			gateway: Some(GatewayConfigLayer {
				heartbeat_timeout_secs: Some(0),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(finalize(layer, None).is_err());
	}

	#[test]
	fn test_file_values_flow_through() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("server.toml");
		std::fs::write(
			&path,
			"[registration]\nendpoint_host = \"gw.example.net\"\n[tunnel]\nbackend = \"memory\"\n",
		)
		.unwrap();

		let config = load_config_with_file(&path).unwrap();
		assert_eq!(config.registration.endpoint_host, "gw.example.net");
		assert_eq!(config.tunnel.backend, TunnelBackend::Memory);
	}
}
