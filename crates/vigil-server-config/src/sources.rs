// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, GatewayConfigLayer, HttpConfigLayer, LoggingConfigLayer,
	RegistrationConfigLayer, TunnelConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/vigil/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: VIGIL_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()?),
			tunnel: Some(load_tunnel_from_env()?),
			registration: Some(load_registration_from_env()?),
			gateway: Some(load_gateway_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|e| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}': {e}"),
		}),
		None => Ok(None),
	}
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("VIGIL_SERVER_HOST"),
		port: env_parse("VIGIL_SERVER_PORT")?,
	})
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("VIGIL_SERVER_DATABASE_URL"),
		max_connections: env_parse("VIGIL_SERVER_DATABASE_MAX_CONNECTIONS")?,
		acquire_timeout_secs: env_parse("VIGIL_SERVER_DATABASE_ACQUIRE_TIMEOUT_SECS")?,
	})
}

fn load_tunnel_from_env() -> Result<TunnelConfigLayer, ConfigError> {
	Ok(TunnelConfigLayer {
		interface: env_var("VIGIL_SERVER_TUNNEL_INTERFACE"),
		listen_port: env_parse("VIGIL_SERVER_TUNNEL_LISTEN_PORT")?,
		network: env_parse("VIGIL_SERVER_TUNNEL_NETWORK")?,
		config_path: env_var("VIGIL_SERVER_TUNNEL_CONFIG_PATH").map(PathBuf::from),
		private_key_path: env_var("VIGIL_SERVER_TUNNEL_PRIVATE_KEY_PATH").map(PathBuf::from),
		public_key_path: env_var("VIGIL_SERVER_TUNNEL_PUBLIC_KEY_PATH").map(PathBuf::from),
		backend: env_parse("VIGIL_SERVER_TUNNEL_BACKEND")?,
		command_timeout_secs: env_parse("VIGIL_SERVER_TUNNEL_COMMAND_TIMEOUT_SECS")?,
		handshake_window_secs: env_parse("VIGIL_SERVER_TUNNEL_HANDSHAKE_WINDOW_SECS")?,
		peer_monitor_interval_secs: env_parse("VIGIL_SERVER_TUNNEL_PEER_MONITOR_INTERVAL_SECS")?,
	})
}

fn load_registration_from_env() -> Result<RegistrationConfigLayer, ConfigError> {
	Ok(RegistrationConfigLayer {
		endpoint_host: env_var("VIGIL_SERVER_REGISTRATION_ENDPOINT_HOST"),
		token_ttl_secs: env_parse("VIGIL_SERVER_REGISTRATION_TOKEN_TTL_SECS")?,
		keepalive_secs: env_parse("VIGIL_SERVER_REGISTRATION_KEEPALIVE_SECS")?,
		token_cleanup_interval_secs: env_parse(
			"VIGIL_SERVER_REGISTRATION_TOKEN_CLEANUP_INTERVAL_SECS",
		)?,
	})
}

fn load_gateway_from_env() -> Result<GatewayConfigLayer, ConfigError> {
	Ok(GatewayConfigLayer {
		rpc_host: env_var("VIGIL_SERVER_RPC_HOST"),
		rpc_port: env_parse("VIGIL_SERVER_RPC_PORT")?,
		heartbeat_timeout_secs: env_parse("VIGIL_SERVER_GATEWAY_HEARTBEAT_TIMEOUT_SECS")?,
		liveness_interval_secs: env_parse("VIGIL_SERVER_GATEWAY_LIVENESS_INTERVAL_SECS")?,
		shutdown_timeout_secs: env_parse("VIGIL_SERVER_GATEWAY_SHUTDOWN_TIMEOUT_SECS")?,
		storage_timeout_secs: env_parse("VIGIL_SERVER_GATEWAY_STORAGE_TIMEOUT_SECS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("VIGIL_SERVER_LOG_LEVEL"),
		format: env_parse("VIGIL_SERVER_LOG_FORMAT")?,
	})
}
