// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge RPC listener and connection liveness.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
	pub rpc_host: String,
	pub rpc_port: u16,
	/// Connections without a heartbeat for this long are dropped.
	pub heartbeat_timeout_secs: u64,
	pub liveness_interval_secs: u64,
	pub shutdown_timeout_secs: u64,
	/// Upper bound on storage calls made from background jobs.
	pub storage_timeout_secs: u64,
}

impl Default for GatewayConfig {
	fn default() -> Self {
		GatewayConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfigLayer {
	#[serde(default)]
	pub rpc_host: Option<String>,
	#[serde(default)]
	pub rpc_port: Option<u16>,
	#[serde(default)]
	pub heartbeat_timeout_secs: Option<u64>,
	#[serde(default)]
	pub liveness_interval_secs: Option<u64>,
	#[serde(default)]
	pub shutdown_timeout_secs: Option<u64>,
	#[serde(default)]
	pub storage_timeout_secs: Option<u64>,
}

impl GatewayConfigLayer {
	pub fn merge(&mut self, other: GatewayConfigLayer) {
		if other.rpc_host.is_some() {
			self.rpc_host = other.rpc_host;
		}
		if other.rpc_port.is_some() {
			self.rpc_port = other.rpc_port;
		}
		if other.heartbeat_timeout_secs.is_some() {
			self.heartbeat_timeout_secs = other.heartbeat_timeout_secs;
		}
		if other.liveness_interval_secs.is_some() {
			self.liveness_interval_secs = other.liveness_interval_secs;
		}
		if other.shutdown_timeout_secs.is_some() {
			self.shutdown_timeout_secs = other.shutdown_timeout_secs;
		}
		if other.storage_timeout_secs.is_some() {
			self.storage_timeout_secs = other.storage_timeout_secs;
		}
	}

	pub fn finalize(self) -> GatewayConfig {
		GatewayConfig {
			rpc_host: self.rpc_host.unwrap_or_else(|| "0.0.0.0".to_string()),
			rpc_port: self.rpc_port.unwrap_or(50051),
			heartbeat_timeout_secs: self.heartbeat_timeout_secs.unwrap_or(300),
			liveness_interval_secs: self.liveness_interval_secs.unwrap_or(30),
			shutdown_timeout_secs: self.shutdown_timeout_secs.unwrap_or(10),
			storage_timeout_secs: self.storage_timeout_secs.unwrap_or(5),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = GatewayConfig::default();
		assert_eq!(config.rpc_port, 50051);
		assert_eq!(config.heartbeat_timeout_secs, 300);
		assert_eq!(config.liveness_interval_secs, 30);
	}
}
