// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard interface configuration.

use std::path::PathBuf;

use ipnet::{IpNet, Ipv4Net};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_NETWORK: Ipv4Net = Ipv4Net::new_assert(std::net::Ipv4Addr::new(10, 0, 0, 0), 24);

/// How the gateway drives the interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelBackend {
	/// Shell out to `ip` and `wg`.
	#[default]
	Command,
	/// Keep the peer table in memory only. Nothing touches the host network.
	Memory,
}

impl std::str::FromStr for TunnelBackend {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"command" | "wg" => Ok(TunnelBackend::Command),
			"memory" => Ok(TunnelBackend::Memory),
			other => Err(format!("unknown tunnel backend '{other}'")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
	pub interface: String,
	pub listen_port: u16,
	pub network: Ipv4Net,
	/// Optional wg-quick file. Its `[Interface] PrivateKey` takes priority
	/// over the key files and its `[Peer]` entries are kept on the interface.
	pub config_path: Option<PathBuf>,
	pub private_key_path: Option<PathBuf>,
	pub public_key_path: Option<PathBuf>,
	pub backend: TunnelBackend,
	pub command_timeout_secs: u64,
	/// A peer counts as connected while its last handshake is younger than this.
	pub handshake_window_secs: u64,
	pub peer_monitor_interval_secs: u64,
}

impl Default for TunnelConfig {
	fn default() -> Self {
		Self {
			interface: "wg0".to_string(),
			listen_port: 51820,
			network: DEFAULT_NETWORK,
			config_path: None,
			private_key_path: None,
			public_key_path: None,
			backend: TunnelBackend::Command,
			command_timeout_secs: 10,
			handshake_window_secs: 180,
			peer_monitor_interval_secs: 30,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunnelConfigLayer {
	#[serde(default)]
	pub interface: Option<String>,
	#[serde(default)]
	pub listen_port: Option<u16>,
	#[serde(default)]
	pub network: Option<IpNet>,
	#[serde(default)]
	pub config_path: Option<PathBuf>,
	#[serde(default)]
	pub private_key_path: Option<PathBuf>,
	#[serde(default)]
	pub public_key_path: Option<PathBuf>,
	#[serde(default)]
	pub backend: Option<TunnelBackend>,
	#[serde(default)]
	pub command_timeout_secs: Option<u64>,
	#[serde(default)]
	pub handshake_window_secs: Option<u64>,
	#[serde(default)]
	pub peer_monitor_interval_secs: Option<u64>,
}

impl TunnelConfigLayer {
	pub fn merge(&mut self, other: TunnelConfigLayer) {
		if other.interface.is_some() {
			self.interface = other.interface;
		}
		if other.listen_port.is_some() {
			self.listen_port = other.listen_port;
		}
		if other.network.is_some() {
			self.network = other.network;
		}
		if other.config_path.is_some() {
			self.config_path = other.config_path;
		}
		if other.private_key_path.is_some() {
			self.private_key_path = other.private_key_path;
		}
		if other.public_key_path.is_some() {
			self.public_key_path = other.public_key_path;
		}
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.command_timeout_secs.is_some() {
			self.command_timeout_secs = other.command_timeout_secs;
		}
		if other.handshake_window_secs.is_some() {
			self.handshake_window_secs = other.handshake_window_secs;
		}
		if other.peer_monitor_interval_secs.is_some() {
			self.peer_monitor_interval_secs = other.peer_monitor_interval_secs;
		}
	}

	pub fn finalize(self) -> Result<TunnelConfig, ConfigError> {
		let defaults = TunnelConfig::default();

		let network = match self.network {
			None => defaults.network,
			Some(IpNet::V4(net)) => net.trunc(),
			Some(IpNet::V6(net)) => {
				return Err(ConfigError::InvalidValue {
					key: "tunnel.network".to_string(),
					message: format!("{net} is not an IPv4 network"),
				})
			}
		};
		// Network, gateway, broadcast and at least one edge.
		if network.prefix_len() > 30 {
			return Err(ConfigError::InvalidValue {
				key: "tunnel.network".to_string(),
				message: format!("{network} is too small to hold any edges"),
			});
		}

		let interface = self.interface.unwrap_or(defaults.interface);
		if interface.is_empty() || interface.len() > 15 {
			return Err(ConfigError::InvalidValue {
				key: "tunnel.interface".to_string(),
				message: format!("'{interface}' is not a valid interface name"),
			});
		}

		Ok(TunnelConfig {
			interface,
			listen_port: self.listen_port.unwrap_or(defaults.listen_port),
			network,
			config_path: self.config_path,
			private_key_path: self.private_key_path,
			public_key_path: self.public_key_path,
			backend: self.backend.unwrap_or(defaults.backend),
			command_timeout_secs: self
				.command_timeout_secs
				.unwrap_or(defaults.command_timeout_secs),
			handshake_window_secs: self
				.handshake_window_secs
				.unwrap_or(defaults.handshake_window_secs),
			peer_monitor_interval_secs: self
				.peer_monitor_interval_secs
				.unwrap_or(defaults.peer_monitor_interval_secs),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = TunnelConfigLayer::default().finalize().unwrap();
		assert_eq!(config.interface, "wg0");
		assert_eq!(config.listen_port, 51820);
		assert_eq!(config.network.to_string(), "10.0.0.0/24");
		assert_eq!(config.handshake_window_secs, 180);
		assert_eq!(config.backend, TunnelBackend::Command);
	}

	#[test]
	fn test_network_is_truncated() {
		let layer = TunnelConfigLayer {
			network: Some("10.8.0.1/16".parse().unwrap()),
			..Default::default()
		};
		assert_eq!(layer.finalize().unwrap().network.to_string(), "10.8.0.0/16");
	}

	#[test]
	fn test_rejects_ipv6_network() {
		let layer = TunnelConfigLayer {
			network: Some("fd00::/64".parse().unwrap()),
			..Default::default()
		};
		assert!(matches!(
			layer.finalize(),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn test_rejects_tiny_network() {
		let layer = TunnelConfigLayer {
			network: Some("10.0.0.0/31".parse().unwrap()),
			..Default::default()
		};
		assert!(layer.finalize().is_err());
	}

	#[test]
	fn test_deserialize_from_toml() {
		let layer: TunnelConfigLayer = toml::from_str(
			r#"
interface = "wg-edge"
network = "10.20.0.0/22"
backend = "memory"
"#,
		)
		.unwrap();
		let config = layer.finalize().unwrap();
		assert_eq!(config.interface, "wg-edge");
		assert_eq!(config.network.prefix_len(), 22);
		assert_eq!(config.backend, TunnelBackend::Memory);
	}
}
