// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	DatabaseConfigLayer, GatewayConfigLayer, HttpConfigLayer, LoggingConfigLayer,
	RegistrationConfigLayer, TunnelConfigLayer,
};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub tunnel: Option<TunnelConfigLayer>,
	#[serde(default)]
	pub registration: Option<RegistrationConfigLayer>,
	#[serde(default)]
	pub gateway: Option<GatewayConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_option(
			&mut self.database,
			other.database,
			DatabaseConfigLayer::merge,
		);
		merge_option(&mut self.tunnel, other.tunnel, TunnelConfigLayer::merge);
		merge_option(
			&mut self.registration,
			other.registration,
			RegistrationConfigLayer::merge,
		);
		merge_option(&mut self.gateway, other.gateway, GatewayConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_preserves_base_when_other_empty() {
		let mut base = ServerConfigLayer {
			tunnel: Some(TunnelConfigLayer {
				listen_port: Some(51999),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(ServerConfigLayer::default());
		assert_eq!(base.tunnel.as_ref().unwrap().listen_port, Some(51999));
	}

	#[test]
	fn test_merge_other_overwrites_fieldwise() {
		let mut base = ServerConfigLayer {
			gateway: Some(GatewayConfigLayer {
				rpc_port: Some(6000),
				heartbeat_timeout_secs: Some(600),
				..Default::default()
			}),
			..Default::default()
		};
		let other = ServerConfigLayer {
			gateway: Some(GatewayConfigLayer {
				rpc_port: Some(7000),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);
		let gateway = base.gateway.unwrap();
		assert_eq!(gateway.rpc_port, Some(7000));
		assert_eq!(gateway.heartbeat_timeout_secs, Some(600));
	}

	#[test]
	fn test_merge_adds_missing_sections() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer {
			registration: Some(RegistrationConfigLayer {
				endpoint_host: Some("gw.example.com".to_string()),
				..Default::default()
			}),
			..Default::default()
		});
		assert_eq!(
			base.registration.unwrap().endpoint_host.as_deref(),
			Some("gw.example.com")
		);
	}
}
