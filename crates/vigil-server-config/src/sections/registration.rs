// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge registration and bootstrap token settings.

use serde::Deserialize;
use vigil_common_secret::SecretString;

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
	/// Host edges dial to reach the tunnel, written into generated client configs.
	pub endpoint_host: String,
	pub token_ttl_secs: u64,
	pub keepalive_secs: u16,
	pub token_cleanup_interval_secs: u64,
	/// Bearer token for the admin API. Admin routes are disabled when unset.
	pub admin_token: Option<SecretString>,
}

impl Default for RegistrationConfig {
	fn default() -> Self {
		RegistrationConfigLayer::default().finalize(None)
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationConfigLayer {
	#[serde(default)]
	pub endpoint_host: Option<String>,
	#[serde(default)]
	pub token_ttl_secs: Option<u64>,
	#[serde(default)]
	pub keepalive_secs: Option<u16>,
	#[serde(default)]
	pub token_cleanup_interval_secs: Option<u64>,
}

impl RegistrationConfigLayer {
	pub fn merge(&mut self, other: RegistrationConfigLayer) {
		if other.endpoint_host.is_some() {
			self.endpoint_host = other.endpoint_host;
		}
		if other.token_ttl_secs.is_some() {
			self.token_ttl_secs = other.token_ttl_secs;
		}
		if other.keepalive_secs.is_some() {
			self.keepalive_secs = other.keepalive_secs;
		}
		if other.token_cleanup_interval_secs.is_some() {
			self.token_cleanup_interval_secs = other.token_cleanup_interval_secs;
		}
	}

	pub fn finalize(self, admin_token: Option<SecretString>) -> RegistrationConfig {
		RegistrationConfig {
			endpoint_host: self.endpoint_host.unwrap_or_else(|| "localhost".to_string()),
			token_ttl_secs: self.token_ttl_secs.unwrap_or(3600),
			keepalive_secs: self.keepalive_secs.unwrap_or(25),
			token_cleanup_interval_secs: self.token_cleanup_interval_secs.unwrap_or(300),
			admin_token,
		}
	}
}
