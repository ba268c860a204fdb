// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal reader for wg-quick style configuration files.
//!
//! Only the keys the gateway acts on are interpreted: `PrivateKey`,
//! `ListenPort` and `Address` in `[Interface]`, and `PublicKey`, `AllowedIPs`
//! and `PresharedKey` in each `[Peer]`. Unknown keys are ignored so that
//! operators can keep `PostUp` hooks and similar in the same file.

use crate::keys::{KeyError, WgKeyPair, WgPublicKey};
use ipnet::IpNet;
use std::path::Path;
use thiserror::Error;
use vigil_common_secret::SecretString;

#[derive(Error, Debug)]
pub enum WgConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("line {line}: {message}")]
	Syntax { line: usize, message: String },

	#[error("line {line}: invalid key: {source}")]
	Key {
		line: usize,
		#[source]
		source: KeyError,
	},
}

pub type Result<T> = std::result::Result<T, WgConfigError>;

#[derive(Debug, Default)]
pub struct WgQuickInterface {
	pub private_key: Option<SecretString>,
	pub listen_port: Option<u16>,
	pub addresses: Vec<IpNet>,
}

impl WgQuickInterface {
	pub fn key_pair(&self) -> Option<std::result::Result<WgKeyPair, KeyError>> {
		self.private_key
			.as_ref()
			.map(|key| WgKeyPair::from_base64(key.expose()))
	}
}

#[derive(Debug, Clone)]
pub struct WgQuickPeer {
	pub public_key: WgPublicKey,
	pub allowed_ips: Vec<IpNet>,
	pub preshared_key: Option<SecretString>,
}

#[derive(Debug, Default)]
pub struct WgQuickConfig {
	pub interface: WgQuickInterface,
	pub peers: Vec<WgQuickPeer>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
	None,
	Interface,
	Peer,
}

#[derive(Default)]
struct PendingPeer {
	line: usize,
	public_key: Option<WgPublicKey>,
	allowed_ips: Vec<IpNet>,
	preshared_key: Option<SecretString>,
}

impl PendingPeer {
	fn finish(self) -> Result<WgQuickPeer> {
		let public_key = self.public_key.ok_or_else(|| WgConfigError::Syntax {
			line: self.line,
			message: "[Peer] section without PublicKey".to_string(),
		})?;
		Ok(WgQuickPeer {
			public_key,
			allowed_ips: self.allowed_ips,
			preshared_key: self.preshared_key,
		})
	}
}

fn parse_networks(value: &str, line: usize) -> Result<Vec<IpNet>> {
	value
		.split(',')
		.map(str::trim)
		.filter(|v| !v.is_empty())
		.map(|v| {
			v.parse::<IpNet>()
				.or_else(|_| v.parse::<std::net::IpAddr>().map(IpNet::from))
				.map_err(|_| WgConfigError::Syntax {
					line,
					message: format!("invalid address {v:?}"),
				})
		})
		.collect()
}

impl WgQuickConfig {
	pub fn parse(content: &str) -> Result<Self> {
		let mut config = WgQuickConfig::default();
		let mut section = Section::None;
		let mut peer: Option<PendingPeer> = None;

		for (idx, raw) in content.lines().enumerate() {
			let line = idx + 1;
			let trimmed = raw.split('#').next().unwrap_or_default().trim();
			if trimmed.is_empty() {
				continue;
			}

			if trimmed.starts_with('[') {
				if let Some(pending) = peer.take() {
					config.peers.push(pending.finish()?);
				}
				section = match trimmed {
					"[Interface]" => Section::Interface,
					"[Peer]" => {
						peer = Some(PendingPeer {
							line,
							..Default::default()
						});
						Section::Peer
					}
					_ => Section::None,
				};
				continue;
			}

			let Some((key, value)) = trimmed.split_once('=') else {
				return Err(WgConfigError::Syntax {
					line,
					message: format!("expected `Key = Value`, got {trimmed:?}"),
				});
			};
			let key = key.trim();
			let value = value.trim();

			match (section, peer.as_mut()) {
				(Section::Interface, _) => match key {
					"PrivateKey" => config.interface.private_key = Some(SecretString::new(value.to_string())),
					"ListenPort" => {
						let port = value.parse().map_err(|_| WgConfigError::Syntax {
							line,
							message: format!("invalid ListenPort {value:?}"),
						})?;
						config.interface.listen_port = Some(port);
					}
					"Address" => config.interface.addresses.extend(parse_networks(value, line)?),
					_ => {}
				},
				(Section::Peer, Some(pending)) => match key {
					"PublicKey" => {
						let parsed = WgPublicKey::from_base64(value)
							.map_err(|source| WgConfigError::Key { line, source })?;
						pending.public_key = Some(parsed);
					}
					"AllowedIPs" => pending.allowed_ips.extend(parse_networks(value, line)?),
					"PresharedKey" => pending.preshared_key = Some(SecretString::new(value.to_string())),
					_ => {}
				},
				_ => {}
			}
		}

		if let Some(pending) = peer.take() {
			config.peers.push(pending.finish()?);
		}

		Ok(config)
	}

	pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
		let content = tokio::fs::read_to_string(path.as_ref()).await?;
		Self::parse(&content)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(peer_key: &WgPublicKey, private: &str) -> String {
		format!(
			"# gateway\n[Interface]\nPrivateKey = {private}\nAddress = 10.0.0.1/24\nListenPort = 51999\nPostUp = iptables -A FORWARD -i %i -j ACCEPT\n\n[Peer]\nPublicKey = {peer_key}\nAllowedIPs = 10.0.0.7/32, 10.0.1.0/24\nPresharedKey = c2VjcmV0\n"
		)
	}

	#[test]
	fn parses_interface_and_peer() {
		let gateway = WgKeyPair::generate();
		let peer = WgKeyPair::generate();
		let config = WgQuickConfig::parse(&sample(
			peer.public_key(),
			gateway.private_key().to_base64().expose(),
		))
		.unwrap();

		assert_eq!(config.interface.listen_port, Some(51999));
		assert_eq!(config.interface.addresses, vec!["10.0.0.1/24".parse::<IpNet>().unwrap()]);
		let keypair = config.interface.key_pair().unwrap().unwrap();
		assert_eq!(keypair.public_key(), gateway.public_key());

		assert_eq!(config.peers.len(), 1);
		assert_eq!(&config.peers[0].public_key, peer.public_key());
		assert_eq!(config.peers[0].allowed_ips.len(), 2);
		assert!(config.peers[0].preshared_key.is_some());
	}

	#[test]
	fn bare_address_becomes_host_network() {
		let peer = WgKeyPair::generate();
		let content = format!("[Peer]\nPublicKey = {}\nAllowedIPs = 10.0.0.9\n", peer.public_key());
		let config = WgQuickConfig::parse(&content).unwrap();
		assert_eq!(config.peers[0].allowed_ips[0].to_string(), "10.0.0.9/32");
	}

	#[test]
	fn interface_without_private_key_is_allowed() {
		let config = WgQuickConfig::parse("[Interface]\nListenPort = 51820\n").unwrap();
		assert!(config.interface.key_pair().is_none());
	}

	#[test]
	fn peer_without_public_key_is_rejected() {
		let err = WgQuickConfig::parse("[Peer]\nAllowedIPs = 10.0.0.2/32\n").unwrap_err();
		assert!(matches!(err, WgConfigError::Syntax { line: 1, .. }));
	}

	#[test]
	fn bad_peer_key_reports_line() {
		let err = WgQuickConfig::parse("[Interface]\n\n[Peer]\nPublicKey = nope\n").unwrap_err();
		assert!(matches!(err, WgConfigError::Key { line: 4, .. }));
	}

	#[test]
	fn missing_equals_is_syntax_error() {
		let err = WgQuickConfig::parse("[Interface]\nListenPort 51820\n").unwrap_err();
		assert!(matches!(err, WgConfigError::Syntax { line: 2, .. }));
	}

	#[tokio::test]
	async fn loads_from_disk() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("wg0.conf");
		std::fs::write(&path, "[Interface]\nListenPort = 51000\n").unwrap();

		let config = WgQuickConfig::load(&path).await.unwrap();
		assert_eq!(config.interface.listen_port, Some(51000));
	}
}
