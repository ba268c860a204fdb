// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway key material.
//!
//! The identity is resolved by walking an ordered list of [`KeySource`]s.
//! A source whose files are absent is skipped; a source whose files exist
//! but are unusable is an error, since silently moving on would hand the
//! gateway a new identity and strand every registered edge.
//!
//! A generated key is never pushed over a key that is already live on the
//! interface: [`resolve_identity`] adopts the live key instead, and writes
//! whatever it ends up with to the configured key file so the next start
//! finds it there.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vigil_server_config::TunnelConfig;
use vigil_wgtunnel_common::{
	load_key_pair_files, load_private_key_file, save_key_pair_files, WgKeyPair, WgPublicKey,
	WgQuickConfig,
};

use crate::control::TunnelControl;
use crate::error::{Result, TunnelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityOrigin {
	ConfigFile,
	KeyFiles,
	/// Read back from the running interface.
	Interface,
	Generated,
}

#[derive(Debug, Clone)]
pub struct GatewayIdentity {
	pub keypair: WgKeyPair,
	/// `ListenPort` from the config file, when the key came from there.
	pub listen_port: Option<u16>,
	pub origin: IdentityOrigin,
}

impl GatewayIdentity {
	pub fn public_key(&self) -> &WgPublicKey {
		self.keypair.public_key()
	}
}

#[derive(Debug, Clone)]
pub enum KeySource {
	/// `[Interface] PrivateKey` (and `ListenPort`) from a wg-quick file.
	ConfigFile(PathBuf),
	/// A private key file, optionally checked against a public key file.
	KeyFiles {
		private: PathBuf,
		public: Option<PathBuf>,
	},
	Generate,
}

impl KeySource {
	/// The lookup order for a tunnel configuration.
	pub fn chain(config: &TunnelConfig) -> Vec<KeySource> {
		let mut sources = Vec::new();
		if let Some(path) = &config.config_path {
			sources.push(KeySource::ConfigFile(path.clone()));
		}
		if let Some(private) = &config.private_key_path {
			sources.push(KeySource::KeyFiles {
				private: private.clone(),
				public: config.public_key_path.clone(),
			});
		}
		sources.push(KeySource::Generate);
		sources
	}

	pub async fn load(&self) -> Result<Option<GatewayIdentity>> {
		match self {
			KeySource::ConfigFile(path) => {
				if !exists(path).await {
					debug!(path = %path.display(), "gateway config file absent");
					return Ok(None);
				}
				let config = WgQuickConfig::load(path).await?;
				let Some(keypair) = config.interface.key_pair().transpose()? else {
					debug!(path = %path.display(), "gateway config file has no PrivateKey");
					return Ok(None);
				};
				Ok(Some(GatewayIdentity {
					keypair,
					listen_port: config.interface.listen_port,
					origin: IdentityOrigin::ConfigFile,
				}))
			}
			KeySource::KeyFiles { private, public } => {
				if !exists(private).await {
					debug!(path = %private.display(), "private key file absent");
					return Ok(None);
				}
				let public = match public {
					Some(public) => exists(public).await.then_some(public),
					None => None,
				};
				let keypair = match public {
					Some(public) => load_key_pair_files(private, public).await?,
					None => load_private_key_file(private).await?,
				};
				Ok(Some(GatewayIdentity {
					keypair,
					listen_port: None,
					origin: IdentityOrigin::KeyFiles,
				}))
			}
			KeySource::Generate => Ok(Some(GatewayIdentity {
				keypair: WgKeyPair::generate(),
				listen_port: None,
				origin: IdentityOrigin::Generated,
			})),
		}
	}
}

async fn exists(path: &Path) -> bool {
	tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Resolve the gateway identity; the first source that yields a key wins.
#[instrument(skip(sources), fields(sources = sources.len()))]
pub async fn load_identity(sources: &[KeySource]) -> Result<GatewayIdentity> {
	for source in sources {
		if let Some(identity) = source.load().await? {
			info!(
				origin = ?identity.origin,
				public_key = %identity.public_key(),
				"gateway identity loaded"
			);
			return Ok(identity);
		}
	}
	Err(TunnelError::Internal(
		"no key source produced a gateway identity".to_string(),
	))
}

/// Resolve the identity for `config`, preferring a key already live on the
/// interface over a freshly generated one, and persist it when the
/// configuration names a private key file that does not exist yet.
#[instrument(skip_all, fields(interface = %config.interface))]
pub async fn resolve_identity(
	config: &TunnelConfig,
	control: &dyn TunnelControl,
) -> Result<GatewayIdentity> {
	let mut identity = load_identity(&KeySource::chain(config)).await?;
	if identity.origin != IdentityOrigin::Generated {
		return Ok(identity);
	}

	if control.interface_exists().await? {
		if let Some(private) = control.device_private_key().await? {
			identity = GatewayIdentity {
				keypair: WgKeyPair::from_private_key(private),
				listen_port: None,
				origin: IdentityOrigin::Interface,
			};
			info!(public_key = %identity.public_key(), "adopted the key live on the interface");
		}
	}

	match &config.private_key_path {
		Some(private) => {
			save_key_pair_files(&identity.keypair, private, config.public_key_path.as_deref())
				.await?;
			info!(path = %private.display(), "gateway key persisted");
		}
		None => warn!(
			"tunnel.private_key_path is not set; the gateway key will not survive an interface teardown"
		),
	}
	Ok(identity)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::control::MemoryControl;
	use tempfile::TempDir;

	#[tokio::test]
	async fn config_file_key_wins_over_key_files() {
		let dir = TempDir::new().unwrap();
		let from_config = WgKeyPair::generate();
		let from_files = WgKeyPair::generate();

		let config_path = dir.path().join("wg0.conf");
		std::fs::write(
			&config_path,
			format!(
				"[Interface]\nPrivateKey = {}\nListenPort = 51999\n",
				from_config.private_key().to_base64().expose()
			),
		)
		.unwrap();
		let private = dir.path().join("server.key");
		save_key_pair_files(&from_files, &private, None).await.unwrap();

		let sources = vec![
			KeySource::ConfigFile(config_path),
			KeySource::KeyFiles {
				private,
				public: None,
			},
			KeySource::Generate,
		];
		let identity = load_identity(&sources).await.unwrap();
		assert_eq!(identity.origin, IdentityOrigin::ConfigFile);
		assert_eq!(identity.public_key(), from_config.public_key());
		assert_eq!(identity.listen_port, Some(51999));
	}

	#[tokio::test]
	async fn missing_files_fall_through_to_generation() {
		let dir = TempDir::new().unwrap();
		let sources = vec![
			KeySource::ConfigFile(dir.path().join("absent.conf")),
			KeySource::KeyFiles {
				private: dir.path().join("absent.key"),
				public: None,
			},
			KeySource::Generate,
		];
		let identity = load_identity(&sources).await.unwrap();
		assert_eq!(identity.origin, IdentityOrigin::Generated);
	}

	#[tokio::test]
	async fn config_file_without_private_key_is_skipped() {
		let dir = TempDir::new().unwrap();
		let config_path = dir.path().join("wg0.conf");
		std::fs::write(&config_path, "[Interface]\nListenPort = 51820\n").unwrap();

		let identity = load_identity(&[KeySource::ConfigFile(config_path), KeySource::Generate])
			.await
			.unwrap();
		assert_eq!(identity.origin, IdentityOrigin::Generated);
	}

	#[tokio::test]
	async fn mismatched_public_key_file_is_an_error() {
		let dir = TempDir::new().unwrap();
		let private = dir.path().join("server.key");
		let public = dir.path().join("server.pub");
		save_key_pair_files(&WgKeyPair::generate(), &private, None)
			.await
			.unwrap();
		std::fs::write(&public, WgKeyPair::generate().public_key().to_base64()).unwrap();

		let sources = vec![
			KeySource::KeyFiles {
				private,
				public: Some(public),
			},
			KeySource::Generate,
		];
		assert!(matches!(
			load_identity(&sources).await,
			Err(TunnelError::KeyFile(_))
		));
	}

	#[test]
	fn chain_follows_configured_paths() {
		let config = TunnelConfig {
			config_path: Some("/etc/wireguard/wg0.conf".into()),
			private_key_path: Some("/etc/vigil/server.key".into()),
			..Default::default()
		};
		let chain = KeySource::chain(&config);
		assert_eq!(chain.len(), 3);
		assert!(matches!(chain[0], KeySource::ConfigFile(_)));
		assert!(matches!(chain[1], KeySource::KeyFiles { .. }));
		assert!(matches!(chain[2], KeySource::Generate));

		assert_eq!(KeySource::chain(&TunnelConfig::default()).len(), 1);
	}

	#[tokio::test]
	async fn generated_key_is_written_and_found_on_the_next_start() {
		let dir = TempDir::new().unwrap();
		let config = TunnelConfig {
			private_key_path: Some(dir.path().join("state/server.key")),
			public_key_path: Some(dir.path().join("state/server.pub")),
			..Default::default()
		};
		let control = MemoryControl::new();

		let first = resolve_identity(&config, &control).await.unwrap();
		assert_eq!(first.origin, IdentityOrigin::Generated);

		let second = resolve_identity(&config, &control).await.unwrap();
		assert_eq!(second.origin, IdentityOrigin::KeyFiles);
		assert_eq!(second.public_key(), first.public_key());
	}

	#[tokio::test]
	async fn live_interface_key_is_adopted_instead_of_generating() {
		let control = MemoryControl::new();
		let live = WgKeyPair::generate();
		control.create_interface().await.unwrap();
		control
			.configure_device(live.private_key(), 51820)
			.await
			.unwrap();

		let identity = resolve_identity(&TunnelConfig::default(), &control)
			.await
			.unwrap();
		assert_eq!(identity.origin, IdentityOrigin::Interface);
		assert_eq!(identity.public_key(), live.public_key());
	}

	#[tokio::test]
	async fn configured_key_file_wins_over_the_live_interface_key() {
		let dir = TempDir::new().unwrap();
		let private = dir.path().join("server.key");
		let stored = WgKeyPair::generate();
		save_key_pair_files(&stored, &private, None).await.unwrap();

		let control = MemoryControl::new();
		control.create_interface().await.unwrap();
		control
			.configure_device(WgKeyPair::generate().private_key(), 51820)
			.await
			.unwrap();

		let config = TunnelConfig {
			private_key_path: Some(private),
			..Default::default()
		};
		let identity = resolve_identity(&config, &control).await.unwrap();
		assert_eq!(identity.origin, IdentityOrigin::KeyFiles);
		assert_eq!(identity.public_key(), stored.public_key());
	}
}
