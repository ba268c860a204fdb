// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum KeyFileError {
	#[error("failed to access key file: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid key format: {0}")]
	InvalidFormat(#[from] KeyError),

	#[error("public key file does not match private key (expected {expected}, found {found})")]
	Mismatch {
		expected: WgPublicKey,
		found: WgPublicKey,
	},
}

pub type Result<T> = std::result::Result<T, KeyFileError>;

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_private_key_file(path: impl AsRef<Path>) -> Result<WgKeyPair> {
	let content = fs::read_to_string(path.as_ref()).await?;
	let private = WgPrivateKey::from_base64(&content)?;
	Ok(WgKeyPair::from_private_key(private))
}

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_public_key_file(path: impl AsRef<Path>) -> Result<WgPublicKey> {
	let content = fs::read_to_string(path.as_ref()).await?;
	Ok(WgPublicKey::from_base64(&content)?)
}

/// Load a private key and check it against a separately stored public key.
pub async fn load_key_pair_files(
	private_path: impl AsRef<Path>,
	public_path: impl AsRef<Path>,
) -> Result<WgKeyPair> {
	let keypair = load_private_key_file(private_path).await?;
	let stored = load_public_key_file(public_path).await?;
	if &stored != keypair.public_key() {
		return Err(KeyFileError::Mismatch {
			expected: *keypair.public_key(),
			found: stored,
		});
	}
	Ok(keypair)
}

/// Write the private key with owner-only permissions, and the public key next
/// to it when `public_path` is given.
#[instrument(skip(key, private_path, public_path), fields(path = %private_path.as_ref().display()))]
pub async fn save_key_pair_files(
	key: &WgKeyPair,
	private_path: impl AsRef<Path>,
	public_path: Option<&Path>,
) -> Result<()> {
	let private_path = private_path.as_ref();

	if let Some(parent) = private_path.parent() {
		fs::create_dir_all(parent).await?;
	}

	let encoded = key.private_key().to_base64();
	let content = format!("{}\n", encoded.expose());

	#[cfg(unix)]
	{
		use tokio::fs::OpenOptions;
		use tokio::io::AsyncWriteExt;

		let mut file = OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o600)
			.open(private_path)
			.await?;
		file.write_all(content.as_bytes()).await?;
	}

	#[cfg(not(unix))]
	{
		fs::write(private_path, content).await?;
	}

	if let Some(public_path) = public_path {
		fs::write(public_path, format!("{}\n", key.public_key())).await?;
	}

	Ok(())
}
