// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-use bootstrap tokens for edge registration.
//!
//! Tokens live only in process memory, keyed by their SHA-256 digest, so a
//! memory dump does not reveal redeemable values.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use vigil_common_secret::SecretString;

use crate::error::{Result, TunnelError};

const TOKEN_BYTES: usize = 32;

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
	Sha256::digest(token.trim().as_bytes()).into()
}

#[derive(Debug)]
struct TokenEntry {
	issued_at: DateTime<Utc>,
	expires_at: DateTime<Utc>,
	reserved: bool,
}

/// A freshly minted token, handed out once.
#[derive(Debug, Clone)]
pub struct IssuedToken {
	pub token: SecretString,
	pub issued_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

pub struct BootstrapTokenStore {
	ttl: Duration,
	tokens: Mutex<HashMap<TokenDigest, TokenEntry>>,
}

impl BootstrapTokenStore {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			tokens: Mutex::new(HashMap::new()),
		}
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Mint a token: 32 random bytes, base64url.
	#[instrument(skip(self))]
	pub fn generate(&self) -> IssuedToken {
		let mut bytes = [0u8; TOKEN_BYTES];
		OsRng.fill_bytes(&mut bytes);
		let token = URL_SAFE.encode(bytes);

		let issued_at = Utc::now();
		let expires_at = issued_at
			+ chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1));

		self.tokens.lock().insert(
			digest(&token),
			TokenEntry {
				issued_at,
				expires_at,
				reserved: false,
			},
		);
		info!(%expires_at, "bootstrap token issued");

		IssuedToken {
			token: SecretString::new(token),
			issued_at,
			expires_at,
		}
	}

	/// Claim a token for one registration attempt.
	///
	/// While the reservation is alive the token cannot be claimed again.
	/// Dropping the reservation without [`TokenReservation::commit`] releases
	/// the token for another attempt.
	pub fn reserve(&self, token: &str) -> Result<TokenReservation<'_>> {
		let key = digest(token);
		let now = Utc::now();
		let mut tokens = self.tokens.lock();

		let Some(entry) = tokens.get_mut(&key) else {
			return Err(TunnelError::Unauthenticated(
				"invalid bootstrap token".to_string(),
			));
		};
		if now >= entry.expires_at {
			tokens.remove(&key);
			return Err(TunnelError::Unauthenticated(
				"bootstrap token expired".to_string(),
			));
		}
		if entry.reserved {
			return Err(TunnelError::Unauthenticated(
				"bootstrap token already in use".to_string(),
			));
		}
		entry.reserved = true;
		debug!(issued_at = %entry.issued_at, "bootstrap token reserved");

		Ok(TokenReservation {
			store: self,
			key,
			committed: false,
		})
	}

	/// Drop every expired token. Returns how many were removed.
	pub fn cleanup_expired(&self) -> usize {
		let now = Utc::now();
		let mut tokens = self.tokens.lock();
		let before = tokens.len();
		tokens.retain(|_, entry| now < entry.expires_at);
		before - tokens.len()
	}

	pub fn len(&self) -> usize {
		self.tokens.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[must_use = "dropping a reservation releases the token"]
pub struct TokenReservation<'a> {
	store: &'a BootstrapTokenStore,
	key: TokenDigest,
	committed: bool,
}

impl TokenReservation<'_> {
	/// Consume the token for good.
	pub fn commit(mut self) {
		self.store.tokens.lock().remove(&self.key);
		self.committed = true;
	}
}

impl Drop for TokenReservation<'_> {
	fn drop(&mut self) {
		if self.committed {
			return;
		}
		if let Some(entry) = self.store.tokens.lock().get_mut(&self.key) {
			entry.reserved = false;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> BootstrapTokenStore {
		BootstrapTokenStore::new(Duration::from_secs(3600))
	}

	#[test]
	fn token_is_url_safe_base64_of_32_bytes() {
		let issued = store().generate();
		let decoded = URL_SAFE.decode(issued.token.expose()).unwrap();
		assert_eq!(decoded.len(), 32);
		assert!(!issued.token.expose().contains('+'));
		assert!(!issued.token.expose().contains('/'));
		assert_eq!(issued.expires_at - issued.issued_at, chrono::Duration::hours(1));
	}

	#[test]
	fn committed_token_cannot_be_reused() {
		let store = store();
		let issued = store.generate();
		store.reserve(issued.token.expose()).unwrap().commit();

		let err = store.reserve(issued.token.expose()).err().unwrap();
		assert!(err.is_unauthenticated());
		assert!(store.is_empty());
	}

	#[test]
	fn reserved_token_blocks_concurrent_use() {
		let store = store();
		let issued = store.generate();
		let reservation = store.reserve(issued.token.expose()).unwrap();

		assert!(store.reserve(issued.token.expose()).is_err());
		drop(reservation);
		assert!(store.reserve(issued.token.expose()).is_ok());
	}

	#[test]
	fn expired_token_is_rejected_and_removed() {
		let store = BootstrapTokenStore::new(Duration::ZERO);
		let issued = store.generate();
		let err = store.reserve(issued.token.expose()).err().unwrap();
		assert!(err.to_string().contains("expired"));
		assert!(store.is_empty());
	}

	#[test]
	fn unknown_token_is_rejected() {
		assert!(store().reserve("not-a-token").is_err());
	}

	#[test]
	fn cleanup_removes_only_expired() {
		let short = BootstrapTokenStore::new(Duration::ZERO);
		short.generate();
		short.generate();
		assert_eq!(short.cleanup_expired(), 2);

		let long = store();
		long.generate();
		assert_eq!(long.cleanup_expired(), 0);
		assert_eq!(long.len(), 1);
	}
}
