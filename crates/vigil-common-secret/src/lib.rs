// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret wrapper for key material and tokens handled by the tunnel gateway.
//!
//! Bootstrap tokens, WireGuard private keys and the admin bearer token all pass
//! through [`Secret<T>`] so that they:
//!
//! - print as `[REDACTED]` through Debug, Display and tracing fields
//! - serialize as `"[REDACTED]"` when a config or response is dumped
//! - are zeroized when dropped
//!
//! ```
//! use vigil_common_secret::Secret;
//!
//! let token = Secret::new("bootstrap-token".to_string());
//! assert_eq!(format!("{:?}", token), "Secret(\"[REDACTED]\")");
//! assert_eq!(format!("{}", token), "[REDACTED]");
//! assert_eq!(token.expose(), "bootstrap-token");
//! ```

pub mod env;

pub use env::{load_secret_env, SecretEnvError};

use std::fmt;
use zeroize::Zeroize;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

/// A wrapper for sensitive values that prevents accidental exposure.
///
/// There is no `Deref` impl; callers must go through [`Secret::expose`].
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Explicitly access the inner value.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	pub fn expose_mut(&mut self) -> &mut T {
		&mut self.inner
	}

	/// Consume the wrapper, cloning the inner value so the original memory is
	/// still zeroized on drop.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl<T> Default for Secret<T>
where
	T: Zeroize + Default,
{
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl From<String> for Secret<String> {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for Secret<String> {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

#[cfg(feature = "serde")]
impl<T> serde::Serialize for Secret<T>
where
	T: Zeroize,
{
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Secret<T>
where
	T: Zeroize + serde::Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		T::deserialize(deserializer).map(Secret::new)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn debug_and_display_are_redacted() {
		let secret = SecretString::new("wg-private-key".to_string());
		assert_eq!(format!("{:?}", secret), "Secret(\"[REDACTED]\")");
		assert_eq!(format!("{}", secret), REDACTED);
		assert_eq!(secret.expose(), "wg-private-key");
	}

	#[test]
	fn serializes_as_redacted() {
		let secret = SecretString::new("admin-token".to_string());
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, "\"[REDACTED]\"");
	}

	#[test]
	fn deserializes_plain_value() {
		let secret: SecretString = serde_json::from_str("\"from-config\"").unwrap();
		assert_eq!(secret.expose(), "from-config");
	}

	#[test]
	fn into_inner_returns_value() {
		let secret = SecretString::from("abc");
		assert_eq!(secret.into_inner(), "abc");
	}

	proptest! {
		#[test]
		fn never_leaks_in_formatting(value in "[a-zA-Z0-9+/=_-]{8,64}") {
			let secret = SecretString::new(value.clone());
			let debug_out = format!("{:?}", secret);
			let display_out = format!("{}", secret);
			prop_assert!(!debug_out.contains(&value));
			prop_assert!(!display_out.contains(&value));
		}
	}
}
