// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loading secrets with the `VAR` / `VAR_FILE` convention.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;

use crate::Secret;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Load a secret from `{var}_FILE` if set, otherwise from `{var}`.
///
/// A single trailing newline is stripped from file contents. Empty direct
/// values are treated as unset.
pub fn load_secret_env(var: &str) -> Result<Option<Secret<String>>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| SecretEnvError::Io {
			path: path.clone(),
			source: e,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(Secret::new(secret)));
	}

	match env::var(var) {
		Ok(value) if !value.is_empty() => Ok(Some(Secret::new(value))),
		_ => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn returns_none_when_not_set() {
		let var = "VIGIL_TEST_SECRET_UNSET";
		env::remove_var(var);
		env::remove_var(format!("{var}_FILE"));

		assert!(load_secret_env(var).unwrap().is_none());
	}

	#[test]
	fn reads_direct_value() {
		let var = "VIGIL_TEST_SECRET_DIRECT";
		env::set_var(var, "direct-admin-token");
		env::remove_var(format!("{var}_FILE"));

		let secret = load_secret_env(var).unwrap().unwrap();
		assert_eq!(secret.expose(), "direct-admin-token");

		env::remove_var(var);
	}

	#[test]
	fn file_takes_precedence_and_strips_newline() {
		let var = "VIGIL_TEST_SECRET_FILE";
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "file-admin-token").unwrap();

		env::set_var(var, "direct-admin-token");
		env::set_var(format!("{var}_FILE"), file.path().to_str().unwrap());

		let secret = load_secret_env(var).unwrap().unwrap();
		assert_eq!(secret.expose(), "file-admin-token");

		env::remove_var(var);
		env::remove_var(format!("{var}_FILE"));
	}

	#[test]
	fn missing_file_is_an_error() {
		let var = "VIGIL_TEST_SECRET_MISSING";
		env::set_var(format!("{var}_FILE"), "/nonexistent/vigil/secret");

		assert!(matches!(
			load_secret_env(var),
			Err(SecretEnvError::Io { .. })
		));

		env::remove_var(format!("{var}_FILE"));
	}

	#[test]
	fn empty_file_path_is_an_error() {
		let var = "VIGIL_TEST_SECRET_EMPTY_PATH";
		env::set_var(format!("{var}_FILE"), "");

		assert!(matches!(
			load_secret_env(var),
			Err(SecretEnvError::EmptyPath { .. })
		));

		env::remove_var(format!("{var}_FILE"));
	}
}
