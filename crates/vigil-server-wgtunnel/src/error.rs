// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use thiserror::Error;
use vigil_server_db::DbError;
use vigil_wgtunnel_common::{KeyError, KeyFileError, WgConfigError};

#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("invalid key: {0}")]
	Key(#[from] KeyError),

	#[error("key file error: {0}")]
	KeyFile(#[from] KeyFileError),

	#[error("gateway config error: {0}")]
	Config(#[from] WgConfigError),

	#[error("`{command}` failed: {stderr}")]
	Command { command: String, stderr: String },

	#[error("`{command}` did not finish within {timeout:?}")]
	CommandTimeout { command: String, timeout: Duration },

	#[error("unauthenticated: {0}")]
	Unauthenticated(String),

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("no free tunnel address left in {0}")]
	AddressExhausted(String),

	#[error("storage call did not finish within {0:?}")]
	StorageTimeout(Duration),

	#[error("internal error: {0}")]
	Internal(String),
}

impl TunnelError {
	/// Whether this error means the caller could not be identified.
	pub fn is_unauthenticated(&self) -> bool {
		matches!(self, TunnelError::Unauthenticated(_))
	}
}

pub type Result<T> = std::result::Result<T, TunnelError>;
