// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job failed: {0}")]
	Failed(String),

	#[error("Job cancelled")]
	Cancelled,

	#[error("Job exceeded its {0:?} time limit")]
	TimedOut(Duration),

	#[error("Job not found: {0}")]
	NotFound(String),
}

impl JobError {
	pub fn failed(err: impl std::fmt::Display) -> Self {
		JobError::Failed(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
