// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::JobError;
use crate::types::JobOutput;

/// A unit of periodic gateway maintenance.
#[async_trait]
pub trait Job: Send + Sync {
	/// Stable identifier, used in `/admin/jobs/{job_id}/...` routes.
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	fn description(&self) -> &str;

	/// One run. Return [`JobError::Cancelled`] once `ctx` is cancelled; the
	/// scheduler cuts a run off after one interval.
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}
