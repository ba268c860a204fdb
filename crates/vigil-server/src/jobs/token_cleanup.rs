// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use vigil_server_jobs::{Job, JobContext, JobError, JobOutput};
use vigil_server_wgtunnel::EdgeRegistrar;

pub struct TokenCleanupJob {
	registrar: Arc<EdgeRegistrar>,
}

impl TokenCleanupJob {
	pub fn new(registrar: Arc<EdgeRegistrar>) -> Self {
		Self { registrar }
	}
}

#[async_trait]
impl Job for TokenCleanupJob {
	fn id(&self) -> &str {
		"bootstrap-token-cleanup"
	}

	fn name(&self) -> &str {
		"Bootstrap Token Cleanup"
	}

	fn description(&self) -> &str {
		"Remove expired bootstrap tokens"
	}

	#[instrument(skip(self, ctx), fields(job_id = "bootstrap-token-cleanup"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let removed = self.registrar.cleanup_expired_tokens();

		tracing::debug!(removed_count = removed, "bootstrap token cleanup completed");

		Ok(JobOutput {
			message: format!("Removed {} expired bootstrap tokens", removed),
			metadata: Some(serde_json::json!({ "removed_count": removed })),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::jobs::test_support::{cancelled_context, context, services};

	#[tokio::test]
	async fn live_tokens_are_kept() {
		let (services, _) = services().await;
		services.registrar.generate_bootstrap_token();

		let job = TokenCleanupJob::new(services.registrar.clone());
		let output = job.run(&context()).await.unwrap();

		assert_eq!(output.metadata.unwrap()["removed_count"], 0);
	}

	#[tokio::test]
	async fn cancelled_run_does_nothing() {
		let (services, _) = services().await;
		let job = TokenCleanupJob::new(services.registrar.clone());
		assert!(matches!(
			job.run(&cancelled_context()).await,
			Err(JobError::Cancelled)
		));
	}
}
