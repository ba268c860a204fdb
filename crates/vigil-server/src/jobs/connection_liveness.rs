// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;
use vigil_server_jobs::{Job, JobContext, JobError, JobOutput};
use vigil_server_wgtunnel::EdgeGateway;

/// Drops edge connections that stopped sending heartbeats.
pub struct ConnectionLivenessJob {
	gateway: Arc<EdgeGateway>,
}

impl ConnectionLivenessJob {
	pub fn new(gateway: Arc<EdgeGateway>) -> Self {
		Self { gateway }
	}
}

#[async_trait]
impl Job for ConnectionLivenessJob {
	fn id(&self) -> &str {
		"connection-liveness"
	}

	fn name(&self) -> &str {
		"Connection Liveness"
	}

	fn description(&self) -> &str {
		"Disconnect edges whose heartbeats have timed out"
	}

	#[instrument(skip(self, ctx), fields(job_id = "connection-liveness"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let removed = self.gateway.check_connections(Utc::now()).await;
		let edge_ids: Vec<&str> = removed.iter().map(|c| c.edge_id.as_str()).collect();

		tracing::debug!(removed_count = removed.len(), "connection liveness check completed");

		Ok(JobOutput {
			message: format!("Disconnected {} silent edges", removed.len()),
			metadata: Some(serde_json::json!({
				"removed_count": removed.len(),
				"edge_ids": edge_ids,
			})),
		})
	}
}
