// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use vigil_server_jobs::{Job, JobContext, JobError, JobOutput};
use vigil_server_wgtunnel::InterfaceManager;

/// Refreshes peer handshake state from the interface and announces peers
/// that came up or went away.
pub struct PeerMonitorJob {
	interface: Arc<InterfaceManager>,
}

impl PeerMonitorJob {
	pub fn new(interface: Arc<InterfaceManager>) -> Self {
		Self { interface }
	}
}

#[async_trait]
impl Job for PeerMonitorJob {
	fn id(&self) -> &str {
		"peer-monitor"
	}

	fn name(&self) -> &str {
		"Peer Monitor"
	}

	fn description(&self) -> &str {
		"Refresh WireGuard peer handshakes and transfer counters"
	}

	#[instrument(skip(self, ctx), fields(job_id = "peer-monitor"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let report = self.interface.monitor_peers().await.map_err(JobError::failed)?;

		tracing::debug!(
			connected = report.connected,
			newly_connected = report.newly_connected,
			newly_disconnected = report.newly_disconnected,
			"peer monitor pass completed"
		);

		Ok(JobOutput {
			message: format!(
				"{} peers connected ({} up, {} down)",
				report.connected, report.newly_connected, report.newly_disconnected
			),
			metadata: Some(serde_json::json!({
				"connected": report.connected,
				"newly_connected": report.newly_connected,
				"newly_disconnected": report.newly_disconnected,
			})),
		})
	}
}
