// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic gateway maintenance.

pub mod connection_liveness;
pub mod peer_monitor;
pub mod token_cleanup;

pub use connection_liveness::ConnectionLivenessJob;
pub use peer_monitor::PeerMonitorJob;
pub use token_cleanup::TokenCleanupJob;

use std::sync::Arc;
use std::time::Duration;

use vigil_server_config::ServerConfig;
use vigil_server_jobs::JobScheduler;
use vigil_server_wgtunnel::TunnelGatewayServices;

/// Register every maintenance job at its configured interval.
pub fn register_jobs(
	scheduler: &mut JobScheduler,
	services: &TunnelGatewayServices,
	config: &ServerConfig,
) {
	scheduler.register_periodic(
		Arc::new(PeerMonitorJob::new(services.interface.clone())),
		Duration::from_secs(config.tunnel.peer_monitor_interval_secs),
	);
	scheduler.register_periodic(
		Arc::new(ConnectionLivenessJob::new(services.gateway.clone())),
		Duration::from_secs(config.gateway.liveness_interval_secs),
	);
	scheduler.register_periodic(
		Arc::new(TokenCleanupJob::new(services.registrar.clone())),
		Duration::from_secs(config.registration.token_cleanup_interval_secs),
	);
}

#[cfg(test)]
pub(crate) mod test_support {
	use std::sync::Arc;

	use vigil_server_config::ServerConfig;
	use vigil_server_db::testing::create_test_pool;
	use vigil_server_jobs::{CancellationToken, JobContext, TriggerSource};
	use vigil_server_wgtunnel::{MemoryControl, TunnelGatewayServices};

	pub async fn services() -> (TunnelGatewayServices, Arc<MemoryControl>) {
		let pool = create_test_pool().await;
		let control = Arc::new(MemoryControl::new());
		let services =
			TunnelGatewayServices::with_control(pool, &ServerConfig::default(), control.clone())
				.await
				.unwrap();
		(services, control)
	}

	pub fn context() -> JobContext {
		JobContext {
			run_id: 1,
			triggered_by: TriggerSource::Manual,
			cancellation_token: CancellationToken::new(),
		}
	}

	pub fn cancelled_context() -> JobContext {
		let ctx = context();
		ctx.cancellation_token.cancel();
		ctx
	}
}
