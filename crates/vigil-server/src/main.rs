// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vigil tunnel gateway binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_server::{create_app_state, create_router, create_rpc_router};
use vigil_server_config::LogFormat;
use vigil_server_jobs::JobScheduler;
use vigil_server_wgtunnel::TunnelGatewayServices;

mod version;

/// Vigil server - WireGuard tunnel gateway for edge devices.
#[derive(Parser, Debug)]
#[command(
	name = "vigil-server",
	about = "WireGuard tunnel gateway for edge devices",
	version
)]
struct Args {
	/// Configuration file (TOML). Defaults to the system config path.
	#[arg(long, env = "VIGIL_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

fn init_tracing(level: &str, format: LogFormat) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| level.to_string().into());

	match format {
		LogFormat::Text => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer())
			.init(),
		LogFormat::Json => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
	}
}

async fn spawn_server(
	name: &'static str,
	addr: &str,
	app: Router,
	mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, std::io::Error> {
	let listener = tokio::net::TcpListener::bind(addr).await?;
	tracing::info!(listener = name, %addr, "listening");

	Ok(tokio::spawn(async move {
		let result = axum::serve(
			listener,
			app.into_make_service_with_connect_info::<SocketAddr>(),
		)
		.with_graceful_shutdown(async move {
			let _ = shutdown.recv().await;
		})
		.await;
		if let Err(e) = result {
			tracing::error!(listener = name, error = %e, "server error");
		}
	}))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => vigil_server_config::load_config_with_file(path)?,
		None => vigil_server_config::load_config()?,
	};

	init_tracing(&config.logging.level, config.logging.format);

	tracing::info!(
		http = %config.socket_addr(),
		rpc = %config.rpc_socket_addr(),
		interface = %config.tunnel.interface,
		network = %config.tunnel.network,
		database = %config.database.url,
		"starting vigil-server"
	);

	let pool = vigil_server_db::create_pool(
		&config.database.url,
		config.database.max_connections,
		Duration::from_secs(config.database.acquire_timeout_secs),
	)
	.await?;
	vigil_server_db::run_migrations(&pool).await?;

	let services = TunnelGatewayServices::new(pool.clone(), &config).await?;
	let report = services.interface.ensure_interface().await?;
	tracing::info!(
		public_key = %services.interface.public_key(),
		listen_port = services.interface.listen_port(),
		added = report.added,
		removed = report.removed,
		unchanged = report.unchanged,
		"tunnel interface ready"
	);

	let mut scheduler = JobScheduler::new();
	vigil_server::jobs::register_jobs(&mut scheduler, &services, &config);
	let scheduler = Arc::new(scheduler);
	scheduler.start().await;

	let mut state = create_app_state(pool, services, config.registration.admin_token.clone());
	state.job_scheduler = Some(Arc::clone(&scheduler));
	if state.admin_token.is_none() {
		tracing::warn!("no admin token configured; admin routes will reject every request");
	}

	let (shutdown_tx, _) = broadcast::channel(1);
	let http = spawn_server(
		"http",
		&config.socket_addr(),
		create_router(state.clone()).layer(TraceLayer::new_for_http()),
		shutdown_tx.subscribe(),
	)
	.await?;
	let rpc = spawn_server(
		"rpc",
		&config.rpc_socket_addr(),
		create_rpc_router(state).layer(TraceLayer::new_for_http()),
		shutdown_tx.subscribe(),
	)
	.await?;

	tokio::signal::ctrl_c().await?;
	tracing::info!("received shutdown signal");
	let _ = shutdown_tx.send(());

	let grace = Duration::from_secs(config.gateway.shutdown_timeout_secs);
	let http_abort = http.abort_handle();
	let rpc_abort = rpc.abort_handle();
	if tokio::time::timeout(grace, async {
		let _ = tokio::join!(http, rpc);
	})
	.await
	.is_err()
	{
		tracing::warn!(timeout = ?grace, "in-flight requests did not finish; forcing shutdown");
		http_abort.abort();
		rpc_abort.abort();
	}

	tracing::info!("shutting down job scheduler");
	scheduler.shutdown().await;

	tracing::info!("server shutdown complete");
	Ok(())
}
