// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod address;
pub mod capabilities;
pub mod connections;
pub mod control;
pub mod error;
pub mod events;
pub mod gateway;
pub mod identity;
pub mod interface;
pub mod registration;
pub mod resolver;
pub mod rpc;
pub mod tokens;

pub use capabilities::{event_for_transition, CapabilityStore};
pub use connections::{ConnectionRegistry, ConnectionSnapshot};
pub use control::{MemoryControl, PeerConfig, PeerStats, TunnelControl, WgCommandControl};
pub use error::{Result, TunnelError};
pub use events::{CameraTransition, DomainEvent, EventBus, EventEnvelope};
pub use gateway::{ControlHandler, EdgeGateway, EventReceiver, HandlerError, TelemetryHandler};
pub use identity::{load_identity, resolve_identity, GatewayIdentity, IdentityOrigin, KeySource};
pub use interface::{InterfaceManager, MonitorReport, PeerSnapshot, ReconcileReport};
pub use registration::{ClientConfig, EdgeRegistrar, EdgeRegistration};
pub use resolver::{EdgeIdentity, EdgeResolver, PeerDirectory};
pub use tokens::{BootstrapTokenStore, IssuedToken};

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use vigil_server_config::{ServerConfig, TunnelBackend};
use vigil_server_db::{CameraStatusRepository, EdgeRepository, EdgeStore};

/// Everything the HTTP layer and the background jobs share.
#[derive(Clone)]
pub struct TunnelGatewayServices {
	pub interface: Arc<InterfaceManager>,
	pub registrar: Arc<EdgeRegistrar>,
	pub gateway: Arc<EdgeGateway>,
	pub capabilities: CapabilityStore,
	pub edges: Arc<dyn EdgeStore>,
	pub events: EventBus,
}

/// The control backend selected by `tunnel.backend`.
pub fn tunnel_control(config: &ServerConfig) -> Arc<dyn TunnelControl> {
	match config.tunnel.backend {
		TunnelBackend::Command => Arc::new(WgCommandControl::new(
			config.tunnel.interface.clone(),
			Duration::from_secs(config.tunnel.command_timeout_secs),
		)),
		TunnelBackend::Memory => Arc::new(MemoryControl::new()),
	}
}

impl TunnelGatewayServices {
	/// Wire up the services. The interface itself is not touched; call
	/// [`InterfaceManager::ensure_interface`] before serving.
	pub async fn new(db: SqlitePool, config: &ServerConfig) -> Result<Self> {
		Self::with_control(db, config, tunnel_control(config)).await
	}

	pub async fn with_control(
		db: SqlitePool,
		config: &ServerConfig,
		control: Arc<dyn TunnelControl>,
	) -> Result<Self> {
		let edges: Arc<dyn EdgeStore> = Arc::new(EdgeRepository::new(db.clone()));
		let events = EventBus::new();

		let interface = Arc::new(
			InterfaceManager::new(&config.tunnel, control, edges.clone(), events.clone()).await?,
		);
		let tokens = Arc::new(BootstrapTokenStore::new(Duration::from_secs(
			config.registration.token_ttl_secs,
		)));
		let registrar = Arc::new(EdgeRegistrar::new(
			&config.registration,
			tokens,
			edges.clone(),
			interface.clone(),
		));
		let capabilities = CapabilityStore::new(CameraStatusRepository::new(db), events.clone());
		let gateway = Arc::new(EdgeGateway::new(
			&config.gateway,
			interface.clone(),
			edges.clone(),
			capabilities.clone(),
			events.clone(),
		));

		Ok(Self {
			interface,
			registrar,
			gateway,
			capabilities,
			edges,
			events,
		})
	}
}
