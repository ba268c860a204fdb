// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The edge-facing RPC services.
//!
//! Every call is first authenticated with [`EdgeGateway::authenticate`], which
//! identifies the edge from the tunnel peer the traffic came through. The
//! service methods then take the resolved [`EdgeIdentity`] and never see a
//! credential.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use vigil_server_config::GatewayConfig;
use vigil_server_db::EdgeStore;

use crate::capabilities::CapabilityStore;
use crate::connections::{ConnectionRegistry, ConnectionSnapshot};
use crate::error::Result;
use crate::events::{DomainEvent, EventBus};
use crate::interface::InterfaceManager;
use crate::resolver::{EdgeIdentity, EdgeResolver, PeerDirectory};
use crate::rpc::{
	AckResponse, EdgeEvent, GetConfigResponse, HeartbeatRequest, HeartbeatResponse,
	SendEventRequest, SendEventResponse, SendEventsRequest, SendEventsResponse,
	SendTelemetryRequest, SendTelemetryResponse, SyncCapabilitiesRequest, TelemetryData,
	RestartServiceRequest, UpdateConfigRequest,
};

/// Error type returned by the pluggable handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

const EVENT_RECEIVER_MISSING: &str = "event receiver not configured";
const TELEMETRY_HANDLER_MISSING: &str = "telemetry handler not configured";

/// Destination for events forwarded by edges.
#[async_trait]
pub trait EventReceiver: Send + Sync {
	/// Returns the id assigned to the stored event.
	async fn receive_event(
		&self,
		edge_id: &str,
		event: &EdgeEvent,
	) -> std::result::Result<String, HandlerError>;

	async fn receive_events(
		&self,
		edge_id: &str,
		events: &[EdgeEvent],
	) -> std::result::Result<Vec<String>, HandlerError>;
}

#[async_trait]
pub trait TelemetryHandler: Send + Sync {
	async fn handle_telemetry(
		&self,
		edge_id: &str,
		telemetry: &TelemetryData,
	) -> std::result::Result<(), HandlerError>;

	async fn handle_heartbeat(
		&self,
		edge_id: &str,
		timestamp: i64,
	) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
pub trait ControlHandler: Send + Sync {
	async fn get_config(&self, edge_id: &str) -> std::result::Result<String, HandlerError>;

	async fn update_config(
		&self,
		edge_id: &str,
		config_json: &str,
	) -> std::result::Result<(), HandlerError>;

	async fn restart_service(
		&self,
		edge_id: &str,
		service_name: &str,
	) -> std::result::Result<(), HandlerError>;
}

fn unix_nanos(at: DateTime<Utc>) -> i64 {
	at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Half the round trip from the edge's send time to `now`.
///
/// `None` when the edge sent no timestamp or its clock is ahead of ours.
pub fn one_way_latency(now: DateTime<Utc>, client_nanos: i64) -> Option<Duration> {
	if client_nanos <= 0 {
		return None;
	}
	let round_trip = unix_nanos(now).checked_sub(client_nanos)?;
	u64::try_from(round_trip)
		.ok()
		.map(|nanos| Duration::from_nanos(nanos / 2))
}

fn millis(d: Duration) -> f64 {
	d.as_secs_f64() * 1000.0
}

pub struct EdgeGateway {
	resolver: EdgeResolver,
	interface: Arc<InterfaceManager>,
	edges: Arc<dyn EdgeStore>,
	connections: Arc<ConnectionRegistry>,
	capabilities: CapabilityStore,
	events: EventBus,
	event_receiver: Option<Arc<dyn EventReceiver>>,
	telemetry_handler: Option<Arc<dyn TelemetryHandler>>,
	control_handler: Option<Arc<dyn ControlHandler>>,
	heartbeat_timeout: Duration,
	storage_timeout: Duration,
}

impl EdgeGateway {
	pub fn new(
		config: &GatewayConfig,
		interface: Arc<InterfaceManager>,
		edges: Arc<dyn EdgeStore>,
		capabilities: CapabilityStore,
		events: EventBus,
	) -> Self {
		let resolver = EdgeResolver::new(interface.clone() as Arc<dyn PeerDirectory>, edges.clone());
		Self {
			resolver,
			interface,
			edges,
			connections: Arc::new(ConnectionRegistry::new()),
			capabilities,
			events,
			event_receiver: None,
			telemetry_handler: None,
			control_handler: None,
			heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
			storage_timeout: Duration::from_secs(config.storage_timeout_secs),
		}
	}

	pub fn with_event_receiver(mut self, receiver: Arc<dyn EventReceiver>) -> Self {
		self.event_receiver = Some(receiver);
		self
	}

	pub fn with_telemetry_handler(mut self, handler: Arc<dyn TelemetryHandler>) -> Self {
		self.telemetry_handler = Some(handler);
		self
	}

	pub fn with_control_handler(mut self, handler: Arc<dyn ControlHandler>) -> Self {
		self.control_handler = Some(handler);
		self
	}

	pub fn connections(&self) -> &Arc<ConnectionRegistry> {
		&self.connections
	}

	pub fn capabilities(&self) -> &CapabilityStore {
		&self.capabilities
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	/// Identify the caller, count the call on its connection and refresh the
	/// edge's `last_seen`.
	#[instrument(skip(self), fields(%peer_addr))]
	pub async fn authenticate(&self, peer_addr: SocketAddr) -> Result<EdgeIdentity> {
		let identity = self.resolver.resolve(peer_addr).await?;
		let now = Utc::now();

		self.touch_last_seen(identity.edge_id(), now).await;
		if self
			.connections
			.touch(identity.edge_id(), peer_addr, now)
			.await
		{
			info!(edge_id = %identity.edge_id(), %peer_addr, "edge connected");
			self.events.publish(DomainEvent::EdgeConnected {
				edge_id: identity.edge_id().to_string(),
				peer_addr: peer_addr.to_string(),
			});
		}
		Ok(identity)
	}

	#[instrument(skip(self, identity, request), fields(edge_id = %identity.edge_id()))]
	pub async fn send_event(
		&self,
		identity: &EdgeIdentity,
		request: &SendEventRequest,
	) -> SendEventResponse {
		let Some(receiver) = &self.event_receiver else {
			return SendEventResponse {
				success: false,
				error_message: EVENT_RECEIVER_MISSING.to_string(),
				..Default::default()
			};
		};

		match receiver.receive_event(identity.edge_id(), &request.event).await {
			Ok(event_id) => {
				debug!(%event_id, "event received");
				SendEventResponse {
					success: true,
					event_id,
					error_message: String::new(),
				}
			}
			Err(e) => {
				warn!(error = %e, "event receiver failed");
				SendEventResponse {
					success: false,
					error_message: e.to_string(),
					..Default::default()
				}
			}
		}
	}

	#[instrument(skip(self, identity, request), fields(edge_id = %identity.edge_id(), count = request.events.len()))]
	pub async fn send_events(
		&self,
		identity: &EdgeIdentity,
		request: &SendEventsRequest,
	) -> SendEventsResponse {
		let Some(receiver) = &self.event_receiver else {
			return SendEventsResponse {
				success: false,
				error_message: EVENT_RECEIVER_MISSING.to_string(),
				..Default::default()
			};
		};

		match receiver
			.receive_events(identity.edge_id(), &request.events)
			.await
		{
			Ok(event_ids) => {
				info!(received = event_ids.len(), "events received");
				SendEventsResponse {
					success: true,
					received_count: u32::try_from(event_ids.len()).unwrap_or(u32::MAX),
					event_ids,
					error_message: String::new(),
				}
			}
			Err(e) => {
				warn!(error = %e, "event receiver failed");
				SendEventsResponse {
					success: false,
					error_message: e.to_string(),
					..Default::default()
				}
			}
		}
	}

	#[instrument(skip(self, identity, request), fields(edge_id = %identity.edge_id()))]
	pub async fn send_telemetry(
		&self,
		identity: &EdgeIdentity,
		request: &SendTelemetryRequest,
	) -> SendTelemetryResponse {
		let Some(handler) = &self.telemetry_handler else {
			return SendTelemetryResponse {
				success: false,
				error_message: TELEMETRY_HANDLER_MISSING.to_string(),
			};
		};

		if let Err(e) = handler
			.handle_telemetry(identity.edge_id(), &request.telemetry)
			.await
		{
			warn!(error = %e, "telemetry handler failed");
			return SendTelemetryResponse {
				success: false,
				error_message: e.to_string(),
			};
		}

		self.connections
			.record_telemetry(identity.edge_id(), Utc::now())
			.await;
		SendTelemetryResponse {
			success: true,
			error_message: String::new(),
		}
	}

	/// Liveness ping. Works without a telemetry handler; one is only told
	/// about the heartbeat when configured.
	#[instrument(skip(self, identity, request), fields(edge_id = %identity.edge_id()))]
	pub async fn heartbeat(
		&self,
		identity: &EdgeIdentity,
		request: &HeartbeatRequest,
	) -> HeartbeatResponse {
		if let Some(handler) = &self.telemetry_handler {
			if let Err(e) = handler
				.handle_heartbeat(identity.edge_id(), request.timestamp)
				.await
			{
				warn!(error = %e, "heartbeat handler failed");
				return HeartbeatResponse {
					success: false,
					server_timestamp: unix_nanos(Utc::now()),
					latency_ms: None,
				};
			}
		}

		let now = Utc::now();
		let latency = one_way_latency(now, request.timestamp);
		self.connections
			.record_heartbeat(identity.edge_id(), now, latency)
			.await;
		if let Some(latency) = latency {
			self.interface
				.update_peer_latency(&identity.public_key, latency)
				.await;
		}

		HeartbeatResponse {
			success: true,
			server_timestamp: unix_nanos(now),
			latency_ms: latency.map(millis),
		}
	}

	pub async fn get_config(&self, identity: &EdgeIdentity) -> GetConfigResponse {
		let Some(handler) = &self.control_handler else {
			return GetConfigResponse {
				success: true,
				config_json: "{}".to_string(),
				error_message: String::new(),
			};
		};

		match handler.get_config(identity.edge_id()).await {
			Ok(config_json) => GetConfigResponse {
				success: true,
				config_json,
				error_message: String::new(),
			},
			Err(e) => {
				warn!(edge_id = %identity.edge_id(), error = %e, "get_config failed");
				GetConfigResponse {
					success: false,
					config_json: String::new(),
					error_message: e.to_string(),
				}
			}
		}
	}

	pub async fn update_config(
		&self,
		identity: &EdgeIdentity,
		request: &UpdateConfigRequest,
	) -> AckResponse {
		info!(edge_id = %identity.edge_id(), "config update requested");
		let Some(handler) = &self.control_handler else {
			return AckResponse::ok();
		};
		match handler
			.update_config(identity.edge_id(), &request.config_json)
			.await
		{
			Ok(()) => AckResponse::ok(),
			Err(e) => AckResponse::failed(e.to_string()),
		}
	}

	pub async fn restart_service(
		&self,
		identity: &EdgeIdentity,
		request: &RestartServiceRequest,
	) -> AckResponse {
		info!(
			edge_id = %identity.edge_id(),
			service = %request.service_name,
			"service restart requested"
		);
		let Some(handler) = &self.control_handler else {
			return AckResponse::ok();
		};
		match handler
			.restart_service(identity.edge_id(), &request.service_name)
			.await
		{
			Ok(()) => AckResponse::ok(),
			Err(e) => AckResponse::failed(e.to_string()),
		}
	}

	#[instrument(skip(self, identity, request), fields(edge_id = %identity.edge_id(), cameras = request.cameras.len()))]
	pub async fn sync_capabilities(
		&self,
		identity: &EdgeIdentity,
		request: &SyncCapabilitiesRequest,
	) -> AckResponse {
		let synced_at = request.synced_at.unwrap_or_else(Utc::now);
		match self
			.capabilities
			.upsert_capabilities(identity.edge_id(), &request.cameras, synced_at)
			.await
		{
			Ok(_) => AckResponse::ok(),
			Err(e) => {
				warn!(error = %e, "capability sync failed");
				AckResponse::failed(e.to_string())
			}
		}
	}

	/// A failed or slow `last_seen` write is logged and never fails the caller.
	async fn touch_last_seen(&self, edge_id: &str, at: DateTime<Utc>) {
		match tokio::time::timeout(self.storage_timeout, self.edges.touch_last_seen(edge_id, at)).await {
			Ok(Ok(_)) => {}
			Ok(Err(e)) => warn!(edge_id, error = %e, "failed to update last_seen"),
			Err(_) => warn!(edge_id, timeout = ?self.storage_timeout, "last_seen update timed out"),
		}
	}

	/// Drop connections that have been silent for longer than the heartbeat
	/// timeout, announcing each one once.
	#[instrument(skip(self))]
	pub async fn check_connections(&self, now: DateTime<Utc>) -> Vec<ConnectionSnapshot> {
		let removed = self
			.connections
			.expire_stale(now, self.heartbeat_timeout)
			.await;

		for conn in &removed {
			self.touch_last_seen(&conn.edge_id, now).await;

			info!(edge_id = %conn.edge_id, last_heartbeat = ?conn.last_heartbeat, "edge disconnected");
			self.events.publish(DomainEvent::EdgeDisconnected {
				edge_id: conn.edge_id.clone(),
				last_heartbeat: conn.last_heartbeat,
			});
		}
		removed
	}
}
