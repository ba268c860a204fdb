// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ownership of the gateway's WireGuard interface and its peer table.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use vigil_server_config::TunnelConfig;
use vigil_server_db::{EdgeRecord, EdgeStore};
use vigil_wgtunnel_common::{WgPublicKey, WgQuickConfig};

use crate::address::{gateway_address, gateway_interface_address};
use crate::control::{PeerConfig, PeerStats, TunnelControl};
use crate::error::Result;
use crate::events::{DomainEvent, EventBus};
use crate::identity::{resolve_identity, GatewayIdentity};
use crate::resolver::PeerDirectory;

#[derive(Debug, Default)]
struct PeerState {
	endpoint: Option<String>,
	last_handshake: Option<DateTime<Utc>>,
	connected: bool,
	latency: Option<Duration>,
	ping_count: u64,
	pong_count: u64,
	last_ping: Option<DateTime<Utc>>,
	last_pong: Option<DateTime<Utc>>,
	bytes_sent: u64,
	bytes_received: u64,
}

struct TunnelPeer {
	public_key: WgPublicKey,
	allowed_ips: Vec<IpNet>,
	state: parking_lot::RwLock<PeerState>,
}

impl TunnelPeer {
	fn new(config: &PeerConfig) -> Self {
		Self {
			public_key: config.public_key,
			allowed_ips: config.allowed_ips.clone(),
			state: parking_lot::RwLock::new(PeerState::default()),
		}
	}

	fn snapshot(&self) -> PeerSnapshot {
		let state = self.state.read();
		PeerSnapshot {
			public_key: self.public_key,
			allowed_ips: self.allowed_ips.clone(),
			endpoint: state.endpoint.clone(),
			last_handshake: state.last_handshake,
			connected: state.connected,
			latency_ms: state.latency.map(|l| l.as_secs_f64() * 1000.0),
			ping_count: state.ping_count,
			pong_count: state.pong_count,
			last_ping: state.last_ping,
			last_pong: state.last_pong,
			bytes_sent: state.bytes_sent,
			bytes_received: state.bytes_received,
		}
	}
}

/// Point-in-time copy of a tunnel peer.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PeerSnapshot {
	#[schema(value_type = String)]
	pub public_key: WgPublicKey,
	#[schema(value_type = Vec<String>)]
	pub allowed_ips: Vec<IpNet>,
	pub endpoint: Option<String>,
	pub last_handshake: Option<DateTime<Utc>>,
	pub connected: bool,
	pub latency_ms: Option<f64>,
	pub ping_count: u64,
	pub pong_count: u64,
	pub last_ping: Option<DateTime<Utc>>,
	pub last_pong: Option<DateTime<Utc>>,
	pub bytes_sent: u64,
	pub bytes_received: u64,
}

/// Outcome of a peer reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	pub added: usize,
	pub removed: usize,
	pub unchanged: usize,
}

/// Outcome of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
	pub connected: usize,
	pub newly_connected: usize,
	pub newly_disconnected: usize,
}

/// A handshake counts as connectivity while it is younger than `window`.
pub fn handshake_is_fresh(
	last_handshake: Option<DateTime<Utc>>,
	now: DateTime<Utc>,
	window: Duration,
) -> bool {
	match (last_handshake, chrono::Duration::from_std(window)) {
		(Some(at), Ok(window)) => now.signed_duration_since(at) < window,
		_ => false,
	}
}

fn host_route(address: Ipv4Addr) -> IpNet {
	IpNet::V4(Ipv4Net::from(address))
}

/// Peer configuration for a stored edge.
pub fn edge_peer_config(edge: &EdgeRecord) -> Result<PeerConfig> {
	let public_key = WgPublicKey::from_base64(&edge.wireguard_public_key)?;
	Ok(PeerConfig::new(public_key, vec![host_route(edge.tunnel_address)]))
}

fn same_routes(a: &[IpNet], b: &[IpNet]) -> bool {
	let a: HashSet<&IpNet> = a.iter().collect();
	let b: HashSet<&IpNet> = b.iter().collect();
	a == b
}

/// Owns the interface and the in-memory peer table.
///
/// Peer mutations are serialized by `mutations`. The map lock is only ever
/// taken for the map update itself, after the interface call has succeeded,
/// so a failed `wg` call leaves the table untouched.
pub struct InterfaceManager {
	control: Arc<dyn TunnelControl>,
	edges: Arc<dyn EdgeStore>,
	events: EventBus,
	identity: GatewayIdentity,
	interface: String,
	listen_port: u16,
	network: Ipv4Net,
	config_path: Option<PathBuf>,
	handshake_window: Duration,
	peers: RwLock<HashMap<WgPublicKey, Arc<TunnelPeer>>>,
	mutations: Mutex<()>,
}

impl InterfaceManager {
	/// Resolve the gateway identity and build the manager. The interface is
	/// only read here; nothing changes on it until
	/// [`InterfaceManager::ensure_interface`].
	pub async fn new(
		config: &TunnelConfig,
		control: Arc<dyn TunnelControl>,
		edges: Arc<dyn EdgeStore>,
		events: EventBus,
	) -> Result<Self> {
		let identity = resolve_identity(config, control.as_ref()).await?;
		Ok(Self::with_identity(config, identity, control, edges, events))
	}

	pub fn with_identity(
		config: &TunnelConfig,
		identity: GatewayIdentity,
		control: Arc<dyn TunnelControl>,
		edges: Arc<dyn EdgeStore>,
		events: EventBus,
	) -> Self {
		Self {
			control,
			edges,
			events,
			listen_port: identity.listen_port.unwrap_or(config.listen_port),
			identity,
			interface: config.interface.clone(),
			network: config.network,
			config_path: config.config_path.clone(),
			handshake_window: Duration::from_secs(config.handshake_window_secs),
			peers: RwLock::new(HashMap::new()),
			mutations: Mutex::new(()),
		}
	}

	pub fn public_key(&self) -> &WgPublicKey {
		self.identity.public_key()
	}

	pub fn listen_port(&self) -> u16 {
		self.listen_port
	}

	pub fn interface_name(&self) -> &str {
		&self.interface
	}

	pub fn network(&self) -> Ipv4Net {
		self.network
	}

	pub fn gateway_address(&self) -> Ipv4Addr {
		gateway_address(self.network)
	}

	/// Bring the interface to its desired state. Safe to call repeatedly.
	#[instrument(skip(self), fields(interface = %self.interface))]
	pub async fn ensure_interface(&self) -> Result<ReconcileReport> {
		if self.control.interface_exists().await? {
			info!("interface exists, reconciling");
		} else {
			info!("creating interface");
			self.control.create_interface().await?;
		}

		self.control
			.configure_device(self.identity.keypair.private_key(), self.listen_port)
			.await?;
		let report = self.reconcile_peers().await?;

		let address = gateway_interface_address(self.network);
		self.control.assign_address(IpNet::V4(address)).await?;
		self.control.set_link_up().await?;

		info!(
			%address,
			listen_port = self.listen_port,
			public_key = %self.public_key(),
			added = report.added,
			removed = report.removed,
			"interface ready"
		);
		Ok(report)
	}

	/// Peers the interface should carry: every active edge plus the peers
	/// declared in the gateway config file.
	async fn desired_peers(&self) -> Result<HashMap<WgPublicKey, PeerConfig>> {
		let mut desired = HashMap::new();

		if let Some(path) = &self.config_path {
			if tokio::fs::try_exists(path).await.unwrap_or(false) {
				let config = WgQuickConfig::load(path).await?;
				for peer in config.peers {
					desired.insert(
						peer.public_key,
						PeerConfig {
							public_key: peer.public_key,
							allowed_ips: peer.allowed_ips,
							preshared_key: peer.preshared_key,
						},
					);
				}
			}
		}

		for edge in self.edges.list_active_edges().await? {
			match edge_peer_config(&edge) {
				Ok(peer) => {
					desired.insert(peer.public_key, peer);
				}
				Err(e) => {
					warn!(edge_id = %edge.edge_id, error = %e, "skipping edge with unusable public key")
				}
			}
		}

		Ok(desired)
	}

	/// Make the interface peer set match the desired set.
	#[instrument(skip(self), fields(interface = %self.interface))]
	pub async fn reconcile_peers(&self) -> Result<ReconcileReport> {
		let _guard = self.mutations.lock().await;

		let desired = self.desired_peers().await?;
		let actual: HashMap<WgPublicKey, PeerStats> = self
			.control
			.peer_stats()
			.await?
			.into_iter()
			.map(|stats| (stats.public_key, stats))
			.collect();

		let mut report = ReconcileReport::default();

		for (key, stats) in &actual {
			if !desired.contains_key(key) {
				self.control.remove_peer(key).await?;
				self.peers.write().await.remove(key);
				debug!(public_key = %key, allowed_ips = ?stats.allowed_ips, "removed unknown peer");
				report.removed += 1;
			}
		}

		for (key, peer) in &desired {
			let in_sync = actual
				.get(key)
				.is_some_and(|stats| same_routes(&stats.allowed_ips, &peer.allowed_ips));
			if in_sync {
				report.unchanged += 1;
			} else {
				self.control.add_peer(peer).await?;
				report.added += 1;
			}
			self.track(peer).await;
		}

		// Entries for peers that are gone from both sides.
		self.peers.write().await.retain(|key, _| desired.contains_key(key));

		Ok(report)
	}

	async fn track(&self, config: &PeerConfig) {
		let mut peers = self.peers.write().await;
		let keep = peers
			.get(&config.public_key)
			.is_some_and(|existing| same_routes(&existing.allowed_ips, &config.allowed_ips));
		if !keep {
			peers.insert(config.public_key, Arc::new(TunnelPeer::new(config)));
		}
	}

	/// Add a peer to the interface and the peer table.
	#[instrument(skip(self, peer), fields(public_key = %peer.public_key, allowed_ips = ?peer.allowed_ips))]
	pub async fn add_peer(&self, peer: PeerConfig) -> Result<()> {
		let _guard = self.mutations.lock().await;
		self.control.add_peer(&peer).await?;
		self.track(&peer).await;
		info!("added peer");
		Ok(())
	}

	/// Remove a peer. Returns whether the peer table held it.
	#[instrument(skip(self), fields(%public_key))]
	pub async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<bool> {
		let _guard = self.mutations.lock().await;
		self.control.remove_peer(public_key).await?;
		let removed = self.peers.write().await.remove(public_key).is_some();
		info!(removed, "removed peer");
		Ok(removed)
	}

	/// Re-read interface statistics and publish connectivity transitions.
	#[instrument(skip(self), fields(interface = %self.interface))]
	pub async fn monitor_peers(&self) -> Result<MonitorReport> {
		let stats = self.control.peer_stats().await?;
		let now = Utc::now();
		let mut report = MonitorReport::default();
		let mut pending = Vec::new();
		let mut endpoint_changes = Vec::new();

		{
			let peers = self.peers.read().await;
			let mut seen = HashSet::with_capacity(stats.len());

			for stat in stats {
				let Some(peer) = peers.get(&stat.public_key) else {
					continue;
				};
				seen.insert(stat.public_key);

				let mut state = peer.state.write();
				let was_connected = state.connected;
				state.connected = handshake_is_fresh(stat.last_handshake, now, self.handshake_window);
				state.last_handshake = stat.last_handshake;
				state.bytes_received = stat.rx_bytes;
				state.bytes_sent = stat.tx_bytes;
				if stat.endpoint.is_some() && state.endpoint != stat.endpoint {
					state.endpoint = stat.endpoint.clone();
					if let Some(endpoint) = stat.endpoint {
						endpoint_changes.push((stat.public_key, endpoint));
					}
				}

				if state.connected {
					report.connected += 1;
				}
				match (was_connected, state.connected) {
					(false, true) => pending.push(DomainEvent::PeerConnected {
						public_key: stat.public_key.to_base64(),
						last_handshake: stat.last_handshake,
						bytes_received: stat.rx_bytes,
						bytes_sent: stat.tx_bytes,
					}),
					(true, false) => pending.push(DomainEvent::PeerDisconnected {
						public_key: stat.public_key.to_base64(),
						last_handshake: stat.last_handshake,
					}),
					_ => {}
				}
			}

			// Tracked peers the interface no longer reports are not connected.
			for (key, peer) in peers.iter().filter(|(key, _)| !seen.contains(*key)) {
				let mut state = peer.state.write();
				if state.connected {
					state.connected = false;
					pending.push(DomainEvent::PeerDisconnected {
						public_key: key.to_base64(),
						last_handshake: state.last_handshake,
					});
				}
			}
		}

		for event in pending {
			match event {
				DomainEvent::PeerConnected { .. } => report.newly_connected += 1,
				_ => report.newly_disconnected += 1,
			}
			self.events.publish(event);
		}

		for (key, endpoint) in endpoint_changes {
			if let Err(e) = self.edges.update_endpoint(&key.to_base64(), &endpoint).await {
				warn!(public_key = %key, error = %e, "failed to store peer endpoint");
			}
		}

		debug!(
			connected = report.connected,
			newly_connected = report.newly_connected,
			newly_disconnected = report.newly_disconnected,
			"peer status refreshed"
		);
		Ok(report)
	}

	/// Note that a ping was sent to the peer. Returns false for unknown peers.
	pub async fn record_ping(&self, public_key: &WgPublicKey) -> bool {
		let peers = self.peers.read().await;
		let Some(peer) = peers.get(public_key) else {
			return false;
		};
		let mut state = peer.state.write();
		state.ping_count += 1;
		state.last_ping = Some(Utc::now());
		true
	}

	/// Record a measured round-trip latency; this counts as a pong.
	pub async fn update_peer_latency(&self, public_key: &WgPublicKey, latency: Duration) -> bool {
		let peers = self.peers.read().await;
		let Some(peer) = peers.get(public_key) else {
			return false;
		};
		let mut state = peer.state.write();
		state.latency = Some(latency);
		state.pong_count += 1;
		state.last_pong = Some(Utc::now());
		true
	}

	pub async fn peer_latency(&self, public_key: &WgPublicKey) -> Option<Duration> {
		let peers = self.peers.read().await;
		peers.get(public_key).and_then(|p| p.state.read().latency)
	}

	pub async fn get_peer(&self, public_key: &WgPublicKey) -> Option<PeerSnapshot> {
		self.peers.read().await.get(public_key).map(|p| p.snapshot())
	}

	pub async fn connected_peers(&self) -> Vec<WgPublicKey> {
		let peers = self.peers.read().await;
		let mut connected: Vec<WgPublicKey> = peers
			.values()
			.filter(|p| p.state.read().connected)
			.map(|p| p.public_key)
			.collect();
		connected.sort();
		connected
	}

	pub async fn list_peers(&self) -> Vec<PeerSnapshot> {
		let peers = self.peers.read().await;
		let mut snapshots: Vec<PeerSnapshot> = peers.values().map(|p| p.snapshot()).collect();
		snapshots.sort_by(|a, b| a.public_key.cmp(&b.public_key));
		snapshots
	}

	/// The peer whose allowed addresses contain `addr`, preferring the most
	/// specific route as WireGuard does.
	pub async fn find_peer_by_address(&self, addr: IpAddr) -> Option<WgPublicKey> {
		let peers = self.peers.read().await;
		peers
			.values()
			.filter_map(|peer| {
				peer.allowed_ips
					.iter()
					.filter(|net| net.contains(&addr))
					.map(|net| net.prefix_len())
					.max()
					.map(|prefix| (prefix, peer.public_key))
			})
			.max_by_key(|(prefix, _)| *prefix)
			.map(|(_, key)| key)
	}
}

#[async_trait]
impl PeerDirectory for InterfaceManager {
	async fn find_peer_by_address(&self, addr: IpAddr) -> Option<WgPublicKey> {
		InterfaceManager::find_peer_by_address(self, addr).await
	}
}
