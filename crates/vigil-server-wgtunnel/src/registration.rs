// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use ipnet::{IpNet, Ipv4Net};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use vigil_server_config::RegistrationConfig;
use vigil_server_db::{EdgeRecord, EdgeStatus, EdgeStore, NewEdge};
use vigil_wgtunnel_common::WgPublicKey;

use crate::address::assign_address;
use crate::control::PeerConfig;
use crate::error::{Result, TunnelError};
use crate::interface::{edge_peer_config, InterfaceManager};
use crate::tokens::{BootstrapTokenStore, IssuedToken};

/// Everything an edge needs to bring up its side of the tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ClientConfig {
	#[schema(value_type = String, example = "10.0.0.17")]
	pub address: Ipv4Addr,
	pub server_public_key: String,
	/// `host:port` of the gateway's WireGuard listener.
	pub server_endpoint: String,
	/// Range the edge routes through the tunnel.
	#[schema(value_type = String, example = "10.0.0.0/24")]
	pub allowed_ips: Ipv4Net,
	pub persistent_keepalive: u16,
}

impl ClientConfig {
	/// wg-quick text for the edge. The private key never leaves the edge, so
	/// it is left as a placeholder.
	pub fn render(&self) -> String {
		let mut out = String::new();
		let _ = writeln!(out, "[Interface]");
		let _ = writeln!(out, "PrivateKey = <CLIENT_PRIVATE_KEY>");
		let _ = writeln!(out, "Address = {}/32", self.address);
		let _ = writeln!(out);
		let _ = writeln!(out, "[Peer]");
		let _ = writeln!(out, "PublicKey = {}", self.server_public_key);
		let _ = writeln!(out, "Endpoint = {}", self.server_endpoint);
		let _ = writeln!(out, "AllowedIPs = {}", self.allowed_ips);
		let _ = writeln!(out, "PersistentKeepalive = {}", self.persistent_keepalive);
		out
	}
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EdgeRegistration {
	pub edge_id: String,
	pub name: String,
	/// False when the key was already registered and the existing edge is
	/// returned unchanged.
	pub created: bool,
	pub client_config: ClientConfig,
	/// `client_config` rendered as a wg-quick file.
	pub config: String,
}

fn generate_edge_id() -> String {
	let mut bytes = [0u8; 16];
	OsRng.fill_bytes(&mut bytes);
	let encoded = URL_SAFE.encode(bytes);
	format!("edge-{}", &encoded[..12])
}

/// Turns bootstrap tokens into edges and manages their lifecycle.
pub struct EdgeRegistrar {
	tokens: Arc<BootstrapTokenStore>,
	edges: Arc<dyn EdgeStore>,
	interface: Arc<InterfaceManager>,
	endpoint_host: String,
	keepalive: u16,
	// Serializes the "does this key exist / which address is free" decisions.
	registrations: Mutex<()>,
}

impl EdgeRegistrar {
	pub fn new(
		config: &RegistrationConfig,
		tokens: Arc<BootstrapTokenStore>,
		edges: Arc<dyn EdgeStore>,
		interface: Arc<InterfaceManager>,
	) -> Self {
		Self {
			tokens,
			edges,
			interface,
			endpoint_host: config.endpoint_host.clone(),
			keepalive: config.keepalive_secs,
			registrations: Mutex::new(()),
		}
	}

	pub fn generate_bootstrap_token(&self) -> IssuedToken {
		self.tokens.generate()
	}

	#[instrument(skip(self))]
	pub fn cleanup_expired_tokens(&self) -> usize {
		let removed = self.tokens.cleanup_expired();
		if removed > 0 {
			info!(removed, "expired bootstrap tokens removed");
		}
		removed
	}

	fn client_config(&self, address: Ipv4Addr) -> ClientConfig {
		ClientConfig {
			address,
			server_public_key: self.interface.public_key().to_base64(),
			server_endpoint: format!("{}:{}", self.endpoint_host, self.interface.listen_port()),
			allowed_ips: self.interface.network(),
			persistent_keepalive: self.keepalive,
		}
	}

	fn registration_for(&self, edge: &EdgeRecord, created: bool) -> EdgeRegistration {
		let client_config = self.client_config(edge.tunnel_address);
		EdgeRegistration {
			edge_id: edge.edge_id.clone(),
			name: edge.name.clone(),
			created,
			config: client_config.render(),
			client_config,
		}
	}

	/// Redeem a bootstrap token for an edge identity.
	///
	/// A key that is already registered gets its existing registration back
	/// and the token is still consumed. Any failure releases the token.
	#[instrument(skip(self, token, public_key), fields(%name))]
	pub async fn register_edge(
		&self,
		token: &str,
		name: &str,
		public_key: &str,
	) -> Result<EdgeRegistration> {
		let reservation = self.tokens.reserve(token)?;

		let key = WgPublicKey::from_base64(public_key)
			.map_err(|e| TunnelError::InvalidArgument(format!("invalid public key: {e}")))?;
		let name = name.trim();
		if name.is_empty() {
			return Err(TunnelError::InvalidArgument(
				"edge name must not be empty".to_string(),
			));
		}

		let _guard = self.registrations.lock().await;

		if let Some(existing) = self.edges.get_edge_by_public_key(&key.to_base64()).await? {
			reservation.commit();
			info!(edge_id = %existing.edge_id, "edge already registered, returning existing registration");
			return Ok(self.registration_for(&existing, false));
		}

		let edge_id = generate_edge_id();
		let taken: HashSet<Ipv4Addr> = self
			.edges
			.list_tunnel_addresses()
			.await?
			.into_iter()
			.collect();
		let network = self.interface.network();
		let (address, probes) = assign_address(network, &edge_id, &taken)
			.ok_or_else(|| TunnelError::AddressExhausted(network.to_string()))?;

		self.interface
			.add_peer(PeerConfig::new(
				key,
				vec![IpNet::V4(Ipv4Net::from(address))],
			))
			.await?;

		let new_edge = NewEdge {
			edge_id: edge_id.clone(),
			name: name.to_string(),
			wireguard_public_key: key.to_base64(),
			tunnel_address: address,
		};
		let record = match self.edges.insert_edge(&new_edge).await {
			Ok(record) => record,
			Err(e) => {
				warn!(%edge_id, error = %e, "storing edge failed, removing peer");
				if let Err(rollback) = self.interface.remove_peer(&key).await {
					warn!(%edge_id, error = %rollback, "peer rollback failed");
				}
				return Err(e.into());
			}
		};

		reservation.commit();
		info!(%edge_id, %address, probes, public_key = %key, "registered new edge");
		Ok(self.registration_for(&record, true))
	}

	/// Identify an edge by its tunnel key and refresh `last_seen`.
	#[instrument(skip(self))]
	pub async fn authenticate_edge(&self, public_key: &str) -> Result<EdgeRecord> {
		let key = WgPublicKey::from_base64(public_key)
			.map_err(|e| TunnelError::InvalidArgument(format!("invalid public key: {e}")))?;

		let edge = self
			.edges
			.get_edge_by_public_key(&key.to_base64())
			.await?
			.ok_or_else(|| TunnelError::Unauthenticated("edge not found".to_string()))?;
		if !edge.is_active() {
			return Err(TunnelError::Unauthenticated(format!(
				"edge {} is not active",
				edge.edge_id
			)));
		}

		if let Err(e) = self.edges.touch_last_seen(&edge.edge_id, chrono::Utc::now()).await {
			warn!(edge_id = %edge.edge_id, error = %e, "failed to update last_seen");
		}
		Ok(edge)
	}

	async fn require_edge(&self, edge_id: &str) -> Result<EdgeRecord> {
		self.edges
			.get_edge(edge_id)
			.await?
			.ok_or_else(|| TunnelError::NotFound(format!("edge {edge_id}")))
	}

	#[instrument(skip(self))]
	pub async fn get_registration(&self, edge_id: &str) -> Result<EdgeRegistration> {
		let edge = self.require_edge(edge_id).await?;
		Ok(self.registration_for(&edge, false))
	}

	pub async fn get_edge(&self, edge_id: &str) -> Result<EdgeRecord> {
		self.require_edge(edge_id).await
	}

	pub async fn list_edges(&self) -> Result<Vec<EdgeRecord>> {
		Ok(self.edges.list_edges().await?)
	}

	/// Toggle an edge. Re-activating an edge puts its peer back on the
	/// interface; disabling leaves the peer to [`Self::deregister_edge`].
	#[instrument(skip(self), fields(%status))]
	pub async fn set_edge_status(&self, edge_id: &str, status: EdgeStatus) -> Result<EdgeRecord> {
		let edge = self.require_edge(edge_id).await?;

		if status == EdgeStatus::Active && !edge.is_active() {
			self.interface.add_peer(edge_peer_config(&edge)?).await?;
		}
		self.edges.set_status(edge_id, status).await?;
		info!(%edge_id, "edge status updated");

		self.require_edge(edge_id).await
	}

	/// Take the edge off the tunnel and disable it. The row is kept.
	#[instrument(skip(self))]
	pub async fn deregister_edge(&self, edge_id: &str) -> Result<EdgeRecord> {
		let edge = self.require_edge(edge_id).await?;
		let key = WgPublicKey::from_base64(&edge.wireguard_public_key)?;

		self.interface.remove_peer(&key).await?;
		self.edges.set_status(edge_id, EdgeStatus::Disabled).await?;
		info!(%edge_id, "edge deregistered");

		self.require_edge(edge_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::control::MemoryControl;
	use crate::events::EventBus;
	use crate::identity::{GatewayIdentity, IdentityOrigin};
	use async_trait::async_trait;
	use chrono::{DateTime, Utc};
	use std::time::Duration;
	use vigil_server_config::TunnelConfig;
	use vigil_server_db::testing::create_test_pool;
	use vigil_server_db::{DbError, EdgeRepository};
	use vigil_wgtunnel_common::WgKeyPair;

	/// Delegates to a real repository but refuses inserts.
	struct RejectInserts(EdgeRepository);

	#[async_trait]
	impl EdgeStore for RejectInserts {
		async fn insert_edge(&self, _edge: &NewEdge) -> vigil_server_db::Result<EdgeRecord> {
			Err(DbError::Internal("disk full".to_string()))
		}
		async fn get_edge(&self, edge_id: &str) -> vigil_server_db::Result<Option<EdgeRecord>> {
			self.0.get_edge(edge_id).await
		}
		async fn get_edge_by_public_key(
			&self,
			public_key: &str,
		) -> vigil_server_db::Result<Option<EdgeRecord>> {
			self.0.get_edge_by_public_key(public_key).await
		}
		async fn list_edges(&self) -> vigil_server_db::Result<Vec<EdgeRecord>> {
			self.0.list_edges().await
		}
		async fn list_active_edges(&self) -> vigil_server_db::Result<Vec<EdgeRecord>> {
			self.0.list_active_edges().await
		}
		async fn list_tunnel_addresses(&self) -> vigil_server_db::Result<Vec<Ipv4Addr>> {
			self.0.list_tunnel_addresses().await
		}
		async fn touch_last_seen(&self, edge_id: &str, at: DateTime<Utc>) -> vigil_server_db::Result<u64> {
			self.0.touch_last_seen(edge_id, at).await
		}
		async fn set_status(&self, edge_id: &str, status: EdgeStatus) -> vigil_server_db::Result<u64> {
			self.0.set_status(edge_id, status).await
		}
		async fn update_endpoint(&self, public_key: &str, endpoint: &str) -> vigil_server_db::Result<u64> {
			self.0.update_endpoint(public_key, endpoint).await
		}
	}

	struct Harness {
		registrar: EdgeRegistrar,
		interface: Arc<InterfaceManager>,
		control: Arc<MemoryControl>,
		repo: EdgeRepository,
	}

	async fn harness_with(store: impl Fn(EdgeRepository) -> Arc<dyn EdgeStore>) -> Harness {
		let repo = EdgeRepository::new(create_test_pool().await);
		let control = Arc::new(MemoryControl::new());
		let interface = Arc::new(InterfaceManager::with_identity(
			&TunnelConfig::default(),
			GatewayIdentity {
				keypair: WgKeyPair::generate(),
				listen_port: None,
				origin: IdentityOrigin::Generated,
			},
			control.clone(),
			Arc::new(repo.clone()),
			EventBus::new(),
		));
		interface.ensure_interface().await.unwrap();

		let registrar = EdgeRegistrar::new(
			&RegistrationConfig {
				endpoint_host: "gw.example.net".to_string(),
				..Default::default()
			},
			Arc::new(BootstrapTokenStore::new(Duration::from_secs(3600))),
			store(repo.clone()),
			interface.clone(),
		);
		Harness {
			registrar,
			interface,
			control,
			repo,
		}
	}

	async fn harness() -> Harness {
		harness_with(|repo| Arc::new(repo) as Arc<dyn EdgeStore>).await
	}

	fn edge_key() -> String {
		WgKeyPair::generate().public_key().to_base64()
	}

	#[tokio::test]
	async fn registration_adds_peer_and_returns_config() {
		let h = harness().await;
		let token = h.registrar.generate_bootstrap_token();
		let key = edge_key();

		let reg = h
			.registrar
			.register_edge(token.token.expose(), "Garage", &key)
			.await
			.unwrap();

		assert!(reg.created);
		assert!(reg.edge_id.starts_with("edge-"));
		assert_eq!(reg.edge_id.len(), "edge-".len() + 12);
		assert_eq!(reg.client_config.server_endpoint, "gw.example.net:51820");
		assert_eq!(
			reg.client_config.server_public_key,
			h.interface.public_key().to_base64()
		);
		assert!(reg.config.contains("PrivateKey = <CLIENT_PRIVATE_KEY>"));
		assert!(reg.config.contains("AllowedIPs = 10.0.0.0/24"));
		assert!(reg.config.contains("PersistentKeepalive = 25"));

		let peer_key = WgPublicKey::from_base64(&key).unwrap();
		let route = IpNet::V4(Ipv4Net::from(reg.client_config.address));
		assert_eq!(h.control.allowed_ips(&peer_key), Some(vec![route]));
		assert_eq!(
			h.repo.get_edge(&reg.edge_id).await.unwrap().unwrap().tunnel_address,
			reg.client_config.address
		);
	}

	#[tokio::test]
	async fn same_key_twice_returns_same_edge() {
		let h = harness().await;
		let key = edge_key();

		let first_token = h.registrar.generate_bootstrap_token();
		let first = h
			.registrar
			.register_edge(first_token.token.expose(), "Garage", &key)
			.await
			.unwrap();

		let second_token = h.registrar.generate_bootstrap_token();
		let second = h
			.registrar
			.register_edge(second_token.token.expose(), "Garage again", &key)
			.await
			.unwrap();

		assert!(!second.created);
		assert_eq!(first.edge_id, second.edge_id);
		assert_eq!(first.client_config, second.client_config);
		assert_eq!(h.repo.list_edges().await.unwrap().len(), 1);

		// Both tokens are spent.
		let err = h
			.registrar
			.register_edge(second_token.token.expose(), "Garage", &key)
			.await
			.unwrap_err();
		assert!(err.is_unauthenticated());
	}

	#[tokio::test]
	async fn used_token_is_rejected() {
		let h = harness().await;
		let token = h.registrar.generate_bootstrap_token();
		h.registrar
			.register_edge(token.token.expose(), "Garage", &edge_key())
			.await
			.unwrap();

		let err = h
			.registrar
			.register_edge(token.token.expose(), "Shed", &edge_key())
			.await
			.unwrap_err();
		assert!(err.is_unauthenticated());
	}

	#[tokio::test]
	async fn malformed_key_keeps_token_usable() {
		let h = harness().await;
		let token = h.registrar.generate_bootstrap_token();

		let err = h
			.registrar
			.register_edge(token.token.expose(), "Garage", "not base64!")
			.await
			.unwrap_err();
		assert!(matches!(err, TunnelError::InvalidArgument(_)));

		h.registrar
			.register_edge(token.token.expose(), "Garage", &edge_key())
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn failed_insert_rolls_back_peer_and_releases_token() {
		let h = harness_with(|repo| Arc::new(RejectInserts(repo)) as Arc<dyn EdgeStore>).await;
		let token = h.registrar.generate_bootstrap_token();
		let key = edge_key();

		let err = h
			.registrar
			.register_edge(token.token.expose(), "Garage", &key)
			.await
			.unwrap_err();
		assert!(matches!(err, TunnelError::Database(_)));

		let peer_key = WgPublicKey::from_base64(&key).unwrap();
		assert!(h.control.peer_keys().is_empty());
		assert!(h.interface.get_peer(&peer_key).await.is_none());
		// Released, not consumed.
		assert!(h.registrar.tokens.reserve(token.token.expose()).is_ok());
	}

	#[tokio::test]
	async fn edges_get_distinct_addresses() {
		let h = harness().await;
		let mut seen = HashSet::new();
		for i in 0..20 {
			let token = h.registrar.generate_bootstrap_token();
			let reg = h
				.registrar
				.register_edge(token.token.expose(), &format!("edge {i}"), &edge_key())
				.await
				.unwrap();
			assert!(seen.insert(reg.client_config.address));
			assert_ne!(reg.client_config.address, Ipv4Addr::new(10, 0, 0, 1));
		}
	}

	#[tokio::test]
	async fn authenticate_rejects_unknown_and_disabled() {
		let h = harness().await;
		let token = h.registrar.generate_bootstrap_token();
		let key = edge_key();
		let reg = h
			.registrar
			.register_edge(token.token.expose(), "Garage", &key)
			.await
			.unwrap();

		let edge = h.registrar.authenticate_edge(&key).await.unwrap();
		assert_eq!(edge.edge_id, reg.edge_id);

		assert!(h
			.registrar
			.authenticate_edge(&edge_key())
			.await
			.unwrap_err()
			.is_unauthenticated());

		h.registrar
			.set_edge_status(&reg.edge_id, EdgeStatus::Disabled)
			.await
			.unwrap();
		assert!(h
			.registrar
			.authenticate_edge(&key)
			.await
			.unwrap_err()
			.is_unauthenticated());
	}

	#[tokio::test]
	async fn deregister_removes_peer_and_reactivation_restores_it() {
		let h = harness().await;
		let token = h.registrar.generate_bootstrap_token();
		let key = edge_key();
		let reg = h
			.registrar
			.register_edge(token.token.expose(), "Garage", &key)
			.await
			.unwrap();
		let peer_key = WgPublicKey::from_base64(&key).unwrap();

		let edge = h.registrar.deregister_edge(&reg.edge_id).await.unwrap();
		assert_eq!(edge.status, EdgeStatus::Disabled);
		assert!(h.control.peer_keys().is_empty());

		let edge = h
			.registrar
			.set_edge_status(&reg.edge_id, EdgeStatus::Active)
			.await
			.unwrap();
		assert!(edge.is_active());
		assert_eq!(h.control.peer_keys(), vec![peer_key]);
	}

	#[tokio::test]
	async fn unknown_edge_is_not_found() {
		let h = harness().await;
		assert!(matches!(
			h.registrar.get_registration("edge-missing").await,
			Err(TunnelError::NotFound(_))
		));
	}

	#[test]
	fn rendered_config_matches_wg_quick_layout() {
		let config = ClientConfig {
			address: Ipv4Addr::new(10, 0, 0, 17),
			server_public_key: "SERVERKEY=".to_string(),
			server_endpoint: "localhost:51820".to_string(),
			allowed_ips: "10.0.0.0/24".parse().unwrap(),
			persistent_keepalive: 25,
		};
		assert_eq!(
			config.render(),
			"[Interface]\n\
			 PrivateKey = <CLIENT_PRIVATE_KEY>\n\
			 Address = 10.0.0.17/32\n\
			 \n\
			 [Peer]\n\
			 PublicKey = SERVERKEY=\n\
			 Endpoint = localhost:51820\n\
			 AllowedIPs = 10.0.0.0/24\n\
			 PersistentKeepalive = 25\n"
		);
	}
}
