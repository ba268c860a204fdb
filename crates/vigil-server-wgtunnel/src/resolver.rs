// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Caller identity: source address → tunnel peer → active edge.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use vigil_server_db::{EdgeRecord, EdgeStore};
use vigil_wgtunnel_common::WgPublicKey;

use crate::error::{Result, TunnelError};

/// Lookup of the tunnel peer that owns a source address.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
	async fn find_peer_by_address(&self, addr: IpAddr) -> Option<WgPublicKey>;
}

/// The identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct EdgeIdentity {
	pub edge: EdgeRecord,
	pub public_key: WgPublicKey,
	pub peer_addr: SocketAddr,
}

impl EdgeIdentity {
	pub fn edge_id(&self) -> &str {
		&self.edge.edge_id
	}
}

#[derive(Clone)]
pub struct EdgeResolver {
	peers: Arc<dyn PeerDirectory>,
	edges: Arc<dyn EdgeStore>,
}

impl EdgeResolver {
	pub fn new(peers: Arc<dyn PeerDirectory>, edges: Arc<dyn EdgeStore>) -> Self {
		Self { peers, edges }
	}

	#[instrument(skip(self), fields(%peer_addr))]
	pub async fn resolve(&self, peer_addr: SocketAddr) -> Result<EdgeIdentity> {
		let ip = peer_addr.ip().to_canonical();

		let public_key = self.peers.find_peer_by_address(ip).await.ok_or_else(|| {
			debug!(%ip, "no tunnel peer for source address");
			TunnelError::Unauthenticated(format!("no tunnel peer for {ip}"))
		})?;

		let edge = self
			.edges
			.get_edge_by_public_key(&public_key.to_base64())
			.await?
			.ok_or_else(|| TunnelError::Unauthenticated("peer is not a registered edge".to_string()))?;

		if !edge.is_active() {
			debug!(edge_id = %edge.edge_id, "edge is disabled");
			return Err(TunnelError::Unauthenticated(format!(
				"edge {} is {}",
				edge.edge_id, edge.status
			)));
		}

		Ok(EdgeIdentity {
			edge,
			public_key,
			peer_addr,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::net::Ipv4Addr;
	use vigil_server_db::testing::create_test_pool;
	use vigil_server_db::{EdgeRepository, EdgeStatus, NewEdge};
	use vigil_wgtunnel_common::WgKeyPair;

	struct StaticPeers(HashMap<IpAddr, WgPublicKey>);

	#[async_trait]
	impl PeerDirectory for StaticPeers {
		async fn find_peer_by_address(&self, addr: IpAddr) -> Option<WgPublicKey> {
			self.0.get(&addr).copied()
		}
	}

	async fn setup() -> (EdgeResolver, EdgeRepository, WgPublicKey, WgPublicKey) {
		let repo = EdgeRepository::new(create_test_pool().await);
		let registered = *WgKeyPair::generate().public_key();
		let stranger = *WgKeyPair::generate().public_key();
		repo.insert_edge(&NewEdge {
			edge_id: "edge-1".to_string(),
			name: "Garage".to_string(),
			wireguard_public_key: registered.to_base64(),
			tunnel_address: Ipv4Addr::new(10, 0, 0, 2),
		})
		.await
		.unwrap();

		let peers = StaticPeers(HashMap::from([
			(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), registered),
			(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)), stranger),
		]));
		let resolver = EdgeResolver::new(Arc::new(peers), Arc::new(repo.clone()));
		(resolver, repo, registered, stranger)
	}

	#[tokio::test]
	async fn resolves_registered_peer() {
		let (resolver, _, registered, _) = setup().await;
		let identity = resolver
			.resolve("10.0.0.2:40000".parse().unwrap())
			.await
			.unwrap();
		assert_eq!(identity.edge_id(), "edge-1");
		assert_eq!(identity.public_key, registered);
	}

	#[tokio::test]
	async fn ipv4_mapped_source_is_canonicalized() {
		let (resolver, _, _, _) = setup().await;
		let identity = resolver
			.resolve("[::ffff:10.0.0.2]:40000".parse().unwrap())
			.await
			.unwrap();
		assert_eq!(identity.edge_id(), "edge-1");
	}

	#[tokio::test]
	async fn unknown_address_is_unauthenticated() {
		let (resolver, _, _, _) = setup().await;
		let err = resolver
			.resolve("192.168.1.10:40000".parse().unwrap())
			.await
			.unwrap_err();
		assert!(err.is_unauthenticated());
	}

	#[tokio::test]
	async fn peer_without_edge_is_unauthenticated() {
		let (resolver, _, _, _) = setup().await;
		let err = resolver
			.resolve("10.0.0.3:40000".parse().unwrap())
			.await
			.unwrap_err();
		assert!(err.is_unauthenticated());
	}

	#[tokio::test]
	async fn disabled_edge_is_unauthenticated() {
		let (resolver, repo, _, _) = setup().await;
		repo.set_status("edge-1", EdgeStatus::Disabled).await.unwrap();
		let err = resolver
			.resolve("10.0.0.2:40000".parse().unwrap())
			.await
			.unwrap_err();
		assert!(err.is_unauthenticated());
	}
}
