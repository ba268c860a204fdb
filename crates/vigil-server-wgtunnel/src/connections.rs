// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RPC-level liveness of edges.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug)]
struct ConnectionState {
	peer_addr: SocketAddr,
	last_call: DateTime<Utc>,
	last_heartbeat: Option<DateTime<Utc>>,
	last_telemetry: Option<DateTime<Utc>>,
	latency: Option<Duration>,
	connection_count: u64,
}

struct EdgeConnection {
	edge_id: String,
	connected_at: DateTime<Utc>,
	state: parking_lot::RwLock<ConnectionState>,
}

impl EdgeConnection {
	fn snapshot(&self) -> ConnectionSnapshot {
		let state = self.state.read();
		ConnectionSnapshot {
			edge_id: self.edge_id.clone(),
			peer_addr: state.peer_addr.to_string(),
			connected_at: self.connected_at,
			last_call: state.last_call,
			last_heartbeat: state.last_heartbeat,
			last_telemetry: state.last_telemetry,
			latency_ms: state.latency.map(|l| l.as_secs_f64() * 1000.0),
			connection_count: state.connection_count,
		}
	}

	fn count_call(&self, peer_addr: SocketAddr, at: DateTime<Utc>) {
		let mut state = self.state.write();
		state.peer_addr = peer_addr;
		state.connection_count += 1;
		state.last_call = state.last_call.max(at);
	}

	/// The instant liveness is measured from: the latest heartbeat or call.
	fn reference_time(&self) -> DateTime<Utc> {
		let state = self.state.read();
		state
			.last_heartbeat
			.map_or(state.last_call, |heartbeat| heartbeat.max(state.last_call))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConnectionSnapshot {
	pub edge_id: String,
	pub peer_addr: String,
	pub connected_at: DateTime<Utc>,
	pub last_call: DateTime<Utc>,
	pub last_heartbeat: Option<DateTime<Utc>>,
	pub last_telemetry: Option<DateTime<Utc>>,
	pub latency_ms: Option<f64>,
	pub connection_count: u64,
}

/// Live connection table keyed by edge id.
#[derive(Default)]
pub struct ConnectionRegistry {
	connections: RwLock<HashMap<String, Arc<EdgeConnection>>>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count an authenticated call. Returns true when this call created the
	/// connection.
	pub async fn touch(&self, edge_id: &str, peer_addr: SocketAddr, now: DateTime<Utc>) -> bool {
		if let Some(conn) = self.connections.read().await.get(edge_id) {
			conn.count_call(peer_addr, now);
			return false;
		}

		let mut connections = self.connections.write().await;
		// Another call may have won the race between the two locks.
		if let Some(conn) = connections.get(edge_id) {
			conn.count_call(peer_addr, now);
			return false;
		}

		connections.insert(
			edge_id.to_string(),
			Arc::new(EdgeConnection {
				edge_id: edge_id.to_string(),
				connected_at: now,
				state: parking_lot::RwLock::new(ConnectionState {
					peer_addr,
					last_call: now,
					last_heartbeat: None,
					last_telemetry: None,
					latency: None,
					connection_count: 1,
				}),
			}),
		);
		debug!(edge_id, %peer_addr, "edge connection opened");
		true
	}

	/// Record a heartbeat received at `at`.
	///
	/// Returns false if the edge has no connection or if `at` is older than
	/// the heartbeat already recorded.
	pub async fn record_heartbeat(
		&self,
		edge_id: &str,
		at: DateTime<Utc>,
		latency: Option<Duration>,
	) -> bool {
		let connections = self.connections.read().await;
		let Some(conn) = connections.get(edge_id) else {
			return false;
		};
		let mut state = conn.state.write();
		if state.last_heartbeat.is_some_and(|last| at < last) {
			debug!(edge_id, "stale heartbeat ignored");
			return false;
		}
		state.last_heartbeat = Some(at);
		if latency.is_some() {
			state.latency = latency;
		}
		true
	}

	pub async fn record_telemetry(&self, edge_id: &str, at: DateTime<Utc>) -> bool {
		let connections = self.connections.read().await;
		let Some(conn) = connections.get(edge_id) else {
			return false;
		};
		let mut state = conn.state.write();
		if state.last_telemetry.is_some_and(|last| at < last) {
			return false;
		}
		state.last_telemetry = Some(at);
		true
	}

	/// Remove every connection whose reference time is more than `timeout`
	/// before `now`, returning what was removed.
	pub async fn expire_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ConnectionSnapshot> {
		let Ok(timeout) = chrono::Duration::from_std(timeout) else {
			return Vec::new();
		};

		let mut connections = self.connections.write().await;
		let stale: Vec<String> = connections
			.values()
			.filter(|conn| now.signed_duration_since(conn.reference_time()) > timeout)
			.map(|conn| conn.edge_id.clone())
			.collect();

		let mut removed: Vec<ConnectionSnapshot> = stale
			.iter()
			.filter_map(|id| connections.remove(id))
			.map(|conn| conn.snapshot())
			.collect();
		removed.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));
		removed
	}

	pub async fn get(&self, edge_id: &str) -> Option<ConnectionSnapshot> {
		self.connections.read().await.get(edge_id).map(|c| c.snapshot())
	}

	pub async fn list(&self) -> Vec<ConnectionSnapshot> {
		let connections = self.connections.read().await;
		let mut snapshots: Vec<ConnectionSnapshot> =
			connections.values().map(|c| c.snapshot()).collect();
		snapshots.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));
		snapshots
	}

	pub async fn connected_edges(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
		ids.sort();
		ids
	}

	pub async fn len(&self) -> usize {
		self.connections.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}
}
