// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Edge repository: durable identities created by registration.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::error::{DbError, Result};
use crate::types::{parse_timestamp, EdgeRecord, EdgeStatus, NewEdge};

const EDGE_COLUMNS: &str = "edge_id, name, wireguard_public_key, tunnel_address, endpoint, status, last_seen, created_at, updated_at";

#[derive(Clone)]
pub struct EdgeRepository {
	pool: SqlitePool,
}

impl EdgeRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, edge), fields(edge_id = %edge.edge_id, address = %edge.tunnel_address))]
	pub async fn insert_edge(&self, edge: &NewEdge) -> Result<EdgeRecord> {
		let now = Utc::now();
		sqlx::query(
			"INSERT INTO edges (edge_id, name, wireguard_public_key, tunnel_address, status, last_seen, created_at, updated_at)
			 VALUES (?, ?, ?, ?, 'active', ?, ?, ?)",
		)
		.bind(&edge.edge_id)
		.bind(&edge.name)
		.bind(&edge.wireguard_public_key)
		.bind(edge.tunnel_address.to_string())
		.bind(now.to_rfc3339())
		.bind(now.to_rfc3339())
		.bind(now.to_rfc3339())
		.execute(&self.pool)
		.await
		.map_err(|e| DbError::from_insert(e, format!("edge {} already registered", edge.edge_id)))?;

		Ok(EdgeRecord {
			edge_id: edge.edge_id.clone(),
			name: edge.name.clone(),
			wireguard_public_key: edge.wireguard_public_key.clone(),
			tunnel_address: edge.tunnel_address,
			endpoint: None,
			status: EdgeStatus::Active,
			last_seen: Some(now),
			created_at: now,
			updated_at: now,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_edge(&self, edge_id: &str) -> Result<Option<EdgeRecord>> {
		let row = sqlx::query_as::<_, EdgeRow>(&format!(
			"SELECT {EDGE_COLUMNS} FROM edges WHERE edge_id = ?"
		))
		.bind(edge_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[tracing::instrument(skip(self, public_key))]
	pub async fn get_edge_by_public_key(&self, public_key: &str) -> Result<Option<EdgeRecord>> {
		let row = sqlx::query_as::<_, EdgeRow>(&format!(
			"SELECT {EDGE_COLUMNS} FROM edges WHERE wireguard_public_key = ?"
		))
		.bind(public_key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_edges(&self) -> Result<Vec<EdgeRecord>> {
		let rows = sqlx::query_as::<_, EdgeRow>(&format!(
			"SELECT {EDGE_COLUMNS} FROM edges ORDER BY created_at, edge_id"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_active_edges(&self) -> Result<Vec<EdgeRecord>> {
		let rows = sqlx::query_as::<_, EdgeRow>(&format!(
			"SELECT {EDGE_COLUMNS} FROM edges WHERE status = 'active' ORDER BY created_at, edge_id"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Addresses held by any edge, active or not, so a disabled edge keeps its
	/// slot if it is re-enabled.
	#[tracing::instrument(skip(self))]
	pub async fn list_tunnel_addresses(&self) -> Result<Vec<Ipv4Addr>> {
		let rows: Vec<(String,)> = sqlx::query_as("SELECT tunnel_address FROM edges")
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter()
			.map(|(addr,)| {
				addr.parse()
					.map_err(|_| DbError::Internal(format!("Invalid tunnel_address: {addr}")))
			})
			.collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn touch_last_seen(&self, edge_id: &str, at: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("UPDATE edges SET last_seen = ?, updated_at = ? WHERE edge_id = ?")
			.bind(at.to_rfc3339())
			.bind(at.to_rfc3339())
			.bind(edge_id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self), fields(%status))]
	pub async fn set_status(&self, edge_id: &str, status: EdgeStatus) -> Result<u64> {
		let result = sqlx::query("UPDATE edges SET status = ?, updated_at = ? WHERE edge_id = ?")
			.bind(status.as_str())
			.bind(Utc::now().to_rfc3339())
			.bind(edge_id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	/// Record the most recent outer endpoint observed for a peer.
	#[tracing::instrument(skip(self, public_key), fields(%endpoint))]
	pub async fn update_endpoint(&self, public_key: &str, endpoint: &str) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE edges SET endpoint = ? WHERE wireguard_public_key = ? AND (endpoint IS NULL OR endpoint != ?)",
		)
		.bind(endpoint)
		.bind(public_key)
		.bind(endpoint)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}
}

/// Storage seam used by registration and caller resolution.
#[async_trait]
pub trait EdgeStore: Send + Sync {
	async fn insert_edge(&self, edge: &NewEdge) -> Result<EdgeRecord>;
	async fn get_edge(&self, edge_id: &str) -> Result<Option<EdgeRecord>>;
	async fn get_edge_by_public_key(&self, public_key: &str) -> Result<Option<EdgeRecord>>;
	async fn list_edges(&self) -> Result<Vec<EdgeRecord>>;
	async fn list_active_edges(&self) -> Result<Vec<EdgeRecord>>;
	async fn list_tunnel_addresses(&self) -> Result<Vec<Ipv4Addr>>;
	async fn touch_last_seen(&self, edge_id: &str, at: DateTime<Utc>) -> Result<u64>;
	async fn set_status(&self, edge_id: &str, status: EdgeStatus) -> Result<u64>;
	async fn update_endpoint(&self, public_key: &str, endpoint: &str) -> Result<u64>;
}

#[async_trait]
impl EdgeStore for EdgeRepository {
	async fn insert_edge(&self, edge: &NewEdge) -> Result<EdgeRecord> {
		self.insert_edge(edge).await
	}

	async fn get_edge(&self, edge_id: &str) -> Result<Option<EdgeRecord>> {
		self.get_edge(edge_id).await
	}

	async fn get_edge_by_public_key(&self, public_key: &str) -> Result<Option<EdgeRecord>> {
		self.get_edge_by_public_key(public_key).await
	}

	async fn list_edges(&self) -> Result<Vec<EdgeRecord>> {
		self.list_edges().await
	}

	async fn list_active_edges(&self) -> Result<Vec<EdgeRecord>> {
		self.list_active_edges().await
	}

	async fn list_tunnel_addresses(&self) -> Result<Vec<Ipv4Addr>> {
		self.list_tunnel_addresses().await
	}

	async fn touch_last_seen(&self, edge_id: &str, at: DateTime<Utc>) -> Result<u64> {
		self.touch_last_seen(edge_id, at).await
	}

	async fn set_status(&self, edge_id: &str, status: EdgeStatus) -> Result<u64> {
		self.set_status(edge_id, status).await
	}

	async fn update_endpoint(&self, public_key: &str, endpoint: &str) -> Result<u64> {
		self.update_endpoint(public_key, endpoint).await
	}
}

#[derive(sqlx::FromRow)]
struct EdgeRow {
	edge_id: String,
	name: String,
	wireguard_public_key: String,
	tunnel_address: String,
	endpoint: Option<String>,
	status: String,
	last_seen: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<EdgeRow> for EdgeRecord {
	type Error = DbError;

	fn try_from(row: EdgeRow) -> Result<Self> {
		Ok(EdgeRecord {
			tunnel_address: row.tunnel_address.parse().map_err(|_| {
				DbError::Internal(format!("Invalid tunnel_address: {}", row.tunnel_address))
			})?,
			status: row.status.parse()?,
			last_seen: row
				.last_seen
				.as_deref()
				.map(|s| parse_timestamp(s, "last_seen"))
				.transpose()?,
			created_at: parse_timestamp(&row.created_at, "created_at")?,
			updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
			edge_id: row.edge_id,
			name: row.name,
			wireguard_public_key: row.wireguard_public_key,
			endpoint: row.endpoint,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn new_edge(id: &str, key: &str, last_octet: u8) -> NewEdge {
		NewEdge {
			edge_id: id.to_string(),
			name: format!("{id} appliance"),
			wireguard_public_key: key.to_string(),
			tunnel_address: Ipv4Addr::new(10, 0, 0, last_octet),
		}
	}

	#[tokio::test]
	async fn insert_and_fetch_by_id_and_key() {
		let repo = EdgeRepository::new(create_test_pool().await);
		let inserted = repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();
		assert_eq!(inserted.status, EdgeStatus::Active);

		let by_id = repo.get_edge("edge-a").await.unwrap().unwrap();
		assert_eq!(by_id.wireguard_public_key, "key-a");
		assert_eq!(by_id.tunnel_address, Ipv4Addr::new(10, 0, 0, 10));

		let by_key = repo.get_edge_by_public_key("key-a").await.unwrap().unwrap();
		assert_eq!(by_key.edge_id, "edge-a");

		assert!(repo.get_edge("edge-missing").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn duplicate_public_key_is_conflict() {
		let repo = EdgeRepository::new(create_test_pool().await);
		repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();

		let err = repo.insert_edge(&new_edge("edge-b", "key-a", 11)).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn duplicate_address_is_conflict() {
		let repo = EdgeRepository::new(create_test_pool().await);
		repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();

		let err = repo.insert_edge(&new_edge("edge-b", "key-b", 10)).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn disabled_edges_leave_active_list_but_keep_address() {
		let repo = EdgeRepository::new(create_test_pool().await);
		repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();
		repo.insert_edge(&new_edge("edge-b", "key-b", 11)).await.unwrap();

		assert_eq!(repo.set_status("edge-a", EdgeStatus::Disabled).await.unwrap(), 1);

		let active = repo.list_active_edges().await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].edge_id, "edge-b");

		let mut addresses = repo.list_tunnel_addresses().await.unwrap();
		addresses.sort();
		assert_eq!(
			addresses,
			vec![Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 11)]
		);
		assert_eq!(repo.list_edges().await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn touch_last_seen_updates_row() {
		let repo = EdgeRepository::new(create_test_pool().await);
		repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();

		let later = Utc::now() + chrono::Duration::minutes(5);
		assert_eq!(repo.touch_last_seen("edge-a", later).await.unwrap(), 1);
		assert_eq!(repo.touch_last_seen("edge-missing", later).await.unwrap(), 0);

		let edge = repo.get_edge("edge-a").await.unwrap().unwrap();
		assert_eq!(
			edge.last_seen.unwrap().timestamp_millis(),
			later.timestamp_millis()
		);
	}

	#[tokio::test]
	async fn endpoint_updates_only_on_change() {
		let repo = EdgeRepository::new(create_test_pool().await);
		repo.insert_edge(&new_edge("edge-a", "key-a", 10)).await.unwrap();

		assert_eq!(repo.update_endpoint("key-a", "203.0.113.5:40000").await.unwrap(), 1);
		assert_eq!(repo.update_endpoint("key-a", "203.0.113.5:40000").await.unwrap(), 0);

		let edge = repo.get_edge("edge-a").await.unwrap().unwrap();
		assert_eq!(edge.endpoint.as_deref(), Some("203.0.113.5:40000"));
	}
}
