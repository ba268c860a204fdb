// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Camera capability snapshots and training eligibility.
//!
//! Writes return the [`StatusTransition`]s they caused instead of publishing
//! anything, so callers can emit events strictly after the transaction commits.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::error::{DbError, Result};
use crate::types::{
	parse_timestamp, CameraCapability, EdgeCameraStatus, StatusTransition, TrainingEligibility,
};

const STATUS_COLUMNS: &str = "edge_id, camera_id, camera_name, camera_type, camera_status, enabled, label_counts, labeled_snapshot_count, required_snapshot_count, snapshot_required, training_eligibility_status, synced_at, updated_at";

#[derive(Clone)]
pub struct CameraStatusRepository {
	pool: SqlitePool,
}

impl CameraStatusRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Upsert every reported camera in one transaction.
	///
	/// A transition is returned for each camera that already had a row whose
	/// eligibility differs from the one implied by the new report. Cameras
	/// seen for the first time produce no transition.
	#[tracing::instrument(skip(self, cameras), fields(camera_count = cameras.len()))]
	pub async fn upsert_capabilities(
		&self,
		edge_id: &str,
		cameras: &[CameraCapability],
		synced_at: DateTime<Utc>,
	) -> Result<Vec<StatusTransition>> {
		if cameras.is_empty() {
			return Ok(Vec::new());
		}

		let mut tx = self.pool.begin().await?;

		let rows: Vec<(String, String)> = sqlx::query_as(
			"SELECT camera_id, training_eligibility_status FROM edge_camera_status WHERE edge_id = ?",
		)
		.bind(edge_id)
		.fetch_all(&mut *tx)
		.await?;

		let mut previous: HashMap<String, TrainingEligibility> = HashMap::with_capacity(rows.len());
		for (camera_id, status) in rows {
			previous.insert(camera_id, status.parse()?);
		}

		let now = Utc::now().to_rfc3339();
		let mut transitions = Vec::new();

		for camera in cameras {
			let new_status = TrainingEligibility::from_report(camera.snapshot_required);
			let label_counts = serde_json::to_string(&camera.label_counts)?;

			sqlx::query(
				"INSERT INTO edge_camera_status (
					edge_id, camera_id, camera_name, camera_type, camera_status, enabled,
					label_counts, labeled_snapshot_count, required_snapshot_count,
					snapshot_required, training_eligibility_status, synced_at, updated_at
				) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
				ON CONFLICT(edge_id, camera_id) DO UPDATE SET
					camera_name = excluded.camera_name,
					camera_type = excluded.camera_type,
					camera_status = excluded.camera_status,
					enabled = excluded.enabled,
					label_counts = excluded.label_counts,
					labeled_snapshot_count = excluded.labeled_snapshot_count,
					required_snapshot_count = excluded.required_snapshot_count,
					snapshot_required = excluded.snapshot_required,
					training_eligibility_status = excluded.training_eligibility_status,
					synced_at = excluded.synced_at,
					updated_at = excluded.updated_at",
			)
			.bind(edge_id)
			.bind(&camera.camera_id)
			.bind(&camera.name)
			.bind(&camera.camera_type)
			.bind(&camera.status)
			.bind(camera.enabled)
			.bind(label_counts)
			.bind(camera.labeled_snapshot_count as i64)
			.bind(camera.required_snapshot_count as i64)
			.bind(camera.snapshot_required)
			.bind(new_status.as_str())
			.bind(synced_at.to_rfc3339())
			.bind(&now)
			.execute(&mut *tx)
			.await?;

			// Track what was just written so a camera repeated within one
			// report is compared against its own earlier entry.
			if let Some(old_status) = previous.insert(camera.camera_id.clone(), new_status) {
				if old_status != new_status {
					transitions.push(StatusTransition {
						edge_id: edge_id.to_string(),
						camera_id: camera.camera_id.clone(),
						camera_name: camera.name.clone(),
						old_status,
						new_status,
					});
				}
			}
		}

		tx.commit().await?;

		tracing::debug!(
			edge_id,
			transitions = transitions.len(),
			"camera capabilities synced"
		);
		Ok(transitions)
	}

	/// Mark a camera as training. Returns the transition if the status changed.
	#[tracing::instrument(skip(self))]
	pub async fn set_training_in_progress(
		&self,
		edge_id: &str,
		camera_id: &str,
	) -> Result<Option<StatusTransition>> {
		let mut tx = self.pool.begin().await?;

		let row: Option<(String, String)> = sqlx::query_as(
			"SELECT camera_name, training_eligibility_status FROM edge_camera_status
			 WHERE edge_id = ? AND camera_id = ?",
		)
		.bind(edge_id)
		.bind(camera_id)
		.fetch_optional(&mut *tx)
		.await?;

		let Some((camera_name, status)) = row else {
			return Err(DbError::NotFound(format!(
				"camera {camera_id} on edge {edge_id}"
			)));
		};

		let old_status: TrainingEligibility = status.parse()?;
		let new_status = TrainingEligibility::TrainingInProgress;
		if old_status == new_status {
			return Ok(None);
		}

		sqlx::query(
			"UPDATE edge_camera_status SET training_eligibility_status = ?, updated_at = ?
			 WHERE edge_id = ? AND camera_id = ?",
		)
		.bind(new_status.as_str())
		.bind(Utc::now().to_rfc3339())
		.bind(edge_id)
		.bind(camera_id)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(Some(StatusTransition {
			edge_id: edge_id.to_string(),
			camera_id: camera_id.to_string(),
			camera_name,
			old_status,
			new_status,
		}))
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_camera_statuses(&self, edge_id: &str) -> Result<Vec<EdgeCameraStatus>> {
		let rows = sqlx::query_as::<_, CameraStatusRow>(&format!(
			"SELECT {STATUS_COLUMNS} FROM edge_camera_status WHERE edge_id = ? ORDER BY camera_name, camera_id"
		))
		.bind(edge_id)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_camera_status(
		&self,
		edge_id: &str,
		camera_id: &str,
	) -> Result<Option<EdgeCameraStatus>> {
		let row = sqlx::query_as::<_, CameraStatusRow>(&format!(
			"SELECT {STATUS_COLUMNS} FROM edge_camera_status WHERE edge_id = ? AND camera_id = ?"
		))
		.bind(edge_id)
		.bind(camera_id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	/// Cameras in the given state, across all edges or limited to one.
	#[tracing::instrument(skip(self), fields(%eligibility))]
	pub async fn list_by_eligibility(
		&self,
		edge_id: Option<&str>,
		eligibility: TrainingEligibility,
	) -> Result<Vec<EdgeCameraStatus>> {
		let rows = sqlx::query_as::<_, CameraStatusRow>(&format!(
			"SELECT {STATUS_COLUMNS} FROM edge_camera_status
			 WHERE training_eligibility_status = ? AND (? IS NULL OR edge_id = ?)
			 ORDER BY edge_id, camera_name, camera_id"
		))
		.bind(eligibility.as_str())
		.bind(edge_id)
		.bind(edge_id)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}
}

#[derive(sqlx::FromRow)]
struct CameraStatusRow {
	edge_id: String,
	camera_id: String,
	camera_name: String,
	camera_type: String,
	camera_status: String,
	enabled: bool,
	label_counts: String,
	labeled_snapshot_count: i64,
	required_snapshot_count: i64,
	snapshot_required: bool,
	training_eligibility_status: String,
	synced_at: String,
	updated_at: String,
}

impl TryFrom<CameraStatusRow> for EdgeCameraStatus {
	type Error = DbError;

	fn try_from(row: CameraStatusRow) -> Result<Self> {
		let label_counts: BTreeMap<String, u32> = serde_json::from_str(&row.label_counts)?;

		Ok(EdgeCameraStatus {
			training_eligibility_status: row.training_eligibility_status.parse()?,
			synced_at: parse_timestamp(&row.synced_at, "synced_at")?,
			updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
			edge_id: row.edge_id,
			camera_id: row.camera_id,
			name: row.camera_name,
			camera_type: row.camera_type,
			status: row.camera_status,
			enabled: row.enabled,
			label_counts,
			labeled_snapshot_count: row.labeled_snapshot_count.max(0) as u32,
			required_snapshot_count: row.required_snapshot_count.max(0) as u32,
			snapshot_required: row.snapshot_required,
		})
	}
}
