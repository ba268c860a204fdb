// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
	Active,
	Disabled,
}

impl EdgeStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			EdgeStatus::Active => "active",
			EdgeStatus::Disabled => "disabled",
		}
	}
}

impl fmt::Display for EdgeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EdgeStatus {
	type Err = DbError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"active" => Ok(EdgeStatus::Active),
			"disabled" => Ok(EdgeStatus::Disabled),
			other => Err(DbError::Internal(format!("unknown edge status '{other}'"))),
		}
	}
}

/// A registered edge appliance. Rows are never deleted; disabling an edge is
/// a status change.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EdgeRecord {
	pub edge_id: String,
	pub name: String,
	/// Base64 WireGuard public key, unique across edges.
	pub wireguard_public_key: String,
	#[schema(value_type = String, example = "10.0.0.17")]
	pub tunnel_address: Ipv4Addr,
	pub endpoint: Option<String>,
	pub status: EdgeStatus,
	pub last_seen: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl EdgeRecord {
	pub fn is_active(&self) -> bool {
		self.status == EdgeStatus::Active
	}
}

#[derive(Debug, Clone)]
pub struct NewEdge {
	pub edge_id: String,
	pub name: String,
	pub wireguard_public_key: String,
	pub tunnel_address: Ipv4Addr,
}

/// Per-camera training readiness.
///
/// `NeedsSnapshots` and `ReadyForTraining` follow the edge's reports.
/// `TrainingInProgress` is only entered through an explicit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrainingEligibility {
	NeedsSnapshots,
	ReadyForTraining,
	TrainingInProgress,
}

impl TrainingEligibility {
	pub fn as_str(&self) -> &'static str {
		match self {
			TrainingEligibility::NeedsSnapshots => "needs_snapshots",
			TrainingEligibility::ReadyForTraining => "ready_for_training",
			TrainingEligibility::TrainingInProgress => "training_in_progress",
		}
	}

	/// Status implied by a capability report.
	pub fn from_report(snapshot_required: bool) -> Self {
		if snapshot_required {
			TrainingEligibility::NeedsSnapshots
		} else {
			TrainingEligibility::ReadyForTraining
		}
	}
}

impl fmt::Display for TrainingEligibility {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TrainingEligibility {
	type Err = DbError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"needs_snapshots" => Ok(TrainingEligibility::NeedsSnapshots),
			"ready_for_training" => Ok(TrainingEligibility::ReadyForTraining),
			"training_in_progress" => Ok(TrainingEligibility::TrainingInProgress),
			other => Err(DbError::Internal(format!(
				"unknown training eligibility '{other}'"
			))),
		}
	}
}

/// One camera as reported by an edge during a capability sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CameraCapability {
	pub camera_id: String,
	pub name: String,
	#[serde(rename = "type")]
	pub camera_type: String,
	#[serde(default)]
	pub enabled: bool,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub label_counts: BTreeMap<String, u32>,
	#[serde(default)]
	pub labeled_snapshot_count: u32,
	#[serde(default)]
	pub required_snapshot_count: u32,
	#[serde(default)]
	pub snapshot_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EdgeCameraStatus {
	pub edge_id: String,
	pub camera_id: String,
	pub name: String,
	#[serde(rename = "type")]
	pub camera_type: String,
	pub status: String,
	pub enabled: bool,
	pub label_counts: BTreeMap<String, u32>,
	pub labeled_snapshot_count: u32,
	pub required_snapshot_count: u32,
	pub snapshot_required: bool,
	pub training_eligibility_status: TrainingEligibility,
	pub synced_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// A change of training eligibility observed while writing camera status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
	pub edge_id: String,
	pub camera_id: String,
	pub camera_name: String,
	pub old_status: TrainingEligibility,
	pub new_status: TrainingEligibility,
}

pub(crate) fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|_| DbError::Internal(format!("Invalid {field}: {value}")))
}
