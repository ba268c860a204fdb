// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Message types of the `edge.v1` RPC services.
//!
//! Fields follow proto3 conventions: absent strings are empty and absent
//! numbers are zero, so every request body may omit what it does not use.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vigil_server_db::CameraCapability;

/// An event produced on the edge, for example a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EdgeEvent {
	#[serde(default)]
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(default)]
	pub camera_id: String,
	/// Unix nanoseconds on the edge clock.
	#[serde(default)]
	pub timestamp: i64,
	#[serde(default)]
	#[schema(value_type = Object)]
	pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendEventRequest {
	pub event: EdgeEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SendEventResponse {
	pub success: bool,
	#[serde(default)]
	pub event_id: String,
	#[serde(default)]
	pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendEventsRequest {
	#[serde(default)]
	pub events: Vec<EdgeEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SendEventsResponse {
	pub success: bool,
	#[serde(default)]
	pub received_count: u32,
	#[serde(default)]
	pub event_ids: Vec<String>,
	#[serde(default)]
	pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TelemetryData {
	#[serde(default)]
	pub collected_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub metrics: BTreeMap<String, f64>,
	#[serde(default)]
	pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendTelemetryRequest {
	#[serde(default)]
	pub telemetry: TelemetryData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SendTelemetryResponse {
	pub success: bool,
	#[serde(default)]
	pub error_message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
	/// Unix nanoseconds on the edge clock; zero skips latency estimation.
	#[serde(default)]
	pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatResponse {
	pub success: bool,
	/// Unix nanoseconds on the gateway clock.
	pub server_timestamp: i64,
	#[serde(default)]
	pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GetConfigRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GetConfigResponse {
	pub success: bool,
	pub config_json: String,
	#[serde(default)]
	pub error_message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateConfigRequest {
	#[serde(default)]
	pub config_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RestartServiceRequest {
	#[serde(default)]
	pub service_name: String,
}

/// Shared shape of `UpdateConfig`, `RestartService` and `SyncCapabilities`
/// responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AckResponse {
	pub success: bool,
	#[serde(default)]
	pub error_message: String,
}

impl AckResponse {
	pub fn ok() -> Self {
		Self {
			success: true,
			error_message: String::new(),
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			success: false,
			error_message: message.into(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncCapabilitiesRequest {
	/// When the edge took the snapshot. Defaults to the time of receipt.
	#[serde(default)]
	pub synced_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub cameras: Vec<CameraCapability>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sparse_requests_deserialize() {
		let heartbeat: HeartbeatRequest = serde_json::from_str("{}").unwrap();
		assert_eq!(heartbeat.timestamp, 0);

		let event: SendEventRequest =
			serde_json::from_str(r#"{"event": {"type": "motion"}}"#).unwrap();
		assert_eq!(event.event.event_type, "motion");
		assert!(event.event.id.is_empty());

		let sync: SyncCapabilitiesRequest = serde_json::from_str(
			r#"{"cameras": [{"camera_id": "cam-1", "name": "Porch", "type": "rtsp", "snapshot_required": true}]}"#,
		)
		.unwrap();
		assert!(sync.synced_at.is_none());
		assert!(sync.cameras[0].snapshot_required);
	}
}
