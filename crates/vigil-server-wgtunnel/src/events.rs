// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use vigil_server_db::TrainingEligibility;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraTransition {
	pub edge_id: String,
	pub camera_id: String,
	pub camera_name: String,
	pub old_status: TrainingEligibility,
	pub new_status: TrainingEligibility,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
	#[serde(rename = "edge.connected")]
	EdgeConnected { edge_id: String, peer_addr: String },
	#[serde(rename = "edge.disconnected")]
	EdgeDisconnected {
		edge_id: String,
		last_heartbeat: Option<DateTime<Utc>>,
	},
	#[serde(rename = "peer_connected")]
	PeerConnected {
		public_key: String,
		last_handshake: Option<DateTime<Utc>>,
		bytes_received: u64,
		bytes_sent: u64,
	},
	#[serde(rename = "peer_disconnected")]
	PeerDisconnected {
		public_key: String,
		last_handshake: Option<DateTime<Utc>>,
	},
	#[serde(rename = "camera.ready_for_training")]
	CameraReadyForTraining(CameraTransition),
	#[serde(rename = "camera.training_started")]
	CameraTrainingStarted(CameraTransition),
	#[serde(rename = "camera.needs_snapshots")]
	CameraNeedsSnapshots(CameraTransition),
}

impl DomainEvent {
	pub fn event_type(&self) -> &'static str {
		match self {
			DomainEvent::EdgeConnected { .. } => "edge.connected",
			DomainEvent::EdgeDisconnected { .. } => "edge.disconnected",
			DomainEvent::PeerConnected { .. } => "peer_connected",
			DomainEvent::PeerDisconnected { .. } => "peer_disconnected",
			DomainEvent::CameraReadyForTraining(_) => "camera.ready_for_training",
			DomainEvent::CameraTrainingStarted(_) => "camera.training_started",
			DomainEvent::CameraNeedsSnapshots(_) => "camera.needs_snapshots",
		}
	}
}

/// What subscribers receive: `{type, timestamp, ...payload}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
	pub timestamp: DateTime<Utc>,
	#[serde(flatten)]
	pub event: DomainEvent,
}

/// Fan-out of domain events. Publishing never blocks; a subscriber that
/// falls more than the channel capacity behind sees `Lagged` and loses the
/// oldest events.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EventEnvelope>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: DomainEvent) {
		trace!(event_type = event.event_type(), "publishing event");
		let _ = self.sender.send(EventEnvelope {
			timestamp: Utc::now(),
			event,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_flattens_type_and_payload() {
		let envelope = EventEnvelope {
			timestamp: Utc::now(),
			event: DomainEvent::CameraTrainingStarted(CameraTransition {
				edge_id: "edge-1".to_string(),
				camera_id: "cam-1".to_string(),
				camera_name: "Porch".to_string(),
				old_status: TrainingEligibility::ReadyForTraining,
				new_status: TrainingEligibility::TrainingInProgress,
			}),
		};

		let value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["type"], "camera.training_started");
		assert_eq!(value["camera_name"], "Porch");
		assert_eq!(value["old_status"], "ready_for_training");
		assert_eq!(value["new_status"], "training_in_progress");
		assert!(value["timestamp"].is_string());
	}

	#[test]
	fn event_type_matches_serialized_tag() {
		let event = DomainEvent::EdgeDisconnected {
			edge_id: "edge-1".to_string(),
			last_heartbeat: None,
		};
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["type"], event.event_type());
	}

	#[tokio::test]
	async fn publish_without_subscribers_is_fine() {
		let bus = EventBus::new();
		bus.publish(DomainEvent::EdgeConnected {
			edge_id: "edge-1".to_string(),
			peer_addr: "10.0.0.2:5000".to_string(),
		});

		let mut rx = bus.subscribe();
		bus.publish(DomainEvent::PeerDisconnected {
			public_key: "k".to_string(),
			last_handshake: None,
		});
		let received = rx.recv().await.unwrap();
		assert_eq!(received.event.event_type(), "peer_disconnected");
	}
}
