// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Camera capability reports and the training-eligibility state machine.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use vigil_server_db::{
	CameraCapability, CameraStatusRepository, DbError, EdgeCameraStatus, StatusTransition,
	TrainingEligibility,
};

use crate::error::{Result, TunnelError};
use crate::events::{CameraTransition, DomainEvent, EventBus};

/// The event a transition announces, if any.
pub fn event_for_transition(transition: &StatusTransition) -> Option<DomainEvent> {
	use TrainingEligibility::*;

	let payload = || CameraTransition {
		edge_id: transition.edge_id.clone(),
		camera_id: transition.camera_id.clone(),
		camera_name: transition.camera_name.clone(),
		old_status: transition.old_status,
		new_status: transition.new_status,
	};

	match (transition.old_status, transition.new_status) {
		(old, new) if old == new => None,
		(_, TrainingInProgress) => Some(DomainEvent::CameraTrainingStarted(payload())),
		(NeedsSnapshots, ReadyForTraining) => Some(DomainEvent::CameraReadyForTraining(payload())),
		(ReadyForTraining, NeedsSnapshots) => Some(DomainEvent::CameraNeedsSnapshots(payload())),
		_ => None,
	}
}

/// Persists capability reports and publishes the resulting transitions once
/// they are committed.
#[derive(Clone)]
pub struct CapabilityStore {
	repo: CameraStatusRepository,
	events: EventBus,
}

impl CapabilityStore {
	pub fn new(repo: CameraStatusRepository, events: EventBus) -> Self {
		Self { repo, events }
	}

	fn publish(&self, transitions: &[StatusTransition]) {
		for transition in transitions {
			if let Some(event) = event_for_transition(transition) {
				info!(
					edge_id = %transition.edge_id,
					camera_id = %transition.camera_id,
					from = %transition.old_status,
					to = %transition.new_status,
					"camera training eligibility changed"
				);
				self.events.publish(event);
			}
		}
	}

	#[instrument(skip(self, cameras), fields(camera_count = cameras.len()))]
	pub async fn upsert_capabilities(
		&self,
		edge_id: &str,
		cameras: &[CameraCapability],
		synced_at: DateTime<Utc>,
	) -> Result<Vec<StatusTransition>> {
		let transitions = self
			.repo
			.upsert_capabilities(edge_id, cameras, synced_at)
			.await?;
		self.publish(&transitions);
		Ok(transitions)
	}

	#[instrument(skip(self))]
	pub async fn set_training_in_progress(
		&self,
		edge_id: &str,
		camera_id: &str,
	) -> Result<Option<StatusTransition>> {
		let transition = match self.repo.set_training_in_progress(edge_id, camera_id).await {
			Ok(transition) => transition,
			Err(DbError::NotFound(what)) => return Err(TunnelError::NotFound(what)),
			Err(e) => return Err(e.into()),
		};
		if let Some(transition) = &transition {
			self.publish(std::slice::from_ref(transition));
		}
		Ok(transition)
	}

	pub async fn list_camera_statuses(&self, edge_id: &str) -> Result<Vec<EdgeCameraStatus>> {
		Ok(self.repo.list_camera_statuses(edge_id).await?)
	}

	pub async fn get_camera_status(
		&self,
		edge_id: &str,
		camera_id: &str,
	) -> Result<EdgeCameraStatus> {
		self.repo
			.get_camera_status(edge_id, camera_id)
			.await?
			.ok_or_else(|| TunnelError::NotFound(format!("camera {camera_id} on edge {edge_id}")))
	}

	pub async fn list_by_eligibility(
		&self,
		edge_id: Option<&str>,
		eligibility: TrainingEligibility,
	) -> Result<Vec<EdgeCameraStatus>> {
		Ok(self.repo.list_by_eligibility(edge_id, eligibility).await?)
	}

	pub async fn list_cameras_ready_for_training(
		&self,
		edge_id: Option<&str>,
	) -> Result<Vec<EdgeCameraStatus>> {
		self.list_by_eligibility(edge_id, TrainingEligibility::ReadyForTraining)
			.await
	}

	pub async fn list_cameras_needing_snapshots(
		&self,
		edge_id: Option<&str>,
	) -> Result<Vec<EdgeCameraStatus>> {
		self.list_by_eligibility(edge_id, TrainingEligibility::NeedsSnapshots)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use std::net::Ipv4Addr;
	use tokio::sync::broadcast::error::TryRecvError;
	use vigil_server_db::testing::create_test_pool;
	use vigil_server_db::{EdgeRepository, NewEdge};

	fn camera(id: &str, snapshot_required: bool) -> CameraCapability {
		CameraCapability {
			camera_id: id.to_string(),
			name: format!("Camera {id}"),
			camera_type: "rtsp".to_string(),
			enabled: true,
			status: "online".to_string(),
			label_counts: Default::default(),
			labeled_snapshot_count: if snapshot_required { 3 } else { 50 },
			required_snapshot_count: 50,
			snapshot_required,
		}
	}

	async fn store() -> (CapabilityStore, EventBus) {
		let pool = create_test_pool().await;
		EdgeRepository::new(pool.clone())
			.insert_edge(&NewEdge {
				edge_id: "edge-1".to_string(),
				name: "Garage".to_string(),
				wireguard_public_key: "k".to_string(),
				tunnel_address: Ipv4Addr::new(10, 0, 0, 2),
			})
			.await
			.unwrap();
		let events = EventBus::new();
		(
			CapabilityStore::new(CameraStatusRepository::new(pool), events.clone()),
			events,
		)
	}

	fn transition(old: TrainingEligibility, new: TrainingEligibility) -> StatusTransition {
		StatusTransition {
			edge_id: "edge-1".to_string(),
			camera_id: "cam-1".to_string(),
			camera_name: "Porch".to_string(),
			old_status: old,
			new_status: new,
		}
	}

	fn eligibility() -> impl Strategy<Value = TrainingEligibility> {
		prop_oneof![
			Just(TrainingEligibility::NeedsSnapshots),
			Just(TrainingEligibility::ReadyForTraining),
			Just(TrainingEligibility::TrainingInProgress),
		]
	}

	#[test]
	fn mapping_covers_the_three_named_transitions() {
		use TrainingEligibility::*;
		let name = |old, new| event_for_transition(&transition(old, new)).map(|e| e.event_type());

		assert_eq!(
			name(NeedsSnapshots, ReadyForTraining),
			Some("camera.ready_for_training")
		);
		assert_eq!(
			name(ReadyForTraining, NeedsSnapshots),
			Some("camera.needs_snapshots")
		);
		assert_eq!(
			name(NeedsSnapshots, TrainingInProgress),
			Some("camera.training_started")
		);
		assert_eq!(name(TrainingInProgress, ReadyForTraining), None);
		assert_eq!(name(TrainingInProgress, NeedsSnapshots), None);
	}

	proptest! {
		#[test]
		fn entering_training_always_announces_start(old in eligibility()) {
			let event = event_for_transition(&transition(old, TrainingEligibility::TrainingInProgress));
			if old == TrainingEligibility::TrainingInProgress {
				prop_assert!(event.is_none());
			} else {
				prop_assert_eq!(event.map(|e| e.event_type()), Some("camera.training_started"));
			}
		}

		#[test]
		fn no_change_means_no_event(status in eligibility()) {
			prop_assert!(event_for_transition(&transition(status, status)).is_none());
		}
	}

	#[tokio::test]
	async fn oscillating_reports_publish_two_events() {
		let (store, events) = store().await;
		let mut rx = events.subscribe();
		let now = Utc::now();

		store
			.upsert_capabilities("edge-1", &[camera("cam-1", true)], now)
			.await
			.unwrap();
		store
			.upsert_capabilities("edge-1", &[camera("cam-1", false)], now)
			.await
			.unwrap();
		store
			.upsert_capabilities("edge-1", &[camera("cam-1", true)], now)
			.await
			.unwrap();

		assert_eq!(
			rx.try_recv().unwrap().event.event_type(),
			"camera.ready_for_training"
		);
		assert_eq!(
			rx.try_recv().unwrap().event.event_type(),
			"camera.needs_snapshots"
		);
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
	}

	#[tokio::test]
	async fn empty_report_is_a_no_op() {
		let (store, _) = store().await;
		let transitions = store
			.upsert_capabilities("edge-1", &[], Utc::now())
			.await
			.unwrap();
		assert!(transitions.is_empty());
		assert!(store.list_camera_statuses("edge-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn training_request_publishes_once() {
		let (store, events) = store().await;
		store
			.upsert_capabilities("edge-1", &[camera("cam-1", false)], Utc::now())
			.await
			.unwrap();
		let mut rx = events.subscribe();

		let transition = store
			.set_training_in_progress("edge-1", "cam-1")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(transition.old_status, TrainingEligibility::ReadyForTraining);
		assert!(store
			.set_training_in_progress("edge-1", "cam-1")
			.await
			.unwrap()
			.is_none());

		let envelope = rx.try_recv().unwrap();
		assert_eq!(envelope.event.event_type(), "camera.training_started");
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
	}

	#[tokio::test]
	async fn training_request_for_unknown_camera_is_not_found() {
		let (store, _) = store().await;
		assert!(matches!(
			store.set_training_in_progress("edge-1", "cam-9").await,
			Err(TunnelError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn eligibility_queries_split_cameras() {
		let (store, _) = store().await;
		store
			.upsert_capabilities(
				"edge-1",
				&[camera("cam-1", false), camera("cam-2", true)],
				Utc::now(),
			)
			.await
			.unwrap();

		let ready = store.list_cameras_ready_for_training(None).await.unwrap();
		assert_eq!(ready.len(), 1);
		assert_eq!(ready[0].camera_id, "cam-1");

		let needing = store
			.list_cameras_needing_snapshots(Some("edge-1"))
			.await
			.unwrap();
		assert_eq!(needing.len(), 1);
		assert_eq!(needing[0].camera_id, "cam-2");

		let status = store.get_camera_status("edge-1", "cam-2").await.unwrap();
		assert!(status.snapshot_required);
	}
}
