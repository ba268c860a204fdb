// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::types::{RunStatus, TriggerSource};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JobHealthStatus {
	pub job_id: String,
	pub name: String,
	pub status: HealthState,
	pub last_run: Option<LastRunInfo>,
	pub consecutive_failures: u32,
	pub total_runs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunInfo {
	pub run_id: u64,
	pub status: RunStatus,
	pub triggered_by: TriggerSource,
	pub started_at: DateTime<Utc>,
	pub duration_ms: i64,
	pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsHealthStatus {
	pub status: HealthState,
	pub jobs: Vec<JobHealthStatus>,
}

/// Per-job run bookkeeping kept by the scheduler.
#[derive(Debug, Default)]
pub(crate) struct RunHistory {
	pub last_run: Option<LastRunInfo>,
	pub consecutive_failures: u32,
	pub total_runs: u64,
}

impl RunHistory {
	pub fn record(&mut self, run: LastRunInfo) {
		match run.status {
			RunStatus::Succeeded => self.consecutive_failures = 0,
			RunStatus::Failed | RunStatus::TimedOut => self.consecutive_failures += 1,
			RunStatus::Cancelled => {}
		}
		self.total_runs += 1;
		self.last_run = Some(run);
	}
}

pub(crate) fn determine_health_state(consecutive_failures: u32) -> HealthState {
	match consecutive_failures {
		0 => HealthState::Healthy,
		1..=2 => HealthState::Degraded,
		_ => HealthState::Unhealthy,
	}
}

pub(crate) fn worst(states: impl IntoIterator<Item = HealthState>) -> HealthState {
	states
		.into_iter()
		.fold(HealthState::Healthy, |acc, state| match (acc, state) {
			(HealthState::Unhealthy, _) | (_, HealthState::Unhealthy) => HealthState::Unhealthy,
			(HealthState::Degraded, _) | (_, HealthState::Degraded) => HealthState::Degraded,
			_ => HealthState::Healthy,
		})
}
