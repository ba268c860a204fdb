// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{
	determine_health_state, worst, JobHealthStatus, JobsHealthStatus, LastRunInfo, RunHistory,
};
use crate::job::Job;
use crate::types::{RunStatus, TriggerSource};
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
	cancellation_token: CancellationToken,
	history: Arc<SyncMutex<RunHistory>>,
}

/// Runs registered jobs on fixed intervals until shut down.
///
/// A run that fails is logged and recorded; the next tick runs the job again.
/// Each run is bounded by the job's interval so a stuck run cannot stack up
/// behind itself.
pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	next_run_id: Arc<AtomicU64>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl JobScheduler {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			next_run_id: Arc::new(AtomicU64::new(1)),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				interval,
				cancellation_token: CancellationToken::new(),
				history: Arc::new(SyncMutex::new(RunHistory::default())),
			},
		);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let job = Arc::clone(&registered.job);
			let history = Arc::clone(&registered.history);
			let next_run_id = Arc::clone(&self.next_run_id);
			let cancellation_token = registered.cancellation_token.clone();
			let interval = registered.interval;
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								debug!(job_id = %job_id, "Skipping cancelled job");
								continue;
							}
							let run_id = next_run_id.fetch_add(1, Ordering::Relaxed);
							let _ = run_job(
								&job,
								run_id,
								interval,
								TriggerSource::Schedule,
								&cancellation_token,
								&history,
							)
							.await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
	}

	/// Run a job immediately, outside its schedule. Returns the run id.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str) -> Result<u64> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
		run_job(
			&registered.job,
			run_id,
			registered.interval,
			TriggerSource::Manual,
			&registered.cancellation_token,
			&registered.history,
		)
		.await?;
		Ok(run_id)
	}

	#[instrument(skip(self))]
	pub fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.jobs.keys().cloned().collect();
		ids.sort();
		ids
	}

	pub fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;
		let history = registered.history.lock();

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(history.consecutive_failures),
			last_run: history.last_run.clone(),
			consecutive_failures: history.consecutive_failures,
			total_runs: history.total_runs,
		})
	}

	pub fn health_status(&self) -> JobsHealthStatus {
		let jobs: Vec<JobHealthStatus> = self
			.job_ids()
			.iter()
			.filter_map(|id| self.job_status(id))
			.collect();

		JobsHealthStatus {
			status: worst(jobs.iter().map(|j| j.status)),
			jobs,
		}
	}
}

async fn run_job(
	job: &Arc<dyn Job>,
	run_id: u64,
	time_limit: Duration,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
	history: &SyncMutex<RunHistory>,
) -> Result<()> {
	let ctx = JobContext {
		run_id,
		triggered_by,
		cancellation_token: cancellation_token.clone(),
	};
	let started_at = Utc::now();
	let started = Instant::now();

	let result = match tokio::time::timeout(time_limit, job.run(&ctx)).await {
		Ok(result) => result,
		Err(_) => Err(JobError::TimedOut(time_limit)),
	};
	let duration_ms = started.elapsed().as_millis() as i64;

	let (status, error) = match &result {
		Ok(output) => {
			debug!(job_id = %job.id(), run_id, message = %output.message, "Job completed");
			(RunStatus::Succeeded, None)
		}
		Err(JobError::Cancelled) => {
			info!(job_id = %job.id(), run_id, "Job cancelled");
			(RunStatus::Cancelled, None)
		}
		Err(e @ JobError::TimedOut(_)) => {
			warn!(job_id = %job.id(), run_id, error = %e, "Job timed out");
			(RunStatus::TimedOut, Some(e.to_string()))
		}
		Err(e) => {
			warn!(job_id = %job.id(), run_id, error = %e, "Job failed");
			(RunStatus::Failed, Some(e.to_string()))
		}
	};

	history.lock().record(LastRunInfo {
		run_id,
		status,
		triggered_by,
		started_at,
		duration_ms,
		error,
	});

	result.map(|_| ())
}
