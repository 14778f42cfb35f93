// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum JobError {
	#[error("{0}")]
	Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobOutput {
	pub message: String,
}

#[async_trait]
pub trait Job: Send + Sync {
	fn id(&self) -> &str;

	fn name(&self) -> &str;

	async fn run(&self) -> Result<JobOutput, JobError>;
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
}

/// Runs registered jobs on monotonic tickers. Ticks that pile up behind a
/// slow run are coalesced rather than replayed, and one broadcast shuts
/// every ticker down; `shutdown` joins the task handles so no job is left
/// mid-run when the process moves on to its final drain.
pub struct JobScheduler {
	jobs: Vec<RegisteredJob>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: Vec::new(),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.jobs.push(RegisteredJob { job, interval });
	}

	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;

		for registered in &self.jobs {
			let job = Arc::clone(&registered.job);
			let interval = registered.interval;
			let mut shutdown_rx = self.shutdown_tx.subscribe();

			let handle = tokio::spawn(async move {
				let mut ticker = tokio::time::interval(interval);
				ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
				// The first tick completes immediately; consume it so jobs
				// start one interval after boot.
				ticker.tick().await;

				loop {
					tokio::select! {
						_ = ticker.tick() => {
							match job.run().await {
								Ok(output) => {
									debug!(job_id = %job.id(), message = %output.message, "job completed");
								}
								Err(e) => {
									warn!(job_id = %job.id(), error = %e, "job failed");
								}
							}
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job.id(), "shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "job scheduler started");
	}

	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self
			.jobs
			.iter()
			.map(|registered| registered.job.id().to_string())
			.collect()
	}
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}
