// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::jobs::scheduler::{Job, JobError, JobOutput};
use crate::metering::MeteringEngine;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Drains the pending usage queue into one keeper call per tick. The engine
/// re-enqueues failed batches, so a failure here just means the records wait
/// for the next tick.
pub struct UsageDeliveryJob {
	metering: Arc<MeteringEngine>,
}

impl UsageDeliveryJob {
	pub fn new(metering: Arc<MeteringEngine>) -> Self {
		Self { metering }
	}
}

#[async_trait]
impl Job for UsageDeliveryJob {
	fn id(&self) -> &str {
		"usage-delivery"
	}

	fn name(&self) -> &str {
		"Usage Delivery"
	}

	#[instrument(skip(self), fields(job_id = "usage-delivery"))]
	async fn run(&self) -> Result<JobOutput, JobError> {
		match self.metering.deliver().await {
			Ok(delivered) => Ok(JobOutput {
				message: format!("delivered {delivered} usage records"),
			}),
			Err(e) => Err(JobError::Failed(format!(
				"usage delivery failed, batch re-queued: {e}"
			))),
		}
	}
}
