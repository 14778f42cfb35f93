// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::jobs::scheduler::{Job, JobError, JobOutput};
use crate::metering::MeteringEngine;
use crate::registry::TunnelRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Every minute, bill the elapsed whole minutes of every active tunnel.
pub struct AccrualJob {
	registry: Arc<TunnelRegistry>,
	metering: Arc<MeteringEngine>,
}

impl AccrualJob {
	pub fn new(registry: Arc<TunnelRegistry>, metering: Arc<MeteringEngine>) -> Self {
		Self { registry, metering }
	}
}

#[async_trait]
impl Job for AccrualJob {
	fn id(&self) -> &str {
		"usage-accrual"
	}

	fn name(&self) -> &str {
		"Usage Accrual"
	}

	#[instrument(skip(self), fields(job_id = "usage-accrual"))]
	async fn run(&self) -> Result<JobOutput, JobError> {
		let accrued = self.metering.accrue_active(&self.registry, Utc::now());
		Ok(JobOutput {
			message: format!("accrued usage for {accrued} tunnels"),
		})
	}
}
