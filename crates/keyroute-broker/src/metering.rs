// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tunnel usage accrual and batched delivery to the keeper.
//!
//! Accrual advances each active tunnel's billing cursor in whole-minute
//! steps; terminal transitions settle the remainder. Pending records queue
//! in memory and drain as one batch per delivery tick; a failed batch is
//! re-enqueued at the tail, which the keeper's commutativity over records
//! makes safe.

use crate::registry::{Accrual, TerminalTransition, TunnelRegistry};
use chrono::{DateTime, Utc};
use keyroute_keeper::{KeeperClient, KeeperError, UsageRecord};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MeteringEngine {
	region: String,
	keeper: Arc<dyn KeeperClient>,
	pending: Mutex<VecDeque<UsageRecord>>,
}

impl MeteringEngine {
	pub fn new(region: impl Into<String>, keeper: Arc<dyn KeeperClient>) -> Self {
		Self {
			region: region.into(),
			keeper,
			pending: Mutex::new(VecDeque::new()),
		}
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().unwrap().len()
	}

	fn enqueue(&self, accrual: Accrual) {
		if accrual.seconds <= 0 {
			return;
		}
		let record = UsageRecord::tunnel_hours(
			accrual.agent_id,
			self.region.clone(),
			accrual.tunnel_id,
			accrual.seconds,
			accrual.timestamp,
		);
		self.pending.lock().unwrap().push_back(record);
	}

	/// One periodic accrual pass over the registry's active tunnels.
	pub fn accrue_active(&self, registry: &TunnelRegistry, now: DateTime<Utc>) -> usize {
		let accruals = registry.accrue_whole_minutes(now);
		let count = accruals.len();
		for accrual in accruals {
			self.enqueue(accrual);
		}
		count
	}

	/// Settle the final unbilled span of an `active -> expired|closed`
	/// transition. The registry already advanced the cursor to the terminal
	/// time, so this can only run once per tunnel.
	pub fn record_terminal(&self, transition: &TerminalTransition) {
		self.enqueue(Accrual {
			agent_id: transition.record.agent_id.clone(),
			tunnel_id: transition.record.id.clone(),
			seconds: transition.unbilled_seconds,
			timestamp: transition.record.expires_at,
		});
	}

	/// Drain the whole pending queue into a single keeper call. On failure
	/// the batch goes back on the tail for the next tick.
	pub async fn deliver(&self) -> Result<usize, KeeperError> {
		let batch: Vec<UsageRecord> = {
			let mut pending = self.pending.lock().unwrap();
			pending.drain(..).collect()
		};

		if batch.is_empty() {
			return Ok(0);
		}

		let count = batch.len();
		match self.keeper.report_usage(&self.region, batch.clone()).await {
			Ok(ack) => {
				info!(
					records = count,
					processed = ack.processed,
					credits = ack.total_credits_deducted,
					"usage batch delivered"
				);
				Ok(count)
			}
			Err(e) => {
				self.pending.lock().unwrap().extend(batch);
				Err(e)
			}
		}
	}

	/// Shutdown path: close out unbilled time for every active tunnel, then
	/// attempt one bounded drain. Whatever cannot be reported in time is
	/// lost; at this pricing that is at most a few cents per shutdown.
	pub async fn shutdown_flush(&self, registry: &TunnelRegistry, now: DateTime<Utc>) {
		let accruals = registry.accrue_to(now);
		let flushed = accruals.len();
		for accrual in accruals {
			self.enqueue(accrual);
		}

		match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.deliver()).await {
			Ok(Ok(delivered)) => {
				info!(flushed, delivered, "final usage drain complete");
			}
			Ok(Err(e)) => {
				warn!(error = %e, lost = self.pending_count(), "final usage drain failed");
			}
			Err(_) => {
				warn!(
					lost = self.pending_count(),
					"final usage drain timed out"
				);
			}
		}
	}
}
