// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The lifecycle supervisor: transitions tunnels past their deadline to
//! `expired`, settles their final accrual, and releases the kernel peer.

use crate::jobs::scheduler::{Job, JobError, JobOutput};
use crate::metering::MeteringEngine;
use crate::registry::{TunnelRecord, TunnelRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyroute_wg::PeerController;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Expire one tunnel: registry transition (atomic; computes the final
/// accrual), usage enqueue, kernel peer removal. The registry transition
/// succeeds exactly once, so the supervisor and a lazy GET can race here;
/// the loser sees `None` and walks away.
///
/// Returns the terminal record when this call won the transition.
pub async fn expire_tunnel(
	registry: &TunnelRegistry,
	metering: &MeteringEngine,
	peers: &Arc<dyn PeerController>,
	tunnel_id: &str,
	now: DateTime<Utc>,
) -> Option<TunnelRecord> {
	let transition = registry.expire(tunnel_id, now)?;
	metering.record_terminal(&transition);

	if let Err(e) = peers.remove_peer(&transition.record.client_public_key).await {
		warn!(tunnel_id, error = %e, "failed to remove peer for expired tunnel");
	}

	info!(
		tunnel_id,
		agent_id = %transition.record.agent_id,
		unbilled_seconds = transition.unbilled_seconds,
		"tunnel expired"
	);
	Some(transition.record)
}

pub struct LifecycleJob {
	registry: Arc<TunnelRegistry>,
	metering: Arc<MeteringEngine>,
	peers: Arc<dyn PeerController>,
}

impl LifecycleJob {
	pub fn new(
		registry: Arc<TunnelRegistry>,
		metering: Arc<MeteringEngine>,
		peers: Arc<dyn PeerController>,
	) -> Self {
		Self {
			registry,
			metering,
			peers,
		}
	}
}

#[async_trait]
impl Job for LifecycleJob {
	fn id(&self) -> &str {
		"tunnel-lifecycle"
	}

	fn name(&self) -> &str {
		"Tunnel Lifecycle"
	}

	#[instrument(skip(self), fields(job_id = "tunnel-lifecycle"))]
	async fn run(&self) -> Result<JobOutput, JobError> {
		let now = Utc::now();
		let mut expired = 0usize;

		for record in self.registry.snapshot_active() {
			if record.expires_at <= now
				&& expire_tunnel(&self.registry, &self.metering, &self.peers, &record.id, now)
					.await
					.is_some()
			{
				expired += 1;
			}
		}

		Ok(JobOutput {
			message: format!("expired {expired} tunnels"),
		})
	}
}
