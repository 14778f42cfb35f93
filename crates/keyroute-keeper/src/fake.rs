// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory keeper doubles for tests and local development.

use crate::client::{KeeperClient, KeeperError, Result};
use crate::types::{UsageAck, UsageRecord, Verification};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Programmable keeper: per-token verdicts, recorded usage batches, and
/// injectable delivery failures.
pub struct FakeKeeper {
	verdicts: Mutex<HashMap<String, Verification>>,
	reported: Mutex<Vec<UsageRecord>>,
	fail_reports: AtomicUsize,
}

impl FakeKeeper {
	pub fn new() -> Self {
		Self {
			verdicts: Mutex::new(HashMap::new()),
			reported: Mutex::new(Vec::new()),
			fail_reports: AtomicUsize::new(0),
		}
	}

	pub fn allow_token(&self, token: &str, agent_id: &str, balance: f64) {
		self.verdicts.lock().unwrap().insert(
			token.to_string(),
			Verification {
				valid: true,
				agent_id: Some(agent_id.to_string()),
				email: Some(format!("{agent_id}@example.com")),
				balance: Some(balance),
				cost_per_unit: Some(0.10),
				can_afford: Some(true),
				error: None,
			},
		);
	}

	pub fn allow_token_unaffordable(&self, token: &str, agent_id: &str, balance: f64) {
		self.verdicts.lock().unwrap().insert(
			token.to_string(),
			Verification {
				valid: true,
				agent_id: Some(agent_id.to_string()),
				email: Some(format!("{agent_id}@example.com")),
				balance: Some(balance),
				cost_per_unit: Some(0.10),
				can_afford: Some(false),
				error: None,
			},
		);
	}

	pub fn deny_token(&self, token: &str) {
		self.verdicts.lock().unwrap().remove(token);
	}

	/// Make the next `n` usage reports fail with a 500.
	pub fn fail_next_reports(&self, n: usize) {
		self.fail_reports.store(n, Ordering::SeqCst);
	}

	pub fn reported(&self) -> Vec<UsageRecord> {
		self.reported.lock().unwrap().clone()
	}

	/// Total seconds delivered for one tunnel, across all batches.
	pub fn reported_seconds_for(&self, tunnel_id: &str) -> i64 {
		self
			.reported
			.lock()
			.unwrap()
			.iter()
			.filter(|record| record.metadata.tunnel_id == tunnel_id)
			.map(|record| record.metadata.duration_seconds)
			.sum()
	}
}

impl Default for FakeKeeper {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl KeeperClient for FakeKeeper {
	async fn verify(&self, token: &str, _operation: &str, _quantity: f64) -> Verification {
		match self.verdicts.lock().unwrap().get(token) {
			Some(verdict) => verdict.clone(),
			None => Verification {
				valid: false,
				error: Some("Invalid token".to_string()),
				..Default::default()
			},
		}
	}

	async fn report_usage(&self, _region: &str, records: Vec<UsageRecord>) -> Result<UsageAck> {
		let remaining = self.fail_reports.load(Ordering::SeqCst);
		if remaining > 0 {
			self.fail_reports.store(remaining - 1, Ordering::SeqCst);
			return Err(KeeperError::Status(
				reqwest::StatusCode::INTERNAL_SERVER_ERROR,
			));
		}

		let processed = records.len() as i64;
		let total_credits_deducted: f64 = records.iter().map(|r| r.quantity * 0.10).sum();
		self.reported.lock().unwrap().extend(records);

		Ok(UsageAck {
			processed,
			total_credits_deducted,
		})
	}
}

/// Keeper that accepts every token as one fixed agent. Handy for wiring the
/// broker up locally without a keeper deployment.
pub struct AlwaysAffordable {
	agent_id: String,
}

impl AlwaysAffordable {
	pub fn new(agent_id: impl Into<String>) -> Self {
		Self {
			agent_id: agent_id.into(),
		}
	}
}

#[async_trait]
impl KeeperClient for AlwaysAffordable {
	async fn verify(&self, _token: &str, _operation: &str, _quantity: f64) -> Verification {
		Verification {
			valid: true,
			agent_id: Some(self.agent_id.clone()),
			email: Some(format!("{}@example.com", self.agent_id)),
			balance: Some(f64::MAX),
			cost_per_unit: Some(0.10),
			can_afford: Some(true),
			error: None,
		}
	}

	async fn report_usage(&self, _region: &str, records: Vec<UsageRecord>) -> Result<UsageAck> {
		Ok(UsageAck {
			processed: records.len() as i64,
			total_credits_deducted: 0.0,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::OPERATION_TUNNEL_HOUR;
	use chrono::Utc;

	#[tokio::test]
	async fn unknown_token_is_invalid() {
		let fake = FakeKeeper::new();
		let verification = fake.verify("nope", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(!verification.valid);
	}

	#[tokio::test]
	async fn failed_reports_count_down() {
		let fake = FakeKeeper::new();
		fake.fail_next_reports(1);

		let record =
			UsageRecord::tunnel_hours("agent_1", "us-east", "tun_abc", 60, Utc::now());

		assert!(fake
			.report_usage("us-east", vec![record.clone()])
			.await
			.is_err());
		assert!(fake.reported().is_empty());

		fake.report_usage("us-east", vec![record]).await.unwrap();
		assert_eq!(fake.reported_seconds_for("tun_abc"), 60);
	}
}
