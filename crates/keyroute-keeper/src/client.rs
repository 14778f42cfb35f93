// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The keeper capability: verify bearer credentials, report metered usage.
//!
//! Verify never returns a transport error to the caller; failures collapse
//! into an invalid [`Verification`] so the HTTP layer has a single 401 path.
//! Usage reporting does surface errors, because the metering engine re-queues
//! failed batches and retries on the next delivery tick.

use crate::types::{UsageAck, UsageRecord, UsageReport, Verification, VerifyRequest, SERVICE_NAME};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

const SERVICE_SECRET_HEADER: &str = "X-Service-Secret";

#[derive(Error, Debug)]
pub enum KeeperError {
	#[error("keeper request failed: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("keeper rejected usage report with status {0}")]
	Status(reqwest::StatusCode),
}

pub type Result<T> = std::result::Result<T, KeeperError>;

#[async_trait]
pub trait KeeperClient: Send + Sync {
	/// Verify a bearer token for `operation` at `quantity` units.
	async fn verify(&self, token: &str, operation: &str, quantity: f64) -> Verification;

	/// Deliver a usage batch. Any non-2xx or transport error is an `Err`;
	/// the caller owns retry.
	async fn report_usage(&self, region: &str, records: Vec<UsageRecord>) -> Result<UsageAck>;
}

/// HTTP implementation of the keeper protocol.
pub struct HttpKeeperClient {
	base_url: String,
	service_secret: String,
	client: reqwest::Client,
}

impl HttpKeeperClient {
	pub fn new(base_url: impl Into<String>, service_secret: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			service_secret: service_secret.into(),
			client: reqwest::Client::new(),
		}
	}
}

#[async_trait]
impl KeeperClient for HttpKeeperClient {
	#[instrument(skip(self, token))]
	async fn verify(&self, token: &str, operation: &str, quantity: f64) -> Verification {
		let request = VerifyRequest {
			token: token.to_string(),
			service: SERVICE_NAME.to_string(),
			operation: operation.to_string(),
			quantity,
		};

		let response = self
			.client
			.post(format!("{}/v1/services/verify", self.base_url))
			.header(SERVICE_SECRET_HEADER, &self.service_secret)
			.timeout(VERIFY_TIMEOUT)
			.json(&request)
			.send()
			.await;

		let response = match response {
			Ok(response) => response,
			Err(e) => {
				warn!(error = %e, "keeper verify transport failure");
				return Verification::unavailable();
			}
		};

		match response.json::<Verification>().await {
			Ok(verification) => verification,
			Err(e) => {
				warn!(error = %e, "keeper verify returned malformed body");
				Verification::unavailable()
			}
		}
	}

	#[instrument(skip(self, records), fields(count = records.len()))]
	async fn report_usage(&self, region: &str, records: Vec<UsageRecord>) -> Result<UsageAck> {
		let report = UsageReport {
			service: SERVICE_NAME.to_string(),
			region: region.to_string(),
			records,
		};

		let response = self
			.client
			.post(format!("{}/v1/services/usage", self.base_url))
			.header(SERVICE_SECRET_HEADER, &self.service_secret)
			.timeout(REPORT_TIMEOUT)
			.json(&report)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(KeeperError::Status(response.status()));
		}

		Ok(response.json::<UsageAck>().await?)
	}
}
