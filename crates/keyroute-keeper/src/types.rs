// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service identifier the keeper knows this broker fleet by.
pub const SERVICE_NAME: &str = "keyroute";

/// The only metered operation: one tunnel-hour, fractional quantities allowed.
pub const OPERATION_TUNNEL_HOUR: &str = "tunnel_hour";

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
	pub token: String,
	pub service: String,
	pub operation: String,
	pub quantity: f64,
}

/// Keeper's answer to a verify call.
///
/// Transport failures are folded into this shape (`valid = false` plus an
/// `error`) so callers have a single path to a 401.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
	pub valid: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub agent_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub balance: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cost_per_unit: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub can_afford: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Verification {
	pub fn unavailable() -> Self {
		Self {
			valid: false,
			error: Some("Authentication service unavailable".to_string()),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetadata {
	pub region: String,
	pub tunnel_id: String,
	pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
	pub agent_id: String,
	pub operation: String,
	pub quantity: f64,
	pub timestamp: DateTime<Utc>,
	pub metadata: UsageMetadata,
}

impl UsageRecord {
	pub fn tunnel_hours(
		agent_id: impl Into<String>,
		region: impl Into<String>,
		tunnel_id: impl Into<String>,
		duration_seconds: i64,
		timestamp: DateTime<Utc>,
	) -> Self {
		Self {
			agent_id: agent_id.into(),
			operation: OPERATION_TUNNEL_HOUR.to_string(),
			quantity: duration_seconds as f64 / 3600.0,
			timestamp,
			metadata: UsageMetadata {
				region: region.into(),
				tunnel_id: tunnel_id.into(),
				duration_seconds,
			},
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
	pub service: String,
	pub region: String,
	pub records: Vec<UsageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageAck {
	pub processed: i64,
	#[serde(default)]
	pub total_credits_deducted: f64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tunnel_hours_quantity_is_fractional() {
		let record = UsageRecord::tunnel_hours("agent_1", "us-east", "tun_abc", 45, Utc::now());
		assert!((record.quantity - 45.0 / 3600.0).abs() < 1e-12);
		assert_eq!(record.operation, OPERATION_TUNNEL_HOUR);
		assert_eq!(record.metadata.duration_seconds, 45);
	}

	#[test]
	fn verification_tolerates_minimal_response() {
		let verification: Verification = serde_json::from_str(r#"{"valid":false}"#).unwrap();
		assert!(!verification.valid);
		assert!(verification.agent_id.is_none());
	}

	#[test]
	fn verification_unavailable_is_invalid() {
		let verification = Verification::unavailable();
		assert!(!verification.valid);
		assert_eq!(
			verification.error.as_deref(),
			Some("Authentication service unavailable")
		);
	}

	#[test]
	fn usage_report_wire_shape() {
		let report = UsageReport {
			service: SERVICE_NAME.to_string(),
			region: "us-east".to_string(),
			records: vec![UsageRecord::tunnel_hours(
				"agent_1",
				"us-east",
				"tun_abc",
				60,
				Utc::now(),
			)],
		};
		let json = serde_json::to_value(&report).unwrap();
		assert_eq!(json["service"], "keyroute");
		assert_eq!(json["records"][0]["metadata"]["duration_seconds"], 60);
		assert!(json["records"][0]["timestamp"].is_string());
	}
}
