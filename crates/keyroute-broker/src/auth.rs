// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bearer extraction and per-request verification against the keeper.
//!
//! The broker holds no sessions of its own: every authenticated request is
//! verified with the keeper (through the caching layer), and the verified
//! agent identity drives ownership checks downstream.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use keyroute_keeper::KeeperClient;
use std::sync::Arc;

/// The identity and affordability facts a verified request carries.
#[derive(Debug, Clone)]
pub struct VerifiedAgent {
	pub agent_id: String,
	pub email: Option<String>,
	pub balance: Option<f64>,
	pub cost_per_unit: Option<f64>,
	pub can_afford: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
	MissingToken,
	Invalid(String),
}

impl AuthError {
	pub fn message(&self) -> &str {
		match self {
			AuthError::MissingToken => "Missing bearer token",
			AuthError::Invalid(message) => message,
		}
	}
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
	headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.map(str::trim)
		.filter(|token| !token.is_empty())
}

/// Verify the request's bearer token for `operation` at `quantity` units.
/// A keeper that is unreachable, a malformed token, and an unknown token
/// all land in `AuthError::Invalid`; only affordability is left for the
/// caller to judge.
pub async fn verify_request(
	keeper: &Arc<dyn KeeperClient>,
	headers: &HeaderMap,
	operation: &str,
	quantity: f64,
) -> Result<VerifiedAgent, AuthError> {
	let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;

	let verification = keeper.verify(token, operation, quantity).await;
	if !verification.valid {
		return Err(AuthError::Invalid(
			verification
				.error
				.unwrap_or_else(|| "Invalid token".to_string()),
		));
	}

	let agent_id = match verification.agent_id {
		Some(agent_id) => agent_id,
		// Valid without an identity is a keeper contract violation; treat
		// it as unauthenticated rather than guessing.
		None => return Err(AuthError::Invalid("Invalid token".to_string())),
	};

	Ok(VerifiedAgent {
		agent_id,
		email: verification.email,
		balance: verification.balance,
		cost_per_unit: verification.cost_per_unit,
		can_afford: verification.can_afford,
	})
}
