// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::api::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
	pub region: String,
	pub active_tunnels: usize,
	pub pending_usage_records: usize,
	pub timestamp: String,
}

/// GET /health - liveness plus a glance at broker load.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "ok",
		region: state.config.region.clone(),
		active_tunnels: state.registry.active_count(),
		pending_usage_records: state.metering.pending_count(),
		timestamp: chrono::Utc::now().to_rfc3339(),
	})
}
