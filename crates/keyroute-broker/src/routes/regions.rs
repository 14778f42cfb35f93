// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::api::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

/// Every region the fleet is deployed in. The edge uses this to render
/// region pickers; the broker only adds which one it is.
pub const KNOWN_REGIONS: [&str; 4] = ["us-east", "us-west", "eu-west", "ap-southeast"];

#[derive(Debug, Serialize)]
pub struct RegionsResponse {
	pub regions: [&'static str; 4],
	pub current: String,
}

/// GET /v1/regions - unauthenticated region discovery.
pub async fn list_regions(State(state): State<AppState>) -> Json<RegionsResponse> {
	Json(RegionsResponse {
		regions: KNOWN_REGIONS,
		current: state.config.region.clone(),
	})
}
