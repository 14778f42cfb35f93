// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel provisioning HTTP handlers: create, status, close, list.

use crate::api::AppState;
use crate::api_response::{
	bad_request, forbidden, not_found, payment_required, service_unavailable, unauthorized,
};
use crate::auth::verify_request;
use crate::jobs::lifecycle::expire_tunnel;
use crate::registry::{
	CloseError, InsertError, TunnelStatus, COST_PER_HOUR_USD, DEFAULT_DURATION_SECS,
	MAX_DURATION_SECS, MIN_DURATION_SECS,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use keyroute_keeper::OPERATION_TUNNEL_HOUR;
use keyroute_wg::{ClientConfig, WgPrivateKey};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
pub struct CreateTunnelRequest {
	/// Seconds of tunnel lifetime. Lenient: anything that does not parse as
	/// a number falls back to the default rather than failing the request.
	#[serde(default)]
	pub duration: Option<serde_json::Value>,
	/// Routing hint consumed by the edge; the broker itself ignores it.
	#[serde(default)]
	pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTunnelResponse {
	pub tunnel_id: String,
	pub region: String,
	pub wireguard_config: String,
	pub endpoint: String,
	pub expires_at: DateTime<Utc>,
	pub client_ip: Ipv4Addr,
}

#[derive(Debug, Serialize)]
pub struct TunnelStatusResponse {
	pub tunnel_id: String,
	pub region: String,
	pub status: TunnelStatus,
	pub created_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
	pub duration_seconds: i64,
	pub cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct CloseTunnelResponse {
	pub tunnel_id: String,
	pub status: TunnelStatus,
	pub duration_seconds: i64,
	pub cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct ListTunnelsResponse {
	pub agent_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub balance: Option<f64>,
	pub tunnels: Vec<TunnelStatusResponse>,
}

/// Clamp the requested lifetime to `[30, 3600]` seconds; missing or
/// unparseable values fall back to 300.
fn requested_duration(value: Option<&serde_json::Value>) -> i64 {
	let parsed = match value {
		Some(serde_json::Value::Number(n)) => n
			.as_i64()
			.or_else(|| n.as_f64().map(|f| f as i64)),
		Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
		_ => None,
	};
	parsed
		.unwrap_or(DEFAULT_DURATION_SECS)
		.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS)
}

/// POST /v1/tunnel - provision a tunnel and return a ready-to-use client
/// configuration.
pub async fn create_tunnel(
	State(state): State<AppState>,
	headers: HeaderMap,
	payload: Result<Json<CreateTunnelRequest>, JsonRejection>,
) -> Response {
	if !state
		.accepting_creates
		.load(std::sync::atomic::Ordering::SeqCst)
	{
		return service_unavailable("Broker is shutting down");
	}

	let request = match payload {
		Ok(Json(request)) => request,
		Err(_) => return bad_request("Invalid JSON body"),
	};

	if let Some(requested_region) = &request.region {
		if requested_region != &state.config.region {
			// The edge routed this here; trust it over the body.
			debug!(requested = %requested_region, "ignoring cross-region tunnel request field");
		}
	}

	let duration_secs = requested_duration(request.duration.as_ref());
	let duration_hours = duration_secs as f64 / 3600.0;

	let agent = match verify_request(
		&state.keeper,
		&headers,
		OPERATION_TUNNEL_HOUR,
		duration_hours,
	)
	.await
	{
		Ok(agent) => agent,
		Err(e) => return unauthorized(e.message()),
	};

	if agent.can_afford == Some(false) {
		let cost_per_hour = agent.cost_per_unit.unwrap_or(COST_PER_HOUR_USD);
		return payment_required(
			agent.balance.unwrap_or(0.0),
			duration_hours * cost_per_hour,
			cost_per_hour,
		);
	}

	let key = WgPrivateKey::generate();
	let now = Utc::now();

	let record = match state.registry.insert(
		&agent.agent_id,
		&state.config.region,
		duration_secs,
		key,
		now,
	) {
		Ok(record) => record,
		Err(InsertError::SubnetExhausted(e)) => {
			error!(error = %e, "tunnel creation failed");
			return service_unavailable("No available tunnel IPs in this region");
		}
	};

	// The record exists but the kernel does not know the peer yet. If the
	// install fails the record is rolled back so no active tunnel ever
	// lacks a kernel peer.
	if let Err(e) = state
		.peers
		.add_peer(&record.client_public_key, record.client_ip)
		.await
	{
		error!(tunnel_id = %record.id, error = %e, "peer install failed, rolling back");
		state.registry.rollback(&record.id);
		return service_unavailable("Failed to install tunnel peer");
	}

	let wireguard_config = ClientConfig {
		private_key: &record.client_private_key,
		client_ip: record.client_ip,
		server_public_key: &state.server_public_key,
		server_endpoint_ip: &state.config.public_ip,
		server_endpoint_port: state.config.wg_port,
	}
	.render();

	info!(
		tunnel_id = %record.id,
		agent_id = %record.agent_id,
		client_ip = %record.client_ip,
		duration_secs,
		"tunnel created"
	);

	(
		StatusCode::CREATED,
		Json(CreateTunnelResponse {
			tunnel_id: record.id,
			region: record.region,
			wireguard_config,
			endpoint: state.config.endpoint(),
			expires_at: record.expires_at,
			client_ip: record.client_ip,
		}),
	)
		.into_response()
}

fn status_response(record: &crate::registry::TunnelRecord, now: DateTime<Utc>) -> TunnelStatusResponse {
	TunnelStatusResponse {
		tunnel_id: record.id.clone(),
		region: record.region.clone(),
		status: record.status,
		created_at: record.created_at,
		expires_at: record.expires_at,
		duration_seconds: record.duration_seconds(now),
		cost_usd: record.cost_usd(now),
	}
}

/// GET /v1/tunnel/{id} - current status and accumulated cost.
pub async fn get_tunnel(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Response {
	let agent = match verify_request(&state.keeper, &headers, OPERATION_TUNNEL_HOUR, 0.0).await {
		Ok(agent) => agent,
		Err(e) => return unauthorized(e.message()),
	};

	let mut record = match state.registry.get(&id) {
		Some(record) => record,
		None => return not_found("Tunnel not found"),
	};

	if record.agent_id != agent.agent_id {
		return forbidden("Access denied");
	}

	// Lazy expiry: a reader must never observe an active record past its
	// deadline, and the billing it triggers is the same as the supervisor's.
	let now = Utc::now();
	if record.status == TunnelStatus::Active && record.expires_at < now {
		expire_tunnel(&state.registry, &state.metering, &state.peers, &id, now).await;
		if let Some(updated) = state.registry.get(&id) {
			record = updated;
		}
	}

	Json(status_response(&record, now)).into_response()
}

/// DELETE /v1/tunnel/{id} - close early; bills the unbilled remainder.
pub async fn delete_tunnel(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<String>,
) -> Response {
	let agent = match verify_request(&state.keeper, &headers, OPERATION_TUNNEL_HOUR, 0.0).await {
		Ok(agent) => agent,
		Err(e) => return unauthorized(e.message()),
	};

	let record = match state.registry.get(&id) {
		Some(record) => record,
		None => return not_found("Tunnel not found"),
	};

	if record.agent_id != agent.agent_id {
		return forbidden("Access denied");
	}

	// A tunnel past its deadline expires rather than closes; billing must
	// stop at expires_at even when the supervisor has not reached it yet.
	let now = Utc::now();
	if record.status == TunnelStatus::Active && record.expires_at < now {
		expire_tunnel(&state.registry, &state.metering, &state.peers, &id, now).await;
		return bad_request("Tunnel already closed");
	}

	let transition = match state.registry.close(&id, now) {
		Ok(transition) => transition,
		Err(CloseError::NotActive) => return bad_request("Tunnel already closed"),
		Err(CloseError::NotFound) => return not_found("Tunnel not found"),
	};

	state.metering.record_terminal(&transition);

	if let Err(e) = state
		.peers
		.remove_peer(&transition.record.client_public_key)
		.await
	{
		error!(tunnel_id = %id, error = %e, "failed to remove peer for closed tunnel");
	}

	info!(
		tunnel_id = %id,
		agent_id = %agent.agent_id,
		unbilled_seconds = transition.unbilled_seconds,
		"tunnel closed"
	);

	Json(CloseTunnelResponse {
		tunnel_id: transition.record.id.clone(),
		status: transition.record.status,
		duration_seconds: transition.record.duration_seconds(now),
		cost_usd: transition.record.cost_usd(now),
	})
	.into_response()
}

/// GET /v1/tunnels - every tunnel of the verified agent, any status.
pub async fn list_tunnels(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Response {
	let agent = match verify_request(&state.keeper, &headers, OPERATION_TUNNEL_HOUR, 0.0).await {
		Ok(agent) => agent,
		Err(e) => return unauthorized(e.message()),
	};

	let now = Utc::now();
	let tunnels = state
		.registry
		.list_for_agent(&agent.agent_id)
		.iter()
		.map(|record| status_response(record, now))
		.collect();

	Json(ListTunnelsResponse {
		agent_id: agent.agent_id,
		email: agent.email,
		balance: agent.balance,
		tunnels,
	})
	.into_response()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duration_defaults_when_missing() {
		assert_eq!(requested_duration(None), 300);
		assert_eq!(requested_duration(Some(&serde_json::Value::Null)), 300);
	}

	#[test]
	fn duration_defaults_when_unparseable() {
		assert_eq!(
			requested_duration(Some(&serde_json::json!("soon"))),
			300
		);
		assert_eq!(requested_duration(Some(&serde_json::json!(true))), 300);
	}

	#[test]
	fn duration_is_clamped() {
		assert_eq!(requested_duration(Some(&serde_json::json!(29))), 30);
		assert_eq!(requested_duration(Some(&serde_json::json!(3601))), 3600);
		assert_eq!(requested_duration(Some(&serde_json::json!(120))), 120);
	}

	#[test]
	fn duration_accepts_numeric_strings_and_floats() {
		assert_eq!(requested_duration(Some(&serde_json::json!("90"))), 90);
		assert_eq!(requested_duration(Some(&serde_json::json!(90.7))), 90);
	}
}
