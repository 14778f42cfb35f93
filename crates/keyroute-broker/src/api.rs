// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router assembly.

use crate::config::BrokerConfig;
use crate::metering::MeteringEngine;
use crate::registry::TunnelRegistry;
use crate::routes;
use axum::routing::{get, post};
use axum::Router;
use keyroute_keeper::KeeperClient;
use keyroute_wg::{PeerController, WgPublicKey};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Shared state for every handler and background job.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<BrokerConfig>,
	pub registry: Arc<TunnelRegistry>,
	pub metering: Arc<MeteringEngine>,
	pub keeper: Arc<dyn KeeperClient>,
	pub peers: Arc<dyn PeerController>,
	/// The interface's own public key, resolved once at startup.
	pub server_public_key: WgPublicKey,
	/// Cleared when a terminate signal arrives so in-flight requests finish
	/// but no new tunnels are born into a dying process.
	pub accepting_creates: Arc<AtomicBool>,
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route("/v1/regions", get(routes::regions::list_regions))
		.route("/v1/tunnel", post(routes::tunnels::create_tunnel))
		.route(
			"/v1/tunnel/{id}",
			get(routes::tunnels::get_tunnel).delete(routes::tunnels::delete_tunnel),
		)
		.route("/v1/tunnels", get(routes::tunnels::list_tunnels))
		.with_state(state)
}
