// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! keyroute regional broker binary.

use clap::{Parser, Subcommand};
use keyroute_broker::jobs::{
	AccrualJob, JobScheduler, LifecycleJob, UsageDeliveryJob, ACCRUAL_INTERVAL,
	LIFECYCLE_INTERVAL,
};
use keyroute_broker::{create_router, AppState, BrokerConfig, MeteringEngine, TunnelRegistry};
use keyroute_keeper::{CachingVerifier, HttpKeeperClient, KeeperClient};
use keyroute_wg::{PeerController, WgCli};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// keyroute broker - regional WireGuard tunnel control plane.
#[derive(Parser, Debug)]
#[command(name = "keyroute-broker", about = "Regional tunnel broker", version)]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("keyroute-broker {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let config = Arc::new(BrokerConfig::from_env()?);

	tracing::info!(
		region = %config.region,
		port = config.port,
		wg_interface = %config.wg_interface,
		wg_subnet = %config.wg_subnet,
		keeper_url = %config.keeper_url,
		"starting keyroute broker"
	);

	let peers: Arc<dyn PeerController> = Arc::new(WgCli::new(config.wg_interface.clone()));
	let server_public_key = peers.server_public_key().await?;

	if config.cleanup_orphans {
		cleanup_orphan_peers(&peers).await;
	}

	let keeper: Arc<dyn KeeperClient> = Arc::new(CachingVerifier::new(HttpKeeperClient::new(
		config.keeper_url.clone(),
		config.service_secret.clone(),
	)));

	let registry = Arc::new(TunnelRegistry::new(config.wg_subnet));
	let metering = Arc::new(MeteringEngine::new(config.region.clone(), keeper.clone()));
	let accepting_creates = Arc::new(AtomicBool::new(true));

	let state = AppState {
		config: config.clone(),
		registry: registry.clone(),
		metering: metering.clone(),
		keeper,
		peers: peers.clone(),
		server_public_key,
		accepting_creates: accepting_creates.clone(),
	};

	let mut scheduler = JobScheduler::new();
	scheduler.register_periodic(
		Arc::new(AccrualJob::new(registry.clone(), metering.clone())),
		ACCRUAL_INTERVAL,
	);
	scheduler.register_periodic(
		Arc::new(UsageDeliveryJob::new(metering.clone())),
		config.usage_report_interval,
	);
	scheduler.register_periodic(
		Arc::new(LifecycleJob::new(
			registry.clone(),
			metering.clone(),
			peers.clone(),
		)),
		LIFECYCLE_INTERVAL,
	);
	let scheduler = Arc::new(scheduler);
	scheduler.start().await;

	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	tracing::info!("listening on {}", addr);
	let listener = tokio::net::TcpListener::bind(&addr).await?;

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal(accepting_creates))
		.await?;

	// In-flight handlers have drained. Stop the tickers, settle unbilled
	// time, and make one bounded attempt to deliver it.
	tracing::info!("shutting down job scheduler");
	scheduler.shutdown().await;

	metering
		.shutdown_flush(&registry, chrono::Utc::now())
		.await;

	tracing::info!("broker shutdown complete");
	Ok(())
}

/// Resolves when a terminate signal arrives; new creates are refused from
/// that moment while existing requests run to completion.
async fn shutdown_signal(accepting_creates: Arc<AtomicBool>) {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}

	accepting_creates.store(false, Ordering::SeqCst);
	tracing::info!("received shutdown signal, refusing new tunnels");
}

/// A previous process may have died with peers still installed. The
/// registry is empty at boot, so every peer on the interface is an orphan.
async fn cleanup_orphan_peers(peers: &Arc<dyn PeerController>) {
	match peers.list_peers().await {
		Ok(orphans) => {
			if orphans.is_empty() {
				return;
			}
			tracing::info!(count = orphans.len(), "removing orphaned kernel peers");
			for public_key in orphans {
				if let Err(e) = peers.remove_peer(&public_key).await {
					tracing::warn!(peer = %public_key, error = %e, "failed to remove orphaned peer");
				}
			}
		}
		Err(e) => {
			tracing::warn!(error = %e, "failed to list kernel peers for orphan cleanup");
		}
	}
}
