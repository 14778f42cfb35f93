// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use keyroute_broker::{create_router, AppState, BrokerConfig, MeteringEngine, TunnelRegistry};
use keyroute_keeper::{FakeKeeper, KeeperClient};
use keyroute_wg::{MockPeerController, PeerController};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestBroker {
	pub app: Router,
	pub keeper: Arc<FakeKeeper>,
	pub peers: Arc<MockPeerController>,
	pub registry: Arc<TunnelRegistry>,
	pub metering: Arc<MeteringEngine>,
	pub state: AppState,
}

pub async fn broker() -> TestBroker {
	let config = Arc::new(BrokerConfig::default());
	let keeper = Arc::new(FakeKeeper::new());
	let peers = Arc::new(MockPeerController::new());
	let registry = Arc::new(TunnelRegistry::new(config.wg_subnet));
	let metering = Arc::new(MeteringEngine::new(
		config.region.clone(),
		keeper.clone() as Arc<dyn KeeperClient>,
	));

	let peers_dyn: Arc<dyn PeerController> = peers.clone();
	let server_public_key = peers_dyn.server_public_key().await.unwrap();

	let state = AppState {
		config,
		registry: registry.clone(),
		metering: metering.clone(),
		keeper: keeper.clone(),
		peers: peers_dyn,
		server_public_key,
		accepting_creates: Arc::new(AtomicBool::new(true)),
	};

	TestBroker {
		app: create_router(state.clone()),
		keeper,
		peers,
		registry,
		metering,
		state,
	}
}

pub async fn request(
	app: &Router,
	method: Method,
	uri: &str,
	token: Option<&str>,
	body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
	let mut builder = Request::builder().method(method).uri(uri);
	if let Some(token) = token {
		builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
	}

	let request = match body {
		Some(body) => builder
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap(),
		None => builder.body(Body::empty()).unwrap(),
	};

	let response = app.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let value = if bytes.is_empty() {
		serde_json::Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};

	(status, value)
}

/// POST a raw (possibly malformed) body.
pub async fn post_raw(app: &Router, token: &str, raw_body: &str) -> StatusCode {
	let request = Request::builder()
		.method(Method::POST)
		.uri("/v1/tunnel")
		.header(header::AUTHORIZATION, format!("Bearer {token}"))
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(raw_body.to_string()))
		.unwrap();

	app.clone().oneshot(request).await.unwrap().status()
}

pub async fn create_tunnel(
	broker: &TestBroker,
	token: &str,
	body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
	request(&broker.app, Method::POST, "/v1/tunnel", Some(token), Some(body)).await
}

pub async fn get_tunnel(
	broker: &TestBroker,
	token: &str,
	tunnel_id: &str,
) -> (StatusCode, serde_json::Value) {
	request(
		&broker.app,
		Method::GET,
		&format!("/v1/tunnel/{tunnel_id}"),
		Some(token),
		None,
	)
	.await
}

pub async fn delete_tunnel(
	broker: &TestBroker,
	token: &str,
	tunnel_id: &str,
) -> (StatusCode, serde_json::Value) {
	request(
		&broker.app,
		Method::DELETE,
		&format!("/v1/tunnel/{tunnel_id}"),
		Some(token),
		None,
	)
	.await
}
