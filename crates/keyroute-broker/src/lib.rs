// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Regional tunnel broker.
//!
//! One broker process serves one region: it provisions bounded-lifetime
//! WireGuard tunnels over HTTP, reconciles them against the kernel
//! interface, meters active seconds per tunnel, and delivers usage to the
//! keeper credit service. Tunnel state is deliberately ephemeral; nothing
//! survives a restart except the kernel peers a startup sweep removes.

pub mod api;
pub mod api_response;
pub mod auth;
pub mod config;
pub mod ip_allocator;
pub mod jobs;
pub mod metering;
pub mod registry;
pub mod routes;

pub use api::{create_router, AppState};
pub use config::{BrokerConfig, ConfigError};
pub use metering::MeteringEngine;
pub use registry::{TunnelRecord, TunnelRegistry, TunnelStatus};
