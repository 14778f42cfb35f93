// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Broker configuration from the process environment (`KEYROUTE_*`).

use ipnet::Ipv4Net;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
	/// This broker's region tag; stamped onto every tunnel record.
	pub region: String,
	pub port: u16,
	/// Address advertised to clients in the `Endpoint` line.
	pub public_ip: String,
	pub wg_interface: String,
	pub wg_port: u16,
	/// Tunnel subnet; `.1` is the server, clients draw from `.2`-`.254`.
	pub wg_subnet: Ipv4Net,
	/// Sweep kernel peers left behind by a previous process at startup.
	pub cleanup_orphans: bool,
	pub keeper_url: String,
	pub service_secret: String,
	pub usage_report_interval: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid port: {0}")]
	InvalidPort(String),

	#[error("invalid WireGuard subnet (expected an IPv4 /24): {0}")]
	InvalidSubnet(String),

	#[error("invalid usage report interval: {0}")]
	InvalidInterval(String),
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			region: "us-east".to_string(),
			port: 3000,
			public_ip: "127.0.0.1".to_string(),
			wg_interface: "wg0".to_string(),
			wg_port: 51820,
			wg_subnet: "10.100.0.0/24".parse().unwrap(),
			cleanup_orphans: true,
			keeper_url: "http://localhost:4000".to_string(),
			service_secret: String::new(),
			usage_report_interval: Duration::from_millis(30_000),
		}
	}
}

impl BrokerConfig {
	pub fn from_env() -> Result<Self, ConfigError> {
		let defaults = Self::default();

		let region = std::env::var("KEYROUTE_REGION").unwrap_or(defaults.region);

		let port = match std::env::var("KEYROUTE_PORT") {
			Ok(value) => value
				.parse()
				.map_err(|_| ConfigError::InvalidPort(value))?,
			Err(_) => defaults.port,
		};

		let public_ip = std::env::var("KEYROUTE_PUBLIC_IP").unwrap_or(defaults.public_ip);
		let wg_interface = std::env::var("KEYROUTE_WG_INTERFACE").unwrap_or(defaults.wg_interface);

		let wg_port = match std::env::var("KEYROUTE_WG_PORT") {
			Ok(value) => value
				.parse()
				.map_err(|_| ConfigError::InvalidPort(value))?,
			Err(_) => defaults.wg_port,
		};

		let wg_subnet = match std::env::var("KEYROUTE_WG_SUBNET") {
			Ok(value) => parse_subnet(&value)?,
			Err(_) => defaults.wg_subnet,
		};

		let cleanup_orphans = std::env::var("KEYROUTE_WG_CLEANUP_ORPHANS")
			.map(|value| value.parse().unwrap_or(true))
			.unwrap_or(true);

		let keeper_url = std::env::var("KEYROUTE_KEEPER_URL").unwrap_or(defaults.keeper_url);
		let service_secret =
			std::env::var("KEYROUTE_SERVICE_SECRET").unwrap_or(defaults.service_secret);

		let usage_report_interval = match std::env::var("KEYROUTE_USAGE_REPORT_INTERVAL_MS") {
			Ok(value) => {
				let millis: u64 = value
					.parse()
					.map_err(|_| ConfigError::InvalidInterval(value.clone()))?;
				if millis == 0 {
					return Err(ConfigError::InvalidInterval(value));
				}
				Duration::from_millis(millis)
			}
			Err(_) => defaults.usage_report_interval,
		};

		Ok(Self {
			region,
			port,
			public_ip,
			wg_interface,
			wg_port,
			wg_subnet,
			cleanup_orphans,
			keeper_url,
			service_secret,
			usage_report_interval,
		})
	}

	pub fn socket_addr(&self) -> String {
		format!("0.0.0.0:{}", self.port)
	}

	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.public_ip, self.wg_port)
	}
}

/// The allocator hands out host octets within a /24, so the subnet must be
/// exactly that wide.
pub fn parse_subnet(value: &str) -> Result<Ipv4Net, ConfigError> {
	let net: Ipv4Net = value
		.parse()
		.map_err(|_| ConfigError::InvalidSubnet(value.to_string()))?;
	if net.prefix_len() != 24 {
		return Err(ConfigError::InvalidSubnet(value.to_string()));
	}
	Ok(net)
}
