// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{WgPrivateKey, WgPublicKey};
use std::net::Ipv4Addr;

const CLIENT_DNS: &str = "1.1.1.1";
const PERSISTENT_KEEPALIVE_SECS: u32 = 25;

/// Everything needed to render a ready-to-use client configuration.
#[derive(Debug)]
pub struct ClientConfig<'a> {
	pub private_key: &'a WgPrivateKey,
	pub client_ip: Ipv4Addr,
	pub server_public_key: &'a WgPublicKey,
	pub server_endpoint_ip: &'a str,
	pub server_endpoint_port: u16,
}

impl ClientConfig<'_> {
	/// Renders the canonical WireGuard INI accepted by stock tooling.
	///
	/// The client routes everything through the tunnel (`AllowedIPs =
	/// 0.0.0.0/0`) and keeps NAT mappings alive with a 25 second keepalive.
	pub fn render(&self) -> String {
		format!(
			"[Interface]\n\
			 PrivateKey = {private_key}\n\
			 Address = {client_ip}/24\n\
			 DNS = {dns}\n\
			 \n\
			 [Peer]\n\
			 PublicKey = {server_public_key}\n\
			 Endpoint = {endpoint_ip}:{endpoint_port}\n\
			 AllowedIPs = 0.0.0.0/0\n\
			 PersistentKeepalive = {keepalive}\n",
			private_key = self.private_key.expose_base64(),
			client_ip = self.client_ip,
			dns = CLIENT_DNS,
			server_public_key = self.server_public_key.to_base64(),
			endpoint_ip = self.server_endpoint_ip,
			endpoint_port = self.server_endpoint_port,
			keepalive = PERSISTENT_KEEPALIVE_SECS,
		)
	}
}
