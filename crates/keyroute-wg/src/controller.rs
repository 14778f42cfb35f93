// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer lifecycle control for the broker's kernel WireGuard interface.
//!
//! All kernel-facing commands go through the [`PeerController`] capability.
//! The broker holds exactly one controller for its configured interface;
//! after `add_peer` returns ok the kernel routes traffic for the given
//! (public key, client IP) pair, and after `remove_peer` returns ok no such
//! routing exists. Removing an unknown peer is success.

use crate::error::{Result, WgError};
use crate::keys::WgPublicKey;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, instrument};

#[async_trait]
pub trait PeerController: Send + Sync {
	/// Public key of the interface itself, for rendering client configs.
	async fn server_public_key(&self) -> Result<WgPublicKey>;

	async fn add_peer(&self, public_key: &WgPublicKey, client_ip: Ipv4Addr) -> Result<()>;

	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()>;

	/// All peers currently installed on the interface. Used at startup to
	/// sweep orphans left behind by a previous process.
	async fn list_peers(&self) -> Result<Vec<WgPublicKey>>;
}

/// Drives the host's `wg(8)` tooling against an already-configured interface.
pub struct WgCli {
	interface: String,
}

impl WgCli {
	pub fn new(interface: impl Into<String>) -> Self {
		Self {
			interface: interface.into(),
		}
	}

	pub fn interface(&self) -> &str {
		&self.interface
	}
}

#[async_trait]
impl PeerController for WgCli {
	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn server_public_key(&self) -> Result<WgPublicKey> {
		let output = run_wg(&["show", &self.interface, "public-key"]).await?;
		Ok(WgPublicKey::from_base64(output.trim())?)
	}

	#[instrument(skip(self, public_key), fields(interface = %self.interface, %client_ip))]
	async fn add_peer(&self, public_key: &WgPublicKey, client_ip: Ipv4Addr) -> Result<()> {
		let key = public_key.to_base64();
		let allowed_ips = format!("{}/32", client_ip);
		run_wg(&[
			"set",
			&self.interface,
			"peer",
			&key,
			"allowed-ips",
			&allowed_ips,
		])
		.await?;
		debug!(peer = %public_key, %client_ip, "peer installed");
		Ok(())
	}

	#[instrument(skip(self, public_key), fields(interface = %self.interface))]
	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()> {
		let key = public_key.to_base64();
		// `wg set ... peer <key> remove` is a no-op for unknown keys, which
		// matches the contract.
		run_wg(&["set", &self.interface, "peer", &key, "remove"]).await?;
		debug!(peer = %public_key, "peer removed");
		Ok(())
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn list_peers(&self) -> Result<Vec<WgPublicKey>> {
		let output = run_wg(&["show", &self.interface, "peers"]).await?;
		output
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.map(|line| WgPublicKey::from_base64(line).map_err(WgError::from))
			.collect()
	}
}

async fn run_wg(args: &[&str]) -> Result<String> {
	let output = Command::new("wg").args(args).output().await?;

	if output.status.success() {
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	} else {
		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		Err(WgError::CommandFailed {
			args: args.iter().map(|s| s.to_string()).collect(),
			stderr,
		})
	}
}

/// In-memory controller for tests: records installed peers and can be told
/// to fail the next `add_peer` call.
pub struct MockPeerController {
	server_public: WgPublicKey,
	peers: std::sync::Mutex<std::collections::HashMap<WgPublicKey, Ipv4Addr>>,
	fail_next_add: std::sync::atomic::AtomicBool,
}

impl MockPeerController {
	pub fn new() -> Self {
		Self {
			server_public: crate::keys::WgPrivateKey::generate().public(),
			peers: std::sync::Mutex::new(std::collections::HashMap::new()),
			fail_next_add: std::sync::atomic::AtomicBool::new(false),
		}
	}

	pub fn fail_next_add(&self) {
		self
			.fail_next_add
			.store(true, std::sync::atomic::Ordering::SeqCst);
	}

	pub fn installed_peers(&self) -> Vec<(WgPublicKey, Ipv4Addr)> {
		self
			.peers
			.lock()
			.unwrap()
			.iter()
			.map(|(k, ip)| (*k, *ip))
			.collect()
	}

	pub fn has_peer(&self, public_key: &WgPublicKey) -> bool {
		self.peers.lock().unwrap().contains_key(public_key)
	}

	pub fn install_orphan(&self, public_key: WgPublicKey, client_ip: Ipv4Addr) {
		self.peers.lock().unwrap().insert(public_key, client_ip);
	}
}

impl Default for MockPeerController {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PeerController for MockPeerController {
	async fn server_public_key(&self) -> Result<WgPublicKey> {
		Ok(self.server_public)
	}

	async fn add_peer(&self, public_key: &WgPublicKey, client_ip: Ipv4Addr) -> Result<()> {
		if self
			.fail_next_add
			.swap(false, std::sync::atomic::Ordering::SeqCst)
		{
			return Err(WgError::PeerInstall("injected failure".to_string()));
		}
		self.peers.lock().unwrap().insert(*public_key, client_ip);
		Ok(())
	}

	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()> {
		self.peers.lock().unwrap().remove(public_key);
		Ok(())
	}

	async fn list_peers(&self) -> Result<Vec<WgPublicKey>> {
		Ok(self.peers.lock().unwrap().keys().copied().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::WgPrivateKey;

	#[tokio::test]
	async fn mock_add_then_remove() {
		let mock = MockPeerController::new();
		let peer = WgPrivateKey::generate().public();
		let ip: Ipv4Addr = "10.100.0.2".parse().unwrap();

		mock.add_peer(&peer, ip).await.unwrap();
		assert!(mock.has_peer(&peer));

		mock.remove_peer(&peer).await.unwrap();
		assert!(!mock.has_peer(&peer));
	}

	#[tokio::test]
	async fn mock_remove_unknown_peer_is_ok() {
		let mock = MockPeerController::new();
		let peer = WgPrivateKey::generate().public();
		assert!(mock.remove_peer(&peer).await.is_ok());
	}

	#[tokio::test]
	async fn mock_injected_add_failure_fires_once() {
		let mock = MockPeerController::new();
		let peer = WgPrivateKey::generate().public();
		let ip: Ipv4Addr = "10.100.0.2".parse().unwrap();

		mock.fail_next_add();
		assert!(mock.add_peer(&peer, ip).await.is_err());
		assert!(mock.add_peer(&peer, ip).await.is_ok());
	}

	#[tokio::test]
	async fn mock_lists_installed_peers() {
		let mock = MockPeerController::new();
		let a = WgPrivateKey::generate().public();
		let b = WgPrivateKey::generate().public();

		mock
			.add_peer(&a, "10.100.0.2".parse().unwrap())
			.await
			.unwrap();
		mock
			.add_peer(&b, "10.100.0.3".parse().unwrap())
			.await
			.unwrap();

		let peers = mock.list_peers().await.unwrap();
		assert_eq!(peers.len(), 2);
		assert!(peers.contains(&a));
		assert!(peers.contains(&b));
	}
}
