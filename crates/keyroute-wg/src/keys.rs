// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Curve25519 key material for tunnel endpoints.
//!
//! Every tunnel gets a fresh key pair minted broker-side. The private half
//! lives only inside the tunnel record, so GET can re-render the client
//! configuration; it has no parser and no serializer, and the bytes leave
//! the type through exactly one escape hatch the renderer calls. Public
//! keys travel freely: the kernel, the API responses, and `wg show` output
//! all speak their padded base64 form.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Failure to read a key out of its base64 spelling (`wg show` output or a
/// peer-supplied value).
#[derive(Debug, Error, PartialEq)]
pub enum InvalidKey {
	#[error("WireGuard keys are base64: {0}")]
	Encoding(#[from] base64::DecodeError),

	#[error("key decodes to {0} bytes, want 32")]
	Length(usize),
}

/// Public half of a tunnel key pair; how the kernel names peers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WgPublicKey([u8; 32]);

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Parse the padded base64 form `wg(8)` emits. The unpadded spelling is
	/// rejected, same as the stock tooling would.
	pub fn from_base64(s: &str) -> Result<Self, InvalidKey> {
		let decoded = STANDARD.decode(s)?;
		let bytes = <[u8; 32]>::try_from(decoded.as_slice())
			.map_err(|_| InvalidKey::Length(decoded.len()))?;
		Ok(Self(bytes))
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.0)
	}
}

impl TryFrom<String> for WgPublicKey {
	type Error = InvalidKey;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::from_base64(&value)
	}
}

impl From<WgPublicKey> for String {
	fn from(key: WgPublicKey) -> Self {
		key.to_base64()
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// Enough of the key to correlate log lines, no more.
		let b64 = self.to_base64();
		write!(f, "WgPublicKey({}..)", &b64[..8])
	}
}

/// Private half of a tunnel key pair.
///
/// Minted in memory, wiped on drop, deliberately unparseable and
/// unserializable: the broker never persists one and never accepts one
/// from outside. [`WgPrivateKey::expose_base64`] is the single way the
/// bytes get out, and only the client-config renderer calls it.
#[derive(Clone, PartialEq)]
pub struct WgPrivateKey(Zeroizing<[u8; 32]>);

impl WgPrivateKey {
	pub fn generate() -> Self {
		let secret = StaticSecret::random_from_rng(OsRng);
		Self(Zeroizing::new(secret.to_bytes()))
	}

	/// Derive the matching public key.
	pub fn public(&self) -> WgPublicKey {
		let secret = StaticSecret::from(*self.0);
		WgPublicKey(*PublicKey::from(&secret).as_bytes())
	}

	/// Padded base64 of the raw bytes, for the rendered client config and
	/// nothing else.
	pub fn expose_base64(&self) -> String {
		STANDARD.encode(*self.0)
	}
}

impl fmt::Debug for WgPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("WgPrivateKey(..)")
	}
}
