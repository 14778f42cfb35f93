// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard primitives for the keyroute broker: Curve25519 key material,
//! client configuration rendering, and the peer lifecycle controller that
//! fronts the kernel interface.

pub mod client_config;
pub mod controller;
pub mod error;
pub mod keys;

pub use client_config::ClientConfig;
pub use controller::{MockPeerController, PeerController, WgCli};
pub use error::{Result, WgError};
pub use keys::{InvalidKey, WgPrivateKey, WgPublicKey};
