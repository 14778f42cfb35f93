// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WgError {
	#[error("failed to spawn wg: {0}")]
	Spawn(#[from] std::io::Error),

	#[error("wg {args:?} failed: {stderr}")]
	CommandFailed { args: Vec<String>, stderr: String },

	#[error("invalid key material: {0}")]
	Key(#[from] crate::keys::InvalidKey),

	#[error("peer install failed: {0}")]
	PeerInstall(String),
}

pub type Result<T> = std::result::Result<T, WgError>;
