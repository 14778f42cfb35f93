// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client for the keeper, the external identity and credit service: bearer
//! token verification with a bounded cache, and reliable usage delivery.

pub mod cache;
pub mod client;
pub mod fake;
pub mod types;

pub use cache::{CachingVerifier, VERIFY_CACHE_TTL};
pub use client::{HttpKeeperClient, KeeperClient, KeeperError, REPORT_TIMEOUT, VERIFY_TIMEOUT};
pub use fake::{AlwaysAffordable, FakeKeeper};
pub use types::{
	UsageAck, UsageMetadata, UsageRecord, UsageReport, Verification, VerifyRequest,
	OPERATION_TUNNEL_HOUR, SERVICE_NAME,
};
