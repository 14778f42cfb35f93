// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::client::{KeeperClient, Result};
use crate::types::{UsageAck, UsageRecord, Verification};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

pub const VERIFY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Wraps any [`KeeperClient`] with a short-lived verification cache.
///
/// Only successful verifications are cached, keyed by raw token. The cache
/// is a throughput optimization; revocation lags by at most the TTL, which
/// the authorization model tolerates. Racy double-lookups populate the same
/// entry twice and are harmless.
pub struct CachingVerifier<K> {
	inner: K,
	ttl: Duration,
	entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
	verification: Verification,
	cached_at: Instant,
}

impl<K> CachingVerifier<K> {
	pub fn new(inner: K) -> Self {
		Self::with_ttl(inner, VERIFY_CACHE_TTL)
	}

	pub fn with_ttl(inner: K, ttl: Duration) -> Self {
		Self {
			inner,
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}

	fn lookup(&self, token: &str) -> Option<Verification> {
		let mut entries = self.entries.lock().unwrap();
		match entries.get(token) {
			Some(entry) if entry.cached_at.elapsed() < self.ttl => {
				Some(entry.verification.clone())
			}
			Some(_) => {
				entries.remove(token);
				None
			}
			None => None,
		}
	}

	fn store(&self, token: &str, verification: &Verification) {
		let mut entries = self.entries.lock().unwrap();
		entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
		entries.insert(
			token.to_string(),
			CacheEntry {
				verification: verification.clone(),
				cached_at: Instant::now(),
			},
		);
	}
}

#[async_trait]
impl<K: KeeperClient> KeeperClient for CachingVerifier<K> {
	async fn verify(&self, token: &str, operation: &str, quantity: f64) -> Verification {
		if let Some(cached) = self.lookup(token) {
			trace!("verification served from cache");
			return cached;
		}

		let verification = self.inner.verify(token, operation, quantity).await;
		if verification.valid {
			self.store(token, &verification);
		}
		verification
	}

	async fn report_usage(&self, region: &str, records: Vec<UsageRecord>) -> Result<UsageAck> {
		self.inner.report_usage(region, records).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake::FakeKeeper;
	use crate::types::OPERATION_TUNNEL_HOUR;

	#[tokio::test]
	async fn caches_successful_verifications() {
		let fake = FakeKeeper::new();
		fake.allow_token("tok_a", "agent_1", 10.0);
		let cache = CachingVerifier::new(fake);

		let first = cache.verify("tok_a", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(first.valid);

		// Flip the verdict underneath; the cache should still answer.
		cache.inner.deny_token("tok_a");
		let second = cache.verify("tok_a", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(second.valid);
	}

	#[tokio::test]
	async fn does_not_cache_failures() {
		let fake = FakeKeeper::new();
		let cache = CachingVerifier::new(fake);

		let first = cache.verify("tok_b", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(!first.valid);

		cache.inner.allow_token("tok_b", "agent_2", 10.0);
		let second = cache.verify("tok_b", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(second.valid);
	}

	#[tokio::test]
	async fn entries_expire_after_ttl() {
		let fake = FakeKeeper::new();
		fake.allow_token("tok_c", "agent_3", 10.0);
		let cache = CachingVerifier::with_ttl(fake, Duration::from_millis(0));

		let first = cache.verify("tok_c", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(first.valid);

		cache.inner.deny_token("tok_c");
		let second = cache.verify("tok_c", OPERATION_TUNNEL_HOUR, 0.1).await;
		assert!(!second.valid);
	}
}
