// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory authoritative store of tunnel records.
//!
//! The registry is the only writer of tunnel state. Every status transition
//! and IP allocation happens under one mutex so concurrent handlers observe
//! each tunnel either fully `active` or fully terminal, never in between.
//! Keeper and kernel calls are never made while the lock is held.
//!
//! Terminal records stay resident for the process lifetime so status and
//! list queries remain answerable; a terminal record is never mutated again.

use crate::ip_allocator::{AllocError, IpAllocator};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ipnet::Ipv4Net;
use keyroute_wg::{WgPrivateKey, WgPublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use thiserror::Error;

pub const COST_PER_HOUR_USD: f64 = 0.10;

pub const MIN_DURATION_SECS: i64 = 30;
pub const MAX_DURATION_SECS: i64 = 3600;
pub const DEFAULT_DURATION_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
	Active,
	Expired,
	Closed,
}

impl fmt::Display for TunnelStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TunnelStatus::Active => f.write_str("active"),
			TunnelStatus::Expired => f.write_str("expired"),
			TunnelStatus::Closed => f.write_str("closed"),
		}
	}
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
pub struct TunnelRecord {
	pub id: String,
	pub agent_id: String,
	pub region: String,
	pub created_at: DateTime<Utc>,
	/// Immutable once set, except that an early close overwrites it with the
	/// close time.
	pub expires_at: DateTime<Utc>,
	/// Kept so the client config can be regenerated on GET.
	pub client_private_key: WgPrivateKey,
	pub client_public_key: WgPublicKey,
	pub client_ip: Ipv4Addr,
	pub status: TunnelStatus,
	/// Billing cursor; advances in whole-minute steps and never moves
	/// backward. `created_at <= last_billed_at <= min(now, expires_at)`.
	pub last_billed_at: DateTime<Utc>,
}

impl TunnelRecord {
	/// Seconds of tunnel life: to `now` while active, to the terminal time
	/// afterwards.
	pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
		let until = match self.status {
			TunnelStatus::Active => now,
			TunnelStatus::Expired | TunnelStatus::Closed => self.expires_at,
		};
		(until - self.created_at).num_seconds().max(0)
	}

	pub fn cost_usd(&self, now: DateTime<Utc>) -> f64 {
		self.duration_seconds(now) as f64 / 3600.0 * COST_PER_HOUR_USD
	}
}

#[derive(Debug, Error)]
pub enum InsertError {
	#[error(transparent)]
	SubnetExhausted(#[from] AllocError),
}

#[derive(Debug, Error, PartialEq)]
pub enum CloseError {
	#[error("tunnel not found")]
	NotFound,

	#[error("tunnel already closed")]
	NotActive,
}

/// An `active -> expired|closed` transition, with the final unbilled span
/// the metering engine still has to emit.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq))]
pub struct TerminalTransition {
	pub record: TunnelRecord,
	pub unbilled_seconds: i64,
}

/// A whole-minute accrual step for one active tunnel.
#[derive(Debug, Clone, PartialEq)]
pub struct Accrual {
	pub agent_id: String,
	pub tunnel_id: String,
	pub seconds: i64,
	pub timestamp: DateTime<Utc>,
}

pub struct TunnelRegistry {
	inner: Mutex<Inner>,
}

struct Inner {
	tunnels: HashMap<String, TunnelRecord>,
	allocator: IpAllocator,
}

impl TunnelRegistry {
	pub fn new(subnet: Ipv4Net) -> Self {
		Self {
			inner: Mutex::new(Inner {
				tunnels: HashMap::new(),
				allocator: IpAllocator::new(subnet),
			}),
		}
	}

	/// Create an `active` record: allocate a client IP and mint a fresh id.
	/// Takes ownership of the freshly minted private key and derives the
	/// kernel-visible public half. The caller installs the kernel peer
	/// afterwards and must `rollback` on failure.
	pub fn insert(
		&self,
		agent_id: &str,
		region: &str,
		duration_secs: i64,
		key: WgPrivateKey,
		now: DateTime<Utc>,
	) -> Result<TunnelRecord, InsertError> {
		let client_public_key = key.public();
		let mut inner = self.inner.lock().unwrap();

		let client_ip = inner.allocator.allocate()?;

		let mut id = mint_tunnel_id();
		while inner.tunnels.contains_key(&id) {
			id = mint_tunnel_id();
		}

		let record = TunnelRecord {
			id: id.clone(),
			agent_id: agent_id.to_string(),
			region: region.to_string(),
			created_at: now,
			expires_at: now + ChronoDuration::seconds(duration_secs),
			client_private_key: key,
			client_public_key,
			client_ip,
			status: TunnelStatus::Active,
			last_billed_at: now,
		};

		inner.tunnels.insert(id, record.clone());
		Ok(record)
	}

	/// Undo a just-inserted record whose kernel peer never materialized.
	pub fn rollback(&self, id: &str) {
		let mut inner = self.inner.lock().unwrap();
		if let Some(record) = inner.tunnels.remove(id) {
			inner.allocator.release(record.client_ip);
		}
	}

	pub fn get(&self, id: &str) -> Option<TunnelRecord> {
		self.inner.lock().unwrap().tunnels.get(id).cloned()
	}

	pub fn list_for_agent(&self, agent_id: &str) -> Vec<TunnelRecord> {
		let inner = self.inner.lock().unwrap();
		let mut records: Vec<TunnelRecord> = inner
			.tunnels
			.values()
			.filter(|record| record.agent_id == agent_id)
			.cloned()
			.collect();
		records.sort_by_key(|record| record.created_at);
		records
	}

	pub fn snapshot_active(&self) -> Vec<TunnelRecord> {
		self
			.inner
			.lock()
			.unwrap()
			.tunnels
			.values()
			.filter(|record| record.status == TunnelStatus::Active)
			.cloned()
			.collect()
	}

	pub fn active_count(&self) -> usize {
		self
			.inner
			.lock()
			.unwrap()
			.tunnels
			.values()
			.filter(|record| record.status == TunnelStatus::Active)
			.count()
	}

	/// `active -> expired`, if the record is active and past its deadline.
	/// Releases the client IP and settles the billing cursor at
	/// `expires_at`. Returns `None` when another path already won the
	/// transition, which makes concurrent expiry attempts idempotent.
	pub fn expire(&self, id: &str, now: DateTime<Utc>) -> Option<TerminalTransition> {
		let mut inner = self.inner.lock().unwrap();
		let record = inner.tunnels.get_mut(id)?;
		if record.status != TunnelStatus::Active || record.expires_at > now {
			return None;
		}

		record.status = TunnelStatus::Expired;
		let unbilled_seconds = (record.expires_at - record.last_billed_at)
			.num_seconds()
			.max(0);
		record.last_billed_at = record.expires_at;
		let transition = TerminalTransition {
			record: record.clone(),
			unbilled_seconds,
		};
		let client_ip = transition.record.client_ip;
		inner.allocator.release(client_ip);
		Some(transition)
	}

	/// `active -> closed` at the caller's request. Overwrites `expires_at`
	/// with the close time and settles the cursor there.
	pub fn close(&self, id: &str, now: DateTime<Utc>) -> Result<TerminalTransition, CloseError> {
		let mut inner = self.inner.lock().unwrap();
		let record = inner.tunnels.get_mut(id).ok_or(CloseError::NotFound)?;
		if record.status != TunnelStatus::Active {
			return Err(CloseError::NotActive);
		}

		let unbilled_seconds = (now - record.last_billed_at).num_seconds().max(0);
		record.status = TunnelStatus::Closed;
		record.expires_at = now;
		record.last_billed_at = now;
		let transition = TerminalTransition {
			record: record.clone(),
			unbilled_seconds,
		};
		let client_ip = transition.record.client_ip;
		inner.allocator.release(client_ip);
		Ok(transition)
	}

	/// Advance every active tunnel's billing cursor by its elapsed whole
	/// minutes. Sub-minute remainders stay unbilled for the next tick or
	/// the terminal transition. The cursor is capped at `expires_at` so a
	/// tunnel the lifecycle scan has not reached yet is never over-billed.
	pub fn accrue_whole_minutes(&self, now: DateTime<Utc>) -> Vec<Accrual> {
		let mut inner = self.inner.lock().unwrap();
		let mut accruals = Vec::new();

		for record in inner.tunnels.values_mut() {
			if record.status != TunnelStatus::Active {
				continue;
			}
			let until = now.min(record.expires_at);
			let delta = (until - record.last_billed_at).num_seconds();
			if delta < 60 {
				continue;
			}
			let whole_seconds = delta / 60 * 60;
			record.last_billed_at += ChronoDuration::seconds(whole_seconds);
			accruals.push(Accrual {
				agent_id: record.agent_id.clone(),
				tunnel_id: record.id.clone(),
				seconds: whole_seconds,
				timestamp: record.last_billed_at,
			});
		}

		accruals
	}

	/// Advance every active tunnel's cursor all the way to `now` (capped at
	/// `expires_at`), including the sub-minute remainder. Shutdown path:
	/// records stay `active`.
	pub fn accrue_to(&self, now: DateTime<Utc>) -> Vec<Accrual> {
		let mut inner = self.inner.lock().unwrap();
		let mut accruals = Vec::new();

		for record in inner.tunnels.values_mut() {
			if record.status != TunnelStatus::Active {
				continue;
			}
			let until = now.min(record.expires_at);
			let seconds = (until - record.last_billed_at).num_seconds();
			if seconds <= 0 {
				continue;
			}
			record.last_billed_at = until;
			accruals.push(Accrual {
				agent_id: record.agent_id.clone(),
				tunnel_id: record.id.clone(),
				seconds,
				timestamp: record.last_billed_at,
			});
		}

		accruals
	}
}

/// `tun_` + 16 hex digits from the OS CSPRNG. Unique for the process
/// lifetime; the insert path re-mints on the astronomically unlikely
/// collision.
fn mint_tunnel_id() -> String {
	let mut bytes = [0u8; 8];
	OsRng.fill_bytes(&mut bytes);
	let mut id = String::with_capacity(20);
	id.push_str("tun_");
	for byte in bytes {
		id.push_str(&format!("{byte:02x}"));
	}
	id
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn registry() -> TunnelRegistry {
		TunnelRegistry::new("10.100.0.0/24".parse().unwrap())
	}

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
	}

	fn secs(n: i64) -> ChronoDuration {
		ChronoDuration::seconds(n)
	}

	#[test]
	fn mint_tunnel_id_shape() {
		let id = mint_tunnel_id();
		assert!(id.starts_with("tun_"));
		assert_eq!(id.len(), 20);
		assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn insert_creates_active_record() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 300, key, t0())
			.unwrap();

		assert_eq!(record.status, TunnelStatus::Active);
		assert_eq!(record.expires_at, t0() + secs(300));
		assert_eq!(record.last_billed_at, record.created_at);
		assert_eq!(registry.get(&record.id).unwrap().id, record.id);
	}

	#[test]
	fn active_tunnels_have_distinct_ips() {
		let registry = registry();
		let mut seen = std::collections::HashSet::new();
		for _ in 0..50 {
			let key = WgPrivateKey::generate();
			let record = registry
				.insert("agent_1", "us-east", 300, key, t0())
				.unwrap();
			assert!(seen.insert(record.client_ip));
		}
	}

	#[test]
	fn rollback_releases_ip_and_record() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 300, key, t0())
			.unwrap();
		let ip = record.client_ip;

		registry.rollback(&record.id);
		assert!(registry.get(&record.id).is_none());

		// The released address comes back around once the cursor wraps.
		let mut ips = Vec::new();
		for _ in 0..253 {
			let key = WgPrivateKey::generate();
			ips.push(
				registry
					.insert("agent_1", "us-east", 300, key, t0())
					.unwrap()
					.client_ip,
			);
		}
		assert!(ips.contains(&ip));
	}

	#[test]
	fn close_settles_cursor_and_overwrites_expiry() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 300, key, t0())
			.unwrap();

		let close_time = t0() + secs(45);
		let transition = registry.close(&record.id, close_time).unwrap();

		assert_eq!(transition.unbilled_seconds, 45);
		assert_eq!(transition.record.status, TunnelStatus::Closed);
		assert_eq!(transition.record.expires_at, close_time);
		assert_eq!(transition.record.last_billed_at, close_time);
	}

	#[test]
	fn close_is_not_idempotent() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 300, key, t0())
			.unwrap();

		registry.close(&record.id, t0() + secs(10)).unwrap();
		assert_eq!(
			registry.close(&record.id, t0() + secs(20)),
			Err(CloseError::NotActive)
		);
	}

	#[test]
	fn close_unknown_tunnel() {
		let registry = registry();
		assert_eq!(
			registry.close("tun_0000000000000000", t0()),
			Err(CloseError::NotFound)
		);
	}

	#[test]
	fn expire_only_fires_past_deadline() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 30, key, t0())
			.unwrap();

		assert!(registry.expire(&record.id, t0() + secs(29)).is_none());

		let transition = registry.expire(&record.id, t0() + secs(31)).unwrap();
		assert_eq!(transition.record.status, TunnelStatus::Expired);
		assert_eq!(transition.unbilled_seconds, 30);

		// Second attempt loses the race; already terminal.
		assert!(registry.expire(&record.id, t0() + secs(60)).is_none());
	}

	#[test]
	fn status_is_monotone() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 30, key, t0())
			.unwrap();

		registry.expire(&record.id, t0() + secs(40)).unwrap();
		assert_eq!(
			registry.close(&record.id, t0() + secs(50)),
			Err(CloseError::NotActive)
		);
		assert_eq!(
			registry.get(&record.id).unwrap().status,
			TunnelStatus::Expired
		);
	}

	#[test]
	fn whole_minute_accrual_advances_cursor() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 3600, key, t0())
			.unwrap();

		// 150 seconds elapsed: two whole minutes billable.
		let accruals = registry.accrue_whole_minutes(t0() + secs(150));
		assert_eq!(accruals.len(), 1);
		assert_eq!(accruals[0].seconds, 120);
		assert_eq!(
			registry.get(&record.id).unwrap().last_billed_at,
			t0() + secs(120)
		);

		// Same instant again: nothing new to bill.
		assert!(registry.accrue_whole_minutes(t0() + secs(150)).is_empty());
	}

	#[test]
	fn sub_minute_delta_accrues_nothing() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		registry
			.insert("agent_1", "us-east", 3600, key, t0())
			.unwrap();

		assert!(registry.accrue_whole_minutes(t0() + secs(59)).is_empty());
	}

	#[test]
	fn accrual_capped_at_expiry() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 90, key, t0())
			.unwrap();

		// The tunnel expired at +90 but the lifecycle scan has not run yet;
		// an accrual tick at +180 must not bill past the deadline.
		let accruals = registry.accrue_whole_minutes(t0() + secs(180));
		assert_eq!(accruals.len(), 1);
		assert_eq!(accruals[0].seconds, 60);

		let transition = registry.expire(&record.id, t0() + secs(180)).unwrap();
		assert_eq!(transition.unbilled_seconds, 30);
	}

	#[test]
	fn accrue_to_takes_the_remainder() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 3600, key, t0())
			.unwrap();

		let accruals = registry.accrue_to(t0() + secs(95));
		assert_eq!(accruals.len(), 1);
		assert_eq!(accruals[0].seconds, 95);
		assert_eq!(
			registry.get(&record.id).unwrap().status,
			TunnelStatus::Active
		);
		assert!(registry.accrue_to(t0() + secs(95)).is_empty());
	}

	#[test]
	fn cursor_invariant_holds_through_lifecycle() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 3600, key, t0())
			.unwrap();

		for step in [70, 130, 200, 3700] {
			let now = t0() + secs(step);
			registry.accrue_whole_minutes(now);
			let current = registry.get(&record.id).unwrap();
			assert!(current.created_at <= current.last_billed_at);
			assert!(current.last_billed_at <= now.min(current.expires_at));
		}
	}

	#[test]
	fn list_for_agent_filters_and_sorts() {
		let registry = registry();
		let a1 = registry
			.insert("agent_1", "us-east", 300, WgPrivateKey::generate(), t0())
			.unwrap();
		let a2 = registry
			.insert(
				"agent_1",
				"us-east",
				300,
				WgPrivateKey::generate(),
				t0() + secs(5),
			)
			.unwrap();
		registry
			.insert("agent_2", "us-east", 300, WgPrivateKey::generate(), t0())
			.unwrap();

		let listed = registry.list_for_agent("agent_1");
		assert_eq!(listed.len(), 2);
		assert_eq!(listed[0].id, a1.id);
		assert_eq!(listed[1].id, a2.id);
	}

	#[test]
	fn duration_and_cost_follow_status() {
		let registry = registry();
		let key = WgPrivateKey::generate();
		let record = registry
			.insert("agent_1", "us-east", 3600, key, t0())
			.unwrap();

		let active = registry.get(&record.id).unwrap();
		assert_eq!(active.duration_seconds(t0() + secs(30)), 30);
		assert!((active.cost_usd(t0() + secs(30)) - 30.0 / 3600.0 * 0.10).abs() < 1e-9);

		registry.close(&record.id, t0() + secs(30)).unwrap();
		let closed = registry.get(&record.id).unwrap();
		// Terminal duration is frozen regardless of how late we ask.
		assert_eq!(closed.duration_seconds(t0() + secs(9999)), 30);
	}
}
