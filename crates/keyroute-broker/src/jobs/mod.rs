// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs: periodic accrual, usage delivery, and the tunnel
//! lifecycle supervisor, driven by a shared scheduler.

pub mod accrual;
pub mod delivery;
pub mod lifecycle;
pub mod scheduler;

pub use accrual::AccrualJob;
pub use delivery::UsageDeliveryJob;
pub use lifecycle::{expire_tunnel, LifecycleJob};
pub use scheduler::{Job, JobError, JobOutput, JobScheduler};

use std::time::Duration;

pub const ACCRUAL_INTERVAL: Duration = Duration::from_secs(60);
pub const LIFECYCLE_INTERVAL: Duration = Duration::from_secs(10);
