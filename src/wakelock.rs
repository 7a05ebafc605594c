// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reference-counted CPU keep-awake leases.
//!
//! The platform lock is held exactly while at least one lease is
//! outstanding. Holders keep the [`LeaseId`] they were given and hand it
//! back on release; releasing twice is harmless.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::collaborator::bounded;
use crate::error::Result;

/// Platform primitive that keeps the CPU out of low-power sleep.
#[async_trait]
pub trait WakeLockPlatform: Send + Sync {
    async fn acquire(&self) -> anyhow::Result<()>;
    async fn release(&self) -> anyhow::Result<()>;
}

/// Handle for one outstanding lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseId(u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

pub struct WakeLockManager {
    platform: Arc<dyn WakeLockPlatform>,
    timeout: Duration,
    leases: BTreeMap<LeaseId, &'static str>,
    next_lease: u64,
    held: bool,
}

impl WakeLockManager {
    pub fn new(platform: Arc<dyn WakeLockPlatform>, timeout: Duration) -> Self {
        Self {
            platform,
            timeout,
            leases: BTreeMap::new(),
            next_lease: 1,
            held: false,
        }
    }

    /// Take a lease for `holder`, taking the platform lock on the first one.
    pub async fn acquire(&mut self, holder: &'static str) -> Result<LeaseId> {
        if !self.held {
            bounded("wake lock", self.timeout, self.platform.acquire()).await?;
            self.held = true;
            info!("Wake lock acquired");
        }

        let lease = LeaseId(self.next_lease);
        self.next_lease += 1;
        self.leases.insert(lease, holder);
        debug!("{} granted to {} ({} outstanding)", lease, holder, self.leases.len());
        Ok(lease)
    }

    /// Return a lease. Unknown or already-released leases are ignored.
    pub async fn release(&mut self, lease: LeaseId) {
        let Some(holder) = self.leases.remove(&lease) else {
            debug!("{} already released", lease);
            return;
        };
        debug!("{} returned by {} ({} outstanding)", lease, holder, self.leases.len());

        if self.leases.is_empty() {
            self.release_platform().await;
        }
    }

    /// Drop every lease and the platform lock regardless of count.
    pub async fn shutdown(&mut self) {
        if !self.leases.is_empty() {
            info!("Force-releasing {} wake lock lease(s)", self.leases.len());
            self.leases.clear();
        }
        self.release_platform().await;
    }

    async fn release_platform(&mut self) {
        if !self.held {
            return;
        }
        // Cleared even when the platform call fails.
        self.held = false;
        match bounded("wake lock", self.timeout, self.platform.release()).await {
            Ok(()) => info!("Wake lock released"),
            Err(e) => error!("Failed to release platform wake lock: {}", e),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn outstanding(&self) -> usize {
        self.leases.len()
    }

    pub fn is_outstanding(&self, lease: LeaseId) -> bool {
        self.leases.contains_key(&lease)
    }
}
