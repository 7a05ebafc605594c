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

//! Authorization gate for privileged characteristics.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::collaborator::bounded;
use crate::error::Result;
use crate::storage::RevokedCentralStore;

/// Device-level Bluetooth sharing permission.
#[async_trait]
pub trait SharingPermission: Send + Sync {
    async fn sharing_enabled(&self) -> anyhow::Result<bool>;
}

/// Why a central was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SharingDisabled,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Authorized,
    Denied(DenyReason),
}

pub struct AuthorizationGate {
    permission: Arc<dyn SharingPermission>,
    revoked: RevokedCentralStore,
    timeout: Duration,
}

impl AuthorizationGate {
    pub fn new(
        permission: Arc<dyn SharingPermission>,
        revoked: RevokedCentralStore,
        timeout: Duration,
    ) -> Self {
        Self {
            permission,
            revoked,
            timeout,
        }
    }

    /// Decide whether `central` may use privileged characteristics.
    pub async fn authorize(&self, central: &str) -> Result<Decision> {
        if self.revoked.is_revoked(central) {
            info!("Central {} denied: revoked", central);
            return Ok(Decision::Denied(DenyReason::Revoked));
        }

        if !self.sharing_enabled().await? {
            info!("Central {} denied: Bluetooth sharing is off", central);
            return Ok(Decision::Denied(DenyReason::SharingDisabled));
        }

        info!("Central {} authorized", central);
        Ok(Decision::Authorized)
    }

    /// Device-level permission, independent of any central.
    pub async fn sharing_enabled(&self) -> Result<bool> {
        bounded(
            "sharing permission",
            self.timeout,
            self.permission.sharing_enabled(),
        )
        .await
    }

    pub fn revoke(&mut self, central: &str) -> anyhow::Result<()> {
        self.revoked.revoke(central)
    }

    pub fn restore(&mut self, central: &str) -> anyhow::Result<bool> {
        self.revoked.restore(central)
    }
}
