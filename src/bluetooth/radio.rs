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

//! Radio stack seam.

use anyhow::Result;
use async_trait::async_trait;

use super::characteristic::{CharacteristicId, ServiceTable};
use crate::session::SessionId;

/// Operations the core needs from the BLE stack.
///
/// Connection, read, write and subscribe callbacks flow the other way,
/// as [`RadioEvent`](crate::dispatcher::RadioEvent)s.
#[async_trait]
pub trait RadioStack: Send + Sync {
    /// Register the service table and start advertising it.
    async fn start_advertising(&self, table: &ServiceTable) -> Result<()>;

    /// Push a characteristic value to a session.
    ///
    /// Returns once the stack has accepted the value for transmission.
    async fn notify(
        &self,
        session: SessionId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Whether every notification reaches all subscribers regardless of
    /// the session it was sent for.
    fn broadcasts(&self) -> bool {
        false
    }
}
