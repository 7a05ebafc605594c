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

//! Per-connection state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::bluetooth::{AlertLevel, CharacteristicId};

/// Identifier of one connection, never reused within a server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Authorization of a session's central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    /// Not yet evaluated, or denied on the last attempt.
    Unauthorized,
    /// Approved; sticky until disconnect.
    Authorized,
    /// Revoked while connected.
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            AuthorizationStatus::Authorized => 0x01,
            AuthorizationStatus::Unauthorized | AuthorizationStatus::Revoked => 0x00,
        }
    }
}

/// A connected central.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Central address as reported by the radio.
    pub central: String,
    pub authorization: AuthorizationStatus,
    pub subscriptions: BTreeSet<CharacteristicId>,
    pub connected_at: DateTime<Utc>,
    /// Level to raise if this link drops.
    pub link_loss_level: AlertLevel,
}

impl Session {
    pub fn new(id: SessionId, central: String) -> Self {
        Self {
            id,
            central,
            authorization: AuthorizationStatus::Unauthorized,
            subscriptions: BTreeSet::new(),
            connected_at: Utc::now(),
            link_loss_level: AlertLevel::NoAlert,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization == AuthorizationStatus::Authorized
    }

    pub fn is_subscribed(&self, characteristic: CharacteristicId) -> bool {
        self.subscriptions.contains(&characteristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_unauthorized() {
        let session = Session::new(SessionId(1), "AA:BB:CC:DD:EE:FF".to_string());
        assert_eq!(session.authorization, AuthorizationStatus::Unauthorized);
        assert!(!session.is_authorized());
        assert!(session.subscriptions.is_empty());
        assert_eq!(session.link_loss_level, AlertLevel::NoAlert);
    }

    #[test]
    fn test_authorization_byte() {
        assert_eq!(AuthorizationStatus::Authorized.as_byte(), 1);
        assert_eq!(AuthorizationStatus::Revoked.as_byte(), 0);
    }
}
