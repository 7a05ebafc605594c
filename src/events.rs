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

//! Status events reported to the bridge while the server runs.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::alarm::AlarmPhase;
use crate::bluetooth::CharacteristicId;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Services registered and advertising started.
    ServiceAdded { services: Vec<Uuid> },
    /// `start_server` while already serving.
    ServiceAlreadyProvided,
    ConnectionState {
        session: SessionId,
        central: String,
        connected: bool,
    },
    /// A central wrote a characteristic.
    RemoteWrite {
        session: SessionId,
        central: String,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    AlarmPhase { phase: AlarmPhase },
    Badge { badge: u32 },
}

impl ServerEvent {
    /// JSON object in the shape the bridge callback expects.
    pub fn to_json(&self) -> Value {
        match self {
            ServerEvent::ServiceAdded { services } => json!({
                "status": "serviceAdded",
                "services": services.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            }),
            ServerEvent::ServiceAlreadyProvided => json!({ "status": "serviceAlreadyProvided" }),
            ServerEvent::ConnectionState {
                session,
                central,
                connected,
            } => json!({
                "status": "serverConnectionState",
                "device": central,
                "session": session.0,
                "state": if *connected { "connected" } else { "disconnected" },
            }),
            ServerEvent::RemoteWrite {
                session,
                central,
                characteristic,
                value,
            } => json!({
                "status": "serviceRemoteWriteRequest",
                "device": central,
                "session": session.0,
                "characteristic": characteristic.uuid().to_string(),
                "value": hex::encode(value),
            }),
            ServerEvent::AlarmPhase { phase } => json!({
                "status": "alarmPhase",
                "phase": phase,
            }),
            ServerEvent::Badge { badge } => json!({
                "status": "badgeNumber",
                "badge": badge,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_shape() {
        let event = ServerEvent::ConnectionState {
            session: SessionId(3),
            central: "AA:BB:CC:DD:EE:FF".to_string(),
            connected: false,
        };
        assert_eq!(
            event.to_json(),
            json!({
                "status": "serverConnectionState",
                "device": "AA:BB:CC:DD:EE:FF",
                "session": 3,
                "state": "disconnected",
            })
        );
    }

    #[test]
    fn test_write_request_carries_hex_value() {
        let event = ServerEvent::RemoteWrite {
            session: SessionId(1),
            central: "AA:BB:CC:DD:EE:FF".to_string(),
            characteristic: CharacteristicId::AlertLevel,
            value: vec![0x02],
        };
        let json = event.to_json();
        assert_eq!(json["status"], "serviceRemoteWriteRequest");
        assert_eq!(json["characteristic"], "00002a06-0000-1000-8000-00805f9b34fb");
        assert_eq!(json["value"], "02");
    }

    #[test]
    fn test_phase_is_camel_case() {
        let event = ServerEvent::AlarmPhase {
            phase: AlarmPhase::Acknowledged,
        };
        assert_eq!(event.to_json()["phase"], "acknowledged");
    }
}
