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

//! Characteristic table exposed by the server.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ble_constants::*;
use crate::error::Error;

/// Characteristics served by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicId {
    /// Immediate Alert level; the alarm control point.
    AlertLevel,
    /// Link Loss alert level, kept per central.
    LinkLossAlertLevel,
    /// Sequence-numbered notification stream.
    Notification,
    /// Application settings (JSON).
    Settings,
    /// Authorization flag of the reading central.
    AuthorizationStatus,
    /// Alarm phase snapshot.
    AlarmStatus,
}

impl CharacteristicId {
    pub const ALL: [CharacteristicId; 6] = [
        CharacteristicId::AlertLevel,
        CharacteristicId::LinkLossAlertLevel,
        CharacteristicId::Notification,
        CharacteristicId::Settings,
        CharacteristicId::AuthorizationStatus,
        CharacteristicId::AlarmStatus,
    ];

    /// Characteristic UUID.
    ///
    /// Both alert level characteristics share the SIG UUID and are told
    /// apart by their service.
    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicId::AlertLevel | CharacteristicId::LinkLossAlertLevel => ALERT_LEVEL_UUID,
            CharacteristicId::Notification => NOTIFICATION_UUID,
            CharacteristicId::Settings => SETTINGS_UUID,
            CharacteristicId::AuthorizationStatus => AUTHORIZATION_UUID,
            CharacteristicId::AlarmStatus => ALARM_STATUS_UUID,
        }
    }

    /// UUID of the owning service.
    pub fn service_uuid(self) -> Uuid {
        match self {
            CharacteristicId::AlertLevel => IMMEDIATE_ALERT_SERVICE_UUID,
            CharacteristicId::LinkLossAlertLevel => LINK_LOSS_SERVICE_UUID,
            _ => ALARM_SERVICE_UUID,
        }
    }

    pub fn readable(self) -> bool {
        !matches!(
            self,
            CharacteristicId::AlertLevel | CharacteristicId::Notification
        )
    }

    pub fn writable(self) -> bool {
        matches!(
            self,
            CharacteristicId::AlertLevel
                | CharacteristicId::LinkLossAlertLevel
                | CharacteristicId::Settings
        )
    }

    pub fn notifiable(self) -> bool {
        self == CharacteristicId::Notification
    }

    /// Whether writing or subscribing requires an authorized session.
    pub fn requires_authorization(self) -> bool {
        !matches!(
            self,
            CharacteristicId::AuthorizationStatus | CharacteristicId::AlarmStatus
        )
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CharacteristicId::AlertLevel => "alert level",
            CharacteristicId::LinkLossAlertLevel => "link loss alert level",
            CharacteristicId::Notification => "notification",
            CharacteristicId::Settings => "settings",
            CharacteristicId::AuthorizationStatus => "authorization status",
            CharacteristicId::AlarmStatus => "alarm status",
        };
        f.write_str(name)
    }
}

/// Alert level as defined by the SIG Alert Level characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertLevel {
    #[default]
    NoAlert,
    Mild,
    High,
}

impl AlertLevel {
    pub fn as_byte(self) -> u8 {
        match self {
            AlertLevel::NoAlert => 0x00,
            AlertLevel::Mild => 0x01,
            AlertLevel::High => 0x02,
        }
    }

    /// Decode a single-byte characteristic value.
    pub fn from_value(value: &[u8]) -> Result<Self, Error> {
        match value {
            [0x00] => Ok(AlertLevel::NoAlert),
            [0x01] => Ok(AlertLevel::Mild),
            [0x02] => Ok(AlertLevel::High),
            [other] => Err(Error::InvalidValue(format!("alert level {:#04x}", other))),
            _ => Err(Error::InvalidValue(format!(
                "alert level must be 1 byte, got {}",
                value.len()
            ))),
        }
    }
}

/// One GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicId>,
}

/// Services registered with the radio before advertising.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTable {
    pub services: Vec<ServiceDescriptor>,
}

impl ServiceTable {
    /// The table served by the alarm server.
    pub fn alarm_server() -> Self {
        let mut services: Vec<ServiceDescriptor> = Vec::new();
        for characteristic in CharacteristicId::ALL {
            let uuid = characteristic.service_uuid();
            match services.iter_mut().find(|s| s.uuid == uuid) {
                Some(service) => service.characteristics.push(characteristic),
                None => services.push(ServiceDescriptor {
                    uuid,
                    primary: true,
                    characteristics: vec![characteristic],
                }),
            }
        }
        Self { services }
    }

    /// Service UUIDs to put in the advertisement.
    pub fn advertised_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|s| s.uuid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_decoding() {
        assert_eq!(AlertLevel::from_value(&[0x02]), Ok(AlertLevel::High));
        assert_eq!(AlertLevel::from_value(&[0x00]), Ok(AlertLevel::NoAlert));
        assert!(AlertLevel::from_value(&[0x03]).is_err());
        assert!(AlertLevel::from_value(&[]).is_err());
        assert!(AlertLevel::from_value(&[0x01, 0x01]).is_err());
    }

    #[test]
    fn test_shared_alert_level_uuid_differs_by_service() {
        let immediate = CharacteristicId::AlertLevel;
        let link_loss = CharacteristicId::LinkLossAlertLevel;
        assert_eq!(immediate.uuid(), ALERT_LEVEL_UUID);
        assert_eq!(link_loss.uuid(), ALERT_LEVEL_UUID);
        assert_eq!(immediate.service_uuid(), IMMEDIATE_ALERT_SERVICE_UUID);
        assert_eq!(link_loss.service_uuid(), LINK_LOSS_SERVICE_UUID);
    }

    #[test]
    fn test_service_table_groups_by_service() {
        let table = ServiceTable::alarm_server();
        assert_eq!(table.services.len(), 3);
        assert_eq!(table.services[0].uuid, IMMEDIATE_ALERT_SERVICE_UUID);
        let custom = table
            .services
            .iter()
            .find(|s| s.uuid == ALARM_SERVICE_UUID)
            .expect("custom service");
        assert_eq!(custom.characteristics.len(), 4);
    }

    #[test]
    fn test_authorization_requirements() {
        assert!(CharacteristicId::AlertLevel.requires_authorization());
        assert!(CharacteristicId::Notification.requires_authorization());
        assert!(!CharacteristicId::AuthorizationStatus.requires_authorization());
        assert!(CharacteristicId::Notification.notifiable());
        assert!(!CharacteristicId::Settings.notifiable());
    }
}
