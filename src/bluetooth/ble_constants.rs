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

//! GATT UUIDs and protocol constants.

use uuid::Uuid;

/// Bluetooth SIG Immediate Alert service.
pub const IMMEDIATE_ALERT_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x00001802_0000_1000_8000_00805f9b34fb);

/// Bluetooth SIG Link Loss service.
pub const LINK_LOSS_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001803_0000_1000_8000_00805f9b34fb);

/// Bluetooth SIG Alert Level characteristic (shared by both services above).
pub const ALERT_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a06_0000_1000_8000_00805f9b34fb);

/// Alarm companion service.
pub const ALARM_SERVICE_UUID: Uuid = Uuid::from_u128(0xa1e40000_7c3b_4e55_9d3f_2b8c6f1e0a41);

/// Notification stream (NOTIFY).
pub const NOTIFICATION_UUID: Uuid = Uuid::from_u128(0xa1e40001_7c3b_4e55_9d3f_2b8c6f1e0a41);

/// Application settings as JSON (READ + WRITE).
pub const SETTINGS_UUID: Uuid = Uuid::from_u128(0xa1e40002_7c3b_4e55_9d3f_2b8c6f1e0a41);

/// Whether the reading central is authorized (READ).
pub const AUTHORIZATION_UUID: Uuid = Uuid::from_u128(0xa1e40003_7c3b_4e55_9d3f_2b8c6f1e0a41);

/// Alarm phase and sound flag (READ).
pub const ALARM_STATUS_UUID: Uuid = Uuid::from_u128(0xa1e40004_7c3b_4e55_9d3f_2b8c6f1e0a41);

/// Tunables with their defaults.
pub mod defaults {
    /// Items buffered per session before the oldest is dropped.
    pub const QUEUE_CAPACITY: usize = 32;

    /// Concurrent centrals accepted before connections are rejected.
    pub const MAX_SESSIONS: usize = 4;

    /// Deadline for collaborator calls in milliseconds.
    pub const COLLABORATOR_TIMEOUT_MS: u64 = 500;

    /// Interval between BlueZ connection polls when a central is connected.
    pub const POLL_CONNECTED_MS: u64 = 1000;

    /// Interval between BlueZ connection polls when idle.
    pub const POLL_IDLE_MS: u64 = 5000;
}
