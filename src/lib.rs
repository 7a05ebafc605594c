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

//! BLE GATT alarm server.
//!
//! A peripheral that serves the Immediate Alert and Link Loss services
//! plus a custom alarm service to companion centrals, and drives the
//! host's alarm sound, wake lock and badge from what they write.

pub mod alarm;
pub mod audio;
pub mod authorization;
pub mod bluetooth;
pub mod bridge;
pub mod collaborator;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod notifications;
pub mod platform;
pub mod session;
pub mod settings;
pub mod storage;
pub mod wakelock;

#[cfg(test)]
pub mod testing;

pub use bridge::Bridge;
pub use config::ServerConfig;
pub use controller::{Collaborators, GattController, GattServer, Limits};
pub use dispatcher::{Dispatcher, RadioEvent};
pub use error::{Error, Result};
pub use events::ServerEvent;
