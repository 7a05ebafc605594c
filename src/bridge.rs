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

//! Bridge-facing API.
//!
//! One method per bridge action, each taking a typed parameter record.
//! Parameter records ignore keys they do not know so older and newer
//! bridges can talk to the same server.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::alarm::StartOutcome;
use crate::audio::SoundId;
use crate::bluetooth::{AlertLevel, CharacteristicId};
use crate::controller::GattServer;
use crate::error::Error;
use crate::session::SessionId;
use crate::settings::SettingsPatch;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartServerParams {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmParams {
    pub alert_level: AlertLevel,
}

impl Default for AlarmParams {
    fn default() -> Self {
        Self {
            alert_level: AlertLevel::High,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationParams {
    /// Session to subscribe; every connected session when absent.
    pub session: Option<SessionId>,
    pub enabled: bool,
}

impl Default for NotificationParams {
    fn default() -> Self {
        Self {
            session: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaySoundParams {
    pub sound: SoundId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BadgeParams {
    pub badge_number: u32,
}

/// A central's Bluetooth address, as reported in connection events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CentralParams {
    pub central: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid parameters for {action}: {message}")]
    InvalidParams { action: String, message: String },

    #[error(transparent)]
    Core(#[from] Error),
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidAction(_) => "invalidAction",
            BridgeError::InvalidParams { .. } => "invalidParams",
            BridgeError::Core(e) => e.kind(),
        }
    }

    /// Error object for the bridge's error callback.
    pub fn to_json(&self) -> Value {
        json!({ "error": self.kind(), "message": self.to_string() })
    }
}

pub type BridgeResult = std::result::Result<Value, BridgeError>;

pub struct Bridge {
    server: GattServer,
}

impl Bridge {
    pub fn new(server: GattServer) -> Self {
        Self { server }
    }

    pub async fn start_server(&self, _params: StartServerParams) -> BridgeResult {
        let outcome = self.server.lock().await.start_server().await?;
        let status = match outcome {
            StartOutcome::Started => "serviceAdded",
            StartOutcome::AlreadyRunning => "serviceAlreadyProvided",
        };
        Ok(json!({ "status": status }))
    }

    pub async fn alarm(&self, params: AlarmParams) -> BridgeResult {
        let mut controller = self.server.lock().await;
        controller.alarm(params.alert_level).await?;
        Ok(json!({ "status": "alarm", "phase": controller.phase() }))
    }

    pub async fn reset_alarm(&self) -> BridgeResult {
        let mut controller = self.server.lock().await;
        controller.reset_alarm().await;
        Ok(json!({ "status": "alarmReset", "phase": controller.phase() }))
    }

    pub async fn stop_alarm_sound(&self) -> BridgeResult {
        self.server.lock().await.stop_alarm_sound().await;
        Ok(json!({ "status": "alarmSoundStopped" }))
    }

    pub async fn release_cpu(&self) -> BridgeResult {
        self.server.lock().await.release_cpu().await;
        Ok(json!({ "status": "cpuReleased" }))
    }

    pub async fn register_notifications(&self, params: NotificationParams) -> BridgeResult {
        let mut controller = self.server.lock().await;

        if let Some(session) = params.session {
            controller
                .on_subscribe(session, CharacteristicId::Notification, params.enabled)
                .await?;
            return Ok(json!({ "status": "notifications", "sessions": [session.0] }));
        }

        let all: Vec<SessionId> = controller.sessions().map(|s| s.id).collect();
        let mut registered = Vec::new();
        for session in all {
            match controller
                .on_subscribe(session, CharacteristicId::Notification, params.enabled)
                .await
            {
                Ok(()) => registered.push(session.0),
                Err(e) => debug!("{} not registered: {}", session, e),
            }
        }
        Ok(json!({ "status": "notifications", "sessions": registered }))
    }

    pub async fn is_bluetooth_sharing_authorized(&self) -> BridgeResult {
        let authorized = self
            .server
            .lock()
            .await
            .is_bluetooth_sharing_authorized()
            .await?;
        Ok(json!({ "isAuthorized": authorized }))
    }

    pub async fn get_app_settings(&self) -> BridgeResult {
        let settings = self.server.lock().await.get_app_settings().await?;
        Ok(json!(settings))
    }

    pub async fn set_app_settings(&self, params: Value) -> BridgeResult {
        let (patch, unknown) = SettingsPatch::from_value(params).map_err(BridgeError::Core)?;
        if !unknown.is_empty() {
            debug!("Ignoring unknown settings key(s): {}", unknown.join(", "));
        }
        let settings = self.server.lock().await.set_app_settings(&patch).await?;
        Ok(json!(settings))
    }

    pub async fn play_sound(&self, params: PlaySoundParams) -> BridgeResult {
        self.server.lock().await.play_sound(&params.sound).await?;
        Ok(json!({ "status": "soundPlayed" }))
    }

    pub async fn set_application_badge_number(&self, params: BadgeParams) -> BridgeResult {
        self.server
            .lock()
            .await
            .set_badge(params.badge_number)
            .await?;
        Ok(json!({ "status": "badgeNumber", "badge": params.badge_number }))
    }

    pub async fn revoke_central(&self, params: CentralParams) -> BridgeResult {
        let central = required_central("revokeCentral", params)?;
        self.server.lock().await.revoke(&central).await?;
        Ok(json!({ "status": "centralRevoked", "central": central }))
    }

    pub async fn restore_central(&self, params: CentralParams) -> BridgeResult {
        let central = required_central("restoreCentral", params)?;
        let was_revoked = self.server.lock().await.restore(&central)?;
        Ok(json!({ "status": "centralRestored", "central": central, "wasRevoked": was_revoked }))
    }

    /// Dispatch by action name with loosely-typed arguments.
    ///
    /// `args` may be an object, `null`, or (for the badge) a bare number.
    pub async fn execute(&self, action: &str, args: Value) -> BridgeResult {
        info!("Bridge action {}", action);
        match action {
            "startServer" => self.start_server(parse(action, args)?).await,
            "alarm" => self.alarm(parse(action, args)?).await,
            "resetAlarm" => self.reset_alarm().await,
            "stopAlarmSound" => self.stop_alarm_sound().await,
            "releaseCpu" => self.release_cpu().await,
            "registerNotifications" => self.register_notifications(parse(action, args)?).await,
            "isBluetoothSharingAuthorized" => self.is_bluetooth_sharing_authorized().await,
            "getAppSettings" => self.get_app_settings().await,
            "setAppSettings" => self.set_app_settings(args).await,
            "playSound" => self.play_sound(parse(action, args)?).await,
            "revokeCentral" => self.revoke_central(parse(action, args)?).await,
            "restoreCentral" => self.restore_central(parse(action, args)?).await,
            "setApplicationBadgeNumber" => {
                let params = match args {
                    Value::Number(n) => BadgeParams {
                        badge_number: n
                            .as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| BridgeError::InvalidParams {
                                action: action.to_string(),
                                message: format!("badge number {} out of range", n),
                            })?,
                    },
                    other => parse(action, other)?,
                };
                self.set_application_badge_number(params).await
            }
            other => Err(BridgeError::InvalidAction(other.to_string())),
        }
    }
}

fn required_central(action: &str, params: CentralParams) -> Result<String, BridgeError> {
    let central = params.central.trim();
    if central.is_empty() {
        return Err(BridgeError::InvalidParams {
            action: action.to_string(),
            message: "missing central address".to_string(),
        });
    }
    Ok(central.to_string())
}

fn parse<T>(action: &str, args: Value) -> Result<T, BridgeError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args).map_err(|e| BridgeError::InvalidParams {
        action: action.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmPhase;
    use crate::testing::Harness;

    fn bridge(h: &Harness) -> (Bridge, GattServer) {
        let server = GattServer::new(h.controller());
        (Bridge::new(server.clone()), server)
    }

    #[tokio::test]
    async fn test_start_twice() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        assert_eq!(
            bridge.execute("startServer", json!({})).await.unwrap(),
            json!({ "status": "serviceAdded" })
        );
        assert_eq!(
            bridge.execute("startServer", Value::Null).await.unwrap(),
            json!({ "status": "serviceAlreadyProvided" })
        );
    }

    #[tokio::test]
    async fn test_unknown_param_keys_are_ignored() {
        let h = Harness::new();
        let (bridge, server) = bridge(&h);
        bridge
            .execute("startServer", json!({ "legacyMode": true }))
            .await
            .unwrap();
        bridge
            .execute("alarm", json!({ "alertLevel": "mild", "repeat": 3 }))
            .await
            .unwrap();

        let controller = server.lock().await;
        assert_eq!(controller.phase(), AlarmPhase::Triggered);
        assert_eq!(controller.alarm_state().level, AlertLevel::Mild);
    }

    #[tokio::test]
    async fn test_settings_partial_merge() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        let before = bridge.execute("getAppSettings", Value::Null).await.unwrap();

        bridge
            .execute(
                "setAppSettings",
                json!({ "soundEnabled": false, "futureOption": 1 }),
            )
            .await
            .unwrap();
        let after = bridge.execute("getAppSettings", Value::Null).await.unwrap();

        assert_eq!(after["soundEnabled"], false);
        let mut expected = before;
        expected["soundEnabled"] = json!(false);
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn test_settings_without_known_fields_fail() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        let err = bridge
            .execute("setAppSettings", json!({ "futureOption": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalidSettings");
    }

    #[tokio::test]
    async fn test_invalid_action() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        let err = bridge
            .execute("getAlarmSettings", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::InvalidAction("getAlarmSettings".to_string()));
        assert_eq!(err.to_json()["error"], "invalidAction");
    }

    #[tokio::test]
    async fn test_unauthorized_register_notifications() {
        let h = Harness::new();
        h.sharing.set(false);
        let (bridge, server) = bridge(&h);
        bridge.execute("startServer", Value::Null).await.unwrap();
        let session = server.lock().await.on_connect("AA:BB:CC:DD:EE:FF").unwrap();

        let err = bridge
            .execute("registerNotifications", json!({ "session": session.0 }))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::Core(Error::Unauthorized));
        assert!(server
            .lock()
            .await
            .get_session(session)
            .unwrap()
            .subscriptions
            .is_empty());

        // Without a session, denied sessions are skipped.
        let result = bridge
            .execute("registerNotifications", Value::Null)
            .await
            .unwrap();
        assert_eq!(result["sessions"], json!([]));
    }

    #[tokio::test]
    async fn test_badge_accepts_bare_number() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        bridge
            .execute("setApplicationBadgeNumber", json!(7))
            .await
            .unwrap();
        assert_eq!(h.audio.badge(), 7);

        bridge
            .execute("setApplicationBadgeNumber", json!({ "badgeNumber": 2 }))
            .await
            .unwrap();
        assert_eq!(h.audio.badge(), 2);

        let err = bridge
            .execute("setApplicationBadgeNumber", json!(-1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalidParams");
    }

    #[tokio::test]
    async fn test_sharing_and_sound() {
        let h = Harness::new();
        let (bridge, _) = bridge(&h);
        assert_eq!(
            bridge
                .execute("isBluetoothSharingAuthorized", Value::Null)
                .await
                .unwrap(),
            json!({ "isAuthorized": true })
        );

        bridge.execute("playSound", json!({})).await.unwrap();
        assert_eq!(h.audio.sounds(), vec![SoundId::alarm()]);
    }

    #[tokio::test]
    async fn test_revoke_and_restore_central() {
        const PHONE: &str = "AA:BB:CC:DD:EE:FF";
        let h = Harness::new();
        let (bridge, server) = bridge(&h);
        bridge.execute("startServer", Value::Null).await.unwrap();
        let session = server.lock().await.on_connect(PHONE).unwrap();

        assert_eq!(
            bridge
                .execute("revokeCentral", json!({ "central": PHONE, "reason": "lost" }))
                .await
                .unwrap(),
            json!({ "status": "centralRevoked", "central": PHONE })
        );
        assert_eq!(
            server
                .lock()
                .await
                .on_characteristic_write(session, CharacteristicId::AlertLevel, &[2])
                .await,
            Err(Error::Unauthorized)
        );

        let restored = bridge
            .execute("restoreCentral", json!({ "central": PHONE }))
            .await
            .unwrap();
        assert_eq!(restored["wasRevoked"], true);
        server
            .lock()
            .await
            .on_characteristic_write(session, CharacteristicId::AlertLevel, &[2])
            .await
            .unwrap();
        assert_eq!(server.lock().await.phase(), AlarmPhase::Triggered);

        let err = bridge.execute("revokeCentral", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "invalidParams");
    }
}
