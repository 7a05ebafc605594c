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

//! GATT session controller.
//!
//! Owns the session table and every piece of shared mutable state (alarm
//! state, notification queues, settings cache, wake-lock count). All
//! entry points take `&mut self`; [`GattServer`] serializes callers
//! behind a single async mutex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmPhase, AlarmState, AlarmStateMachine, Publish, StartOutcome};
use crate::audio::{AudioUi, SoundId};
use crate::authorization::{AuthorizationGate, Decision, DenyReason, SharingPermission};
use crate::bluetooth::ble_constants::defaults;
use crate::bluetooth::{AlertLevel, CharacteristicId, RadioStack, ServiceTable};
use crate::collaborator::bounded;
use crate::error::{Error, Result};
use crate::events::ServerEvent;
use crate::notifications::{NotificationChannel, NotificationItem, NotificationKind};
use crate::session::{AuthorizationStatus, Session, SessionId};
use crate::settings::{AlertKind, AppSettings, SettingsAdapter, SettingsPatch, SettingsStore};
use crate::storage::RevokedCentralStore;
use crate::wakelock::{WakeLockManager, WakeLockPlatform};

/// Resource bounds for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_sessions: usize,
    pub queue_capacity: usize,
    pub collaborator_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            collaborator_timeout: Duration::from_millis(defaults::COLLABORATOR_TIMEOUT_MS),
        }
    }
}

/// External systems the controller drives.
pub struct Collaborators {
    pub radio: Arc<dyn RadioStack>,
    pub store: Arc<dyn SettingsStore>,
    pub audio: Arc<dyn AudioUi>,
    pub wake_lock: Arc<dyn WakeLockPlatform>,
    pub sharing: Arc<dyn SharingPermission>,
    pub revoked: RevokedCentralStore,
}

pub struct GattController {
    sessions: BTreeMap<SessionId, Session>,
    next_session: u64,
    gate: AuthorizationGate,
    settings: SettingsAdapter,
    notifications: NotificationChannel,
    alarm: AlarmStateMachine,
    wake_lock: WakeLockManager,
    radio: Arc<dyn RadioStack>,
    audio: Arc<dyn AudioUi>,
    table: ServiceTable,
    limits: Limits,
    badge: u32,
    events: Option<mpsc::Sender<ServerEvent>>,
}

impl GattController {
    pub fn new(collaborators: Collaborators, limits: Limits) -> Self {
        let timeout = limits.collaborator_timeout;
        let notifications = if collaborators.radio.broadcasts() {
            info!("Radio broadcasts notifications; using one shared queue");
            NotificationChannel::shared(limits.queue_capacity)
        } else {
            NotificationChannel::new(limits.queue_capacity)
        };
        Self {
            sessions: BTreeMap::new(),
            next_session: 1,
            gate: AuthorizationGate::new(collaborators.sharing, collaborators.revoked, timeout),
            settings: SettingsAdapter::new(collaborators.store, timeout),
            notifications,
            alarm: AlarmStateMachine::new(collaborators.audio.clone(), timeout),
            wake_lock: WakeLockManager::new(collaborators.wake_lock, timeout),
            radio: collaborators.radio,
            audio: collaborators.audio,
            table: ServiceTable::alarm_server(),
            limits,
            badge: 0,
            events: None,
        }
    }

    /// Report status events on `events`.
    pub fn with_events(mut self, events: mpsc::Sender<ServerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ServerEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.try_send(event) {
            debug!("Dropping server event: {}", e);
        }
    }

    // ---- Server lifecycle ----

    /// Register the service table, start advertising and enter Serving.
    pub async fn start_server(&mut self) -> Result<StartOutcome> {
        if self.alarm.phase() != AlarmPhase::Idle {
            info!("GATT server is already running");
            self.emit(ServerEvent::ServiceAlreadyProvided);
            return Ok(StartOutcome::AlreadyRunning);
        }

        bounded(
            "radio",
            self.limits.collaborator_timeout,
            self.radio.start_advertising(&self.table),
        )
        .await?;

        let outcome = self.alarm.start_server();
        self.emit(ServerEvent::ServiceAdded {
            services: self.table.advertised_uuids(),
        });
        self.emit_phase();

        // Centrals that connected before the server started learn their status now.
        let subscribed: Vec<(SessionId, u8)> = self
            .sessions
            .values()
            .filter(|s| s.is_subscribed(CharacteristicId::Notification))
            .map(|s| (s.id, s.authorization.as_byte()))
            .collect();
        for (session, status) in subscribed {
            self.notifications
                .enqueue_to(session, NotificationKind::AuthorizationStatus, vec![status]);
            self.flush(session).await;
        }

        Ok(outcome)
    }

    /// Tear everything down and force-release every lease.
    pub async fn shutdown(&mut self) {
        info!("Shutting down GATT server ({} session(s))", self.sessions.len());
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.sessions.remove(&id);
            self.notifications.close(id);
        }
        self.alarm.shutdown(&mut self.wake_lock).await;
        self.wake_lock.shutdown().await;
        self.emit_phase();
    }

    // ---- Connections ----

    pub fn on_connect(&mut self, central: &str) -> Result<SessionId> {
        if self.sessions.len() >= self.limits.max_sessions {
            warn!(
                "Rejecting {}: all {} connection slots in use",
                central, self.limits.max_sessions
            );
            return Err(Error::ConnectionRejected(format!(
                "{} sessions already open",
                self.sessions.len()
            )));
        }

        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.sessions.insert(id, Session::new(id, central.to_string()));
        self.notifications.open(id);

        info!("📱 {} connected as {}", central, id);
        self.emit(ServerEvent::ConnectionState {
            session: id,
            central: central.to_string(),
            connected: true,
        });
        Ok(id)
    }

    /// Destroy a session and everything held on its behalf.
    ///
    /// Unknown sessions are ignored.
    pub async fn on_disconnect(&mut self, session: SessionId) {
        let Some(closed) = self.sessions.remove(&session) else {
            debug!("Disconnect for unknown {}", session);
            return;
        };

        if let Some(lease) = self.notifications.close(session) {
            self.wake_lock.release(lease).await;
        }
        info!("🔌 {} ({}) disconnected", closed.central, session);
        self.emit(ServerEvent::ConnectionState {
            session,
            central: closed.central.clone(),
            connected: false,
        });

        if closed.is_authorized() && closed.link_loss_level != AlertLevel::NoAlert {
            self.raise_link_loss(&closed).await;
        }
    }

    async fn raise_link_loss(&mut self, closed: &Session) {
        let settings = self.settings.effective().await;
        if !settings.alert_enabled(AlertKind::LinkLoss) {
            debug!("Link loss alerts disabled, ignoring loss of {}", closed.central);
            return;
        }
        info!(
            "⚠️ Link to {} lost, raising {:?} alarm",
            closed.central, closed.link_loss_level
        );
        self.raise(closed.link_loss_level, AlertKind::LinkLoss, &settings)
            .await;
    }

    fn session(&self, session: SessionId) -> Result<&Session> {
        self.sessions.get(&session).ok_or(Error::NotFound(session))
    }

    fn session_mut(&mut self, session: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(&session).ok_or(Error::NotFound(session))
    }

    // ---- Authorization ----

    /// Evaluate the gate for `session` if it has not passed yet.
    pub async fn ensure_authorized(&mut self, session: SessionId) -> Result<()> {
        let current = self.session(session)?;
        match current.authorization {
            AuthorizationStatus::Authorized => return Ok(()),
            AuthorizationStatus::Revoked => return Err(Error::Unauthorized),
            AuthorizationStatus::Unauthorized => {}
        }

        let central = current.central.clone();
        let decision = self.gate.authorize(&central).await?;

        // The session may not outlive a slow gate; look it up again.
        let current = self.session_mut(session)?;
        match decision {
            Decision::Authorized => {
                current.authorization = AuthorizationStatus::Authorized;
                self.notifications.enqueue_to(
                    session,
                    NotificationKind::AuthorizationStatus,
                    vec![AuthorizationStatus::Authorized.as_byte()],
                );
                Ok(())
            }
            Decision::Denied(DenyReason::Revoked) => {
                current.authorization = AuthorizationStatus::Revoked;
                Err(Error::Unauthorized)
            }
            Decision::Denied(DenyReason::SharingDisabled) => Err(Error::Unauthorized),
        }
    }

    /// Persistently revoke `central` and demote its live sessions.
    pub async fn revoke(&mut self, central: &str) -> Result<()> {
        self.gate
            .revoke(central)
            .map_err(|e| Error::collaborator("revocation store", e))?;

        let affected: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.central.eq_ignore_ascii_case(central))
            .map(|s| s.id)
            .collect();

        for id in affected {
            self.notifications.enqueue_to(
                id,
                NotificationKind::AuthorizationStatus,
                vec![AuthorizationStatus::Revoked.as_byte()],
            );
            self.flush(id).await;

            if let Some(session) = self.sessions.get_mut(&id) {
                session.authorization = AuthorizationStatus::Revoked;
                session.subscriptions.remove(&CharacteristicId::Notification);
            }
            if let Some(lease) = self.notifications.set_subscribed(id, false) {
                self.wake_lock.release(lease).await;
            }
            info!("{} revoked", id);
        }
        Ok(())
    }

    /// Lift a revocation. Live sessions are re-evaluated on next use.
    pub fn restore(&mut self, central: &str) -> Result<bool> {
        let restored = self
            .gate
            .restore(central)
            .map_err(|e| Error::collaborator("revocation store", e))?;

        for session in self.sessions.values_mut() {
            if session.central.eq_ignore_ascii_case(central)
                && session.authorization == AuthorizationStatus::Revoked
            {
                session.authorization = AuthorizationStatus::Unauthorized;
            }
        }
        Ok(restored)
    }

    pub async fn is_bluetooth_sharing_authorized(&self) -> Result<bool> {
        self.gate.sharing_enabled().await
    }

    // ---- GATT callbacks ----

    pub async fn on_characteristic_write(
        &mut self,
        session: SessionId,
        characteristic: CharacteristicId,
        value: &[u8],
    ) -> Result<()> {
        let central = self.session(session)?.central.clone();
        if !characteristic.writable() {
            return Err(Error::NotSupported(characteristic));
        }
        if characteristic.requires_authorization() {
            self.ensure_authorized(session).await?;
        }

        debug!(
            "✍️ {} wrote {}: {}",
            session,
            characteristic,
            hex::encode(value)
        );
        self.emit(ServerEvent::RemoteWrite {
            session,
            central,
            characteristic,
            value: value.to_vec(),
        });

        match characteristic {
            CharacteristicId::AlertLevel => {
                let level = AlertLevel::from_value(value)?;
                match AlertKind::for_level(level) {
                    Some(kind) => {
                        let settings = self.settings.effective().await;
                        self.raise(level, kind, &settings).await;
                    }
                    None => self.acknowledge().await,
                }
            }
            CharacteristicId::LinkLossAlertLevel => {
                let level = AlertLevel::from_value(value)?;
                self.session_mut(session)?.link_loss_level = level;
                info!("{} link loss level set to {:?}", session, level);
            }
            CharacteristicId::Settings => {
                let patch = SettingsPatch::from_gatt_value(value)?;
                self.settings.set_settings(&patch).await?;
            }
            other => return Err(Error::NotSupported(other)),
        }

        self.flush(session).await;
        Ok(())
    }

    pub async fn on_subscribe(
        &mut self,
        session: SessionId,
        characteristic: CharacteristicId,
        enabled: bool,
    ) -> Result<()> {
        self.session(session)?;
        if !characteristic.notifiable() {
            return Err(Error::NotSupported(characteristic));
        }

        if !enabled {
            self.session_mut(session)?.subscriptions.remove(&characteristic);
            if let Some(lease) = self.notifications.set_subscribed(session, false) {
                self.wake_lock.release(lease).await;
            }
            debug!("{} unsubscribed from {}", session, characteristic);
            return Ok(());
        }

        if characteristic.requires_authorization() {
            self.ensure_authorized(session).await?;
        }
        self.session_mut(session)?.subscriptions.insert(characteristic);
        self.notifications.set_subscribed(session, true);
        info!("🔔 {} subscribed to {}", session, characteristic);

        self.flush(session).await;
        Ok(())
    }

    pub async fn on_characteristic_read(
        &mut self,
        session: SessionId,
        characteristic: CharacteristicId,
    ) -> Result<Vec<u8>> {
        let current = self.session(session)?;
        if !characteristic.readable() {
            return Err(Error::NotSupported(characteristic));
        }

        match characteristic {
            CharacteristicId::AuthorizationStatus => Ok(vec![current.authorization.as_byte()]),
            CharacteristicId::LinkLossAlertLevel => Ok(vec![current.link_loss_level.as_byte()]),
            CharacteristicId::AlarmStatus => Ok(self.alarm.state().encode()),
            CharacteristicId::Settings => {
                let settings = self.settings.snapshot().await?;
                serde_json::to_vec(&settings).map_err(|e| Error::InvalidSettings(e.to_string()))
            }
            other => Err(Error::NotSupported(other)),
        }
    }

    // ---- Alarm ----

    /// Raise an alarm at `level` on behalf of the host application.
    pub async fn alarm(&mut self, level: AlertLevel) -> Result<()> {
        let kind = AlertKind::for_level(level)
            .ok_or_else(|| Error::InvalidValue("an alarm needs a mild or high level".to_string()))?;
        let settings = self.settings.effective().await;
        self.raise(level, kind, &settings).await;
        Ok(())
    }

    async fn raise(&mut self, level: AlertLevel, kind: AlertKind, settings: &AppSettings) {
        let before = self.alarm.phase();
        let publish = self
            .alarm
            .alarm(level, kind, settings, &mut self.wake_lock)
            .await;
        self.after_transition(before, publish).await;
    }

    pub async fn acknowledge(&mut self) {
        let before = self.alarm.phase();
        let publish = self.alarm.acknowledge(&mut self.wake_lock).await;
        self.after_transition(before, publish).await;
    }

    pub async fn reset_alarm(&mut self) {
        let before = self.alarm.phase();
        let publish = self.alarm.reset_alarm(&mut self.wake_lock).await;
        self.after_transition(before, publish).await;
    }

    pub async fn stop_alarm_sound(&mut self) {
        self.alarm.stop_alarm_sound().await;
    }

    pub async fn release_cpu(&mut self) {
        self.alarm.release_cpu(&mut self.wake_lock).await;
    }

    async fn after_transition(&mut self, before: AlarmPhase, publish: Option<Publish>) {
        if self.alarm.phase() != before {
            self.emit_phase();
        }
        if let Some(publish) = publish {
            self.publish(publish).await;
        }
    }

    fn emit_phase(&self) {
        self.emit(ServerEvent::AlarmPhase {
            phase: self.alarm.phase(),
        });
    }

    /// Queue a notification for every subscribed session and push it out.
    async fn publish(&mut self, publish: Publish) {
        let recipients = self.notifications.enqueue(publish.kind, &publish.payload);
        for session in recipients {
            self.flush(session).await;
        }
    }

    async fn flush(&mut self, session: SessionId) {
        self.notifications
            .flush(
                session,
                self.radio.as_ref(),
                &mut self.wake_lock,
                self.limits.collaborator_timeout,
            )
            .await;
    }

    // ---- Settings & host UI ----

    pub async fn get_app_settings(&mut self) -> Result<AppSettings> {
        self.settings.get_settings().await
    }

    pub async fn set_app_settings(&mut self, patch: &SettingsPatch) -> Result<AppSettings> {
        self.settings.set_settings(patch).await
    }

    pub async fn play_sound(&mut self, sound: &SoundId) -> Result<()> {
        info!("🔊 Playing {}", sound);
        bounded(
            "audio",
            self.limits.collaborator_timeout,
            self.audio.play_sound(sound),
        )
        .await
    }

    pub async fn set_badge(&mut self, badge: u32) -> Result<()> {
        bounded(
            "audio",
            self.limits.collaborator_timeout,
            self.audio.set_badge_number(badge),
        )
        .await?;
        self.badge = badge;
        self.emit(ServerEvent::Badge { badge });
        Ok(())
    }

    // ---- Introspection ----

    pub fn get_session(&self, session: SessionId) -> Option<&Session> {
        self.sessions.get(&session)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn alarm_state(&self) -> &AlarmState {
        self.alarm.state()
    }

    pub fn phase(&self) -> AlarmPhase {
        self.alarm.phase()
    }

    pub fn wake_lock_held(&self) -> bool {
        self.wake_lock.is_held()
    }

    pub fn outstanding_leases(&self) -> usize {
        self.wake_lock.outstanding()
    }

    pub fn pending(&self, session: SessionId) -> Vec<NotificationItem> {
        self.notifications.pending(session)
    }

    pub fn badge(&self) -> u32 {
        self.badge
    }
}

/// Shared handle to the one controller of this process.
#[derive(Clone)]
pub struct GattServer {
    inner: Arc<Mutex<GattController>>,
}

impl GattServer {
    pub fn new(controller: GattController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    /// Exclusive access; callers are applied one at a time.
    pub async fn lock(&self) -> MutexGuard<'_, GattController> {
        self.inner.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    const PHONE: &str = "AA:BB:CC:DD:EE:FF";
    const WATCH: &str = "11:22:33:44:55:66";

    async fn serving(h: &Harness) -> GattController {
        let mut controller = h.controller();
        controller.start_server().await.unwrap();
        controller
    }

    async fn subscribed(controller: &mut GattController, central: &str) -> SessionId {
        let id = controller.on_connect(central).unwrap();
        controller
            .on_subscribe(id, CharacteristicId::Notification, true)
            .await
            .unwrap();
        id
    }

    fn kinds(items: &[Vec<u8>]) -> Vec<u8> {
        items.iter().map(|v| v[4]).collect()
    }

    #[tokio::test]
    async fn test_start_alarm_stop_reset_scenario() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        assert_eq!(h.radio.advertised(), 1);
        let a = subscribed(&mut controller, PHONE).await;
        let b = subscribed(&mut controller, WATCH).await;

        controller.alarm(AlertLevel::High).await.unwrap();
        assert_eq!(controller.phase(), AlarmPhase::Triggered);
        assert!(controller.alarm_state().sound_playing);
        assert!(controller.wake_lock_held());
        for session in [a, b] {
            let sent = h.radio.sent_to(session);
            assert_eq!(
                kinds(&sent),
                vec![
                    NotificationKind::AuthorizationStatus.as_byte(),
                    NotificationKind::Alarm.as_byte()
                ]
            );
        }

        controller.stop_alarm_sound().await;
        assert!(!controller.alarm_state().sound_playing);
        assert_eq!(controller.phase(), AlarmPhase::Triggered);

        controller.reset_alarm().await;
        assert_eq!(controller.phase(), AlarmPhase::Serving);
        assert!(!controller.wake_lock_held());
    }

    #[tokio::test]
    async fn test_second_start_reports_already_provided() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        assert_eq!(
            controller.start_server().await,
            Ok(StartOutcome::AlreadyRunning)
        );
        assert_eq!(h.radio.advertised(), 1);
    }

    #[tokio::test]
    async fn test_failed_advertising_stays_idle() {
        let h = Harness::new();
        h.radio.fail_advertising(true);
        let mut controller = h.controller();
        assert!(controller.start_server().await.is_err());
        assert_eq!(controller.phase(), AlarmPhase::Idle);
    }

    #[tokio::test]
    async fn test_unauthorized_subscribe_records_nothing() {
        let h = Harness::new();
        h.sharing.set(false);
        let mut controller = serving(&h).await;
        let id = controller.on_connect(PHONE).unwrap();

        let result = controller
            .on_subscribe(id, CharacteristicId::Notification, true)
            .await;
        assert_eq!(result, Err(Error::Unauthorized));
        assert!(controller.get_session(id).unwrap().subscriptions.is_empty());

        controller.alarm(AlertLevel::Mild).await.unwrap();
        assert!(controller.pending(id).is_empty());
    }

    #[tokio::test]
    async fn test_authorization_is_lazy_and_sticky() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = controller.on_connect(PHONE).unwrap();
        assert_eq!(
            controller.get_session(id).unwrap().authorization,
            AuthorizationStatus::Unauthorized
        );
        assert_eq!(
            controller
                .on_characteristic_read(id, CharacteristicId::AuthorizationStatus)
                .await,
            Ok(vec![0])
        );

        controller
            .on_characteristic_write(id, CharacteristicId::LinkLossAlertLevel, &[1])
            .await
            .unwrap();
        assert!(controller.get_session(id).unwrap().is_authorized());

        // Turning sharing off later does not demote a live session.
        h.sharing.set(false);
        controller
            .on_characteristic_write(id, CharacteristicId::LinkLossAlertLevel, &[2])
            .await
            .unwrap();
        assert_eq!(
            controller
                .on_characteristic_read(id, CharacteristicId::AuthorizationStatus)
                .await,
            Ok(vec![1])
        );
    }

    #[tokio::test]
    async fn test_connection_slots_are_bounded() {
        let h = Harness::new();
        let mut controller = h.controller_with(Limits {
            max_sessions: 1,
            ..Limits::default()
        });
        let id = controller.on_connect(PHONE).unwrap();
        assert!(matches!(
            controller.on_connect(WATCH),
            Err(Error::ConnectionRejected(_))
        ));

        controller.on_disconnect(id).await;
        assert!(controller.on_connect(WATCH).is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_releases_pending_flush_lease() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = subscribed(&mut controller, PHONE).await;

        h.radio.reject_notifications(true);
        controller.alarm(AlertLevel::High).await.unwrap();
        controller.release_cpu().await;
        // Only the stalled flush keeps the CPU awake now.
        assert!(controller.wake_lock_held());
        assert_eq!(controller.pending(id).len(), 1);

        controller.on_disconnect(id).await;
        assert!(!controller.wake_lock_held());
        assert_eq!(controller.outstanding_leases(), 0);

        // Idempotent.
        controller.on_disconnect(id).await;
        assert!(controller.get_session(id).is_none());
    }

    #[tokio::test]
    async fn test_alert_level_writes_drive_the_alarm() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = subscribed(&mut controller, PHONE).await;

        controller
            .on_characteristic_write(id, CharacteristicId::AlertLevel, &[2])
            .await
            .unwrap();
        assert_eq!(controller.phase(), AlarmPhase::Triggered);
        assert_eq!(controller.alarm_state().level, AlertLevel::High);

        controller
            .on_characteristic_write(id, CharacteristicId::AlertLevel, &[0])
            .await
            .unwrap();
        assert_eq!(controller.phase(), AlarmPhase::Acknowledged);
        assert!(!controller.wake_lock_held());
        assert!(!h.audio.is_playing());

        let result = controller
            .on_characteristic_write(id, CharacteristicId::AlertLevel, &[7])
            .await;
        assert!(matches!(result, Err(Error::InvalidValue(_))));
    }

    #[tokio::test]
    async fn test_link_loss_raises_alarm() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let watch = subscribed(&mut controller, WATCH).await;
        let phone = controller.on_connect(PHONE).unwrap();
        controller
            .on_characteristic_write(phone, CharacteristicId::LinkLossAlertLevel, &[1])
            .await
            .unwrap();

        controller.on_disconnect(phone).await;
        assert_eq!(controller.phase(), AlarmPhase::Triggered);
        assert_eq!(controller.alarm_state().level, AlertLevel::Mild);
        assert_eq!(
            kinds(&h.radio.sent_to(watch)).last(),
            Some(&NotificationKind::Alarm.as_byte())
        );
    }

    #[tokio::test]
    async fn test_link_loss_respects_settings() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        controller
            .set_app_settings(&SettingsPatch {
                alerts_enabled: Some([AlertKind::High].into_iter().collect()),
                ..Default::default()
            })
            .await
            .unwrap();
        let phone = controller.on_connect(PHONE).unwrap();
        controller
            .on_characteristic_write(phone, CharacteristicId::LinkLossAlertLevel, &[2])
            .await
            .unwrap();

        controller.on_disconnect(phone).await;
        assert_eq!(controller.phase(), AlarmPhase::Serving);
    }

    #[tokio::test]
    async fn test_settings_characteristic() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = controller.on_connect(PHONE).unwrap();

        controller
            .on_characteristic_write(id, CharacteristicId::Settings, br#"{"soundEnabled":false}"#)
            .await
            .unwrap();
        let bytes = controller
            .on_characteristic_read(id, CharacteristicId::Settings)
            .await
            .unwrap();
        let read: AppSettings = serde_json::from_slice(&bytes).unwrap();
        assert!(!read.sound_enabled);
        assert!(read.vibration_enabled);

        let result = controller
            .on_characteristic_write(id, CharacteristicId::Settings, br#"{"volume":3}"#)
            .await;
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn test_settings_read_falls_back_to_cache() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = controller.on_connect(PHONE).unwrap();
        controller.get_app_settings().await.unwrap();

        h.store.fail_loads(true);
        assert!(controller
            .on_characteristic_read(id, CharacteristicId::Settings)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = controller.on_connect(PHONE).unwrap();

        assert_eq!(
            controller
                .on_subscribe(id, CharacteristicId::Settings, true)
                .await,
            Err(Error::NotSupported(CharacteristicId::Settings))
        );
        assert_eq!(
            controller
                .on_characteristic_write(id, CharacteristicId::AlarmStatus, &[1])
                .await,
            Err(Error::NotSupported(CharacteristicId::AlarmStatus))
        );
        assert_eq!(
            controller
                .on_characteristic_read(id, CharacteristicId::Notification)
                .await,
            Err(Error::NotSupported(CharacteristicId::Notification))
        );
        assert_eq!(
            controller
                .on_characteristic_read(SessionId(99), CharacteristicId::AlarmStatus)
                .await,
            Err(Error::NotFound(SessionId(99)))
        );
    }

    #[tokio::test]
    async fn test_revoke_demotes_live_session() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        let id = subscribed(&mut controller, PHONE).await;

        controller.revoke(PHONE).await.unwrap();
        let session = controller.get_session(id).unwrap();
        assert_eq!(session.authorization, AuthorizationStatus::Revoked);
        assert!(!session.is_subscribed(CharacteristicId::Notification));
        assert_eq!(
            controller
                .on_characteristic_write(id, CharacteristicId::AlertLevel, &[1])
                .await,
            Err(Error::Unauthorized)
        );

        assert!(controller.restore(PHONE).unwrap());
        controller
            .on_characteristic_write(id, CharacteristicId::AlertLevel, &[1])
            .await
            .unwrap();
        assert!(controller.get_session(id).unwrap().is_authorized());
    }

    #[tokio::test]
    async fn test_badge_and_sound() {
        let h = Harness::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut controller = h.controller().with_events(tx);

        controller.set_badge(4).await.unwrap();
        assert_eq!(controller.badge(), 4);
        assert_eq!(h.audio.badge(), 4);
        assert_eq!(rx.recv().await, Some(ServerEvent::Badge { badge: 4 }));

        controller
            .play_sound(&SoundId("chime".to_string()))
            .await
            .unwrap();
        assert_eq!(h.audio.sounds(), vec![SoundId("chime".to_string())]);
    }

    #[tokio::test]
    async fn test_shutdown_force_releases() {
        let h = Harness::new();
        let mut controller = serving(&h).await;
        subscribed(&mut controller, PHONE).await;
        controller.alarm(AlertLevel::High).await.unwrap();

        controller.shutdown().await;
        assert_eq!(controller.phase(), AlarmPhase::Idle);
        assert!(!controller.wake_lock_held());
        assert_eq!(controller.sessions().count(), 0);
        assert_eq!(h.wake_lock.acquires(), h.wake_lock.releases());
    }

    #[tokio::test]
    async fn test_broadcasting_radio_gets_one_sequence() {
        let h = Harness::new();
        h.radio.set_broadcast(true);
        let mut controller = serving(&h).await;
        let a = subscribed(&mut controller, PHONE).await;
        let b = subscribed(&mut controller, WATCH).await;

        controller.alarm(AlertLevel::High).await.unwrap();
        controller.alarm(AlertLevel::High).await.unwrap();
        controller.reset_alarm().await;

        let sent = h.radio.all_sent();
        let sequences: Vec<u32> = sent
            .iter()
            .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(
            kinds(&sent),
            vec![
                NotificationKind::Alarm.as_byte(),
                NotificationKind::Alarm.as_byte(),
                NotificationKind::AlarmReset.as_byte()
            ]
        );
        assert!(controller.pending(a).is_empty());
        assert!(controller.pending(b).is_empty());
        assert!(!controller.wake_lock_held());
    }
}
