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

//! Alarm state machine.
//!
//! ```text
//! Idle --start_server--> Serving --alarm--> Triggered --acknowledge--> Acknowledged
//!                           ^                   |                          |
//!                           +----reset_alarm----+----------reset_alarm-----+
//! ```
//!
//! Every operation is total: calling it in a phase where it has nothing
//! to do succeeds without side effects. Collaborator failures during a
//! transition are logged and show up in the state (no sound flag, no
//! lease) instead of failing the call.
//!
//! Invariants: `sound_playing` implies `Triggered`; a held alarm lease
//! implies `Serving` or `Triggered`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::{AudioUi, SoundId};
use crate::bluetooth::AlertLevel;
use crate::collaborator::bounded;
use crate::notifications::NotificationKind;
use crate::settings::{AlertKind, AppSettings};
use crate::wakelock::{LeaseId, WakeLockManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmPhase {
    Idle,
    Serving,
    Triggered,
    Acknowledged,
}

impl AlarmPhase {
    pub fn as_byte(self) -> u8 {
        match self {
            AlarmPhase::Idle => 0x00,
            AlarmPhase::Serving => 0x01,
            AlarmPhase::Triggered => 0x02,
            AlarmPhase::Acknowledged => 0x03,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlarmState {
    pub phase: AlarmPhase,
    pub triggered_at: Option<DateTime<Utc>>,
    pub level: AlertLevel,
    pub sound_playing: bool,
    pub wake_lock: Option<LeaseId>,
}

impl AlarmState {
    fn new() -> Self {
        Self {
            phase: AlarmPhase::Idle,
            triggered_at: None,
            level: AlertLevel::NoAlert,
            sound_playing: false,
            wake_lock: None,
        }
    }

    /// Alarm status characteristic value: `phase | sound | level`.
    pub fn encode(&self) -> Vec<u8> {
        vec![
            self.phase.as_byte(),
            u8::from(self.sound_playing),
            self.level.as_byte(),
        ]
    }
}

/// A notification the controller should publish after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub kind: NotificationKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

pub struct AlarmStateMachine {
    state: AlarmState,
    audio: Arc<dyn AudioUi>,
    timeout: Duration,
}

impl AlarmStateMachine {
    pub fn new(audio: Arc<dyn AudioUi>, timeout: Duration) -> Self {
        Self {
            state: AlarmState::new(),
            audio,
            timeout,
        }
    }

    pub fn state(&self) -> &AlarmState {
        &self.state
    }

    pub fn phase(&self) -> AlarmPhase {
        self.state.phase
    }

    pub fn start_server(&mut self) -> StartOutcome {
        if self.state.phase != AlarmPhase::Idle {
            debug!("start_server in {:?}: already running", self.state.phase);
            return StartOutcome::AlreadyRunning;
        }
        self.state.phase = AlarmPhase::Serving;
        info!("Alarm server serving");
        StartOutcome::Started
    }

    /// Raise (or re-affirm) an alarm.
    pub async fn alarm(
        &mut self,
        level: AlertLevel,
        kind: AlertKind,
        settings: &AppSettings,
        wake_lock: &mut WakeLockManager,
    ) -> Option<Publish> {
        match self.state.phase {
            AlarmPhase::Idle => {
                debug!("alarm ignored: server not started");
                return None;
            }
            AlarmPhase::Triggered => {
                info!("Alarm re-affirmed ({:?})", level);
            }
            AlarmPhase::Serving | AlarmPhase::Acknowledged => {
                info!("Alarm triggered ({:?}, {:?})", level, kind);
                self.state.phase = AlarmPhase::Triggered;
                self.on_enter_triggered(kind, settings).await;
            }
        }

        self.state.triggered_at = Some(Utc::now());
        self.state.level = level;

        if self.state.wake_lock.is_none() {
            match wake_lock.acquire("alarm").await {
                Ok(lease) => self.state.wake_lock = Some(lease),
                Err(e) => warn!("Alarm running without wake lock: {}", e),
            }
        }

        Some(Publish {
            kind: NotificationKind::Alarm,
            payload: vec![level.as_byte()],
        })
    }

    async fn on_enter_triggered(&mut self, kind: AlertKind, settings: &AppSettings) {
        if !settings.alert_enabled(kind) {
            info!("{:?} alerts disabled, alarm is silent", kind);
            return;
        }

        if settings.sound_enabled {
            match bounded("audio", self.timeout, self.audio.play_sound(&SoundId::alarm())).await {
                Ok(()) => self.state.sound_playing = true,
                Err(e) => warn!("Alarm sound failed: {}", e),
            }
        }

        if settings.vibration_enabled {
            if let Err(e) = bounded(
                "audio",
                self.timeout,
                self.audio.vibrate(settings.vibration_pattern),
            )
            .await
            {
                warn!("Vibration failed: {}", e);
            }
        }
    }

    /// Record the user's acknowledgement: sound off, lease returned.
    pub async fn acknowledge(&mut self, wake_lock: &mut WakeLockManager) -> Option<Publish> {
        if self.state.phase != AlarmPhase::Triggered {
            debug!("acknowledge ignored in {:?}", self.state.phase);
            return None;
        }

        self.silence().await;
        self.release_lease(wake_lock).await;
        self.state.phase = AlarmPhase::Acknowledged;
        info!("Alarm acknowledged");

        Some(Publish {
            kind: NotificationKind::AlarmAcknowledged,
            payload: Vec::new(),
        })
    }

    pub async fn reset_alarm(&mut self, wake_lock: &mut WakeLockManager) -> Option<Publish> {
        if !matches!(
            self.state.phase,
            AlarmPhase::Triggered | AlarmPhase::Acknowledged
        ) {
            debug!("reset_alarm ignored in {:?}", self.state.phase);
            return None;
        }

        self.silence().await;
        self.release_lease(wake_lock).await;
        self.state.phase = AlarmPhase::Serving;
        self.state.level = AlertLevel::NoAlert;
        info!("Alarm reset");

        Some(Publish {
            kind: NotificationKind::AlarmReset,
            payload: Vec::new(),
        })
    }

    /// Silence a triggered alarm without clearing it.
    pub async fn stop_alarm_sound(&mut self) {
        if self.state.phase != AlarmPhase::Triggered {
            debug!("stop_alarm_sound ignored in {:?}", self.state.phase);
            return;
        }
        self.silence().await;
    }

    /// Return the alarm's lease without touching the phase.
    pub async fn release_cpu(&mut self, wake_lock: &mut WakeLockManager) {
        self.release_lease(wake_lock).await;
    }

    /// Stop everything and go back to Idle.
    pub async fn shutdown(&mut self, wake_lock: &mut WakeLockManager) {
        self.silence().await;
        self.release_lease(wake_lock).await;
        self.state = AlarmState::new();
    }

    async fn silence(&mut self) {
        if !self.state.sound_playing {
            return;
        }
        if let Err(e) = bounded("audio", self.timeout, self.audio.stop_sound()).await {
            warn!("Failed to stop alarm sound: {}", e);
        }
        self.state.sound_playing = false;
    }

    async fn release_lease(&mut self, wake_lock: &mut WakeLockManager) {
        if let Some(lease) = self.state.wake_lock.take() {
            wake_lock.release(lease).await;
        }
    }
}
