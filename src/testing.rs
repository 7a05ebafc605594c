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

//! In-memory collaborators for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::{AudioUi, SoundId};
use crate::authorization::SharingPermission;
use crate::bluetooth::{CharacteristicId, RadioStack, ServiceTable};
use crate::controller::{Collaborators, GattController, Limits};
use crate::session::SessionId;
use crate::settings::{AppSettings, SettingsStore};
use crate::storage::RevokedCentralStore;
use crate::wakelock::WakeLockPlatform;

#[derive(Default)]
pub struct FakeWakeLock {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeWakeLock {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail_next_acquire(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WakeLockPlatform for FakeWakeLock {
    async fn acquire(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("inhibitor unavailable"));
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRadio {
    sent: Mutex<Vec<(SessionId, CharacteristicId, Vec<u8>)>>,
    reject: AtomicBool,
    advertised: AtomicUsize,
    fail_advertising: AtomicBool,
    broadcast: AtomicBool,
}

impl FakeRadio {
    /// Behave like a stack that sends every notification to all subscribers.
    pub fn set_broadcast(&self, broadcast: bool) {
        self.broadcast.store(broadcast, Ordering::SeqCst);
    }

    pub fn reject_notifications(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.fail_advertising.store(fail, Ordering::SeqCst);
    }

    pub fn advertised(&self) -> usize {
        self.advertised.load(Ordering::SeqCst)
    }

    pub fn sent_to(&self, session: SessionId) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|(s, _, _)| *s == session)
            .map(|(_, _, value)| value.clone())
            .collect()
    }

    /// Every value sent, in order, whoever it was sent for.
    pub fn all_sent(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .map(|(_, _, value)| value.clone())
            .collect()
    }
}

#[async_trait]
impl RadioStack for FakeRadio {
    async fn start_advertising(&self, _table: &ServiceTable) -> Result<()> {
        if self.fail_advertising.load(Ordering::SeqCst) {
            return Err(anyhow!("adapter not powered"));
        }
        self.advertised.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify(
        &self,
        session: SessionId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(anyhow!("not subscribed"));
        }
        self.sent.lock().push((session, characteristic, value));
        Ok(())
    }

    fn broadcasts(&self) -> bool {
        self.broadcast.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeAudio {
    playing: AtomicBool,
    plays: AtomicUsize,
    stops: AtomicUsize,
    vibrations: Mutex<Vec<u8>>,
    sounds: Mutex<Vec<SoundId>>,
    badge: AtomicU32,
    fail_playback: AtomicBool,
}

impl FakeAudio {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn vibrations(&self) -> Vec<u8> {
        self.vibrations.lock().clone()
    }

    pub fn sounds(&self) -> Vec<SoundId> {
        self.sounds.lock().clone()
    }

    pub fn badge(&self) -> u32 {
        self.badge.load(Ordering::SeqCst)
    }

    pub fn fail_playback(&self, fail: bool) {
        self.fail_playback.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioUi for FakeAudio {
    async fn play_sound(&self, sound: &SoundId) -> Result<()> {
        if self.fail_playback.load(Ordering::SeqCst) {
            return Err(anyhow!("no audio sink"));
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.sounds.lock().push(sound.clone());
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_sound(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn vibrate(&self, pattern: u8) -> Result<()> {
        self.vibrations.lock().push(pattern);
        Ok(())
    }

    async fn set_badge_number(&self, badge: u32) -> Result<()> {
        self.badge.store(badge, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<AppSettings>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
}

impl MemorySettingsStore {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self) -> AppSettings {
        self.settings.lock().clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<AppSettings> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("store unavailable"));
        }
        Ok(self.settings.lock().clone())
    }

    async fn save(&self, settings: &AppSettings) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("store is read-only"));
        }
        *self.settings.lock() = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSharing {
    enabled: AtomicBool,
    fail: AtomicBool,
}

impl FakeSharing {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SharingPermission for FakeSharing {
    async fn sharing_enabled(&self) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("permission service gone"));
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

/// A controller wired to fakes, with handles to inspect them.
pub struct Harness {
    pub radio: Arc<FakeRadio>,
    pub audio: Arc<FakeAudio>,
    pub wake_lock: Arc<FakeWakeLock>,
    pub store: Arc<MemorySettingsStore>,
    pub sharing: Arc<FakeSharing>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            radio: Arc::new(FakeRadio::default()),
            audio: Arc::new(FakeAudio::default()),
            wake_lock: Arc::new(FakeWakeLock::default()),
            store: Arc::new(MemorySettingsStore::default()),
            sharing: Arc::new(FakeSharing::new(true)),
        }
    }

    pub fn controller(&self) -> GattController {
        self.controller_with(Limits::default())
    }

    pub fn controller_with(&self, limits: Limits) -> GattController {
        GattController::new(
            Collaborators {
                radio: self.radio.clone(),
                store: self.store.clone(),
                audio: self.audio.clone(),
                wake_lock: self.wake_lock.clone(),
                sharing: self.sharing.clone(),
                revoked: RevokedCentralStore::in_memory(),
            },
            limits,
        )
    }
}
