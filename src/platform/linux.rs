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

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::audio::{AudioUi, SoundId};
use crate::authorization::SharingPermission;
use crate::wakelock::WakeLockPlatform;

const FREEDESKTOP_SOUNDS: &str = "/usr/share/sounds/freedesktop/stereo";

/// Kill a child process taken out of its slot.
async fn stop_child(mut child: Child, what: &str) {
    if let Err(e) = child.kill().await {
        debug!("{} already gone: {}", what, e);
    }
}

/// Blocks system sleep by keeping a `systemd-inhibit` process alive.
pub struct SystemdInhibitor {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl SystemdInhibitor {
    pub fn new() -> Self {
        Self::with_command(
            "systemd-inhibit",
            &[
                "--what=sleep:idle",
                "--who=alarmgatt",
                "--why=Alarm server keeping the CPU awake",
                "--mode=block",
                "sleep",
                "infinity",
            ],
        )
    }

    /// Use another blocking command in place of `systemd-inhibit`.
    pub fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            child: Mutex::new(None),
        }
    }

    pub fn is_inhibiting(&self) -> bool {
        self.child.lock().is_some()
    }
}

impl Default for SystemdInhibitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WakeLockPlatform for SystemdInhibitor {
    async fn acquire(&self) -> Result<()> {
        let mut slot = self.child.lock();
        if slot.is_some() {
            return Ok(());
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        debug!("Sleep inhibitor running (pid {:?})", child.id());
        *slot = Some(child);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let child = self.child.lock().take();
        if let Some(child) = child {
            stop_child(child, "sleep inhibitor").await;
            debug!("Sleep inhibitor stopped");
        }
        Ok(())
    }
}

/// Plays sounds through an external player such as `paplay`.
///
/// The alarm sound and other sounds run in separate player slots, so a
/// chime never cuts off a ringing alarm. There is no haptic hardware on a
/// desktop; vibration requests are logged. The badge number is kept for
/// the status output.
pub struct CommandAudio {
    command: String,
    alarm_file: Option<PathBuf>,
    alarm_player: Mutex<Option<Child>>,
    effect_player: Mutex<Option<Child>>,
    badge: AtomicU32,
}

impl CommandAudio {
    pub fn new(command: &str, alarm_file: Option<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            alarm_file,
            alarm_player: Mutex::new(None),
            effect_player: Mutex::new(None),
            badge: AtomicU32::new(0),
        }
    }

    /// File to hand to the player for `sound`.
    pub fn resolve(&self, sound: &SoundId) -> PathBuf {
        if *sound == SoundId::alarm() {
            if let Some(file) = &self.alarm_file {
                return file.clone();
            }
            return PathBuf::from(FREEDESKTOP_SOUNDS).join("alarm-clock-elapsed.oga");
        }

        let path = PathBuf::from(&sound.0);
        if path.is_absolute() {
            path
        } else {
            PathBuf::from(FREEDESKTOP_SOUNDS).join(format!("{}.oga", sound.0))
        }
    }

    pub fn badge(&self) -> u32 {
        self.badge.load(Ordering::SeqCst)
    }

    /// Whether the alarm player process is still running.
    pub fn alarm_playing(&self) -> bool {
        self.alarm_player
            .lock()
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    fn slot(&self, sound: &SoundId) -> &Mutex<Option<Child>> {
        if *sound == SoundId::alarm() {
            &self.alarm_player
        } else {
            &self.effect_player
        }
    }
}

#[async_trait]
impl AudioUi for CommandAudio {
    async fn play_sound(&self, sound: &SoundId) -> Result<()> {
        let slot = self.slot(sound);
        let previous = slot.lock().take();
        if let Some(previous) = previous {
            stop_child(previous, "sound player").await;
        }

        let file = self.resolve(sound);
        let child = Command::new(&self.command)
            .arg(&file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {} {:?}", self.command, file))?;

        info!("🔊 Playing {:?}", file);
        *slot.lock() = Some(child);
        Ok(())
    }

    async fn stop_sound(&self) -> Result<()> {
        for slot in [&self.alarm_player, &self.effect_player] {
            let child = slot.lock().take();
            if let Some(child) = child {
                stop_child(child, "sound player").await;
                debug!("Sound stopped");
            }
        }
        Ok(())
    }

    async fn vibrate(&self, pattern: u8) -> Result<()> {
        debug!("Vibration pattern {} requested (no haptics on this host)", pattern);
        Ok(())
    }

    async fn set_badge_number(&self, badge: u32) -> Result<()> {
        self.badge.store(badge, Ordering::SeqCst);
        info!("Badge number: {}", badge);
        Ok(())
    }
}

/// Sharing is allowed while the adapter is powered and the config allows it.
pub struct AdapterSharing {
    adapter: bluer::Adapter,
    enabled: bool,
}

impl AdapterSharing {
    pub fn new(adapter: bluer::Adapter, enabled: bool) -> Self {
        Self { adapter, enabled }
    }
}

#[async_trait]
impl SharingPermission for AdapterSharing {
    async fn sharing_enabled(&self) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let powered = self
            .adapter
            .is_powered()
            .await
            .context("Failed to query adapter power state")?;
        if !powered {
            warn!("Adapter {} is not powered", self.adapter.name());
        }
        Ok(powered)
    }
}
