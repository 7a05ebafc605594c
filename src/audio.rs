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

//! Audio and UI collaborator seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a sound known to the audio backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundId(pub String);

impl SoundId {
    pub fn alarm() -> Self {
        SoundId("alarm".to_string())
    }
}

impl Default for SoundId {
    fn default() -> Self {
        Self::alarm()
    }
}

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host audio output, haptics and application badge.
#[async_trait]
pub trait AudioUi: Send + Sync {
    async fn play_sound(&self, sound: &SoundId) -> anyhow::Result<()>;
    async fn stop_sound(&self) -> anyhow::Result<()>;
    async fn vibrate(&self, pattern: u8) -> anyhow::Result<()>;
    async fn set_badge_number(&self, badge: u32) -> anyhow::Result<()>;
}
