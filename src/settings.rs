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

//! Application settings and the cached store adapter.
//!
//! The external store is the source of truth. The adapter keeps a copy
//! that is refreshed on every read and replaced only after a write has
//! been persisted, so a reader never sees a half-applied patch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bluetooth::AlertLevel;
use crate::collaborator::bounded;
use crate::error::{Error, Result};

/// Number of vibration patterns the host supports.
pub const VIBRATION_PATTERNS: u8 = 4;

/// Alert sources that can be enabled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    Mild,
    High,
    LinkLoss,
}

impl AlertKind {
    /// Kind of an immediate alert at `level`, if it alerts at all.
    pub fn for_level(level: AlertLevel) -> Option<Self> {
        match level {
            AlertLevel::NoAlert => None,
            AlertLevel::Mild => Some(AlertKind::Mild),
            AlertLevel::High => Some(AlertKind::High),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub alerts_enabled: BTreeSet<AlertKind>,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    pub vibration_pattern: u8,
    pub log_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            alerts_enabled: [AlertKind::Mild, AlertKind::High, AlertKind::LinkLoss]
                .into_iter()
                .collect(),
            sound_enabled: true,
            vibration_enabled: true,
            vibration_pattern: 0,
            log_enabled: false,
        }
    }
}

impl AppSettings {
    pub fn alert_enabled(&self, kind: AlertKind) -> bool {
        self.alerts_enabled.contains(&kind)
    }
}

/// A partial settings update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts_enabled: Option<BTreeSet<AlertKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration_pattern: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_enabled: Option<bool>,
}

const KNOWN_FIELDS: [&str; 5] = [
    "alertsEnabled",
    "soundEnabled",
    "vibrationEnabled",
    "vibrationPattern",
    "logEnabled",
];

impl SettingsPatch {
    /// Parse a patch, returning it with the names of any unrecognized keys.
    pub fn from_value(value: Value) -> Result<(Self, Vec<String>)> {
        let Value::Object(map) = &value else {
            return Err(Error::InvalidSettings("expected a JSON object".to_string()));
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !KNOWN_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();

        let patch: SettingsPatch =
            serde_json::from_value(value).map_err(|e| Error::InvalidSettings(e.to_string()))?;

        Ok((patch, unknown))
    }

    /// Parse a patch written by a central. Unrecognized keys are rejected.
    pub fn from_gatt_value(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidSettings(e.to_string()))?;
        let (patch, unknown) = Self::from_value(value)?;
        if !unknown.is_empty() {
            return Err(Error::InvalidSettings(format!(
                "unrecognized field(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidSettings(
                "no recognized settings field".to_string(),
            ));
        }
        if let Some(pattern) = self.vibration_pattern {
            if pattern >= VIBRATION_PATTERNS {
                return Err(Error::InvalidSettings(format!(
                    "vibration pattern {} not in 0..{}",
                    pattern, VIBRATION_PATTERNS
                )));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, base: &AppSettings) -> AppSettings {
        let mut merged = base.clone();
        if let Some(alerts) = &self.alerts_enabled {
            merged.alerts_enabled = alerts.clone();
        }
        if let Some(v) = self.sound_enabled {
            merged.sound_enabled = v;
        }
        if let Some(v) = self.vibration_enabled {
            merged.vibration_enabled = v;
        }
        if let Some(v) = self.vibration_pattern {
            merged.vibration_pattern = v;
        }
        if let Some(v) = self.log_enabled {
            merged.log_enabled = v;
        }
        merged
    }
}

/// External persistence for [`AppSettings`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<AppSettings>;
    async fn save(&self, settings: &AppSettings) -> anyhow::Result<()>;
}

pub struct SettingsAdapter {
    store: Arc<dyn SettingsStore>,
    cache: Option<AppSettings>,
    timeout: Duration,
}

impl SettingsAdapter {
    pub fn new(store: Arc<dyn SettingsStore>, timeout: Duration) -> Self {
        Self {
            store,
            cache: None,
            timeout,
        }
    }

    /// Read the store and refresh the cache.
    pub async fn get_settings(&mut self) -> Result<AppSettings> {
        let settings = bounded("settings store", self.timeout, self.store.load()).await?;
        self.cache = Some(settings.clone());
        Ok(settings)
    }

    /// Fresh settings if the store answers in time, otherwise the cached copy.
    pub async fn snapshot(&mut self) -> Result<AppSettings> {
        match self.get_settings().await {
            Ok(settings) => Ok(settings),
            Err(e) => match &self.cache {
                Some(cached) => {
                    debug!("Serving cached settings: {}", e);
                    Ok(cached.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Settings for deciding alarm side effects; never fails.
    pub async fn effective(&mut self) -> AppSettings {
        match self.snapshot().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings unavailable, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Merge `patch` into the current record and persist it as a whole.
    pub async fn set_settings(&mut self, patch: &SettingsPatch) -> Result<AppSettings> {
        patch.validate()?;

        let base = match &self.cache {
            Some(cached) => cached.clone(),
            None => self.get_settings().await?,
        };
        let merged = patch.apply_to(&base);

        bounded("settings store", self.timeout, self.store.save(&merged)).await?;
        self.cache = Some(merged.clone());

        info!("Settings updated");
        Ok(merged)
    }

    #[cfg(test)]
    fn cached(&self) -> Option<&AppSettings> {
        self.cache.as_ref()
    }
}
