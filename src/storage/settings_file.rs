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

//! JSON file backed settings store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::settings::{AppSettings, SettingsStore};

/// Settings file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsFile {
    version: u32,
    settings: AppSettings,
}

/// Stores settings in `settings.json`, replacing the file atomically.
pub struct JsonSettingsStore {
    file_path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file_path: data_dir.join("settings.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<AppSettings> {
        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file doesn't exist, using defaults");
                return Ok(AppSettings::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.file_path))
            }
        };

        let file: SettingsFile =
            serde_json::from_str(&content).with_context(|| "Failed to parse settings.json")?;
        Ok(file.settings)
    }

    async fn save(&self, settings: &AppSettings) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let file = SettingsFile {
            version: 1,
            settings: settings.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        // Write beside the target, then rename over it.
        let tmp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &self.file_path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.file_path))?;

        debug!("Saved settings to {:?}", self.file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonSettingsStore::new(temp_dir.path());
        assert_eq!(store.load().await?, AppSettings::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonSettingsStore::new(&temp_dir.path().join("nested"));

        let settings = AppSettings {
            sound_enabled: false,
            vibration_pattern: 2,
            ..Default::default()
        };
        store.save(&settings).await?;

        let reopened = JsonSettingsStore::new(&temp_dir.path().join("nested"));
        assert_eq!(reopened.load().await?, settings);
        assert!(!reopened.path().with_extension("json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = JsonSettingsStore::new(temp_dir.path());
        std::fs::write(store.path(), "{ not json")?;
        assert!(store.load().await.is_err());
        Ok(())
    }
}
