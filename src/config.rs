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

//! Server configuration, read from `config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::bluetooth::ble_constants::defaults;
use crate::controller::Limits;

const APP_DIR: &str = "alarmgatt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bluetooth alias to advertise under.
    pub device_name: String,
    pub max_sessions: usize,
    pub queue_capacity: usize,
    pub collaborator_timeout_ms: u64,
    /// Where settings and revocations live. Defaults to the user data dir.
    pub data_dir: Option<PathBuf>,
    /// Master switch for Bluetooth sharing, on top of the adapter state.
    pub sharing_enabled: bool,
    pub sound_command: String,
    pub sound_file: Option<PathBuf>,
    /// Default tracing filter; `RUST_LOG` wins.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            max_sessions: defaults::MAX_SESSIONS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            collaborator_timeout_ms: defaults::COLLABORATOR_TIMEOUT_MS,
            data_dir: None,
            sharing_enabled: true,
            sound_command: "paplay".to_string(),
            sound_file: None,
            log_filter: "info".to_string(),
        }
    }
}

fn default_device_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().to_string();
    if host.is_empty() {
        "alarmgatt".to_string()
    } else {
        host
    }
}

impl ServerConfig {
    /// Load from the user config directory. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {:?} doesn't exist, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: ServerConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir().context("Failed to get local data directory")?;
        Ok(base.join(APP_DIR))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_sessions: self.max_sessions.max(1),
            queue_capacity: self.queue_capacity.max(1),
            collaborator_timeout: Duration::from_millis(self.collaborator_timeout_ms),
        }
    }
}
