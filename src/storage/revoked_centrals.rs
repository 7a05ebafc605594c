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

//! Revoked central storage.
//!
//! Centrals listed here are denied by the authorization gate until they
//! are restored, across restarts.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A central whose authorization was withdrawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedCentral {
    /// Central address.
    pub central: String,
    /// ISO 8601 timestamp of the revocation.
    pub revoked_at: String,
}

/// Revocations file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevokedCentralsFile {
    version: u32,
    centrals: Vec<RevokedCentral>,
}

/// Store for revoked centrals. Without a backing file it lives in memory.
pub struct RevokedCentralStore {
    file_path: Option<PathBuf>,
    centrals: Vec<RevokedCentral>,
}

impl RevokedCentralStore {
    /// Open the store in `data_dir/revoked_centrals.json`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let file_path = data_dir.join("revoked_centrals.json");

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let centrals = Self::load(&file_path)?;

        info!(
            "Loaded {} revoked central(s) from {:?}",
            centrals.len(),
            file_path
        );

        Ok(Self {
            file_path: Some(file_path),
            centrals,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            file_path: None,
            centrals: Vec::new(),
        }
    }

    pub fn is_revoked(&self, central: &str) -> bool {
        self.centrals
            .iter()
            .any(|c| c.central.eq_ignore_ascii_case(central))
    }

    /// Revoke a central. Revoking twice keeps the first timestamp.
    pub fn revoke(&mut self, central: &str) -> Result<()> {
        if self.is_revoked(central) {
            debug!("Central {} already revoked", central);
            return Ok(());
        }

        self.centrals.push(RevokedCentral {
            central: central.to_string(),
            revoked_at: Utc::now().to_rfc3339(),
        });
        info!("Revoked central: {}", central);

        self.save()
    }

    /// Lift a revocation. Returns whether the central was revoked.
    pub fn restore(&mut self, central: &str) -> Result<bool> {
        let before = self.centrals.len();
        self.centrals
            .retain(|c| !c.central.eq_ignore_ascii_case(central));

        if self.centrals.len() == before {
            return Ok(false);
        }

        info!("Restored central: {}", central);
        self.save()?;
        Ok(true)
    }

    fn load(path: &Path) -> Result<Vec<RevokedCentral>> {
        if !path.exists() {
            debug!("Revocations file doesn't exist, starting with empty list");
            return Ok(Vec::new());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let file: RevokedCentralsFile = serde_json::from_str(&content)
            .with_context(|| "Failed to parse revoked_centrals.json")?;

        Ok(file.centrals)
    }

    fn save(&self) -> Result<()> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };

        let file = RevokedCentralsFile {
            version: 1,
            centrals: self.centrals.clone(),
        };

        let content = serde_json::to_string_pretty(&file)?;
        std::fs::write(file_path, content)
            .with_context(|| format!("Failed to write {:?}", file_path))?;

        debug!("Saved {} revoked central(s)", self.centrals.len());
        Ok(())
    }
}
