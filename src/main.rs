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

//! alarmgatt daemon.
//!
//! Serves the alarm GATT application over BlueZ and reads bridge actions
//! from stdin, one JSON object per line:
//!
//! ```text
//! {"action": "alarm", "params": {"alertLevel": "high"}}
//! ```
//!
//! Replies and server status events are written to stdout as JSON lines.
//! Logs go to stderr.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use alarmgatt::bluetooth::ble_constants::defaults;
use alarmgatt::bluetooth::BluezRadio;
use alarmgatt::bridge::{Bridge, BridgeResult};
use alarmgatt::platform::{AdapterSharing, CommandAudio, SystemdInhibitor};
use alarmgatt::storage::{JsonSettingsStore, RevokedCentralStore};
use alarmgatt::{Collaborators, Dispatcher, GattController, GattServer, ServerConfig};

#[derive(Debug, Deserialize)]
struct BridgeRequest {
    action: String,
    #[serde(default)]
    params: Value,
}

fn init_tracing(default_filter: &str) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn reply(result: BridgeResult) {
    let line = match result {
        Ok(value) => value,
        Err(e) => e.to_json(),
    };
    println!("{}", line);
}

async fn handle_line(bridge: &Bridge, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request: BridgeRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed bridge request: {}", e);
            println!(
                "{}",
                serde_json::json!({ "error": "invalidRequest", "message": e.to_string() })
            );
            return;
        }
    };

    reply(bridge.execute(&request.action, request.params).await);
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(&config.log_filter);
    info!("Starting alarmgatt as {:?}", config.device_name);

    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let (radio_tx, radio_rx) = mpsc::channel(defaults::QUEUE_CAPACITY);
    let radio = Arc::new(BluezRadio::new(radio_tx, &config.device_name).await?);

    let collaborators = Collaborators {
        radio: radio.clone(),
        store: Arc::new(JsonSettingsStore::new(&data_dir)),
        audio: Arc::new(CommandAudio::new(
            &config.sound_command,
            config.sound_file.clone(),
        )),
        wake_lock: Arc::new(SystemdInhibitor::new()),
        sharing: Arc::new(AdapterSharing::new(radio.adapter(), config.sharing_enabled)),
        revoked: RevokedCentralStore::new(&data_dir)?,
    };

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let controller = GattController::new(collaborators, config.limits()).with_events(event_tx);
    let server = GattServer::new(controller);

    tokio::spawn(Dispatcher::new(server.clone()).run(radio_rx));
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("{}", event.to_json());
        }
    });

    let bridge = Bridge::new(server.clone());
    reply(bridge.execute("startServer", Value::Null).await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&bridge, &line).await,
                Ok(None) => {
                    info!("Bridge input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read bridge input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    server.lock().await.shutdown().await;
    info!("alarmgatt stopped");
    Ok(())
}
