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

//! BlueZ radio backend.
//!
//! Registers the service table as a local GATT application, advertises
//! it, and turns BlueZ callbacks into [`RadioEvent`]s for the dispatcher.
//! BlueZ does not report connections to a local GATT application. A
//! central counts as connected from its first read or write; the
//! adapter is then polled for the moment it goes away. Other devices on
//! the adapter, such as a paired keyboard, never become sessions.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, CharacteristicWrite,
    CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use bluer::{Adapter, Address};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::ble_constants::defaults;
use super::characteristic::{CharacteristicId, ServiceTable};
use super::radio::RadioStack;
use crate::dispatcher::RadioEvent;
use crate::error::Error;
use crate::session::SessionId;

/// Map a core error onto the ATT error returned to the central.
pub fn req_error(err: &Error) -> ReqError {
    match err {
        Error::Unauthorized => ReqError::NotAuthorized,
        Error::NotSupported(_) => ReqError::NotSupported,
        Error::InvalidValue(_) | Error::InvalidSettings(_) => ReqError::InvalidValueLength,
        _ => ReqError::Failed,
    }
}

/// A value waiting for the notifier loop.
struct Outgoing {
    value: Vec<u8>,
    accepted: oneshot::Sender<Result<(), String>>,
}

/// Hand-off between [`RadioStack::notify`] and the BlueZ notifier loop.
struct NotifySlot {
    subscribed: AtomicBool,
    tx: mpsc::Sender<Outgoing>,
    rx: Arc<Mutex<mpsc::Receiver<Outgoing>>>,
}

impl NotifySlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(defaults::QUEUE_CAPACITY);
        Self {
            subscribed: AtomicBool::new(false),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct Handles {
    app: Option<ApplicationHandle>,
    adv: Option<AdvertisementHandle>,
    monitor_started: bool,
}

/// Centrals that have made a GATT request and not yet disconnected.
type KnownCentrals = Arc<parking_lot::Mutex<HashSet<Address>>>;

pub struct BluezRadio {
    adapter: Adapter,
    device_name: String,
    events: mpsc::Sender<RadioEvent>,
    notify_slot: Arc<NotifySlot>,
    known: KnownCentrals,
    handles: parking_lot::Mutex<Handles>,
}

impl BluezRadio {
    /// Open the default adapter, power it on and set its alias.
    pub async fn new(events: mpsc::Sender<RadioEvent>, device_name: &str) -> Result<Self> {
        info!("Initializing BLE GATT server...");

        let session = bluer::Session::new()
            .await
            .context("Failed to create BlueZ session")?;
        let adapter = session
            .default_adapter()
            .await
            .context("No Bluetooth adapter")?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        adapter.set_alias(device_name.to_string()).await?;
        info!("Bluetooth name set to: {}", device_name);

        Ok(Self {
            adapter,
            device_name: device_name.to_string(),
            events,
            notify_slot: Arc::new(NotifySlot::new()),
            known: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            handles: parking_lot::Mutex::new(Handles::default()),
        })
    }

    pub fn adapter(&self) -> Adapter {
        self.adapter.clone()
    }

    fn build_application(&self, table: &ServiceTable) -> Application {
        let services = table
            .services
            .iter()
            .map(|service| {
                debug!("📝 Registering service {}", service.uuid);
                Service {
                    uuid: service.uuid,
                    primary: service.primary,
                    characteristics: service
                        .characteristics
                        .iter()
                        .map(|id| self.build_characteristic(*id))
                        .collect(),
                    ..Default::default()
                }
            })
            .collect();

        Application {
            services,
            ..Default::default()
        }
    }

    fn build_characteristic(&self, id: CharacteristicId) -> Characteristic {
        debug!(
            "📝 Registering {} characteristic: {} (read={}, write={}, notify={})",
            id,
            id.uuid(),
            id.readable(),
            id.writable(),
            id.notifiable()
        );

        let read = id.readable().then(|| {
            let events = self.events.clone();
            let known = self.known.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    let events = events.clone();
                    let known = known.clone();
                    Box::pin(async move { Self::handle_read(id, req, events, known).await })
                }),
                ..Default::default()
            }
        });

        let write = id.writable().then(|| {
            let events = self.events.clone();
            let known = self.known.clone();
            CharacteristicWrite {
                write: true,
                write_without_response: id == CharacteristicId::AlertLevel,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |data: Vec<u8>, req: CharacteristicWriteRequest| {
                        let events = events.clone();
                        let known = known.clone();
                        Box::pin(async move {
                            Self::handle_write(id, data, req, events, known).await
                        })
                    },
                )),
                ..Default::default()
            }
        });

        let notify = id.notifiable().then(|| {
            let events = self.events.clone();
            let slot = self.notify_slot.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let events = events.clone();
                    let slot = slot.clone();
                    Box::pin(async move { Self::notify_loop(id, notifier, slot, events).await })
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid: id.uuid(),
            read,
            write,
            notify,
            ..Default::default()
        }
    }

    /// Report a central the first time it makes a request.
    async fn note_central(
        address: Address,
        known: &KnownCentrals,
        events: &mpsc::Sender<RadioEvent>,
    ) -> Result<(), ReqError> {
        if !known.lock().insert(address) {
            return Ok(());
        }
        info!("BLE central connected: {}", address);
        events
            .send(RadioEvent::Connected {
                central: address.to_string(),
            })
            .await
            .map_err(|_| ReqError::Failed)
    }

    async fn handle_read(
        id: CharacteristicId,
        req: CharacteristicReadRequest,
        events: mpsc::Sender<RadioEvent>,
        known: KnownCentrals,
    ) -> Result<Vec<u8>, ReqError> {
        let central = req.device_address.to_string();
        debug!("📤 BLE READ {} from {}", id, central);
        Self::note_central(req.device_address, &known, &events).await?;

        let (reply, answer) = oneshot::channel();
        events
            .send(RadioEvent::Read {
                central,
                characteristic: id,
                reply,
            })
            .await
            .map_err(|_| ReqError::Failed)?;

        match answer.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(req_error(&e)),
            Err(_) => Err(ReqError::Failed),
        }
    }

    async fn handle_write(
        id: CharacteristicId,
        data: Vec<u8>,
        req: CharacteristicWriteRequest,
        events: mpsc::Sender<RadioEvent>,
        known: KnownCentrals,
    ) -> Result<(), ReqError> {
        let central = req.device_address.to_string();
        debug!(
            "📥 BLE WRITE {} from {}: {} bytes, MTU={}, offset={}",
            id,
            central,
            data.len(),
            req.mtu,
            req.offset
        );
        debug!("Write data (hex): {}", hex::encode(&data));

        if req.offset != 0 {
            return Err(ReqError::InvalidOffset);
        }
        Self::note_central(req.device_address, &known, &events).await?;

        let (reply, answer) = oneshot::channel();
        events
            .send(RadioEvent::Write {
                central,
                characteristic: id,
                value: data,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ReqError::Failed)?;

        match answer.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(req_error(&e)),
            Err(_) => Err(ReqError::Failed),
        }
    }

    /// Runs while a central listens on `id`.
    async fn notify_loop(
        id: CharacteristicId,
        mut notifier: CharacteristicNotifier,
        slot: Arc<NotifySlot>,
        events: mpsc::Sender<RadioEvent>,
    ) {
        debug!("{} notification loop started", id);
        slot.subscribed.store(true, Ordering::SeqCst);
        let _ = events
            .send(RadioEvent::Subscribe {
                central: None,
                characteristic: id,
                enabled: true,
            })
            .await;

        let mut rx = slot.rx.lock().await;
        let mut stop_check = tokio::time::interval(Duration::from_millis(defaults::POLL_CONNECTED_MS));

        loop {
            tokio::select! {
                item = rx.recv() => {
                    let Some(item) = item else {
                        info!("Notification channel closed, exiting notification loop");
                        break;
                    };
                    if item.accepted.is_closed() {
                        debug!("Skipping notification nobody waits for");
                        continue;
                    }
                    match notifier.notify(item.value).await {
                        Ok(()) => {
                            let _ = item.accepted.send(Ok(()));
                        }
                        Err(e) => {
                            error!("Failed to send notification: {}", e);
                            let _ = item.accepted.send(Err(e.to_string()));
                            break;
                        }
                    }
                }
                _ = stop_check.tick() => {
                    if notifier.is_stopped() {
                        break;
                    }
                }
            }
        }

        slot.subscribed.store(false, Ordering::SeqCst);
        info!("{} notification loop exited", id);
        let _ = events
            .send(RadioEvent::Subscribe {
                central: None,
                characteristic: id,
                enabled: false,
            })
            .await;
    }

    /// Poll BlueZ for centrals that made a request and report the ones
    /// that went away.
    fn start_connection_monitor(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let known = self.known.clone();

        tokio::spawn(async move {
            info!("Starting BlueZ connection monitor...");

            loop {
                let watched: Vec<Address> = known.lock().iter().copied().collect();
                let interval = if watched.is_empty() {
                    Duration::from_millis(defaults::POLL_IDLE_MS)
                } else {
                    Duration::from_millis(defaults::POLL_CONNECTED_MS)
                };
                tokio::time::sleep(interval).await;
                if watched.is_empty() {
                    continue;
                }

                let present: HashSet<Address> = match adapter.device_addresses().await {
                    Ok(addresses) => addresses.into_iter().collect(),
                    Err(e) => {
                        error!("BlueZ poll: Failed to query device addresses: {}", e);
                        continue;
                    }
                };

                let mut gone = Vec::new();
                for addr in watched {
                    if !present.contains(&addr) {
                        gone.push(addr);
                        continue;
                    }
                    let Ok(device) = adapter.device(addr) else {
                        debug!("BlueZ poll: failed to get device object for {}", addr);
                        continue;
                    };
                    match device.is_connected().await {
                        Ok(true) => {}
                        Ok(false) => gone.push(addr),
                        Err(e) => {
                            debug!("BlueZ poll: failed to query connection state for {}: {}", addr, e);
                        }
                    }
                }

                for addr in gone {
                    known.lock().remove(&addr);
                    info!("BLE central disconnected (detected via BlueZ polling): {}", addr);
                    let event = RadioEvent::Disconnected {
                        central: addr.to_string(),
                    };
                    if events.send(event).await.is_err() {
                        info!("Dispatcher gone, stopping connection monitor");
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl RadioStack for BluezRadio {
    async fn start_advertising(&self, table: &ServiceTable) -> Result<()> {
        let app = self.build_application(table);
        let app_handle = self.adapter.serve_gatt_application(app).await?;
        info!("GATT application registered");

        let adv = Advertisement {
            service_uuids: table.advertised_uuids().into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(self.device_name.clone()),
            ..Default::default()
        };
        let adv_handle = self.adapter.advertise(adv).await?;
        info!("BLE advertising started");

        let start_monitor = {
            let mut handles = self.handles.lock();
            handles.app = Some(app_handle);
            handles.adv = Some(adv_handle);
            !std::mem::replace(&mut handles.monitor_started, true)
        };
        if start_monitor {
            self.start_connection_monitor();
        }
        Ok(())
    }

    async fn notify(
        &self,
        session: SessionId,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> Result<()> {
        if !characteristic.notifiable() {
            return Err(anyhow!("{} cannot notify", characteristic));
        }
        if !self.notify_slot.subscribed.load(Ordering::SeqCst) {
            return Err(anyhow!("no central subscribed to {}", characteristic));
        }

        debug!("Notifying {} ({} bytes) for {}", characteristic, value.len(), session);
        let (accepted, answer) = oneshot::channel();
        self.notify_slot
            .tx
            .send(Outgoing { value, accepted })
            .await
            .map_err(|_| anyhow!("notification loop gone"))?;

        match answer.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!("notify failed: {}", e)),
            Err(_) => {
                warn!("Notification dropped before it was sent");
                Err(anyhow!("central unsubscribed"))
            }
        }
    }

    fn broadcasts(&self) -> bool {
        true
    }
}
