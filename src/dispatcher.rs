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

//! Single dispatch context for radio callbacks.
//!
//! The radio backend turns every callback into a [`RadioEvent`] and sends
//! it down one channel. The dispatcher applies events to the controller
//! one at a time, in arrival order, and answers the ones that expect a
//! GATT response.
//!
//! A stack that cannot tell who subscribed switches a characteristic on
//! once for everyone. The dispatcher remembers that and subscribes every
//! session that connects while it stays on.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bluetooth::CharacteristicId;
use crate::controller::{GattController, GattServer};
use crate::error::{Error, Result};
use crate::session::SessionId;

#[derive(Debug)]
pub enum RadioEvent {
    Connected {
        central: String,
    },
    Disconnected {
        central: String,
    },
    Write {
        central: String,
        characteristic: CharacteristicId,
        value: Vec<u8>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Read {
        central: String,
        characteristic: CharacteristicId,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    /// Notifications switched on or off.
    ///
    /// `central` is `None` when the stack cannot tell who subscribed; the
    /// change then applies to every connected session and to sessions that
    /// connect later.
    Subscribe {
        central: Option<String>,
        characteristic: CharacteristicId,
        enabled: bool,
    },
}

pub struct Dispatcher {
    server: GattServer,
    centrals: HashMap<String, SessionId>,
    stack_subscribed: BTreeSet<CharacteristicId>,
}

impl Dispatcher {
    pub fn new(server: GattServer) -> Self {
        Self {
            server,
            centrals: HashMap::new(),
            stack_subscribed: BTreeSet::new(),
        }
    }

    /// Apply events until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<RadioEvent>) {
        info!("Dispatcher started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("Dispatcher stopped: radio channel closed");
    }

    pub async fn handle(&mut self, event: RadioEvent) {
        let server = self.server.clone();
        let mut controller = server.lock().await;

        match event {
            RadioEvent::Connected { central } => {
                if let Err(e) = self.connect(&mut controller, &central).await {
                    warn!("Connection from {} refused: {}", central, e);
                }
            }
            RadioEvent::Disconnected { central } => {
                if let Some(session) = self.centrals.remove(&central) {
                    controller.on_disconnect(session).await;
                }
            }
            RadioEvent::Write {
                central,
                characteristic,
                value,
                reply,
            } => {
                let result = match self.session_for(&mut controller, &central).await {
                    Ok(session) => {
                        let result = controller
                            .on_characteristic_write(session, characteristic, &value)
                            .await;
                        self.forget_if_gone(&central, &result);
                        result
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    debug!("Write to {} from {} failed: {}", characteristic, central, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            RadioEvent::Read {
                central,
                characteristic,
                reply,
            } => {
                let result = match self.session_for(&mut controller, &central).await {
                    Ok(session) => {
                        let result = controller
                            .on_characteristic_read(session, characteristic)
                            .await;
                        self.forget_if_gone(&central, &result);
                        result
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            RadioEvent::Subscribe {
                central,
                characteristic,
                enabled,
            } => {
                let targets: Vec<(String, SessionId)> = match central {
                    Some(central) => match self.session_for(&mut controller, &central).await {
                        Ok(session) => vec![(central, session)],
                        Err(e) => {
                            warn!("Subscribe from {} dropped: {}", central, e);
                            Vec::new()
                        }
                    },
                    None => {
                        if enabled {
                            self.stack_subscribed.insert(characteristic);
                        } else {
                            self.stack_subscribed.remove(&characteristic);
                        }
                        self.centrals
                            .iter()
                            .map(|(central, session)| (central.clone(), *session))
                            .collect()
                    }
                };

                for (central, session) in targets {
                    let result = controller
                        .on_subscribe(session, characteristic, enabled)
                        .await;
                    if let Err(e) = &result {
                        info!("{} not subscribed to {}: {}", central, characteristic, e);
                    }
                    self.forget_if_gone(&central, &result);
                }
            }
        }
    }

    async fn connect(&mut self, controller: &mut GattController, central: &str) -> Result<SessionId> {
        if let Some(session) = self.centrals.get(central) {
            debug!("{} already connected as {}", central, session);
            return Ok(*session);
        }
        let session = controller.on_connect(central)?;
        self.centrals.insert(central.to_string(), session);

        for characteristic in self.stack_subscribed.iter().copied() {
            if let Err(e) = controller.on_subscribe(session, characteristic, true).await {
                info!("{} not subscribed to {}: {}", central, characteristic, e);
            }
        }
        Ok(session)
    }

    /// Session of `central`, connecting it first if the stack skipped the
    /// connection event.
    async fn session_for(&mut self, controller: &mut GattController, central: &str) -> Result<SessionId> {
        self.connect(controller, central).await
    }

    fn forget_if_gone<T>(&mut self, central: &str, result: &Result<T>) {
        if let Err(Error::NotFound(session)) = result {
            warn!("{} for {} vanished, dropping mapping", session, central);
            self.centrals.remove(central);
        }
    }

    pub fn session_of(&self, central: &str) -> Option<SessionId> {
        self.centrals.get(central).copied()
    }
}
