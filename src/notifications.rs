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

//! Per-session notification queues.
//!
//! Every session has a bounded queue. Items get the session's next
//! sequence number when they are enqueued; when the queue is full the
//! oldest item is dropped, which the central sees as a gap in the
//! sequence. Items leave the queue only once the radio has accepted them.
//!
//! A session that still has undelivered items after a flush attempt keeps
//! a wake-lock lease until the queue drains, it unsubscribes, or it
//! disconnects.
//!
//! On a radio that delivers every notification to all subscribers the
//! channel runs in shared mode: one queue and one sequence for every
//! subscribed session, so each item goes on air once. Items meant for a
//! single session cannot be delivered there and are not queued.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

use crate::bluetooth::{CharacteristicId, RadioStack};
use crate::collaborator::bounded;
use crate::session::SessionId;
use crate::wakelock::{LeaseId, WakeLockManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Alarm,
    AlarmAcknowledged,
    AlarmReset,
    AuthorizationStatus,
}

impl NotificationKind {
    pub fn as_byte(self) -> u8 {
        match self {
            NotificationKind::Alarm => 0x01,
            NotificationKind::AlarmAcknowledged => 0x02,
            NotificationKind::AlarmReset => 0x03,
            NotificationKind::AuthorizationStatus => 0x04,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationItem {
    pub kind: NotificationKind,
    pub payload: Vec<u8>,
    pub sequence: u32,
}

impl NotificationItem {
    /// Characteristic value: `sequence (u32 LE) | kind | payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(5 + self.payload.len());
        value.extend_from_slice(&self.sequence.to_le_bytes());
        value.push(self.kind.as_byte());
        value.extend_from_slice(&self.payload);
        value
    }
}

#[derive(Debug, Default)]
struct SessionQueue {
    items: VecDeque<NotificationItem>,
    next_sequence: u32,
    dropped: u64,
    subscribed: bool,
    pending_lease: Option<LeaseId>,
}

/// Outcome of one flush attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

/// Append to `queue`, dropping its oldest item when it is full.
fn push(
    queue: &mut SessionQueue,
    capacity: usize,
    owner: &str,
    kind: NotificationKind,
    payload: Vec<u8>,
) {
    if queue.items.len() >= capacity {
        if let Some(oldest) = queue.items.pop_front() {
            queue.dropped += 1;
            warn!(
                "Queue full for {}, dropped item seq={} ({} dropped so far)",
                owner, oldest.sequence, queue.dropped
            );
        }
    }

    let sequence = queue.next_sequence;
    queue.next_sequence = queue.next_sequence.wrapping_add(1);
    queue.items.push_back(NotificationItem {
        kind,
        payload,
        sequence,
    });
    debug!("Queued {:?} seq={} for {}", kind, sequence, owner);
}

pub struct NotificationChannel {
    queues: BTreeMap<SessionId, SessionQueue>,
    shared: Option<SessionQueue>,
    capacity: usize,
}

impl NotificationChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: BTreeMap::new(),
            shared: None,
            capacity: capacity.max(1),
        }
    }

    /// A channel for a radio that broadcasts every notification.
    pub fn shared(capacity: usize) -> Self {
        Self {
            shared: Some(SessionQueue::default()),
            ..Self::new(capacity)
        }
    }

    pub fn open(&mut self, session: SessionId) {
        self.queues.entry(session).or_default();
    }

    /// Forget a session. Returns the lease its pending flush was holding.
    pub fn close(&mut self, session: SessionId) -> Option<LeaseId> {
        let queue = self.queues.remove(&session)?;
        if !queue.items.is_empty() {
            debug!(
                "Discarding {} undelivered item(s) for {}",
                queue.items.len(),
                session
            );
        }
        queue.pending_lease.or_else(|| self.idle_shared())
    }

    /// Track whether the session listens on the notification characteristic.
    ///
    /// Disabling cancels a pending flush; its lease is returned to the caller.
    pub fn set_subscribed(&mut self, session: SessionId, subscribed: bool) -> Option<LeaseId> {
        let queue = self.queues.get_mut(&session)?;
        queue.subscribed = subscribed;
        if subscribed {
            None
        } else {
            queue.pending_lease.take().or_else(|| self.idle_shared())
        }
    }

    /// Drop the shared backlog once nobody listens. Returns its lease.
    fn idle_shared(&mut self) -> Option<LeaseId> {
        if self.queues.values().any(|q| q.subscribed) {
            return None;
        }
        let shared = self.shared.as_mut()?;
        if !shared.items.is_empty() {
            debug!("Discarding {} undelivered shared item(s)", shared.items.len());
            shared.items.clear();
        }
        shared.pending_lease.take()
    }

    /// Append to every subscribed session's queue. Returns the recipients.
    ///
    /// In shared mode the item is queued once for all of them.
    pub fn enqueue(&mut self, kind: NotificationKind, payload: &[u8]) -> Vec<SessionId> {
        let recipients: Vec<SessionId> = self
            .queues
            .iter()
            .filter(|(_, q)| q.subscribed)
            .map(|(id, _)| *id)
            .collect();

        if let Some(shared) = self.shared.as_mut() {
            if !recipients.is_empty() {
                push(shared, self.capacity, "shared queue", kind, payload.to_vec());
            }
            return recipients;
        }

        for session in &recipients {
            self.enqueue_to(*session, kind, payload.to_vec());
        }
        recipients
    }

    /// Append to one session's queue, subscribed or not.
    ///
    /// Returns false when the session is unknown or the channel is shared.
    pub fn enqueue_to(&mut self, session: SessionId, kind: NotificationKind, payload: Vec<u8>) -> bool {
        if self.shared.is_some() {
            debug!("Not queuing {:?} for {} on a shared channel", kind, session);
            return false;
        }
        let capacity = self.capacity;
        let Some(queue) = self.queues.get_mut(&session) else {
            return false;
        };
        push(queue, capacity, &session.to_string(), kind, payload);
        true
    }

    /// Drain a subscribed session's queue through the radio, in order.
    ///
    /// Stops at the first item the radio does not accept; that item and
    /// everything behind it stay queued. In shared mode any subscribed
    /// session drains the shared queue.
    pub async fn flush(
        &mut self,
        session: SessionId,
        radio: &dyn RadioStack,
        wake_lock: &mut WakeLockManager,
        timeout: Duration,
    ) -> FlushReport {
        let subscribed = match self.queues.get(&session) {
            Some(queue) => queue.subscribed,
            None => return FlushReport::default(),
        };
        let queue = match self.shared.as_mut() {
            Some(shared) => shared,
            None => match self.queues.get_mut(&session) {
                Some(queue) => queue,
                None => return FlushReport::default(),
            },
        };
        if !subscribed || queue.items.is_empty() {
            return FlushReport {
                sent: 0,
                remaining: queue.items.len(),
            };
        }

        let lease = match queue.pending_lease.take() {
            Some(lease) => Some(lease),
            None => match wake_lock.acquire("notification flush").await {
                Ok(lease) => Some(lease),
                Err(e) => {
                    warn!("Flushing {} without wake lock: {}", session, e);
                    None
                }
            },
        };

        let mut sent = 0;
        while let Some(item) = queue.items.front() {
            let value = item.encode();
            match bounded(
                "radio notify",
                timeout,
                radio.notify(session, CharacteristicId::Notification, value),
            )
            .await
            {
                Ok(()) => {
                    queue.items.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    debug!("Flush for {} paused: {}", session, e);
                    break;
                }
            }
        }

        let remaining = queue.items.len();
        if remaining == 0 {
            if let Some(lease) = lease {
                wake_lock.release(lease).await;
            }
        } else {
            queue.pending_lease = lease;
        }

        debug!("Flushed {} item(s) to {}, {} remaining", sent, session, remaining);
        FlushReport { sent, remaining }
    }

    /// Undelivered items for `session`; the shared backlog in shared mode.
    pub fn pending(&self, session: SessionId) -> Vec<NotificationItem> {
        let queue = match &self.shared {
            Some(shared) if self.queues.contains_key(&session) => Some(shared),
            Some(_) => None,
            None => self.queues.get(&session),
        };
        queue
            .map(|q| q.items.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn dropped(&self, session: SessionId) -> u64 {
        match &self.shared {
            Some(shared) => shared.dropped,
            None => self.queues.get(&session).map(|q| q.dropped).unwrap_or(0),
        }
    }

    #[cfg(test)]
    fn has_pending_flush(&self, session: SessionId) -> bool {
        match &self.shared {
            Some(shared) => shared.pending_lease.is_some(),
            None => self
                .queues
                .get(&session)
                .is_some_and(|q| q.pending_lease.is_some()),
        }
    }
}
