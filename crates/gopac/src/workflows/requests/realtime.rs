//! Publish/subscribe for rows inserted after a commit.
//!
//! Message threads are keyed by request id and inboxes by recipient id.
//! Events carry the full row so subscribers can deduplicate on its id.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::domain::{Message, Notification, RequestId, UserId};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Request(RequestId),
    Inbox(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PortalEvent {
    MessagePosted(Message),
    NotificationCreated(Notification),
}

impl PortalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PortalEvent::MessagePosted(_) => "message_posted",
            PortalEvent::NotificationCreated(_) => "notification_created",
        }
    }
}

/// Lazily created broadcast channel per topic.
#[derive(Debug)]
pub struct EventHub {
    capacity: usize,
    channels: Mutex<HashMap<Topic, broadcast::Sender<PortalEvent>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Also drops channels whose subscribers have all gone.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<PortalEvent> {
        match self.channels.lock() {
            Ok(mut channels) => {
                channels.retain(|_, sender| sender.receiver_count() > 0);
                channels
                    .entry(topic)
                    .or_insert_with(|| broadcast::channel(self.capacity).0)
                    .subscribe()
            }
            Err(_) => {
                // A detached receiver still lets the caller stream keep-alives.
                warn!("event hub lock poisoned, subscription will stay silent");
                broadcast::channel(1).1
            }
        }
    }

    /// Deliver to current subscribers; returns how many received the event.
    pub fn publish(&self, topic: Topic, event: PortalEvent) -> usize {
        let Ok(mut channels) = self.channels.lock() else {
            warn!("event hub lock poisoned, dropping {}", event.name());
            return 0;
        };
        let Some(sender) = channels.get(&topic) else {
            return 0;
        };
        match sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!(?topic, "no subscribers left, closing channel");
                channels.remove(&topic);
                0
            }
        }
    }

    #[cfg(test)]
    fn open_topics(&self) -> usize {
        self.channels.lock().map(|channels| channels.len()).unwrap_or(0)
    }

    pub fn message_posted(&self, message: &Message) -> usize {
        self.publish(
            Topic::Request(message.request_id.clone()),
            PortalEvent::MessagePosted(message.clone()),
        )
    }

    pub fn notifications_created(&self, rows: &[Notification]) -> usize {
        rows.iter()
            .map(|row| {
                self.publish(
                    Topic::Inbox(row.recipient.clone()),
                    PortalEvent::NotificationCreated(row.clone()),
                )
            })
            .sum()
    }
}
