//! In-process publish/subscribe message bus.
//!
//! Handlers are plain closures registered per recipient, kept in insertion
//! order, and invoked synchronously from `publish` after the registry lock
//! is released. Re-entrant `publish`/`subscribe` calls from inside a
//! handler never deadlock because nothing holds the lock while a handler
//! runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

const HISTORY_CAPACITY: usize = 1000;

/// The kind of event a [`Message`] carries. `Broadcast` is delivered to
/// every registered handler regardless of recipient id; `TaskUpdate` is the
/// one non-broadcast kind the agent runtime parses itself, the rest are
/// opaque payloads routed by recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TaskUpdate,
    Broadcast,
    Direct,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub kind: MessageKind,
    pub from: String,
    /// Conventionally `None` for a `Broadcast` message, `Some(recipient)`
    /// otherwise.
    pub to: Option<String>,
    pub body: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A handler registered against a recipient id. Boxed so the bus can hold
/// a heterogeneous, ordered list per recipient.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

struct Registry {
    /// Recipient id -> ordered handler list.
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    history: VecDeque<Message>,
    next_sub_id: u64,
}

/// In-process message bus: `Publish`, `Subscribe`/`unsubscribe`, `History`.
pub struct MessageBus {
    registry: Mutex<Registry>,
    next_message_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                handlers: HashMap::new(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                next_sub_id: 0,
            }),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Registers `handler` for `recipient`'s inbox and returns a token that
    /// [`MessageBus::unsubscribe`] accepts. Handlers for the same recipient
    /// fire in subscription order.
    pub fn subscribe(&self, recipient: impl Into<String>, handler: Handler) -> SubscriptionId {
        let mut reg = self.registry.lock().expect("bus registry lock poisoned");
        let sub_id = reg.next_sub_id;
        reg.next_sub_id += 1;
        reg.handlers
            .entry(recipient.into())
            .or_default()
            .push((sub_id, handler));
        SubscriptionId(sub_id)
    }

    pub fn unsubscribe(&self, recipient: &str, id: SubscriptionId) {
        let mut reg = self.registry.lock().expect("bus registry lock poisoned");
        if let Some(list) = reg.handlers.get_mut(recipient) {
            list.retain(|(sub_id, _)| *sub_id != id.0);
        }
    }

    /// Publishes `message`, appends it to history, and invokes every
    /// matching handler. The registry lock is held only long enough to
    /// snapshot the handler list and history slot; handlers run unlocked.
    ///
    /// A `Broadcast` message is delivered to every handler registered under
    /// any recipient id; any other kind is delivered only to handlers
    /// registered for `to`.
    pub fn publish(&self, kind: MessageKind, from: impl Into<String>, to: Option<String>, body: serde_json::Value) -> Message {
        let message = Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            kind,
            from: from.into(),
            to,
            body,
            timestamp: Utc::now(),
        };

        let handlers = {
            let mut reg = self.registry.lock().expect("bus registry lock poisoned");
            if reg.history.len() == HISTORY_CAPACITY {
                reg.history.pop_front();
            }
            reg.history.push_back(message.clone());

            let mut snapshot = Vec::new();
            if message.kind == MessageKind::Broadcast {
                for list in reg.handlers.values() {
                    snapshot.extend(list.iter().map(|(_, h)| h.clone()));
                }
            } else if let Some(recipient) = &message.to {
                if let Some(list) = reg.handlers.get(recipient) {
                    snapshot.extend(list.iter().map(|(_, h)| h.clone()));
                }
            }
            snapshot
        };

        debug!(message_id = message.id, recipients = handlers.len(), "publishing message");
        for handler in handlers {
            handler(&message);
        }
        message
    }

    /// Returns up to `limit` most recent messages visible to `viewer`,
    /// oldest first. A message is visible to `viewer` when `viewer` sent
    /// it, `viewer` is its recipient, or it's a broadcast.
    pub fn history(&self, viewer: &str, limit: usize) -> Vec<Message> {
        let reg = self.registry.lock().expect("bus registry lock poisoned");
        let visible: Vec<Message> = reg
            .history
            .iter()
            .filter(|m| m.kind == MessageKind::Broadcast || m.from == viewer || m.to.as_deref() == Some(viewer))
            .cloned()
            .collect();
        let skip = visible.len().saturating_sub(limit);
        visible[skip..].to_vec()
    }

    pub fn subscriber_count(&self) -> usize {
        let reg = self.registry.lock().expect("bus registry lock poisoned");
        reg.handlers.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Convenience used by the agent runtime to publish a `task_update` message
/// on terminal state transitions.
pub fn publish_task_update(
    bus: &MessageBus,
    from: impl Into<String>,
    to: Option<String>,
    task_id: &str,
    status: &str,
) -> Result<Message> {
    let body = serde_json::json!({ "task_id": task_id, "status": status });
    Ok(bus.publish(MessageKind::TaskUpdate, from, to, body))
}

pub fn warn_on_handler_panic(recipient: &str) {
    warn!(recipient, "message handler panicked; bus continues delivering to remaining subscribers");
}
