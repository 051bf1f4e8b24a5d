//! Page registrations and their pending-message queues.
//!
//! A registration is one page's interest in one message type. Each owns a
//! bounded FIFO queue of messages waiting for the page to pick them up;
//! beyond the bound the oldest entry is evicted.

use std::collections::{HashMap, VecDeque};

use herald_common::{new_message_id, PageAddress};
use serde_json::Value;
use tracing::debug;

/// Identity of one registration: message type plus page address. Unique —
/// registering the same key twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    pub msg_type: String,
    pub page: PageAddress,
}

impl RegistrationKey {
    pub fn new(msg_type: impl Into<String>, page: PageAddress) -> Self {
        Self {
            msg_type: msg_type.into(),
            page,
        }
    }
}

/// One message waiting for its page, tagged with the delivery-attempt ID.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub payload: Value,
    pub message_id: String,
}

/// A page's registered interest in one message type.
#[derive(Debug, Default)]
pub struct Registration {
    pending: VecDeque<PendingMessage>,
}

impl Registration {
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub struct PageRegistry {
    entries: HashMap<RegistrationKey, Registration>,
    max_pending: usize,
}

impl PageRegistry {
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_pending,
        }
    }

    /// Register a page for a message type. Idempotent: returns `false` if the
    /// key was already registered.
    pub fn register(&mut self, msg_type: &str, page: &PageAddress) -> bool {
        let key = RegistrationKey::new(msg_type, page.clone());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, Registration::default());
        true
    }

    pub fn find(&self, key: &RegistrationKey) -> Option<&Registration> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &RegistrationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// All registration keys for a manifest, any message type. Uninstall path.
    pub fn find_by_manifest(&self, manifest_url: &str) -> Vec<RegistrationKey> {
        self.entries
            .keys()
            .filter(|k| k.page.manifest_url == manifest_url)
            .cloned()
            .collect()
    }

    /// All registration keys for a message type. Broadcast path.
    pub fn keys_of_type(&self, msg_type: &str) -> Vec<RegistrationKey> {
        self.entries
            .keys()
            .filter(|k| k.msg_type == msg_type)
            .cloned()
            .collect()
    }

    /// Append a payload to the registration's pending queue under a fresh
    /// message ID, evicting the oldest entry if the bound is exceeded.
    /// Returns the ID, or `None` if the key is not registered.
    pub fn queue(&mut self, key: &RegistrationKey, payload: Value) -> Option<String> {
        let registration = self.entries.get_mut(key)?;
        let message_id = new_message_id();
        registration.pending.push_back(PendingMessage {
            payload,
            message_id: message_id.clone(),
        });
        while registration.pending.len() > self.max_pending {
            let evicted = registration.pending.pop_front();
            debug!(
                msg_type = %key.msg_type,
                page = %key.page,
                evicted_id = evicted.map(|m| m.message_id).as_deref().unwrap_or(""),
                "pending queue full, evicted oldest message"
            );
        }
        Some(message_id)
    }

    /// Consuming read of the backlog: returns all pending payloads and clears
    /// the queue. Ownership of delivery moves to the requesting page.
    pub fn drain_pending(&mut self, key: &RegistrationKey) -> Vec<Value> {
        match self.entries.get_mut(key) {
            Some(registration) => registration
                .pending
                .drain(..)
                .map(|m| m.payload)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remove the single entry matching `message_id`, if present. Duplicate
    /// acks are harmless no-ops.
    pub fn ack(&mut self, key: &RegistrationKey, message_id: &str) {
        if let Some(registration) = self.entries.get_mut(key) {
            if let Some(pos) = registration
                .pending
                .iter()
                .position(|m| m.message_id == message_id)
            {
                registration.pending.remove(pos);
            } else {
                debug!(%message_id, "ack for unknown message id, ignoring");
            }
        }
    }

    pub fn has_pending(&self, key: &RegistrationKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|r| !r.pending.is_empty())
    }

    /// Remove every registration for a manifest. Returns how many were removed.
    pub fn purge_by_manifest(&mut self, manifest_url: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|k, _| k.page.manifest_url != manifest_url);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
