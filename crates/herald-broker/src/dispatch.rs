//! Message dispatch.
//!
//! Runs the per-page delivery algorithm: permission check, wake-lock
//! bookkeeping, live delivery or queueing, and the decision to ask the
//! external opener to start (or surface) the destination app.

use std::collections::HashMap;
use std::sync::Arc;

use herald_common::{new_message_id, ChannelId, PageAddress};
use serde_json::Value;
use tracing::debug;

use crate::protocol::Delivery;
use crate::registry::{PageRegistry, RegistrationKey};
use crate::targets::TargetDirectory;
use crate::wakelock::{WakeLockArbiter, WakeLockKey};

/// Outcome of one per-page delivery attempt. Denial and not-running are
/// defined outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered to at least one live target.
    Success,
    /// Policy refused the message; nothing was queued, locked or opened.
    PermissionDenied,
    /// No live target; the message was queued and an app-open was requested.
    AppNotRunning,
}

/// Per-message-type policy, populated at startup. Unconfigured types fall
/// back to the default (no forced foreground).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTypePolicy {
    /// Bring the app to the foreground even when delivery succeeded live.
    pub must_always_show: bool,
}

/// External permission policy: may this message type be sent to this page?
pub trait PermissionChecker: Send + Sync {
    fn is_permitted(&self, msg_type: &str, page: &PageAddress) -> bool;
}

/// Request to the external app opener.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub page: PageAddress,
    pub msg_type: String,
    /// Bring the app's window to the foreground.
    pub show_app: bool,
    /// The message was already delivered live; only surface the app.
    pub only_show_app: bool,
    /// Channel that took the live delivery, when there was one.
    pub target: Option<ChannelId>,
    pub extra: Value,
}

pub trait AppOpener: Send + Sync {
    fn open(&self, request: OpenRequest);
}

pub struct Dispatcher {
    permissions: Arc<dyn PermissionChecker>,
    opener: Arc<dyn AppOpener>,
    policies: HashMap<String, MessageTypePolicy>,
}

impl Dispatcher {
    pub fn new(
        permissions: Arc<dyn PermissionChecker>,
        opener: Arc<dyn AppOpener>,
        policies: HashMap<String, MessageTypePolicy>,
    ) -> Self {
        Self {
            permissions,
            opener,
            policies,
        }
    }

    fn policy(&self, msg_type: &str) -> MessageTypePolicy {
        self.policies.get(msg_type).copied().unwrap_or_default()
    }

    /// Send one message to one page.
    ///
    /// An unregistered page still goes through the permission check and the
    /// wake-lock acquire (so it gets one guaranteed execution window if it
    /// ever starts), but nothing is queued and no open is requested.
    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &self,
        registry: &mut PageRegistry,
        targets: &TargetDirectory,
        locks: &mut WakeLockArbiter,
        msg_type: &str,
        payload: &Value,
        page: &PageAddress,
        extra: &Value,
    ) -> SendOutcome {
        self.deliver_to_page(registry, targets, locks, msg_type, payload, page, extra)
    }

    /// Send one message to every page registered for `msg_type`.
    ///
    /// Each page runs the identical per-page algorithm independently; one
    /// page's denial or queue state never affects another's outcome.
    pub fn broadcast_message(
        &self,
        registry: &mut PageRegistry,
        targets: &TargetDirectory,
        locks: &mut WakeLockArbiter,
        msg_type: &str,
        payload: &Value,
        extra: &Value,
    ) -> Vec<(PageAddress, SendOutcome)> {
        let keys = registry.keys_of_type(msg_type);
        keys.into_iter()
            .map(|k| {
                let outcome = self.deliver_to_page(
                    registry, targets, locks, msg_type, payload, &k.page, extra,
                );
                (k.page, outcome)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn deliver_to_page(
        &self,
        registry: &mut PageRegistry,
        targets: &TargetDirectory,
        locks: &mut WakeLockArbiter,
        msg_type: &str,
        payload: &Value,
        page: &PageAddress,
        extra: &Value,
    ) -> SendOutcome {
        if !self.permissions.is_permitted(msg_type, page) {
            debug!(msg_type, %page, "permission denied, dropping message");
            return SendOutcome::PermissionDenied;
        }

        let lock_key = WakeLockKey::compute(msg_type, page);
        let registration_key = RegistrationKey::new(msg_type, page.clone());
        let registered = registry.contains(&registration_key);

        // Queue first so the live delivery carries the same ID the page will
        // ack against.
        let queued_id = if registered {
            registry.queue(&registration_key, payload.clone())
        } else {
            None
        };
        let message_id = queued_id.unwrap_or_else(new_message_id);

        let live = targets.targets_for(page);
        let outcome = if live.is_empty() {
            // No live target: take the lock anyway so the page gets at least
            // one guaranteed execution window once it starts.
            locks.acquire(&lock_key);
            SendOutcome::AppNotRunning
        } else {
            locks.acquire(&lock_key);
            for target in &live {
                target.deliver(Delivery {
                    msg_type: msg_type.to_string(),
                    page_url: page.page_url.clone(),
                    manifest_url: page.manifest_url.clone(),
                    payload: payload.clone(),
                    message_id: message_id.clone(),
                });
            }
            SendOutcome::Success
        };
        debug!(msg_type, %page, ?outcome, live_targets = live.len(), "dispatched message");

        if registered {
            let policy = self.policy(msg_type);
            match outcome {
                SendOutcome::AppNotRunning => self.opener.open(OpenRequest {
                    page: page.clone(),
                    msg_type: msg_type.to_string(),
                    show_app: policy.must_always_show,
                    only_show_app: false,
                    target: None,
                    extra: extra.clone(),
                }),
                SendOutcome::Success if policy.must_always_show => {
                    self.opener.open(OpenRequest {
                        page: page.clone(),
                        msg_type: msg_type.to_string(),
                        show_app: true,
                        only_show_app: true,
                        target: live.first().map(|t| t.id()),
                        extra: extra.clone(),
                    })
                }
                _ => {}
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests;
