//! Live delivery targets.
//!
//! For each manifest, the directory tracks the process channels currently
//! hosting one or more windows of that app's pages, with a per-page window
//! refcount. Empty containers are cleaned up eagerly at every level: a page
//! entry at count zero, a target with no pages, a manifest with no targets.

use std::collections::HashMap;

use herald_common::{ChannelId, PageAddress};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::Delivery;

/// Sending half of one process channel, paired with its stable identity.
#[derive(Debug, Clone)]
pub struct TargetChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl TargetChannel {
    pub fn new(tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            id: ChannelId::next(),
            tx,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Fire-and-forget send. Returns `false` if the process side is gone.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

#[derive(Debug)]
struct Target {
    channel: TargetChannel,
    /// page URL -> live window count.
    window_counts: HashMap<String, u32>,
}

/// manifest URL -> live targets hosting pages of that manifest.
#[derive(Debug, Default)]
pub struct TargetDirectory {
    manifests: HashMap<String, Vec<Target>>,
}

impl TargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live window of `page` in the process behind `channel`.
    pub fn register_target(&mut self, page: &PageAddress, channel: &TargetChannel) {
        let targets = self.manifests.entry(page.manifest_url.clone()).or_default();
        match targets.iter_mut().find(|t| t.channel.id == channel.id) {
            Some(target) => {
                *target.window_counts.entry(page.page_url.clone()).or_insert(0) += 1;
            }
            None => {
                let mut window_counts = HashMap::new();
                window_counts.insert(page.page_url.clone(), 1);
                targets.push(Target {
                    channel: channel.clone(),
                    window_counts,
                });
            }
        }
    }

    /// One window of `page` went away in the process behind `channel`.
    pub fn unregister_window(&mut self, channel: ChannelId, page: &PageAddress) {
        let Some(targets) = self.manifests.get_mut(&page.manifest_url) else {
            return;
        };
        if let Some(target) = targets.iter_mut().find(|t| t.channel.id == channel) {
            if let Some(count) = target.window_counts.get_mut(&page.page_url) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    target.window_counts.remove(&page.page_url);
                }
            }
        }
        targets.retain(|t| !t.window_counts.is_empty());
        if targets.is_empty() {
            self.manifests.remove(&page.manifest_url);
        }
    }

    /// Whole-process shutdown: drop `channel` from every manifest.
    pub fn remove_channel(&mut self, channel: ChannelId) {
        self.manifests.retain(|manifest_url, targets| {
            let before = targets.len();
            targets.retain(|t| t.channel.id != channel);
            if targets.len() < before {
                debug!(%channel, %manifest_url, "dropped targets for closed channel");
            }
            !targets.is_empty()
        });
    }

    /// Live-delivery candidates: channels with at least one window of `page`.
    pub fn targets_for(&self, page: &PageAddress) -> Vec<TargetChannel> {
        self.manifests
            .get(&page.manifest_url)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t.window_counts.contains_key(&page.page_url))
                    .map(|t| t.channel.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `channel` currently hosts a window of `page`. Used to validate
    /// that a protocol request's claimed manifest matches its origin.
    pub fn channel_hosts(&self, channel: ChannelId, page: &PageAddress) -> bool {
        self.manifests
            .get(&page.manifest_url)
            .is_some_and(|targets| {
                targets.iter().any(|t| {
                    t.channel.id == channel && t.window_counts.contains_key(&page.page_url)
                })
            })
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn clear(&mut self) {
        self.manifests.clear();
    }
}
