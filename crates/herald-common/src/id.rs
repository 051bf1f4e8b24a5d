use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Generate a fresh message ID for one delivery attempt.
///
/// IDs are unique per attempt, not per registration: the same payload queued
/// twice gets two distinct IDs, and each is acked independently.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Identity of one process-side channel, assigned when the transport first
/// hands the channel to the broker. Stable for the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_valid_uuid() {
        let id = new_message_id();
        let parsed = uuid::Uuid::parse_str(&id);
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap().get_version_num(), 4);
    }

    #[test]
    fn message_id_is_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn channel_ids_are_monotonic() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert!(b.0 > a.0);
    }
}
