//! Process-facing wire protocol.
//!
//! Processes talk to the broker with [`ProcessRequest`] frames; the broker
//! pushes [`Delivery`] frames to live targets. Replies to the synchronous
//! requests (`get_pending_messages`, `has_pending_messages`) travel back over
//! the service's reply channel, not over this enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request consumed from a process-side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcessRequest {
    /// A window of `page_url` is now live in the sending process.
    #[serde(rename = "register")]
    Register {
        page_url: String,
        manifest_url: String,
        window_id: u64,
    },

    /// A window of `page_url` went away.
    #[serde(rename = "unregister")]
    Unregister {
        page_url: String,
        manifest_url: String,
        window_id: u64,
    },

    /// The whole process is shutting down; drop every target it registered.
    #[serde(rename = "process_shutdown")]
    ProcessShutdown,

    /// Consuming read of the page's backlog for one message type.
    #[serde(rename = "get_pending_messages")]
    GetPendingMessages {
        msg_type: String,
        page_url: String,
        manifest_url: String,
    },

    #[serde(rename = "has_pending_messages")]
    HasPendingMessages {
        msg_type: String,
        page_url: String,
        manifest_url: String,
    },

    /// The page finished handling one delivered message.
    #[serde(rename = "ack_message")]
    AckMessage {
        msg_type: String,
        page_url: String,
        manifest_url: String,
        message_id: String,
    },

    /// The page handled `handled_count` messages; release that many wake-lock
    /// references.
    #[serde(rename = "handle_messages_done")]
    HandleMessagesDone {
        msg_type: String,
        page_url: String,
        manifest_url: String,
        handled_count: u32,
    },
}

/// A system message pushed to a live target, tagged with the per-attempt
/// message ID the page acks with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub msg_type: String,
    pub page_url: String,
    pub manifest_url: String,
    pub payload: Value,
    pub message_id: String,
}
