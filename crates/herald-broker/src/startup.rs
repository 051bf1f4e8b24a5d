//! Startup buffering.
//!
//! Send and broadcast requests that arrive before the registry is ready are
//! held here unexecuted, then replayed strictly in arrival order exactly once
//! when readiness flips. Requests arriving after that bypass the buffer.

use herald_common::PageAddress;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::dispatch::SendOutcome;

/// One deferred request, carrying the original caller's reply channel so the
/// replayed call answers exactly like the original would have.
#[derive(Debug)]
pub enum BufferedRequest {
    Send {
        msg_type: String,
        payload: Value,
        page: PageAddress,
        extra: Value,
        reply: oneshot::Sender<SendOutcome>,
    },
    Broadcast {
        msg_type: String,
        payload: Value,
        extra: Value,
        reply: oneshot::Sender<Vec<(PageAddress, SendOutcome)>>,
    },
}

#[derive(Debug, Default)]
pub struct StartupBuffer {
    ready: bool,
    buffered: Vec<BufferedRequest>,
}

impl StartupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn push(&mut self, request: BufferedRequest) {
        debug!(buffered = self.buffered.len() + 1, "registry not ready, buffering request");
        self.buffered.push(request);
    }

    /// Flip to ready and hand back everything buffered, in arrival order.
    /// A second call returns nothing: the buffer drains exactly once.
    pub fn set_ready(&mut self) -> Vec<BufferedRequest> {
        self.ready = true;
        std::mem::take(&mut self.buffered)
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffered.clear();
    }
}
