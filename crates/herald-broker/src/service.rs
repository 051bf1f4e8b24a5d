//! Broker service.
//!
//! One explicitly constructed [`Broker`] owns the registry, target directory,
//! wake-lock arbiter and startup buffer, and mutates them from a single task
//! draining one command stream. [`BrokerHandle`] is the only way in: API
//! calls, protocol messages from processes and watchdog expiries all funnel
//! through it, so no internal locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use herald_common::{BrokerError, PageAddress, ProtocolError, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::dispatch::{AppOpener, Dispatcher, MessageTypePolicy, PermissionChecker, SendOutcome};
use crate::lifecycle::{AppRegistry, LifecycleManager};
use crate::protocol::ProcessRequest;
use crate::registry::{PageRegistry, RegistrationKey};
use crate::startup::{BufferedRequest, StartupBuffer};
use crate::targets::{TargetChannel, TargetDirectory};
use crate::wakelock::{PowerManager, Timer, WakeLockArbiter, WakeLockKey};

/// Reply to a protocol request. Requests without a synchronous reply (and
/// rejected ones) answer [`RequestReply::None`].
#[derive(Debug)]
pub enum RequestReply {
    None,
    PendingMessages(Vec<Value>),
    HasPending(bool),
}

enum Command {
    RegisterPage {
        msg_type: String,
        page: PageAddress,
    },
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
    SetReady,
    Process {
        channel: TargetChannel,
        request: ProcessRequest,
        reply: oneshot::Sender<RequestReply>,
    },
    Uninstall {
        app_id: String,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// External collaborators, injected at construction.
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionChecker>,
    pub opener: Arc<dyn AppOpener>,
    pub power: Arc<dyn PowerManager>,
    pub timer: Arc<dyn Timer>,
    pub apps: Arc<dyn AppRegistry>,
    /// Per-message-type show policy; unlisted types use the default.
    pub policies: HashMap<String, MessageTypePolicy>,
}

pub struct Broker {
    registry: PageRegistry,
    targets: TargetDirectory,
    locks: WakeLockArbiter,
    dispatcher: Dispatcher,
    startup: StartupBuffer,
    lifecycle: LifecycleManager,
}

/// Cloneable handle to a running broker.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Broker {
    /// Build a broker and start its task. The returned handle is what the
    /// transport owner holds on to.
    pub fn spawn(config: BrokerConfig, collaborators: Collaborators) -> BrokerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();

        let broker = Broker {
            registry: PageRegistry::new(config.max_pending_messages),
            targets: TargetDirectory::new(),
            locks: WakeLockArbiter::new(
                collaborators.power,
                collaborators.timer,
                config.watchdog_timeout(),
                expired_tx,
            ),
            dispatcher: Dispatcher::new(
                collaborators.permissions,
                collaborators.opener,
                collaborators.policies,
            ),
            startup: StartupBuffer::new(),
            lifecycle: LifecycleManager::new(collaborators.apps),
        };

        tokio::spawn(broker.run(cmd_rx, expired_rx));
        BrokerHandle { tx: cmd_tx }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut expired_rx: mpsc::UnboundedReceiver<(WakeLockKey, u64)>,
    ) {
        info!("broker started");
        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some((key, generation)) = expired_rx.recv() => {
                    self.locks.handle_expiry(&key, generation);
                }
            }
        }
        info!("broker stopped");
    }

    /// Returns `false` when the broker should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::RegisterPage { msg_type, page } => {
                let created = self.registry.register(&msg_type, &page);
                debug!(msg_type, %page, created, "page registration");
            }
            Command::Send {
                msg_type,
                payload,
                page,
                extra,
                reply,
            } => {
                if self.startup.is_ready() {
                    let outcome = self.dispatcher.send_message(
                        &mut self.registry,
                        &self.targets,
                        &mut self.locks,
                        &msg_type,
                        &payload,
                        &page,
                        &extra,
                    );
                    let _ = reply.send(outcome);
                } else {
                    self.startup.push(BufferedRequest::Send {
                        msg_type,
                        payload,
                        page,
                        extra,
                        reply,
                    });
                }
            }
            Command::Broadcast {
                msg_type,
                payload,
                extra,
                reply,
            } => {
                if self.startup.is_ready() {
                    let outcomes = self.dispatcher.broadcast_message(
                        &mut self.registry,
                        &self.targets,
                        &mut self.locks,
                        &msg_type,
                        &payload,
                        &extra,
                    );
                    let _ = reply.send(outcomes);
                } else {
                    self.startup.push(BufferedRequest::Broadcast {
                        msg_type,
                        payload,
                        extra,
                        reply,
                    });
                }
            }
            Command::SetReady => {
                let buffered = self.startup.set_ready();
                if !buffered.is_empty() {
                    info!(replayed = buffered.len(), "registry ready, replaying buffered requests");
                }
                for request in buffered {
                    self.replay(request);
                }
            }
            Command::Process {
                channel,
                request,
                reply,
            } => {
                let response = self.handle_request(&channel, request);
                let _ = reply.send(response);
            }
            Command::Uninstall { app_id } => {
                self.lifecycle.handle_uninstall(&mut self.registry, &app_id);
            }
            Command::Shutdown { reply } => {
                info!("broker shutting down");
                self.registry.clear();
                self.targets.clear();
                self.startup.clear();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn replay(&mut self, request: BufferedRequest) {
        match request {
            BufferedRequest::Send {
                msg_type,
                payload,
                page,
                extra,
                reply,
            } => {
                let outcome = self.dispatcher.send_message(
                    &mut self.registry,
                    &self.targets,
                    &mut self.locks,
                    &msg_type,
                    &payload,
                    &page,
                    &extra,
                );
                let _ = reply.send(outcome);
            }
            BufferedRequest::Broadcast {
                msg_type,
                payload,
                extra,
                reply,
            } => {
                let outcomes = self.dispatcher.broadcast_message(
                    &mut self.registry,
                    &self.targets,
                    &mut self.locks,
                    &msg_type,
                    &payload,
                    &extra,
                );
                let _ = reply.send(outcomes);
            }
        }
    }

    fn handle_request(&mut self, channel: &TargetChannel, request: ProcessRequest) -> RequestReply {
        match request {
            ProcessRequest::Register {
                page_url,
                manifest_url,
                window_id,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                debug!(channel = %channel.id(), %page, window_id, "target registered");
                self.targets.register_target(&page, channel);
                RequestReply::None
            }
            ProcessRequest::Unregister {
                page_url,
                manifest_url,
                window_id,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                debug!(channel = %channel.id(), %page, window_id, "window unregistered");
                self.targets.unregister_window(channel.id(), &page);
                RequestReply::None
            }
            ProcessRequest::ProcessShutdown => {
                debug!(channel = %channel.id(), "process shutdown");
                self.targets.remove_channel(channel.id());
                RequestReply::None
            }
            ProcessRequest::GetPendingMessages {
                msg_type,
                page_url,
                manifest_url,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                if !self.origin_matches(channel, &page) {
                    return RequestReply::None;
                }
                let key = RegistrationKey::new(msg_type, page);
                RequestReply::PendingMessages(self.registry.drain_pending(&key))
            }
            ProcessRequest::HasPendingMessages {
                msg_type,
                page_url,
                manifest_url,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                if !self.origin_matches(channel, &page) {
                    return RequestReply::None;
                }
                let key = RegistrationKey::new(msg_type, page);
                RequestReply::HasPending(self.registry.has_pending(&key))
            }
            ProcessRequest::AckMessage {
                msg_type,
                page_url,
                manifest_url,
                message_id,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                if self.origin_matches(channel, &page) {
                    let key = RegistrationKey::new(msg_type, page);
                    self.registry.ack(&key, &message_id);
                }
                RequestReply::None
            }
            ProcessRequest::HandleMessagesDone {
                msg_type,
                page_url,
                manifest_url,
                handled_count,
            } => {
                let page = PageAddress::new(page_url, manifest_url);
                if self.origin_matches(channel, &page) {
                    let key = WakeLockKey::compute(&msg_type, &page);
                    self.locks.release(&key, handled_count);
                }
                RequestReply::None
            }
        }
    }

    /// A stateful request is only honored if the claimed (manifest, page) is
    /// actually hosted by the originating channel.
    fn origin_matches(&self, channel: &TargetChannel, page: &PageAddress) -> bool {
        if self.targets.channel_hosts(channel.id(), page) {
            return true;
        }
        let err = ProtocolError::ManifestMismatch {
            channel: channel.id(),
            manifest_url: page.manifest_url.clone(),
            page_url: page.page_url.clone(),
        };
        warn!(error = %err, "rejecting protocol request");
        false
    }
}

impl BrokerHandle {
    /// Register a page's interest in a message type. Idempotent.
    pub fn register_page(&self, msg_type: &str, page: PageAddress) -> Result<()> {
        self.send(Command::RegisterPage {
            msg_type: msg_type.to_string(),
            page,
        })
    }

    /// Send one message to one page. Buffered until the registry is ready;
    /// the future resolves when the (possibly replayed) call completes.
    pub async fn send_message(
        &self,
        msg_type: &str,
        payload: Value,
        page: PageAddress,
        extra: Value,
    ) -> Result<SendOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Send {
            msg_type: msg_type.to_string(),
            payload,
            page,
            extra,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Send one message to every page registered for the type. Returns the
    /// independent per-page outcomes, keyed by full page address so pages
    /// sharing a URL under different manifests stay distinguishable.
    pub async fn broadcast_message(
        &self,
        msg_type: &str,
        payload: Value,
        extra: Value,
    ) -> Result<Vec<(PageAddress, SendOutcome)>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Broadcast {
            msg_type: msg_type.to_string(),
            payload,
            extra,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Flip the registry-ready flag, replaying anything buffered.
    pub fn set_ready(&self) -> Result<()> {
        self.send(Command::SetReady)
    }

    /// Feed one protocol request from a process-side channel.
    pub async fn process(
        &self,
        channel: TargetChannel,
        request: ProcessRequest,
    ) -> Result<RequestReply> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Process {
            channel,
            request,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Notify the broker that an application was uninstalled.
    pub fn notify_uninstall(&self, app_id: &str) -> Result<()> {
        self.send(Command::Uninstall {
            app_id: app_id.to_string(),
        })
    }

    /// Stop the broker, discarding all in-memory state.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| BrokerError::ChannelClosed)
    }
}
