//! Registry: the per-process command and event router.
//!
//! A [`Registry`] owns the channel, command, reply and route tables plus the
//! listener table. Application code registers and executes commands and emits
//! events through it; inbound messages from every channel are handled by the
//! dispatcher (see `dispatch.rs`).
//!
//! Topology: a registry without a router channel is the hub. Leaves forward
//! unresolved commands and all outbound events to their router. Public
//! command registrations are broadcast directly to every connected channel,
//! while events only travel leaf → hub → other leaves, so each process sees
//! an event exactly once even when leaves are also wired to each other.

use crate::channel::{ChannelLink, ChannelTable};
use crate::command::{handler, CommandEntry, CommandInfo, CommandTable};
use crate::listener::{EventCallback, ListenerTable, Subscription};
use crate::message::WireMessage;
use crate::tracker::{new_correlation_id, ReplyTracker, RouteTracker};

use crossbar_types::config::RegistryConfig;
use crossbar_types::error::{CrossbarError, CrossbarResult};
use crossbar_types::is_private;
use crossbar_types::redact::redact;
use futures::future::try_join_all;
use serde_json::Value;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

pub(crate) struct RegistryInner {
    pub(crate) config: RegistryConfig,
    pub(crate) channels: ChannelTable,
    pub(crate) commands: CommandTable,
    pub(crate) replies: ReplyTracker,
    pub(crate) routes: RouteTracker,
    pub(crate) listeners: ListenerTable,
}

/// Per-process command and event router. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry with empty tables.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                channels: ChannelTable::new(),
                commands: CommandTable::new(),
                replies: ReplyTracker::new(),
                routes: RouteTracker::new(),
                listeners: ListenerTable::new(),
            }),
        }
    }

    /// Human-readable identifier, `"anonymous"` if unset.
    pub fn name(&self) -> &str {
        self.inner.config.name.as_deref().unwrap_or("anonymous")
    }

    /// The channel unresolved work is forwarded to. `None` on the hub.
    pub fn router_channel(&self) -> Option<&str> {
        self.inner.config.router_channel.as_deref()
    }

    /// The settings this registry was created with.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------------

    /// Wire a channel to the peer known as `id` and ask it for its commands.
    ///
    /// Registering an id that is already present replaces the old transport
    /// without purging the commands bound to it (reconnect). Must be called
    /// from within a Tokio runtime.
    pub fn register_channel(&self, id: impl Into<String>, link: ChannelLink) {
        let id = id.into();
        let ChannelLink { transport, inbound } = link;

        let (generation, previous) = self.inner.channels.insert(&id, transport);
        if let Some(previous) = previous {
            info!(channel = %id, "Replacing existing channel");
            previous.shutdown();
        }

        let reader = tokio::spawn(self.clone().read_loop(id.clone(), generation, inbound));
        self.inner
            .channels
            .set_reader(&id, generation, reader.abort_handle());

        info!(registry = %self.name(), channel = %id, "Channel registered");
        if let Err(e) = self.inner.channels.send(&id, WireMessage::List) {
            warn!(channel = %id, error = %e, "Failed to request command list");
        }
    }

    /// Close the channel to `id` as if its transport had gone away.
    ///
    /// Returns `false` if no such channel exists.
    pub fn close_channel(&self, id: &str) -> bool {
        match self.inner.channels.remove(id) {
            Some(entry) => {
                entry.shutdown();
                self.teardown_channel(id);
                true
            }
            None => false,
        }
    }

    /// Identifiers of all connected channels, sorted.
    pub fn list_channels(&self) -> Vec<String> {
        self.inner.channels.ids()
    }

    async fn read_loop(
        self,
        channel: String,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<WireMessage>,
    ) {
        while let Some(message) = inbound.recv().await {
            self.dispatch(&channel, message);
        }
        // The peer closed. A replacement channel with the same id stays.
        if let Some(entry) = self.inner.channels.remove_generation(&channel, generation) {
            info!(registry = %self.name(), channel = %channel, "Channel closed by peer");
            entry.shutdown();
            self.teardown_channel(&channel);
        }
    }

    /// Forget everything that depended on a channel that no longer exists.
    fn teardown_channel(&self, channel: &str) {
        let purged = self.inner.commands.purge_channel(channel);
        if !purged.is_empty() {
            info!(channel = %channel, commands = ?purged, "Purged remote commands");
        }

        let failed = self.inner.replies.fail_channel(channel);
        if failed > 0 {
            warn!(channel = %channel, count = failed, "Failed pending requests on closed channel");
        }

        for (id, route) in self.inner.routes.drain_channel(channel) {
            if route.origin == channel {
                debug!(correlation_id = %id, "Dropped route whose origin closed");
                continue;
            }
            let reason = CrossbarError::ChannelClosed(channel.to_string()).to_string();
            self.reply(&route.origin, WireMessage::Error { id, reason });
        }
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Register a command handled by this process.
    ///
    /// Names starting with `_` are private and stay local. Public names are
    /// announced to every connected channel; the call completes once all of
    /// them acknowledged, and fails (rolling the local entry back) on the
    /// first rejection. Peers that disconnect before answering are skipped.
    pub async fn register_command<F, Fut>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> CrossbarResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = name.into();
        self.inner.commands.insert_local(&name, handler(f))?;

        if is_private(&name) {
            debug!(command = %name, "Registered private command");
            return Ok(());
        }

        let mut acks = Vec::new();
        for channel in self.inner.channels.ids() {
            let id = new_correlation_id();
            let message = WireMessage::Register {
                id: id.clone(),
                command: name.clone(),
            };
            match self.send_tracked(&channel, &id, message) {
                Ok(rx) => acks.push(self.await_ack(channel, id, &name, rx)),
                Err(e) => {
                    debug!(channel = %channel, command = %name, error = %e, "Skipped unreachable peer");
                }
            }
        }

        let peers = acks.len();
        if let Err(e) = try_join_all(acks).await {
            warn!(command = %name, error = %e, "Registration rejected, rolling back");
            self.inner.commands.remove_local(&name);
            return Err(e);
        }

        info!(registry = %self.name(), command = %name, peers, "Registered command");
        Ok(())
    }

    /// Wait for one peer's answer to a registration. Only an actual answer
    /// (or a timeout) can reject it; a peer that went away cannot.
    async fn await_ack(
        &self,
        channel: String,
        id: String,
        command: &str,
        rx: oneshot::Receiver<CrossbarResult<Value>>,
    ) -> CrossbarResult<()> {
        match self.await_reply(id, command, rx).await {
            Ok(_) => Ok(()),
            Err(CrossbarError::ChannelClosed(_) | CrossbarError::ChannelNotFound(_)) => {
                debug!(channel = %channel, command = %command, "Peer left before acknowledging");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Execute a command wherever it lives.
    ///
    /// Local commands run in place. Remote ones are sent to their channel,
    /// unknown public ones to the router channel; the call then waits for the
    /// matching `response` or `error`.
    pub async fn execute_command(&self, name: &str, payload: Value) -> CrossbarResult<Value> {
        match self.inner.commands.get(name) {
            Some(CommandEntry::Local { handler, .. }) => {
                trace!(command = %name, "Executing local command");
                handler(payload).await.map_err(CrossbarError::Handler)
            }
            Some(CommandEntry::Remote { channel }) => self.request(&channel, name, payload).await,
            // Private names never leave the process.
            None if is_private(name) => Err(CrossbarError::CommandNotFound(name.to_string())),
            None => match self.router_channel() {
                Some(router) => self.request(router, name, payload).await,
                None => Err(CrossbarError::CommandNotFound(name.to_string())),
            },
        }
    }

    /// Snapshot of the command table, sorted by name.
    pub fn list_commands(&self) -> Vec<CommandInfo> {
        self.inner.commands.snapshot()
    }

    async fn request(&self, channel: &str, name: &str, payload: Value) -> CrossbarResult<Value> {
        let id = new_correlation_id();
        debug!(
            channel = %channel,
            command = %name,
            correlation_id = %id,
            payload = %redact(&payload),
            "Sending request"
        );
        let message = WireMessage::Request {
            id: id.clone(),
            command: name.to_string(),
            payload,
        };
        let rx = self.send_tracked(channel, &id, message)?;
        self.await_reply(id, name, rx).await
    }

    /// Track `id` and send `message`; untracks again if the send fails.
    fn send_tracked(
        &self,
        channel: &str,
        id: &str,
        message: WireMessage,
    ) -> CrossbarResult<oneshot::Receiver<CrossbarResult<Value>>> {
        let rx = self.inner.replies.insert(id, channel);
        if let Err(e) = self.inner.channels.send(channel, message) {
            self.inner.replies.discard(id);
            return Err(e);
        }
        Ok(rx)
    }

    async fn await_reply(
        &self,
        id: String,
        command: &str,
        rx: oneshot::Receiver<CrossbarResult<Value>>,
    ) -> CrossbarResult<Value> {
        let outcome = match self.inner.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.replies.discard(&id);
                    warn!(command = %command, correlation_id = %id, "Request timed out");
                    return Err(CrossbarError::Timeout {
                        command: command.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| {
            Err(CrossbarError::Transport(
                "reply tracker dropped before completion".to_string(),
            ))
        })
    }

    /// Send a message produced by the dispatcher; failures are only logged.
    pub(crate) fn reply(&self, channel: &str, message: WireMessage) {
        let kind = message.kind();
        if let Err(e) = self.inner.channels.send(channel, message) {
            warn!(channel = %channel, kind, error = %e, "Failed to send reply");
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Emit an event from this process.
    pub fn emit_event(&self, name: &str, payload: Value) {
        self.broadcast_event(name, &payload, None);
    }

    /// Deliver an event locally, then propagate it.
    ///
    /// `origin` is the channel the event arrived on, or `None` when this
    /// process is the emitter. Leaves only forward their own events to the
    /// router; the hub fans out to every channel except the origin.
    pub(crate) fn broadcast_event(&self, name: &str, payload: &Value, origin: Option<&str>) {
        for callback in self.inner.listeners.snapshot(name) {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                error!(event = %name, "Event listener panicked");
            }
        }

        if is_private(name) {
            return;
        }

        let message = || WireMessage::Event {
            event: name.to_string(),
            payload: payload.clone(),
        };

        match self.router_channel() {
            Some(router) => {
                if origin.is_some() {
                    return;
                }
                if let Err(e) = self.inner.channels.send(router, message()) {
                    warn!(event = %name, router = %router, error = %e, "Failed to forward event");
                }
            }
            None => {
                for channel in self.inner.channels.ids() {
                    if Some(channel.as_str()) == origin {
                        continue;
                    }
                    if let Err(e) = self.inner.channels.send(&channel, message()) {
                        warn!(event = %name, channel = %channel, error = %e, "Failed to relay event");
                    }
                }
            }
        }
    }

    /// Listen for `name`. Listeners run in registration order.
    pub fn add_event_listener(&self, name: &str, callback: EventCallback) -> Subscription {
        self.inner.listeners.add(name, Arc::clone(&callback));
        Subscription::new(self.clone(), name.to_string(), callback)
    }

    /// Remove `callback` from `name`. Returns whether anything was removed.
    pub fn remove_event_listener(&self, name: &str, callback: &EventCallback) -> bool {
        self.inner.listeners.remove(name, callback)
    }

    /// Number of local listeners for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.listeners.count(name)
    }

    /// Number of outstanding calls this process is waiting on.
    pub fn pending_requests(&self) -> usize {
        self.inner.replies.len()
    }

    /// Number of requests this process is forwarding for others.
    pub fn pending_routes(&self) -> usize {
        self.inner.routes.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name())
            .field("router_channel", &self.router_channel())
            .field("channels", &self.list_channels())
            .finish_non_exhaustive()
    }
}
