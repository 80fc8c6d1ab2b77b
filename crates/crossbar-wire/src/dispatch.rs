//! Message dispatcher: interprets inbound messages and drives the tables.
//!
//! Every fault is handled here: it either becomes an `error` message to the
//! sender or a log line. Nothing an individual peer sends can take the
//! registry down.

use crate::command::{CommandEntry, RemoteRegistration};
use crate::message::WireMessage;
use crate::registry::Registry;

use crossbar_types::error::CrossbarError;
use crossbar_types::is_private;
use crossbar_types::redact::redact;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, trace, warn};

impl Registry {
    /// Handle one message that arrived on `channel`.
    pub(crate) fn dispatch(&self, channel: &str, message: WireMessage) {
        trace!(
            registry = %self.name(),
            channel = %channel,
            kind = message.kind(),
            correlation_id = ?message.correlation_id(),
            "Inbound message"
        );

        match message {
            WireMessage::Register { id, command } => self.on_register(channel, id, command),
            WireMessage::List => self.on_list(channel),
            WireMessage::ListResponse { commands } => self.on_list_response(channel, commands),
            WireMessage::Request {
                id,
                command,
                payload,
            } => self.on_request(channel, id, command, payload),
            WireMessage::Response { id, payload } => self.on_reply(channel, id, Ok(payload)),
            WireMessage::Error { id, reason } => self.on_reply(channel, id, Err(reason)),
            WireMessage::Event { event, payload } => self.on_event(channel, event, payload),
        }
    }

    fn on_register(&self, channel: &str, id: String, command: String) {
        if is_private(&command) {
            warn!(channel = %channel, command = %command, "Rejected remote registration of private command");
            self.reply(
                channel,
                WireMessage::Error {
                    id,
                    reason: format!("Private command cannot be registered remotely: {command}"),
                },
            );
            return;
        }

        match self.inner.commands.register_remote(&command, channel) {
            RemoteRegistration::Added => {
                info!(registry = %self.name(), channel = %channel, command = %command, "Remote command registered");
                self.reply(channel, ack(id));
            }
            RemoteRegistration::SameChannel => {
                debug!(channel = %channel, command = %command, "Repeated registration from owner");
                self.reply(channel, ack(id));
            }
            RemoteRegistration::Conflict => {
                warn!(channel = %channel, command = %command, "Registration conflict");
                self.reply(
                    channel,
                    WireMessage::Error {
                        id,
                        reason: CrossbarError::AlreadyRegistered(command).to_string(),
                    },
                );
            }
        }
    }

    fn on_list(&self, channel: &str) {
        let commands = self.inner.commands.local_public_names();
        debug!(channel = %channel, count = commands.len(), "Answering command list");
        self.reply(channel, WireMessage::ListResponse { commands });
    }

    fn on_list_response(&self, channel: &str, commands: Vec<String>) {
        let mut added = 0usize;
        for name in commands {
            if is_private(&name) {
                warn!(channel = %channel, command = %name, "Ignored private command in list");
                continue;
            }
            if self.inner.commands.upsert_remote(&name, channel) {
                added += 1;
            } else {
                debug!(channel = %channel, command = %name, "Kept local command over listed one");
            }
        }
        debug!(registry = %self.name(), channel = %channel, added, "Learned remote commands");
    }

    fn on_request(&self, channel: &str, id: String, command: String, payload: Value) {
        match self.inner.commands.get(&command) {
            Some(CommandEntry::Local { private: true, .. }) => {
                warn!(channel = %channel, command = %command, "Remote request for private command");
                self.reply(
                    channel,
                    WireMessage::Error {
                        id,
                        reason: CrossbarError::CommandNotFound(command).to_string(),
                    },
                );
            }
            Some(CommandEntry::Local { handler, .. }) => {
                debug!(
                    channel = %channel,
                    command = %command,
                    correlation_id = %id,
                    payload = %redact(&payload),
                    "Executing request"
                );
                let registry = self.clone();
                let origin = channel.to_string();
                // Handlers may call back into this channel, so they run off
                // the reader task.
                tokio::spawn(async move {
                    let reply_id = id.clone();
                    let outcome = AssertUnwindSafe(handler(payload)).catch_unwind().await;
                    let message = match outcome {
                        Ok(Ok(payload)) => WireMessage::Response { id, payload },
                        Ok(Err(e)) => {
                            warn!(command = %command, error = %format!("{e:#}"), "Handler failed");
                            WireMessage::Error {
                                id,
                                reason: CrossbarError::Handler(e).wire_reason(),
                            }
                        }
                        Err(_) => {
                            error!(command = %command, "Handler panicked");
                            WireMessage::Error {
                                id,
                                reason: format!("Handler panicked: {command}"),
                            }
                        }
                    };
                    // A result that cannot be sent (e.g. too large) still
                    // settles the caller.
                    if let Err(e) = registry.inner.channels.send(&origin, message) {
                        warn!(channel = %origin, command = %command, error = %e, "Failed to send result");
                        registry.reply(
                            &origin,
                            WireMessage::Error {
                                id: reply_id,
                                reason: e.to_string(),
                            },
                        );
                    }
                });
            }
            Some(CommandEntry::Remote { channel: target }) => {
                self.forward_request(channel, &target, id, command, payload);
            }
            None => match self.router_channel() {
                Some(router) if router != channel && !is_private(&command) => {
                    let router = router.to_string();
                    self.forward_request(channel, &router, id, command, payload);
                }
                _ => {
                    debug!(channel = %channel, command = %command, "Request for unknown command");
                    self.reply(
                        channel,
                        WireMessage::Error {
                            id,
                            reason: CrossbarError::CommandNotFound(command).to_string(),
                        },
                    );
                }
            },
        }
    }

    /// Relay a request this process does not own towards `target`.
    fn forward_request(
        &self,
        origin: &str,
        target: &str,
        id: String,
        command: String,
        payload: Value,
    ) {
        if target == origin {
            warn!(channel = %origin, command = %command, "Refusing to route a request back to its sender");
            self.reply(
                origin,
                WireMessage::Error {
                    id,
                    reason: CrossbarError::CommandNotFound(command).to_string(),
                },
            );
            return;
        }

        self.inner.routes.insert(&id, origin, target);
        let forwarded = WireMessage::Request {
            id: id.clone(),
            command: command.clone(),
            payload,
        };
        match self.inner.channels.send(target, forwarded) {
            Ok(()) => {
                debug!(
                    origin = %origin,
                    target = %target,
                    command = %command,
                    correlation_id = %id,
                    "Forwarded request"
                );
            }
            Err(e) => {
                self.inner.routes.take(&id);
                warn!(origin = %origin, target = %target, command = %command, error = %e, "Forward failed");
                self.reply(
                    origin,
                    WireMessage::Error {
                        id,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn on_reply(&self, channel: &str, id: String, outcome: Result<Value, String>) {
        if let Some(reply) = self.inner.replies.take(&id) {
            // The caller may have timed out meanwhile.
            let _ = reply.send(outcome.map_err(CrossbarError::Remote));
            return;
        }

        if let Some(route) = self.inner.routes.take(&id) {
            let message = match outcome {
                Ok(payload) => WireMessage::Response {
                    id: id.clone(),
                    payload,
                },
                Err(reason) => WireMessage::Error {
                    id: id.clone(),
                    reason,
                },
            };
            let kind = message.kind();
            if let Err(e) = self.inner.channels.send(&route.origin, message) {
                error!(
                    origin = %route.origin,
                    correlation_id = %id,
                    kind,
                    error = %e,
                    "Dropped reply: origin channel is gone"
                );
            } else {
                trace!(from = %channel, to = %route.origin, correlation_id = %id, "Relayed reply");
            }
            return;
        }

        error!(
            registry = %self.name(),
            channel = %channel,
            correlation_id = %id,
            "Undeliverable reply: no pending request or route"
        );
    }

    fn on_event(&self, channel: &str, event: String, payload: Value) {
        if is_private(&event) {
            warn!(channel = %channel, event = %event, "Dropped private event from peer");
            return;
        }
        trace!(channel = %channel, event = %event, "Inbound event");
        self.broadcast_event(&event, &payload, Some(channel));
    }
}

fn ack(id: String) -> WireMessage {
    WireMessage::Response {
        id,
        payload: Value::Null,
    }
}
