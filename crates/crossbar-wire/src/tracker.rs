//! Correlation bookkeeping.
//!
//! The reply tracker holds the continuation of every call this process
//! originated. The route tracker remembers, for requests this process only
//! forwards, which channel the eventual reply goes back to.

use crossbar_types::error::{CrossbarError, CrossbarResult};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

/// Generate a fresh correlation ID.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct PendingRequest {
    /// Channel the request left on.
    channel: String,
    reply: oneshot::Sender<CrossbarResult<Value>>,
}

pub(crate) struct ReplyTracker {
    pending: DashMap<String, PendingRequest>,
}

impl ReplyTracker {
    pub(crate) fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Start tracking `id`; the receiver completes when a reply arrives.
    pub(crate) fn insert(
        &self,
        id: &str,
        channel: &str,
    ) -> oneshot::Receiver<CrossbarResult<Value>> {
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            id.to_string(),
            PendingRequest {
                channel: channel.to_string(),
                reply,
            },
        );
        rx
    }

    /// Stop tracking `id` and hand back its continuation.
    pub(crate) fn take(&self, id: &str) -> Option<oneshot::Sender<CrossbarResult<Value>>> {
        self.pending.remove(id).map(|(_, pending)| pending.reply)
    }

    /// Complete the call waiting on `id`. Returns `false` if nothing was waiting.
    pub(crate) fn resolve(&self, id: &str, outcome: CrossbarResult<Value>) -> bool {
        match self.take(id) {
            Some(reply) => {
                // The caller may have given up (timeout, dropped future).
                let _ = reply.send(outcome);
                true
            }
            None => false,
        }
    }

    pub(crate) fn discard(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Fail every call that left on `channel`. Returns how many were failed.
    pub(crate) fn fail_channel(&self, channel: &str) -> usize {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.value().channel == channel)
            .map(|e| e.key().clone())
            .collect();
        for id in &ids {
            self.resolve(id, Err(CrossbarError::ChannelClosed(channel.to_string())));
        }
        ids.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Where a forwarded request came from and where it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RouteEntry {
    /// Channel the request arrived on; the reply is relayed back here.
    pub(crate) origin: String,
    /// Channel the request was forwarded to.
    pub(crate) target: String,
}

pub(crate) struct RouteTracker {
    routes: DashMap<String, RouteEntry>,
}

impl RouteTracker {
    pub(crate) fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, id: &str, origin: &str, target: &str) {
        self.routes.insert(
            id.to_string(),
            RouteEntry {
                origin: origin.to_string(),
                target: target.to_string(),
            },
        );
    }

    pub(crate) fn take(&self, id: &str) -> Option<RouteEntry> {
        self.routes.remove(id).map(|(_, route)| route)
    }

    /// Remove every route that starts or ends at `channel`.
    pub(crate) fn drain_channel(&self, channel: &str) -> Vec<(String, RouteEntry)> {
        let ids: Vec<String> = self
            .routes
            .iter()
            .filter(|e| e.value().origin == channel || e.value().target == channel)
            .map(|e| e.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.take(&id).map(|route| (id, route)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}
