//! Channels: point-to-point transports between two registries.
//!
//! A channel is anything that implements [`Transport`] for the outbound half
//! plus an unbounded receiver for the inbound half. The end of the inbound
//! stream is the close notification. [`ChannelTable`] keeps at most one live
//! channel per remote identifier.

use crate::message::WireMessage;
use crossbar_types::error::CrossbarError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
}

impl From<WireError> for CrossbarError {
    fn from(e: WireError) -> Self {
        CrossbarError::Transport(e.to_string())
    }
}

/// Outbound half of a channel.
///
/// `send` must not block and must preserve order: messages sent on one
/// transport arrive at the peer in send order.
pub trait Transport: Send + Sync + 'static {
    /// Queue a message for delivery to the peer.
    fn send(&self, message: WireMessage) -> Result<(), WireError>;

    /// Stop accepting messages. The peer observes the close once the queue drains.
    fn close(&self) {}
}

/// A transport backed by an unbounded queue.
///
/// Used directly by in-memory channels, and by the TCP transport whose writer
/// task drains the queue onto the socket.
pub struct QueueTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
}

impl QueueTransport {
    /// Wrap the sending side of a queue.
    pub fn new(tx: mpsc::UnboundedSender<WireMessage>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl Transport for QueueTransport {
    fn send(&self, message: WireMessage) -> Result<(), WireError> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| WireError::ConnectionClosed),
            None => Err(WireError::ConnectionClosed),
        }
    }

    fn close(&self) {
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.take();
    }
}

/// Both halves of a channel, ready to be handed to `Registry::register_channel`.
pub struct ChannelLink {
    /// Outbound half.
    pub transport: Arc<dyn Transport>,
    /// Inbound half. `None` from `recv` means the peer went away.
    pub inbound: mpsc::UnboundedReceiver<WireMessage>,
}

impl ChannelLink {
    /// Bundle a transport with its inbound queue.
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<WireMessage>,
    ) -> Self {
        Self { transport, inbound }
    }
}

/// A registered channel.
pub(crate) struct ChannelEntry {
    transport: Arc<dyn Transport>,
    /// Distinguishes a reconnected channel from the one it replaced.
    generation: u64,
    reader: Option<AbortHandle>,
}

impl ChannelEntry {
    /// Close the transport and stop the inbound reader.
    pub(crate) fn shutdown(self) {
        self.transport.close();
        if let Some(reader) = self.reader {
            reader.abort();
        }
    }
}

/// Channel identifier → live transport.
pub(crate) struct ChannelTable {
    channels: DashMap<String, ChannelEntry>,
    next_generation: AtomicU64,
}

impl ChannelTable {
    pub(crate) fn new() -> Self {
        Self {
            channels: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Store a transport, returning its generation and the entry it replaced.
    pub(crate) fn insert(
        &self,
        id: &str,
        transport: Arc<dyn Transport>,
    ) -> (u64, Option<ChannelEntry>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.channels.insert(
            id.to_string(),
            ChannelEntry {
                transport,
                generation,
                reader: None,
            },
        );
        (generation, previous)
    }

    /// Attach the reader task of a channel, unless it was replaced meanwhile.
    pub(crate) fn set_reader(&self, id: &str, generation: u64, reader: AbortHandle) {
        match self.channels.get_mut(id) {
            Some(mut entry) if entry.generation == generation => entry.reader = Some(reader),
            _ => reader.abort(),
        }
    }

    /// Send a message over the channel registered as `id`.
    pub(crate) fn send(&self, id: &str, message: WireMessage) -> Result<(), CrossbarError> {
        let transport = self
            .channels
            .get(id)
            .map(|entry| Arc::clone(&entry.transport))
            .ok_or_else(|| CrossbarError::ChannelNotFound(id.to_string()))?;
        transport.send(message).map_err(CrossbarError::from)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<ChannelEntry> {
        self.channels.remove(id).map(|(_, entry)| entry)
    }

    /// Remove the channel only if it is still the given generation.
    pub(crate) fn remove_generation(&self, id: &str, generation: u64) -> Option<ChannelEntry> {
        self.channels
            .remove_if(id, |_, entry| entry.generation == generation)
            .map(|(_, entry)| entry)
    }

    /// Sorted channel identifiers.
    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _message: WireMessage) -> Result<(), WireError> {
            Ok(())
        }
    }

    #[test]
    fn test_queue_transport_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = QueueTransport::new(tx);
        transport.send(WireMessage::List).unwrap();
        transport.close();
        assert!(matches!(
            transport.send(WireMessage::List),
            Err(WireError::ConnectionClosed)
        ));
        assert_eq!(rx.try_recv().unwrap(), WireMessage::List);
        // Sender dropped on close, so the inbound side observes the end.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_insert_replaces_and_bumps_generation() {
        let table = ChannelTable::new();
        let (first, previous) = table.insert("hub", Arc::new(NullTransport));
        assert!(previous.is_none());
        let (second, previous) = table.insert("hub", Arc::new(NullTransport));
        assert!(previous.is_some());
        assert!(second > first);
        assert_eq!(table.ids(), vec!["hub".to_string()]);

        // A stale generation must not remove the replacement.
        assert!(table.remove_generation("hub", first).is_none());
        assert_eq!(table.ids(), vec!["hub".to_string()]);
        assert!(table.remove_generation("hub", second).is_some());
        assert!(table.ids().is_empty());
    }

    #[test]
    fn test_send_unknown_channel() {
        let table = ChannelTable::new();
        match table.send("nowhere", WireMessage::List) {
            Err(CrossbarError::ChannelNotFound(id)) => assert_eq!(id, "nowhere"),
            other => panic!("Expected ChannelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_ids_sorted() {
        let table = ChannelTable::new();
        table.insert("worker", Arc::new(NullTransport));
        table.insert("main", Arc::new(NullTransport));
        table.insert("ui", Arc::new(NullTransport));
        assert_eq!(table.ids(), vec!["main", "ui", "worker"]);
    }
}
