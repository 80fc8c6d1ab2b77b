//! Shared helpers for the routing tests.

#![allow(dead_code)]

use crossbar_types::config::RegistryConfig;
use crossbar_wire::{memory, ChannelLink, Registry, WireMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn hub(name: &str) -> Registry {
    Registry::new(RegistryConfig::hub(name))
}

pub fn leaf(name: &str, router: &str) -> Registry {
    Registry::new(RegistryConfig::leaf(name, router))
}

/// Connect two registries; each sees the other under its name.
pub fn wire(a: &Registry, b: &Registry) {
    let (a_end, b_end) = memory::pair();
    a.register_channel(b.name(), a_end);
    b.register_channel(a.name(), b_end);
}

/// Register a channel `id` on `registry` and return the far end, so the test
/// can speak the wire protocol directly.
pub fn raw_peer(registry: &Registry, id: &str) -> ChannelLink {
    let (ours, theirs) = memory::pair();
    registry.register_channel(id, theirs);
    ours
}

pub async fn recv(link: &mut ChannelLink) -> WireMessage {
    tokio::time::timeout(Duration::from_secs(2), link.inbound.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Let in-flight messages drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Count how often `event` fires on `registry`.
pub fn count_events(registry: &Registry, event: &str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let _subscription = registry.add_event_listener(
        event,
        crossbar_wire::callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    hits
}

pub fn hits(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn command_names(registry: &Registry) -> Vec<String> {
    registry
        .list_commands()
        .into_iter()
        .map(|c| c.name)
        .collect()
}
