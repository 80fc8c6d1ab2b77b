//! The `run`, `call` and `emit` commands.

use anyhow::Context;
use crossbar_types::config::{NodeConfig, RegistryConfig};
use crossbar_types::redact::redact;
use crossbar_wire::{callback, tcp, Registry};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Delay between attempts to reach a configured peer.
const PEER_RETRY: Duration = Duration::from_secs(2);

/// Register the commands every node serves.
pub async fn register_builtin_commands(registry: &Registry) -> anyhow::Result<()> {
    let node = registry.name().to_string();
    let handle = registry.clone();
    registry
        .register_command(&format!("{node}.ping"), move |_payload: Value| {
            let node = handle.name().to_string();
            let router = handle.router_channel().map(str::to_string);
            let channels = handle.list_channels();
            async move { Ok(json!({ "node": node, "router": router, "channels": channels })) }
        })
        .await
        .context("registering ping")?;
    registry
        .register_command(&format!("{node}.echo"), |payload: Value| async move {
            Ok(payload)
        })
        .await
        .context("registering echo")?;
    Ok(())
}

/// Boot a node and serve until Ctrl+C.
pub async fn run(config: NodeConfig, watch: Vec<String>) -> anyhow::Result<()> {
    let mut registry_config = config.registry.clone();
    registry_config.name = Some(config.node_name().to_string());
    let registry = Registry::new(registry_config);
    info!(
        node = %registry.name(),
        router = ?registry.router_channel(),
        timeout_ms = ?registry.config().request_timeout_ms,
        "Starting node"
    );

    if let Some(addr) = &config.listen_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(addr = %listener.local_addr()?, "Listening for channels");
        tokio::spawn(tcp::serve(listener, registry.clone()));
    }

    for peer in &config.peers {
        tokio::spawn(keep_connected(
            registry.clone(),
            peer.id.clone(),
            peer.addr.clone(),
        ));
    }

    for event in watch {
        let name = event.clone();
        registry.add_event_listener(
            &event,
            callback(move |payload| {
                info!(event = %name, payload = %redact(payload), "Event received")
            }),
        );
    }

    register_builtin_commands(&registry).await?;

    tokio::signal::ctrl_c().await?;
    info!(node = %registry.name(), "Shutting down");
    for id in registry.list_channels() {
        registry.close_channel(&id);
    }
    Ok(())
}

/// Connect to a peer, reconnecting whenever the connection cannot be made.
///
/// Only the initial connection is retried; once the link is registered a
/// later drop is left to the peer to re-establish.
async fn keep_connected(registry: Registry, id: String, addr: String) {
    loop {
        match tcp::connect(addr.as_str(), registry.name()).await {
            Ok((remote_id, link)) => {
                if remote_id != id {
                    warn!(expected = %id, announced = %remote_id, "Peer announced a different id");
                }
                info!(channel = %id, addr = %addr, "Connected to peer");
                registry.register_channel(id, link);
                return;
            }
            Err(e) => {
                debug!(channel = %id, addr = %addr, error = %e, "Peer not reachable, retrying");
                tokio::time::sleep(PEER_RETRY).await;
            }
        }
    }
}

/// Join the node at `addr` as a short-lived leaf routed through it.
async fn transient_leaf(addr: &str) -> anyhow::Result<(Registry, String)> {
    let local_id = format!("cli-{}", uuid::Uuid::new_v4());
    let (remote_id, link) = tcp::connect(addr, &local_id)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    let registry = Registry::new(RegistryConfig::leaf(local_id, remote_id.clone()));
    registry.register_channel(remote_id.clone(), link);
    Ok((registry, remote_id))
}

/// Execute one command through the node at `addr`.
pub async fn call(addr: &str, command: &str, payload: Value) -> anyhow::Result<Value> {
    let (registry, remote_id) = transient_leaf(addr).await?;
    let result = registry.execute_command(command, payload).await;
    registry.close_channel(&remote_id);
    Ok(result?)
}

/// Emit one event through the node at `addr`.
///
/// Only a hub passes the event on to other nodes. Aimed at a leaf, it reaches
/// that leaf's listeners and nothing else, which is reported as a warning.
pub async fn emit(addr: &str, event: &str, payload: Value) -> anyhow::Result<()> {
    let (registry, remote_id) = transient_leaf(addr).await?;
    registry.emit_event(event, payload);
    // Messages on one channel are handled in order, so an answered ping means
    // the event was dispatched before we hang up.
    match registry
        .execute_command(&format!("{remote_id}.ping"), Value::Null)
        .await
    {
        Ok(pong) => {
            if let Some(router) = pong["router"].as_str() {
                warn!(
                    node = %remote_id,
                    router = %router,
                    "Node is a leaf, the event was not passed on to other nodes"
                );
            }
        }
        Err(e) => error!(node = %remote_id, error = %e, "Could not confirm event delivery"),
    }
    registry.close_channel(&remote_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve_node(name: &str) -> (Registry, String) {
        let registry = Registry::new(RegistryConfig::hub(name));
        register_builtin_commands(&registry).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(tcp::serve(listener, registry.clone()));
        (registry, addr)
    }

    #[tokio::test]
    async fn test_builtin_ping_and_echo() {
        let registry = Registry::new(RegistryConfig::hub("main"));
        register_builtin_commands(&registry).await.unwrap();

        let pong = registry.execute_command("main.ping", Value::Null).await.unwrap();
        assert_eq!(pong["node"], "main");
        assert_eq!(pong["router"], Value::Null);
        assert_eq!(pong["channels"], json!([]));

        let echoed = registry
            .execute_command("main.echo", json!({"x": [1, 2]}))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"x": [1, 2]}));
    }

    #[tokio::test]
    async fn test_call_through_running_node() {
        let (_node, addr) = serve_node("main").await;
        let result = call(&addr, "main.echo", json!("hello")).await.unwrap();
        assert_eq!(result, json!("hello"));

        let err = call(&addr, "nope", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[tokio::test]
    async fn test_emit_reaches_node_listeners() {
        let (node, addr) = serve_node("main").await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        node.add_event_listener(
            "deployed",
            callback(move |payload| {
                assert_eq!(payload, &json!({"v": 2}));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        emit(&addr, "deployed", json!({"v": 2})).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_at_leaf_stays_local() {
        let (hub, hub_addr) = serve_node("main").await;
        let worker = Registry::new(RegistryConfig::leaf("worker", "main"));
        let (remote_id, link) = tcp::connect(hub_addr.as_str(), "worker").await.unwrap();
        worker.register_channel(remote_id, link);
        register_builtin_commands(&worker).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let worker_addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(tcp::serve(listener, worker.clone()));

        let pong = worker.execute_command("worker.ping", Value::Null).await.unwrap();
        assert_eq!(pong["router"], "main");

        let on_worker = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&on_worker);
        worker.add_event_listener(
            "deployed",
            callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let on_hub = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&on_hub);
        hub.add_event_listener(
            "deployed",
            callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        emit(&worker_addr, "deployed", Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(on_worker.load(Ordering::SeqCst), 1);
        assert_eq!(on_hub.load(Ordering::SeqCst), 0);
    }
}
