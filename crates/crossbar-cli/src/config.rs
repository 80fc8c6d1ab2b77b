//! Node configuration loading.

use crate::cli::RunArgs;
use crossbar_types::config::NodeConfig;
use crossbar_types::error::{CrossbarError, CrossbarResult};
use std::path::Path;
use tracing::{info, warn};

/// Read and parse a TOML config file.
pub fn read_config(path: &Path) -> CrossbarResult<NodeConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CrossbarError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| CrossbarError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Resolve the outcome of [`read_config`], falling back to defaults.
///
/// Kept apart from reading so the log level can come from the file before
/// tracing is initialised, while the outcome is still logged afterwards.
pub fn settle_config(path: Option<&Path>, read: Option<CrossbarResult<NodeConfig>>) -> NodeConfig {
    match (path, read) {
        (Some(path), Some(Ok(config))) => {
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        (Some(path), Some(Err(e))) => {
            warn!(error = %e, path = %path.display(), "Failed to load config, using defaults");
            NodeConfig::default()
        }
        _ => {
            info!("No config file given, using defaults");
            NodeConfig::default()
        }
    }
}

/// Apply command-line overrides on top of the file configuration.
pub fn apply_overrides(mut config: NodeConfig, args: &RunArgs) -> NodeConfig {
    if let Some(name) = &args.name {
        config.registry.name = Some(name.clone());
    }
    if let Some(listen) = &args.listen {
        config.listen_addr = Some(listen.clone());
    }
    if let Some(router) = &args.router {
        config.registry.router_channel = Some(router.clone());
    }
    for peer in &args.peers {
        config.peers.retain(|p| p.id != peer.id);
        config.peers.push(peer.clone());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_types::config::PeerAddr;
    use std::io::Write;

    #[test]
    fn test_read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "main"
listen_addr = "127.0.0.1:7400"
log_level = "debug"
"#
        )
        .unwrap();

        let config = read_config(file.path()).unwrap();
        assert_eq!(config.node_name(), "main");
        assert_eq!(config.listen_addr.as_deref(), Some("127.0.0.1:7400"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_read_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            read_config(&missing),
            Err(CrossbarError::Config(_))
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "name = [").unwrap();
        match read_config(&bad) {
            Err(CrossbarError::Config(msg)) => assert!(msg.contains("failed to parse")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_settle_config_falls_back_to_defaults() {
        let path = Path::new("broken.toml");
        let config = settle_config(
            Some(path),
            Some(Err(CrossbarError::Config("boom".to_string()))),
        );
        assert_eq!(config, NodeConfig::default());
        assert_eq!(settle_config(None, None), NodeConfig::default());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = NodeConfig::default();
        config.registry.name = Some("from-file".to_string());
        config.peers.push(PeerAddr {
            id: "main".to_string(),
            addr: "10.0.0.1:7400".to_string(),
        });

        let args = RunArgs {
            name: Some("cli".to_string()),
            router: Some("main".to_string()),
            peers: vec![PeerAddr {
                id: "main".to_string(),
                addr: "127.0.0.1:7400".to_string(),
            }],
            ..RunArgs::default()
        };
        let config = apply_overrides(config, &args);
        assert_eq!(config.node_name(), "cli");
        assert_eq!(config.registry.router_channel.as_deref(), Some("main"));
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].addr, "127.0.0.1:7400");
    }
}
