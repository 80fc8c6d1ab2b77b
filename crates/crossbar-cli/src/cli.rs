//! Clap CLI definitions for Crossbar.

use clap::{Parser, Subcommand};
use crossbar_types::config::PeerAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  crossbar run --name main --listen 127.0.0.1:7400
  crossbar run --name worker --router main --peer main=127.0.0.1:7400
  crossbar call --connect 127.0.0.1:7400 --command main.ping
  crossbar emit --connect 127.0.0.1:7400 --event deployed --payload '{\"v\":2}'";

/// Crossbar: command and event routing between processes.
#[derive(Parser)]
#[command(name = "crossbar", version, after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until Ctrl+C.
    Run(RunArgs),
    /// Execute one command through a running node and print the result.
    Call {
        /// Address of the node to connect to.
        #[arg(long)]
        connect: String,
        /// Command name.
        #[arg(long)]
        command: String,
        /// JSON payload.
        #[arg(long, default_value = "null")]
        payload: String,
    },
    /// Emit one event through a running node.
    ///
    /// Connect to the hub so that every node sees the event. A leaf node
    /// only delivers it to its own listeners.
    Emit {
        /// Address of the hub (or of the node whose listeners should see it).
        #[arg(long)]
        connect: String,
        /// Event name.
        #[arg(long)]
        event: String,
        /// JSON payload.
        #[arg(long, default_value = "null")]
        payload: String,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Node name (overrides config).
    #[arg(long)]
    pub name: Option<String>,
    /// Address to accept channels on (overrides config).
    #[arg(long)]
    pub listen: Option<String>,
    /// Router channel id; omit to run as the hub (overrides config).
    #[arg(long)]
    pub router: Option<String>,
    /// Peer to connect to, as ID=ADDR. Repeatable; added to configured peers.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<PeerAddr>,
    /// Event to log when it arrives. Repeatable.
    #[arg(long = "watch")]
    pub watch: Vec<String>,
}

/// Parse an `ID=ADDR` peer argument.
pub fn parse_peer(raw: &str) -> Result<PeerAddr, String> {
    match raw.split_once('=') {
        Some((id, addr)) if !id.is_empty() && !addr.is_empty() => Ok(PeerAddr {
            id: id.to_string(),
            addr: addr.to_string(),
        }),
        _ => Err(format!("expected ID=ADDR, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let peer = parse_peer("main=127.0.0.1:7400").unwrap();
        assert_eq!(peer.id, "main");
        assert_eq!(peer.addr, "127.0.0.1:7400");
        assert!(parse_peer("main").is_err());
        assert!(parse_peer("=127.0.0.1:1").is_err());
        assert!(parse_peer("main=").is_err());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "crossbar",
            "run",
            "--name",
            "worker",
            "--router",
            "main",
            "--peer",
            "main=127.0.0.1:7400",
            "--watch",
            "deployed",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.name.as_deref(), Some("worker"));
                assert_eq!(args.router.as_deref(), Some("main"));
                assert_eq!(args.peers.len(), 1);
                assert_eq!(args.watch, vec!["deployed".to_string()]);
            }
            _ => panic!("Expected run"),
        }
    }

    #[test]
    fn test_call_defaults_payload_to_null() {
        let cli = Cli::try_parse_from([
            "crossbar",
            "call",
            "--connect",
            "127.0.0.1:7400",
            "--command",
            "main.ping",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { payload, .. } => assert_eq!(payload, "null"),
            _ => panic!("Expected call"),
        }
    }
}
