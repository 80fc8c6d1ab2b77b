//! Crossbar CLI: run a routing node, or call into / emit through a running one.

mod cli;
mod config;
mod node;

use crate::cli::*;
use clap::Parser;
use serde_json::Value;
use std::future::Future;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid --payload JSON: {e}"))
}

fn block_on<F: Future<Output = anyhow::Result<()>>>(future: F) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(future)
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => {
            let path = args.config.clone();
            let read = path.as_deref().map(config::read_config);
            let level = match &read {
                Some(Ok(c)) => c.log_level.clone(),
                _ => "info".to_string(),
            };
            init_tracing_stderr(&level);
            let node_config =
                config::apply_overrides(config::settle_config(path.as_deref(), read), &args);
            block_on(node::run(node_config, args.watch))
        }
        Commands::Call {
            connect,
            command,
            payload,
        } => {
            init_tracing_stderr("warn");
            parse_payload(&payload).and_then(|payload| {
                block_on(async move {
                    let result = node::call(&connect, &command, payload).await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                })
            })
        }
        Commands::Emit {
            connect,
            event,
            payload,
        } => {
            init_tracing_stderr("warn");
            parse_payload(&payload)
                .and_then(|payload| block_on(node::emit(&connect, &event, payload)))
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
