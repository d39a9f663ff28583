//! Poca CLI - watch and update values held by a Poca sync server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poca_client::{effect, ClientConfig, PocaClient};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "poca")]
#[command(about = "Watch and update values synchronized by a Poca server")]
struct Args {
    /// Server address (`host:port` or a full ws:// / wss:// URL)
    #[arg(short, long, default_value = "localhost:2341")]
    addr: String,

    /// Give up on lookups after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print each key's value now and whenever it changes
    Watch {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Replace a key's value with the given JSON
    Set { key: String, json: String },
    /// Fire a named signal
    Emit { signal: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = ClientConfig::default();
    if let Some(secs) = args.timeout {
        config = config.with_request_timeout(Duration::from_secs(secs));
    }

    let poca = PocaClient::with_config(&args.addr, config)?;
    poca.connect()
        .await
        .with_context(|| format!("failed to connect to {}", poca.url()))?;

    match args.command {
        Command::Watch { keys } => {
            let mut handles = Vec::with_capacity(keys.len());
            for key in &keys {
                let handle = poca
                    .reactive::<Value>(key)
                    .await
                    .with_context(|| format!("failed to look up {}", key))?;
                let shown = handle.clone();
                effect(move || match shown.value() {
                    Ok(value) => println!("{} = {}", shown.key(), value),
                    Err(e) => eprintln!("{}: {}", shown.key(), e),
                });
                handles.push(handle);
            }

            info!("Watching {} key(s), press Ctrl-C to stop", handles.len());
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            poca.close();
        }
        Command::Set { key, json } => {
            let value: Value = serde_json::from_str(&json)
                .with_context(|| format!("invalid JSON value for {}", key))?;
            poca.reactive_with_default(&key, value)?;
            poca.shutdown().await;
            info!("Set {}", key);
        }
        Command::Emit { signal } => {
            poca.emit(&signal);
            poca.shutdown().await;
            info!("Emitted {}", signal);
        }
    }

    Ok(())
}
