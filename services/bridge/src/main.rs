//! Bridge daemon: accepts exactly one control connection per process
//! lifetime and runs the broker session over it.
//!
//! Usage:
//!   bridge --config config/bridge.toml
//!   bridge --log-level debug

mod config;
mod context;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::BridgeConfig;
use crate::context::AppContext;

#[derive(Parser, Debug)]
#[command(name = "bridge")]
#[command(about = "Courier bridge daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    init_logging(args.log_level.as_deref().unwrap_or(&config.log.level));

    info!("starting Courier bridge");
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), "waiting for control connection");

    // One inbound connection per process lifetime; reconnection means a
    // fresh process.
    let (stream, peer) = listener.accept().await?;
    drop(listener);
    info!(%peer, "control connection accepted");

    let ctx = AppContext::new(&config);
    ctx.start(stream).await?;
    info!("bridge is ready and listening for commands");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = ctx.wait_for_shutdown() => {
                info!("shutdown command received");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !ctx.broker().is_running() {
                    info!("transport terminated; shutting down");
                    break;
                }
            }
        }
    }

    ctx.stop().await;
    info!("bridge stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();
}
