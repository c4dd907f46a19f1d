//! mcp-relay server binary.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mcp_relay::config::{Args, Config, Transport};
use mcp_relay::error::{Error, Result};
use mcp_relay::http::HttpTransport;
use mcp_relay::transport::stdio::StdioTransport;
use mcp_relay::{Engine, SERVER_NAME, SERVER_VERSION};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // All logging goes to stderr; stdout stays pure JSON-RPC in stdio mode.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config: Config = args.into();
    if let Err(e) = run(config).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    info!("{SERVER_NAME} v{SERVER_VERSION}");
    info!("Transport: {:?}", config.transport);

    let engine = Engine::new();
    info!(
        "Registered {} tool(s), {} resource(s), {} prompt(s)",
        engine.tools.tool_count(),
        engine.resources.resource_count(),
        engine.prompts.prompt_count()
    );

    match config.transport {
        Transport::Stdio => {
            if config.daemon {
                return Err(Error::Internal(
                    "--daemon is only valid with the http transport".to_string(),
                ));
            }
            let transport = StdioTransport::new(engine.processor.clone(), engine.bus.clone());
            transport.run().await
        }
        Transport::Http => {
            if config.daemon {
                detach_from_terminal();
            }
            let transport = HttpTransport::new(
                config.http_config(),
                engine.processor.clone(),
                engine.bus.clone(),
                SERVER_NAME,
                SERVER_VERSION,
            );
            Arc::clone(&transport).serve().await
        }
    }
}

/// Daemon mode: survive the controlling terminal going away.
#[cfg(unix)]
fn detach_from_terminal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(mut hangup) => {
            tokio::spawn(async move {
                loop {
                    hangup.recv().await;
                    info!("SIGHUP ignored (daemon mode)");
                }
            });
        }
        Err(e) => error!("Failed to install SIGHUP handler: {e}"),
    }
}

#[cfg(not(unix))]
fn detach_from_terminal() {}
