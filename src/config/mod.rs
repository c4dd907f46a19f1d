//! Configuration for the relay server.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::http::sse::DEFAULT_KEEPALIVE_INTERVAL_MS;
use crate::http::HttpConfig;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dual-transport (stdio + Streamable HTTP/SSE) MCP server")]
pub struct Args {
    /// Transport mode: stdio or http
    #[arg(short, long, default_value = "http", env = "MCP_RELAY_TRANSPORT")]
    pub transport: Transport,

    /// HTTP port (http transport only)
    #[arg(short, long, env = "MCP_RELAY_PORT")]
    pub port: Option<u16>,

    /// HTTP port, as a bare trailing number
    #[arg(value_name = "PORT")]
    pub port_positional: Option<u16>,

    /// Detach from the controlling terminal (ignore SIGHUP; http only)
    #[arg(short, long, env = "MCP_RELAY_DAEMON")]
    pub daemon: bool,

    /// Endpoint path for the HTTP transport
    #[arg(long, default_value = "/mcp", env = "MCP_RELAY_PATH")]
    pub path: String,

    /// Allowed CORS origins: * or a comma-separated list
    #[arg(long, default_value = "*", env = "MCP_RELAY_CORS_ORIGINS")]
    pub cors_origins: String,

    /// SSE keepalive interval in milliseconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_INTERVAL_MS, env = "MCP_RELAY_KEEPALIVE_MS")]
    pub keepalive_ms: u64,

    /// Enable debug logging
    #[arg(long, env = "MCP_RELAY_DEBUG")]
    pub debug: bool,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    #[default]
    Http,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub port: u16,
    pub daemon: bool,
    pub path: String,
    pub cors_origins: String,
    pub keepalive_ms: u64,
    pub debug: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            transport: args.transport,
            // A bare trailing number wins over the flag form.
            port: args
                .port_positional
                .or(args.port)
                .unwrap_or(DEFAULT_PORT),
            daemon: args.daemon,
            path: args.path,
            cors_origins: args.cors_origins,
            keepalive_ms: args.keepalive_ms,
            debug: args.debug,
        }
    }
}

impl Config {
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            port: self.port,
            path: self.path.clone(),
            cors_enabled: true,
            cors_origins: self.cors_origins.clone(),
            keepalive_interval_ms: self.keepalive_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Http,
            port: DEFAULT_PORT,
            daemon: false,
            path: "/mcp".to_string(),
            cors_origins: "*".to_string(),
            keepalive_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            debug: false,
        }
    }
}
