//! Configuration parsing for the tcp-sluice server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start
//!
//! Also defines [`BindRequest`], the immutable value a bridge consumes once
//! at startup.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};

/// Default listen backlog handed to the kernel.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// tcp-sluice: A TCP accept-queue bridge with credit-based flow control.
#[derive(Parser, Debug, Clone)]
#[command(name = "tcp-sluice")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "SLUICE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, env = "SLUICE_PORT", default_value_t = 7070)]
    pub port: u16,

    /// Kernel accept queue length
    #[arg(short, long, env = "SLUICE_BACKLOG", default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Set TCP_NODELAY on accepted connections
    #[arg(long, env = "SLUICE_NODELAY", default_value_t = false)]
    pub nodelay: bool,

    /// Set SO_REUSEADDR on the listening socket
    #[arg(long, env = "SLUICE_REUSE_ADDRESS", default_value_t = true, action = clap::ArgAction::Set)]
    pub reuse_address: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "SLUICE_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Build the bind request for this configuration.
    pub fn bind_request(&self) -> BindRequest {
        BindRequest::new(self.listen_addr())
            .with_backlog(self.backlog)
            .with_options(SocketOptions {
                nodelay: self.nodelay,
                reuse_address: self.reuse_address,
                only_v6: false,
            })
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0, // Random port
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 7070,
            backlog: DEFAULT_BACKLOG,
            nodelay: false,
            reuse_address: true,
            log_level: "info".into(),
            log_format: LogFormat::Text,
            otel_endpoint: None,
        }
    }
}

/// Options applied to the listening socket and to accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// TCP_NODELAY on every accepted connection.
    pub nodelay: bool,
    /// SO_REUSEADDR on the listener.
    pub reuse_address: bool,
    /// IPV6_V6ONLY on the listener; ignored for IPv4 endpoints.
    pub only_v6: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: false,
            reuse_address: true,
            only_v6: false,
        }
    }
}

/// What to bind: endpoint, backlog and socket options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    local_endpoint: SocketAddr,
    backlog: u32,
    options: SocketOptions,
}

impl BindRequest {
    /// Bind request for `local_endpoint` with default backlog and options.
    pub fn new(local_endpoint: SocketAddr) -> Self {
        Self {
            local_endpoint,
            backlog: DEFAULT_BACKLOG,
            options: SocketOptions::default(),
        }
    }

    #[must_use]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local_endpoint
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn options(&self) -> SocketOptions {
        self.options
    }
}
